//! Time source used by every credential freshness decision.

// self
use crate::_prelude::*;

/// Source of the current instant.
///
/// The coordinator never reads the wall clock itself; callers (the request pipeline and
/// navigation guard) take a reading here and pass it down explicitly so freshness checks
/// stay deterministic under test.
pub trait Clock: Send + Sync {
	/// Returns the current UTC instant.
	fn now(&self) -> OffsetDateTime;
}

/// [`Clock`] backed by the system wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}
