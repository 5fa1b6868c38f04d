// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of a coordinator's renewal counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenewalSnapshot {
	/// Rounds started; each has at most one renewal call outstanding at a time.
	pub rounds: u64,
	/// Rounds that stored a new credential.
	pub renewed: u64,
	/// Rounds that ended in an [`AuthFailure`](crate::error::AuthFailure), including
	/// abandoned ones.
	pub failed: u64,
	/// Callers that waited on a round led by someone else.
	pub joined: u64,
}

/// Lock-free renewal counters owned by a [`RefreshCoordinator`](super::RefreshCoordinator).
#[derive(Debug, Default)]
pub struct RenewalMetrics {
	rounds: AtomicU64,
	renewed: AtomicU64,
	failed: AtomicU64,
	joined: AtomicU64,
}
impl RenewalMetrics {
	/// Reads every counter.
	pub fn snapshot(&self) -> RenewalSnapshot {
		RenewalSnapshot {
			rounds: self.rounds.load(Ordering::Relaxed),
			renewed: self.renewed.load(Ordering::Relaxed),
			failed: self.failed.load(Ordering::Relaxed),
			joined: self.joined.load(Ordering::Relaxed),
		}
	}

	pub(crate) fn round_started(&self) {
		self.rounds.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn round_settled(&self, renewed: bool) {
		let counter = if renewed { &self.renewed } else { &self.failed };

		counter.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn caller_joined(&self) {
		self.joined.fetch_add(1, Ordering::Relaxed);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn snapshot_reflects_settled_rounds() {
		let metrics = RenewalMetrics::default();

		metrics.round_started();
		metrics.caller_joined();
		metrics.caller_joined();
		metrics.round_settled(false);
		metrics.round_started();
		metrics.round_settled(true);

		assert_eq!(
			metrics.snapshot(),
			RenewalSnapshot { rounds: 2, renewed: 1, failed: 1, joined: 2 }
		);
	}
}
