//! Session teardown: the single place that reacts to a lost session.
//!
//! When a renewal round fails after clearing a live credential, every request and
//! navigation that joined that round observes the same [`RenewalError`]. Only the first
//! one to report it triggers the [`SessionSink`]; the rest are absorbed. Each teardown also
//! bumps the session epoch so cached per-session state (the materialized route table) is
//! rebuilt after the next login.

// self
use crate::{_prelude::*, renewal::RenewalError};

/// Host-application hook invoked when the session is lost (navigate to login, reset UI).
pub trait SessionSink
where
	Self: Send + Sync,
{
	/// Called once per lost session with the location the user was on, if known.
	fn on_session_terminated(&self, return_to: Option<&str>);
}

/// Sink that ignores terminations; used when no host hook is registered.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopSink;
impl SessionSink for NoopSink {
	fn on_session_terminated(&self, _return_to: Option<&str>) {}
}

#[derive(Debug, Default)]
struct TeardownState {
	last_round: u64,
	epoch: u64,
	location: Option<String>,
}

/// Deduplicates session-termination notifications and tracks the session epoch.
pub struct SessionTeardown {
	sink: Arc<dyn SessionSink>,
	state: Mutex<TeardownState>,
}
impl SessionTeardown {
	/// Creates a teardown notifying `sink`.
	pub fn new(sink: Arc<dyn SessionSink>) -> Self {
		Self { sink, state: Mutex::new(TeardownState::default()) }
	}

	/// Creates a teardown without a host hook.
	pub fn detached() -> Self {
		Self::new(Arc::new(NoopSink))
	}

	/// Reports a failed renewal round; returns `true` if the sink was notified.
	///
	/// Rounds that did not clear a credential (nothing was logged in, or the leader was
	/// cancelled) and rounds that were already reported are ignored.
	pub fn terminate(&self, error: &RenewalError) -> bool {
		let Some(return_to) = self.consume(error) else {
			return false;
		};

		flow_event!(
			info,
			round = error.round,
			reason = error.failure.as_str(),
			"session terminated"
		);

		// Sinks may re-enter the teardown.
		self.sink.on_session_terminated(return_to.as_deref());

		true
	}

	/// Marks a failed round as handled without notifying the sink.
	///
	/// Used by callers that perform the login redirect themselves (the navigation guard).
	/// The round is still consumed, so later reports of it stay silent.
	pub fn acknowledge(&self, error: &RenewalError) -> bool {
		self.consume(error).is_some()
	}

	/// Starts a new session epoch after an explicit logout or account switch.
	pub fn reset(&self) {
		self.state.lock().epoch += 1;
	}

	/// Current session epoch; changes whenever the session is torn down or reset.
	pub fn epoch(&self) -> u64 {
		self.state.lock().epoch
	}

	/// Records the location the user is currently on.
	pub fn record_location(&self, path: impl Into<String>) {
		self.state.lock().location = Some(path.into());
	}

	/// Last recorded location.
	pub fn current_location(&self) -> Option<String> {
		self.state.lock().location.clone()
	}

	fn consume(&self, error: &RenewalError) -> Option<Option<String>> {
		let mut state = self.state.lock();

		if !error.cleared_session || error.round <= state.last_round {
			return None;
		}

		state.last_round = error.round;
		state.epoch += 1;

		Some(state.location.clone())
	}
}
impl Debug for SessionTeardown {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionTeardown").field("state", &*self.state.lock()).finish()
	}
}
