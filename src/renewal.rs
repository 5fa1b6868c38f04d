//! Single-flight credential renewal shared by the request pipeline and the navigation guard.
//!
//! [`RefreshCoordinator::ensure_valid`] hands back the stored credential while it is fresh.
//! Once it has expired, the first caller becomes the round's leader and performs exactly one
//! renewal call; every caller arriving while that call is outstanding is queued and resumed
//! with the leader's result, in arrival order. Successful rounds replace the stored
//! credential, failed rounds clear it. If the leader is dropped mid-call, the oldest queued
//! caller takes the round over. [`RefreshCoordinator::invalidate`] ends the session and
//! voids whatever round is outstanding.
//!
//! The state lock is a synchronous mutex that is never held across an `.await`, so the
//! check-then-set on `in_progress` cannot interleave with another caller.

mod client;
mod metrics;

pub use client::HttpRenewalClient;
pub use metrics::{RenewalMetrics, RenewalSnapshot};

// crates.io
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::{Credential, TokenSecret},
	error::AuthFailure,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::{StoreError, TokenStore},
};

/// Boxed future returned by [`RenewalClient::renew`].
pub type RenewalFuture<'a> =
	Pin<Box<dyn Future<Output = Result<Credential, AuthFailure>> + 'a + Send>>;

/// Network call exchanging a refresh token for a new credential.
pub trait RenewalClient
where
	Self: Send + Sync,
{
	/// Presents `refresh_token` to the renewal endpoint.
	///
	/// `previous` is the credential being replaced so implementations can carry over
	/// fields (refresh token, roles) the server does not resend.
	fn renew<'a>(
		&'a self,
		refresh_token: &'a TokenSecret,
		previous: &'a Credential,
	) -> RenewalFuture<'a>;
}

/// Failure of one renewal round, shared by the leader and every queued caller.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("{failure}")]
pub struct RenewalError {
	/// Why the round failed.
	pub failure: AuthFailure,
	/// Round the failure belongs to (1-based, increasing).
	pub round: u64,
	/// Whether the round removed a credential from the store.
	pub cleared_session: bool,
}
impl From<RenewalError> for Error {
	fn from(e: RenewalError) -> Self {
		Error::Auth(e.failure)
	}
}

type Settlement = Result<Credential, RenewalError>;

/// What a queued caller is woken with.
enum Resumption {
	/// The round finished; this is its outcome.
	Settled(Settlement),
	/// The previous leader was dropped; the woken caller now drives the round.
	Lead(u64),
}

/// Resumes one suspended caller.
struct Continuation(oneshot::Sender<Resumption>);
impl Continuation {
	fn resume(self, outcome: Settlement) {
		// The caller may have been dropped while waiting.
		let _ = self.0.send(Resumption::Settled(outcome));
	}
}

#[derive(Default)]
struct RenewalState {
	in_progress: bool,
	waiters: VecDeque<Continuation>,
	round: u64,
	generation: u64,
}

enum Admission {
	Fresh(Credential),
	Lead { round: u64, generation: u64 },
	Wait { rx: oneshot::Receiver<Resumption>, round: u64 },
}

/// Coordinates credential renewal so at most one renewal call is outstanding.
pub struct RefreshCoordinator {
	store: Arc<TokenStore>,
	client: Arc<dyn RenewalClient>,
	state: Mutex<RenewalState>,
	commit: AsyncMutex<()>,
	metrics: Arc<RenewalMetrics>,
}
impl RefreshCoordinator {
	/// Creates a coordinator renewing the credentials held by `store`.
	pub fn new(store: Arc<TokenStore>, client: Arc<dyn RenewalClient>) -> Self {
		Self {
			store,
			client,
			state: Mutex::new(RenewalState::default()),
			commit: AsyncMutex::new(()),
			metrics: Default::default(),
		}
	}

	/// Store whose credential the coordinator renews.
	pub fn store(&self) -> &Arc<TokenStore> {
		&self.store
	}

	/// Renewal counters.
	pub fn metrics(&self) -> Arc<RenewalMetrics> {
		self.metrics.clone()
	}

	/// Returns `true` while a renewal call is outstanding.
	pub fn is_renewing(&self) -> bool {
		self.state.lock().in_progress
	}

	/// Number of callers currently queued behind the outstanding renewal call.
	pub fn pending_waiters(&self) -> usize {
		self.state.lock().waiters.len()
	}

	/// Number of renewal rounds started so far.
	pub fn rounds(&self) -> u64 {
		self.state.lock().round
	}

	/// Ends the current session: clears the store and voids any outstanding round.
	///
	/// A round that was already running when this is called neither stores its result nor
	/// clears the store; its callers receive [`AuthFailure::NetworkError`] with
	/// `cleared_session == false`.
	pub async fn invalidate(&self) -> Result<(), StoreError> {
		let _commit = self.commit.lock().await;

		self.state.lock().generation += 1;

		self.store.clear().await
	}

	/// Returns a credential that is not expired at `now`, renewing it if necessary.
	pub async fn ensure_valid(&self, now: OffsetDateTime) -> Result<Credential, AuthFailure> {
		self.ensure_valid_tracked(now).await.map_err(|e| e.failure)
	}

	/// Same as [`RefreshCoordinator::ensure_valid`], keeping the round information on failure.
	pub async fn ensure_valid_tracked(
		&self,
		now: OffsetDateTime,
	) -> Result<Credential, RenewalError> {
		if let Some(credential) = self.store.get().filter(|c| !TokenStore::is_expired(c, now)) {
			return Ok(credential);
		}

		self.admit(|credential| TokenStore::is_expired(credential, now)).await
	}

	/// Renews after the server rejected `rejected` even though it looked fresh locally.
	///
	/// If the store still holds the rejected access token the credential is treated as
	/// expired; if another round already replaced it, the replacement is returned without a
	/// new call.
	pub async fn ensure_valid_after_rejection(
		&self,
		now: OffsetDateTime,
		rejected: &Credential,
	) -> Result<Credential, RenewalError> {
		self.admit(|credential| {
			credential.access_token == rejected.access_token
				|| TokenStore::is_expired(credential, now)
		})
		.await
	}

	async fn admit<F>(&self, stale: F) -> Result<Credential, RenewalError>
	where
		F: Fn(&Credential) -> bool,
	{
		let admission = {
			let mut state = self.state.lock();

			if state.in_progress {
				let (tx, rx) = oneshot::channel();

				state.waiters.push_back(Continuation(tx));

				Admission::Wait { rx, round: state.round }
			} else if let Some(credential) = self.store.get().filter(|c| !stale(c)) {
				Admission::Fresh(credential)
			} else {
				state.in_progress = true;
				state.round += 1;

				Admission::Lead { round: state.round, generation: state.generation }
			}
		};

		match admission {
			Admission::Fresh(credential) => Ok(credential),
			Admission::Lead { round, generation } => {
				obs::record_flow_outcome(FlowKind::Renewal, FlowOutcome::Attempt);
				self.metrics.round_started();
				flow_event!(debug, round, "renewal round started");

				self.lead(round, generation).await
			},
			Admission::Wait { rx, round } => {
				self.metrics.caller_joined();
				flow_event!(debug, round, "joined the outstanding renewal round");

				let mut waiting = Waiting { coordinator: self, rx, round };

				match (&mut waiting.rx).await {
					Ok(Resumption::Settled(outcome)) => outcome,
					Ok(Resumption::Lead(generation)) => {
						flow_event!(debug, round, "took over the renewal round");

						self.lead(round, generation).await
					},
					Err(_) => Err(RenewalError {
						failure: AuthFailure::NetworkError {
							message: "Renewal round ended without a result".into(),
						},
						round,
						cleared_session: false,
					}),
				}
			},
		}
	}

	async fn lead(&self, round: u64, generation: u64) -> Settlement {
		const KIND: FlowKind = FlowKind::Renewal;

		let span = FlowSpan::new(KIND, "lead_renewal_round").subject(round);
		let mut guard = LeaderGuard { coordinator: self, round, generation, armed: true };
		let outcome = span.instrument(self.renew_once(round, generation)).await;

		guard.armed = false;

		self.metrics.round_settled(outcome.is_ok());

		match &outcome {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_e) => {
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);
				flow_event!(warn, round, reason = _e.failure.as_str(), "renewal round failed");
			},
		}

		self.settle(&outcome);

		outcome
	}

	async fn renew_once(&self, round: u64, generation: u64) -> Settlement {
		if self.is_invalidated(generation) {
			return Err(Self::invalidated(round));
		}

		let previous = self.store.get();
		let renewed = match previous.as_ref() {
			Some(credential) => match credential.renewable_refresh_token() {
				Some(refresh_token) => self.client.renew(refresh_token, credential).await,
				None => Err(AuthFailure::NoRefreshToken),
			},
			None => Err(AuthFailure::NoRefreshToken),
		};
		let _commit = self.commit.lock().await;

		// The session ended while the call was outstanding; leave the store alone.
		if self.is_invalidated(generation) {
			flow_event!(debug, round, "discarding a renewal outcome for an ended session");

			return Err(Self::invalidated(round));
		}

		match renewed {
			Ok(credential) => {
				if let Err(_e) = self.store.set(credential.clone()).await {
					flow_event!(warn, error = %_e, "failed to persist the renewed credential");
				}

				Ok(credential)
			},
			Err(failure) => {
				if let Err(_e) = self.store.clear().await {
					flow_event!(warn, error = %_e, "failed to clear the persisted credential");
				}

				Err(RenewalError { failure, round, cleared_session: previous.is_some() })
			},
		}
	}

	fn is_invalidated(&self, generation: u64) -> bool {
		self.state.lock().generation != generation
	}

	fn invalidated(round: u64) -> RenewalError {
		RenewalError {
			failure: AuthFailure::NetworkError { message: "Session ended while renewing".into() },
			round,
			cleared_session: false,
		}
	}

	fn settle(&self, outcome: &Settlement) {
		let waiters = {
			let mut state = self.state.lock();

			state.in_progress = false;

			std::mem::take(&mut state.waiters)
		};

		obs::record_round_waiters(waiters.len());

		for waiter in waiters {
			waiter.resume(outcome.clone());
		}
	}

	/// Passes an abandoned round to the oldest live waiter, or ends it when none is left.
	fn hand_off(&self, round: u64, generation: u64) {
		let mut state = self.state.lock();

		while let Some(Continuation(tx)) = state.waiters.pop_front() {
			if tx.send(Resumption::Lead(generation)).is_ok() {
				flow_event!(debug, round, "renewal round handed to a queued caller");

				return;
			}
		}

		state.in_progress = false;

		drop(state);
		flow_event!(debug, round, "renewal round abandoned without waiters");
		obs::record_flow_outcome(FlowKind::Renewal, FlowOutcome::Cancelled);
		self.metrics.round_settled(false);
	}
}
impl Debug for RefreshCoordinator {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let state = self.state.lock();

		f.debug_struct("RefreshCoordinator")
			.field("in_progress", &state.in_progress)
			.field("waiters", &state.waiters.len())
			.field("round", &state.round)
			.field("generation", &state.generation)
			.finish()
	}
}

/// Hands the round on if the leader's future is dropped before the renewal call resolves.
struct LeaderGuard<'a> {
	coordinator: &'a RefreshCoordinator,
	round: u64,
	generation: u64,
	armed: bool,
}
impl Drop for LeaderGuard<'_> {
	fn drop(&mut self) {
		if !self.armed {
			return;
		}

		flow_event!(warn, round = self.round, "renewal leader dropped before settling");

		self.coordinator.hand_off(self.round, self.generation);
	}
}

/// Queued caller; if it is dropped right after being picked as the next leader, the round
/// moves on to the caller behind it.
struct Waiting<'a> {
	coordinator: &'a RefreshCoordinator,
	rx: oneshot::Receiver<Resumption>,
	round: u64,
}
impl Drop for Waiting<'_> {
	fn drop(&mut self) {
		self.rx.close();

		if let Ok(Resumption::Lead(generation)) = self.rx.try_recv() {
			self.coordinator.hand_off(self.round, generation);
		}
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::time::Duration as StdDuration;
	// self
	use super::*;
	use crate::_preludet::*;

	async fn coordinator(
		seed: Option<Credential>,
		client: Arc<ScriptedRenewalClient>,
	) -> Arc<RefreshCoordinator> {
		let store = Arc::new(TokenStore::in_memory());

		if let Some(seed) = seed {
			store.set(seed).await.expect("Seeding the store should succeed.");
		}

		Arc::new(RefreshCoordinator::new(store, client))
	}

	async fn wait_for_waiters(coordinator: &RefreshCoordinator, expected: usize) {
		for _ in 0..1_000 {
			if coordinator.pending_waiters() == expected {
				return;
			}

			tokio::time::sleep(StdDuration::from_millis(1)).await;
		}

		panic!("Expected {expected} queued renewal callers.");
	}

	#[tokio::test]
	async fn fresh_credentials_return_without_a_call() {
		let client = Arc::new(ScriptedRenewalClient::new([]));
		let seed = credential("a-1", Some("r-1"), 100);
		let coordinator = coordinator(Some(seed), client.clone()).await;
		let credential =
			coordinator.ensure_valid(at(99)).await.expect("Fresh credential should be returned.");

		assert_eq!(credential.access_token.expose(), "a-1");
		assert_eq!(client.calls(), 0);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn concurrent_callers_share_one_renewal() {
		let client =
			Arc::new(ScriptedRenewalClient::gated([Ok(credential("a-2", Some("r-2"), 200))]));
		let seed = credential("a-1", Some("r-1"), 100);
		let coordinator = coordinator(Some(seed), client.clone()).await;
		let leader = tokio::spawn({
			let coordinator = coordinator.clone();

			async move { coordinator.ensure_valid(at(101)).await }
		});

		while !coordinator.is_renewing() {
			tokio::task::yield_now().await;
		}

		let followers = [102, 110].map(|now| {
			let coordinator = coordinator.clone();

			tokio::spawn(async move { coordinator.ensure_valid(at(now)).await })
		});

		wait_for_waiters(&coordinator, 2).await;
		client.release();

		let mut results = vec![leader.await.expect("Leader task should join.")];

		for follower in followers {
			results.push(follower.await.expect("Follower task should join."));
		}

		for result in results {
			let credential = result.expect("Every caller should receive the renewed credential.");

			assert_eq!(credential.access_token.expose(), "a-2");
		}

		assert_eq!(client.calls(), 1);
		assert_eq!(client.seen_refresh_tokens(), vec!["r-1".to_owned()]);
		assert!(!coordinator.is_renewing());
		assert_eq!(coordinator.pending_waiters(), 0);
		assert_eq!(
			coordinator.store().get().map(|c| c.access_token.expose().to_owned()),
			Some("a-2".into())
		);

		assert_eq!(
			coordinator.metrics().snapshot(),
			RenewalSnapshot { rounds: 1, renewed: 1, failed: 0, joined: 2 }
		);
	}

	#[tokio::test]
	async fn missing_refresh_token_fails_without_a_call() {
		let client = Arc::new(ScriptedRenewalClient::new([]));
		let coordinator = coordinator(Some(credential("a-1", None, 100)), client.clone()).await;
		let err = coordinator
			.ensure_valid_tracked(at(100))
			.await
			.expect_err("Renewal must fail without a refresh token.");

		assert_eq!(err.failure, AuthFailure::NoRefreshToken);
		assert!(err.cleared_session);
		assert_eq!(client.calls(), 0);
		assert!(coordinator.store().get().is_none());

		let empty = self::coordinator(None, client.clone()).await;
		let err = empty.ensure_valid_tracked(at(0)).await.expect_err("Empty store cannot renew.");

		assert_eq!(err.failure, AuthFailure::NoRefreshToken);
		assert!(!err.cleared_session);
		assert_eq!(client.calls(), 0);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn rejection_is_shared_by_every_queued_caller() {
		let rejected = AuthFailure::RefreshRejected { reason: "revoked".into() };
		let client = Arc::new(ScriptedRenewalClient::gated([Err(rejected.clone())]));
		let seed = credential("a-1", Some("r-1"), 100);
		let coordinator = coordinator(Some(seed), client.clone()).await;
		let leader = tokio::spawn({
			let coordinator = coordinator.clone();

			async move { coordinator.ensure_valid_tracked(at(150)).await }
		});

		while !coordinator.is_renewing() {
			tokio::task::yield_now().await;
		}

		let followers = (0..3)
			.map(|_| {
				let coordinator = coordinator.clone();

				tokio::spawn(async move { coordinator.ensure_valid_tracked(at(150)).await })
			})
			.collect::<Vec<_>>();

		wait_for_waiters(&coordinator, 3).await;
		client.release();

		let leader = leader.await.expect("Leader task should join.");

		for follower in followers {
			assert_eq!(follower.await.expect("Follower task should join."), leader);
		}

		let err = leader.expect_err("Rejected refresh must fail the round.");

		assert_eq!(err.failure, rejected);
		assert_eq!(err.round, 1);
		assert!(err.cleared_session);
		assert!(coordinator.store().get().is_none());
		assert_eq!(client.calls(), 1);
	}

	#[tokio::test]
	async fn rejection_of_a_fresh_credential_forces_one_round() {
		let client =
			Arc::new(ScriptedRenewalClient::new([Ok(credential("a-2", Some("r-2"), 500))]));
		let stale = credential("a-1", Some("r-1"), 400);
		let coordinator = coordinator(Some(stale.clone()), client.clone()).await;
		let renewed = coordinator
			.ensure_valid_after_rejection(at(10), &stale)
			.await
			.expect("Rejected credential should be renewed.");

		assert_eq!(renewed.access_token.expose(), "a-2");

		// A second rejection of the same stale token reuses the replacement.
		let reused = coordinator
			.ensure_valid_after_rejection(at(11), &stale)
			.await
			.expect("Replacement should be reused.");

		assert_eq!(reused.access_token.expose(), "a-2");
		assert_eq!(client.calls(), 1);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn dropped_leader_hands_the_round_to_the_next_caller() {
		let client =
			Arc::new(ScriptedRenewalClient::gated([Ok(credential("a-2", Some("r-2"), 200))]));
		let seed = credential("a-1", Some("r-1"), 100);
		let coordinator = coordinator(Some(seed), client.clone()).await;
		let leader = tokio::spawn({
			let coordinator = coordinator.clone();

			async move { coordinator.ensure_valid(at(100)).await }
		});

		while !coordinator.is_renewing() {
			tokio::task::yield_now().await;
		}

		let follower = tokio::spawn({
			let coordinator = coordinator.clone();

			async move { coordinator.ensure_valid_tracked(at(100)).await }
		});

		wait_for_waiters(&coordinator, 1).await;
		leader.abort();

		assert!(leader.await.expect_err("Leader task should be cancelled.").is_cancelled());
		assert!(coordinator.is_renewing());

		client.release();

		let credential = follower
			.await
			.expect("Follower task should join.")
			.expect("Follower should finish the round it took over.");

		assert_eq!(credential.access_token.expose(), "a-2");
		assert_eq!(client.calls(), 2);
		assert_eq!(coordinator.rounds(), 1);
		assert!(!coordinator.is_renewing());
		assert_eq!(coordinator.pending_waiters(), 0);
		assert_eq!(
			coordinator.metrics().snapshot(),
			RenewalSnapshot { rounds: 1, renewed: 1, failed: 0, joined: 1 }
		);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn dropped_leader_without_waiters_ends_the_round() {
		let client = Arc::new(ScriptedRenewalClient::gated([]));
		let seed = credential("a-1", Some("r-1"), 100);
		let coordinator = coordinator(Some(seed), client.clone()).await;
		let leader = tokio::spawn({
			let coordinator = coordinator.clone();

			async move { coordinator.ensure_valid(at(100)).await }
		});

		while !coordinator.is_renewing() {
			tokio::task::yield_now().await;
		}

		leader.abort();

		assert!(leader.await.expect_err("Leader task should be cancelled.").is_cancelled());
		assert!(!coordinator.is_renewing());
		assert!(coordinator.store().get().is_some());
		assert_eq!(
			coordinator.metrics().snapshot(),
			RenewalSnapshot { rounds: 1, renewed: 0, failed: 1, joined: 0 }
		);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn invalidation_voids_the_outstanding_round() {
		let client =
			Arc::new(ScriptedRenewalClient::gated([Ok(credential("a-2", Some("r-2"), 200))]));
		let seed = credential("a-1", Some("r-1"), 100);
		let coordinator = coordinator(Some(seed), client.clone()).await;
		let leader = tokio::spawn({
			let coordinator = coordinator.clone();

			async move { coordinator.ensure_valid_tracked(at(101)).await }
		});

		while !coordinator.is_renewing() {
			tokio::task::yield_now().await;
		}

		let follower = tokio::spawn({
			let coordinator = coordinator.clone();

			async move { coordinator.ensure_valid_tracked(at(101)).await }
		});

		wait_for_waiters(&coordinator, 1).await;
		coordinator.invalidate().await.expect("Invalidation should clear the store.");

		assert!(coordinator.store().get().is_none());

		client.release();

		let leader = leader.await.expect("Leader task should join.");

		assert_eq!(follower.await.expect("Follower task should join."), leader);

		let err = leader.expect_err("A voided round must not hand out a credential.");

		assert!(matches!(err.failure, AuthFailure::NetworkError { .. }));
		assert_eq!(err.round, 1);
		assert!(!err.cleared_session);
		assert!(coordinator.store().get().is_none());
		assert!(!coordinator.is_renewing());
		assert_eq!(client.calls(), 1);
	}
}
