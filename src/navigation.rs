//! Route-transition guard sharing the request pipeline's renewal coordinator.
//!
//! [`NavigationGuard::before_transition`] never fails: every evaluation error is turned into
//! a redirect (login with the original target preserved, 403, 404, or the generic error
//! page), and the progress indicator is stopped on every path, including a dropped
//! transition.

// self
use crate::{
	_prelude::*,
	auth::{Credential, RoleSet},
	clock::{Clock, SystemClock},
	config::{RoutePolicy, SessionConfig},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	renewal::RefreshCoordinator,
	session::SessionTeardown,
};

/// Boxed future returned by [`RouteMaterializer::build_routes`].
pub type RouteFuture<'a> = Pin<Box<dyn Future<Output = Result<RouteTable>> + 'a + Send>>;

/// Builds the session's route table (typically from a server-side menu endpoint).
pub trait RouteMaterializer
where
	Self: Send + Sync,
{
	/// Produces the route table for the current session.
	///
	/// Returning [`Error::Auth`] sends the user to the login page; any other error sends
	/// them to the generic error page.
	fn build_routes(&self) -> RouteFuture<'_>;
}

/// Loading indicator shown while a transition is evaluated.
pub trait ProgressIndicator
where
	Self: Send + Sync,
{
	/// Called when evaluation starts.
	fn start(&self);

	/// Called exactly once per `start`, whatever the outcome.
	fn done(&self);
}

/// Indicator that shows nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProgress;
impl ProgressIndicator for NoopProgress {
	fn start(&self) {}

	fn done(&self) {}
}

/// One routable page.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteDefinition {
	/// Absolute route path.
	pub path: String,
	/// Optional route name.
	#[serde(default)]
	pub name: Option<String>,
	/// Roles allowed to enter; empty means any authenticated user.
	#[serde(default)]
	pub roles: RoleSet,
}
impl RouteDefinition {
	/// Creates a route open to any authenticated user.
	pub fn new(path: impl Into<String>) -> Self {
		Self { path: path.into(), name: None, roles: RoleSet::default() }
	}

	/// Sets the route name.
	pub fn named(mut self, name: impl Into<String>) -> Self {
		self.name = Some(name.into());

		self
	}

	/// Restricts the route to users holding any of `roles`.
	pub fn requires(mut self, roles: RoleSet) -> Self {
		self.roles = roles;

		self
	}
}

/// Materialized routes keyed by path.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteTable(BTreeMap<String, RouteDefinition>);
impl RouteTable {
	/// Looks up a route by path.
	pub fn get(&self, path: &str) -> Option<&RouteDefinition> {
		self.0.get(path)
	}

	/// Returns `true` if `path` is routable.
	pub fn contains(&self, path: &str) -> bool {
		self.0.contains_key(path)
	}

	/// Number of routes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns `true` if the table holds no routes.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Iterator over the routes in path order.
	pub fn iter(&self) -> impl Iterator<Item = &RouteDefinition> {
		self.0.values()
	}
}
impl FromIterator<RouteDefinition> for RouteTable {
	fn from_iter<I>(iter: I) -> Self
	where
		I: IntoIterator<Item = RouteDefinition>,
	{
		Self(iter.into_iter().map(|route| (route.path.clone(), route)).collect())
	}
}

/// Requested transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NavigationIntent {
	/// Target path (with optional query or fragment) or absolute external URL.
	pub target: String,
	/// Roles required by the target; when empty, the route table's roles apply.
	pub required_roles: RoleSet,
}
impl NavigationIntent {
	/// Creates an intent without explicit role requirements.
	pub fn new(target: impl Into<String>) -> Self {
		Self { target: target.into(), required_roles: RoleSet::default() }
	}

	/// Sets explicit role requirements.
	pub fn with_roles(mut self, roles: RoleSet) -> Self {
		self.required_roles = roles;

		self
	}

	/// Target path without query or fragment.
	pub fn path(&self) -> &str {
		let end = self.target.find(['?', '#']).unwrap_or(self.target.len());

		&self.target[..end]
	}

	/// Parsed target when it is an absolute `http(s)` URL.
	pub fn external_url(&self) -> Option<Url> {
		let target = self.target.trim();
		let lowered = target.get(..8).unwrap_or(target).to_ascii_lowercase();

		if lowered.starts_with("http://") || lowered.starts_with("https://") {
			Url::parse(target).ok()
		} else {
			None
		}
	}
}

/// Per-transition state.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransitionState {
	/// No transition is being evaluated.
	#[default]
	Idle,
	/// A transition is being evaluated.
	Evaluating,
	/// The last transition was allowed.
	Allowed,
	/// The last transition was redirected.
	Redirected,
}

/// Why a transition was redirected.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectReason {
	/// No valid credential could be obtained.
	Unauthenticated,
	/// The user lacks the required roles.
	Forbidden,
	/// The route does not exist or is hidden.
	NotFound,
	/// Evaluation failed unexpectedly.
	Error,
}
impl RedirectReason {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			RedirectReason::Unauthenticated => "unauthenticated",
			RedirectReason::Forbidden => "forbidden",
			RedirectReason::NotFound => "not_found",
			RedirectReason::Error => "error",
		}
	}
}

/// Redirect target plus reason.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Redirect {
	/// Path (with query) the router should enter instead.
	pub path: String,
	/// Why the original target was refused.
	pub reason: RedirectReason,
}

/// Result of evaluating a transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NavigationOutcome {
	/// Enter the requested route.
	Allowed,
	/// Enter another route instead.
	Redirected(Redirect),
	/// Open the URL outside the router and stay on the current route.
	External(Url),
}
impl NavigationOutcome {
	/// Terminal transition state for this outcome.
	pub fn state(&self) -> TransitionState {
		match self {
			NavigationOutcome::Allowed | NavigationOutcome::External(_) => TransitionState::Allowed,
			NavigationOutcome::Redirected(_) => TransitionState::Redirected,
		}
	}

	/// Redirect details, if the transition was redirected.
	pub fn redirect(&self) -> Option<&Redirect> {
		match self {
			NavigationOutcome::Redirected(redirect) => Some(redirect),
			_ => None,
		}
	}
}

struct MaterializedRoutes {
	epoch: u64,
	table: Arc<RouteTable>,
}

/// Stops the progress indicator when the evaluation scope ends, however it ends.
struct ProgressScope<'a>(&'a dyn ProgressIndicator);
impl<'a> ProgressScope<'a> {
	fn start(indicator: &'a dyn ProgressIndicator) -> Self {
		indicator.start();

		Self(indicator)
	}
}
impl Drop for ProgressScope<'_> {
	fn drop(&mut self) {
		self.0.done();
	}
}

/// Route-transition interceptor.
pub struct NavigationGuard {
	coordinator: Arc<RefreshCoordinator>,
	teardown: Arc<SessionTeardown>,
	materializer: Arc<dyn RouteMaterializer>,
	progress: Arc<dyn ProgressIndicator>,
	clock: Arc<dyn Clock>,
	policy: RoutePolicy,
	routes: AsyncMutex<Option<MaterializedRoutes>>,
	state: Mutex<TransitionState>,
}
impl NavigationGuard {
	/// Creates a guard with no progress indicator and the system clock.
	pub fn new(
		config: &SessionConfig,
		coordinator: Arc<RefreshCoordinator>,
		teardown: Arc<SessionTeardown>,
		materializer: Arc<dyn RouteMaterializer>,
	) -> Self {
		Self {
			coordinator,
			teardown,
			materializer,
			progress: Arc::new(NoopProgress),
			clock: Arc::new(SystemClock),
			policy: config.routes.clone(),
			routes: AsyncMutex::new(None),
			state: Mutex::new(TransitionState::Idle),
		}
	}

	/// Shows `progress` while transitions are evaluated.
	pub fn with_progress(mut self, progress: Arc<dyn ProgressIndicator>) -> Self {
		self.progress = progress;

		self
	}

	/// Overrides the clock used for expiry decisions.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// State of the most recent transition.
	pub fn state(&self) -> TransitionState {
		*self.state.lock()
	}

	/// Evaluates a transition; always resolves to an outcome.
	pub async fn before_transition(&self, intent: &NavigationIntent) -> NavigationOutcome {
		const KIND: FlowKind = FlowKind::Navigation;

		let span = FlowSpan::new(KIND, "before_transition").subject(intent.path());
		let _progress = ProgressScope::start(self.progress.as_ref());

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		*self.state.lock() = TransitionState::Evaluating;

		let outcome = span.instrument(self.resolve(intent)).await;

		*self.state.lock() = outcome.state();

		match &outcome {
			NavigationOutcome::Redirected(redirect) => {
				obs::record_flow_outcome(KIND, FlowOutcome::Failure);
				obs::record_redirect(redirect.reason.as_str());
				flow_event!(
					debug,
					target = %intent.target,
					redirect = %redirect.path,
					reason = redirect.reason.as_str(),
					"transition redirected"
				);
			},
			_ => obs::record_flow_outcome(KIND, FlowOutcome::Success),
		}

		outcome
	}

	/// Records the route the user ended up on, used as the return path on session loss.
	pub fn after_transition(&self, path: &str) {
		self.teardown.record_location(path);
	}

	/// Drops the materialized route table so the next transition rebuilds it.
	pub async fn reset_routes(&self) {
		self.routes.lock().await.take();
	}

	async fn resolve(&self, intent: &NavigationIntent) -> NavigationOutcome {
		let (path, reason) = match self.evaluate(intent).await {
			Ok(outcome) => return outcome,
			Err(Error::Auth(_)) => {
				self.reset_routes().await;

				(self.policy.login_redirect(&intent.target), RedirectReason::Unauthenticated)
			},
			Err(Error::AuthorizationDenied { .. }) =>
				(self.policy.forbidden.clone(), RedirectReason::Forbidden),
			Err(Error::RouteNotFound { .. }) =>
				(self.policy.not_found.clone(), RedirectReason::NotFound),
			Err(_e) => {
				flow_event!(warn, error = %_e, "transition evaluation failed");

				(self.policy.error.clone(), RedirectReason::Error)
			},
		};

		NavigationOutcome::Redirected(Redirect { path, reason })
	}

	async fn evaluate(&self, intent: &NavigationIntent) -> Result<NavigationOutcome> {
		if let Some(url) = intent.external_url() {
			return Ok(NavigationOutcome::External(url));
		}

		let path = intent.path();

		if self.policy.is_allowlisted(path) {
			return Ok(NavigationOutcome::Allowed);
		}

		let credential = self.credential().await?;
		let table = self.routes().await?;
		let route = table.get(path).filter(|_| !self.policy.is_hidden(path));
		let required = if intent.required_roles.is_empty() {
			route.map(|route| route.roles.clone()).unwrap_or_default()
		} else {
			intent.required_roles.clone()
		};

		if !credential.roles.satisfies(&required) {
			return Err(Error::AuthorizationDenied { route: path.to_owned() });
		}
		if route.is_none() {
			return Err(Error::RouteNotFound { route: path.to_owned() });
		}

		Ok(NavigationOutcome::Allowed)
	}

	async fn credential(&self) -> Result<Credential> {
		self.coordinator.ensure_valid_tracked(self.clock.now()).await.map_err(|e| {
			self.teardown.acknowledge(&e);

			e.into()
		})
	}

	async fn routes(&self) -> Result<Arc<RouteTable>> {
		let epoch = self.teardown.epoch();
		let mut slot = self.routes.lock().await;

		if let Some(materialized) = slot.as_ref().filter(|m| m.epoch == epoch) {
			return Ok(materialized.table.clone());
		}

		let table = Arc::new(self.materializer.build_routes().await?);

		flow_event!(debug, epoch, routes = table.len(), "route table materialized");

		*slot = Some(MaterializedRoutes { epoch, table: table.clone() });

		Ok(table)
	}
}
impl Debug for NavigationGuard {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("NavigationGuard")
			.field("state", &self.state())
			.field("policy", &self.policy)
			.finish()
	}
}
