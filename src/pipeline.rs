//! Authenticated request dispatch with one transparent replay after renewal.
//!
//! Every request except those aimed at the session endpoints (login, refresh, logout) waits
//! on [`RefreshCoordinator::ensure_valid`] before it is sent, so an expired credential is
//! renewed once no matter how many requests are in flight. A response classified as
//! "credential expired" triggers one renewal round and one replay of the original request.
//!
//! Hosts that own their transport can use [`RequestPipeline::prepare`] and
//! [`RequestPipeline::classify`] as request/response middleware instead of
//! [`RequestPipeline::execute`].

// self
use crate::{
	_prelude::*,
	auth::Credential,
	clock::{Clock, SystemClock},
	config::SessionConfig,
	error::TransportError,
	http::{AbortSignal, ApiRequest, ApiResponse, HttpTransport},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	renewal::RefreshCoordinator,
	session::SessionTeardown,
	strategy::{DefaultSessionStrategy, ResponseClass, ResponseContext, SessionStrategy},
};

/// Request with its credential attached, ready to be sent.
#[derive(Clone, Debug)]
pub struct PendingRequest {
	/// Outbound request, including the `Authorization` header when a credential is attached.
	pub request: ApiRequest,
	/// Credential attached to the request; `None` for session endpoints.
	pub credential: Option<Credential>,
	/// Whether this is the replay after a renewal.
	pub replayed: bool,
}
impl PendingRequest {
	fn exempt(request: ApiRequest) -> Self {
		Self { request, credential: None, replayed: false }
	}

	fn attach(
		mut request: ApiRequest,
		credential: Credential,
		scheme: &str,
		replayed: bool,
	) -> Self {
		request.set_authorization(credential.access_token.authorization_value(scheme));

		Self { request, credential: Some(credential), replayed }
	}
}

/// Sends API requests through the shared renewal coordinator.
pub struct RequestPipeline<T>
where
	T: ?Sized + HttpTransport,
{
	transport: Arc<T>,
	coordinator: Arc<RefreshCoordinator>,
	teardown: Arc<SessionTeardown>,
	strategy: Arc<dyn SessionStrategy>,
	clock: Arc<dyn Clock>,
	config: Arc<SessionConfig>,
}
impl<T> RequestPipeline<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a pipeline using the default strategy and the system clock.
	pub fn new(
		config: Arc<SessionConfig>,
		transport: Arc<T>,
		coordinator: Arc<RefreshCoordinator>,
		teardown: Arc<SessionTeardown>,
	) -> Self {
		Self {
			strategy: Arc::new(DefaultSessionStrategy::from_config(&config)),
			clock: Arc::new(SystemClock),
			transport,
			coordinator,
			teardown,
			config,
		}
	}

	/// Overrides the response classification strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn SessionStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Overrides the clock used for expiry decisions.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Shared renewal coordinator.
	pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
		&self.coordinator
	}

	/// Resolves `path` (optionally carrying a query) against the configured base URL.
	pub fn url(&self, path: &str) -> Url {
		let (path, query) = match path.split_once('?') {
			Some((path, query)) => (path, Some(query)),
			None => (path, None),
		};
		let mut url = self.config.endpoint_url(path);

		url.set_query(query);

		url
	}

	/// Returns `true` for requests aimed at a session endpoint.
	pub fn is_exempt(&self, request: &ApiRequest) -> bool {
		self.config.endpoints.is_exempt(&request.url)
	}

	/// Pre-send hook: attaches a valid credential, renewing it first if needed.
	///
	/// Session endpoints pass through untouched. When renewal fails the request is never
	/// sent, the failure is reported to the session teardown, and [`Error::Auth`] is
	/// returned. Aborting the request while it waits on a renewal returns
	/// [`Error::Cancelled`] at once and leaves the round to the remaining callers.
	pub async fn prepare(&self, request: ApiRequest) -> Result<PendingRequest> {
		if request.is_aborted() {
			return Err(Error::Cancelled);
		}
		if self.is_exempt(&request) {
			return Ok(PendingRequest::exempt(request));
		}

		let validated = self.coordinator.ensure_valid_tracked(self.clock.now());
		let validated = abortable(request.abort.as_ref(), validated).await?;

		match validated {
			Ok(credential) =>
				Ok(PendingRequest::attach(request, credential, &self.config.auth_scheme, false)),
			Err(e) => {
				self.teardown.terminate(&e);

				Err(e.into())
			},
		}
	}

	/// Post-response hook: classifies `response` with the configured strategy.
	pub fn classify(&self, response: &ApiResponse) -> ResponseClass {
		self.strategy.classify_response(&ResponseContext::from_response(response))
	}

	/// Sends `request`, renewing and replaying once if the credential turns out to be expired.
	pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse> {
		const KIND: FlowKind = FlowKind::Request;

		let span = FlowSpan::new(KIND, "execute")
			.subject(format!("{} {}", request.method, request.url.path()));

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.execute_inner(request)).await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(e) if e.is_cancelled() => obs::record_flow_outcome(KIND, FlowOutcome::Cancelled),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Sends a `GET` for `path` relative to the base URL.
	pub async fn get(&self, path: &str) -> Result<ApiResponse> {
		self.execute(ApiRequest::get(self.url(path))).await
	}

	/// Sends a `POST` with a JSON body to `path` relative to the base URL.
	pub async fn post_json<B>(&self, path: &str, body: &B) -> Result<ApiResponse>
	where
		B: ?Sized + Serialize,
	{
		let request = ApiRequest::post(self.url(path)).with_json(body)?;

		self.execute(request).await
	}

	/// Ends the session: notifies the logout endpoint, clears the credential, and starts a
	/// new session epoch.
	///
	/// The credential is cleared even if the logout call fails; the call's error is returned
	/// afterwards. A renewal still outstanding at that point cannot bring the credential back.
	pub async fn logout(&self) -> Result<()> {
		let url = self.config.endpoint_url(&self.config.endpoints.logout);
		let mut request = ApiRequest::post(url);

		if let Some(credential) = self.coordinator.store().get() {
			request.set_authorization(
				credential.access_token.authorization_value(&self.config.auth_scheme),
			);
		}

		let sent = self.dispatch(request).await;

		self.coordinator.invalidate().await?;
		self.teardown.reset();
		flow_event!(info, "session logged out");

		match sent? {
			response if response.is_success() => Ok(()),
			response => Err(Error::RequestFailed { response }),
		}
	}

	async fn execute_inner(&self, request: ApiRequest) -> Result<ApiResponse> {
		let pending = self.prepare(request).await?;
		let Some(credential) = pending.credential else {
			let response = self.dispatch(pending.request).await?;

			return if response.is_success() {
				Ok(response)
			} else {
				Err(Error::RequestFailed { response })
			};
		};
		let response = self.dispatch(pending.request.clone()).await?;

		match self.classify(&response) {
			ResponseClass::Success => Ok(response),
			ResponseClass::Failed => Err(Error::RequestFailed { response }),
			ResponseClass::CredentialExpired => {
				flow_event!(debug, status = response.status, "credential rejected; renewing");

				self.replay(pending.request, credential).await
			},
		}
	}

	async fn replay(&self, request: ApiRequest, rejected: Credential) -> Result<ApiResponse> {
		if request.is_aborted() {
			return Err(Error::Cancelled);
		}

		let validated = self.coordinator.ensure_valid_after_rejection(self.clock.now(), &rejected);
		let credential = match abortable(request.abort.as_ref(), validated).await? {
			Ok(credential) => credential,
			Err(e) => {
				self.teardown.terminate(&e);

				return Err(e.into());
			},
		};
		let replay = PendingRequest::attach(request, credential, &self.config.auth_scheme, true);
		let response = self.dispatch(replay.request).await?;

		match self.classify(&response) {
			ResponseClass::Success => Ok(response),
			ResponseClass::Failed => Err(Error::RequestFailed { response }),
			ResponseClass::CredentialExpired => Err(Error::CredentialRejected { response }),
		}
	}

	async fn dispatch(&self, request: ApiRequest) -> Result<ApiResponse> {
		let abort = request.abort.clone();
		let sent = self.transport.send(request);

		abortable(abort.as_ref(), sent).await?.map_err(|e| match e {
			TransportError::Cancelled => Error::Cancelled,
			other => Error::Transport(other),
		})
	}
}
impl<T> Debug for RequestPipeline<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestPipeline")
			.field("base_url", &self.config.base_url.as_str())
			.field("coordinator", &self.coordinator)
			.finish()
	}
}

/// Runs `work` unless `signal` fires first.
async fn abortable<F>(signal: Option<&AbortSignal>, work: F) -> Result<F::Output>
where
	F: Future,
{
	match signal {
		Some(signal) => tokio::select! {
			biased;

			_ = signal.aborted() => Err(Error::Cancelled),
			output = work => Ok(output),
		},
		None => Ok(work.await),
	}
}
