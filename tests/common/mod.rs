//! Shared fixtures for the integration suites.

#![allow(dead_code)]

// std
use std::sync::Arc;
// crates.io
use httpmock::MockServer;
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};
// self
use session_gate::{
	auth::{Credential, RoleSet},
	config::SessionConfig,
	http::ReqwestTransport,
	navigation::{RouteDefinition, RouteFuture, RouteMaterializer, RouteTable},
	pipeline::RequestPipeline,
	renewal::{HttpRenewalClient, RefreshCoordinator},
	session::{SessionSink, SessionTeardown},
	store::TokenStore,
	strategy::DefaultSessionStrategy,
	url::Url,
};

/// Every component a host application wires together, pointed at a mock backend.
pub struct Session {
	pub config: Arc<SessionConfig>,
	pub store: Arc<TokenStore>,
	pub coordinator: Arc<RefreshCoordinator>,
	pub teardown: Arc<SessionTeardown>,
	pub sink: Arc<RecordingSink>,
	pub pipeline: Arc<RequestPipeline<ReqwestTransport>>,
}
impl Session {
	pub async fn start(server: &MockServer, seed: Option<Credential>) -> Self {
		let config = Arc::new(
			SessionConfig::builder(
				Url::parse(&server.url("/api")).expect("Mock base URL should parse."),
			)
			.allow_route("/welcome")
			.build()
			.expect("Session configuration should build."),
		);
		let transport =
			Arc::new(ReqwestTransport::new(&config).expect("Reqwest transport should build."));
		let strategy = Arc::new(DefaultSessionStrategy::from_config(&config));
		let renewals = Arc::new(HttpRenewalClient::new(transport.clone(), &config, strategy));
		let store = Arc::new(TokenStore::in_memory());

		if let Some(seed) = seed {
			store.set(seed).await.expect("Seeding the store should succeed.");
		}

		let coordinator = Arc::new(RefreshCoordinator::new(store.clone(), renewals));
		let sink = Arc::new(RecordingSink::default());
		let teardown = Arc::new(SessionTeardown::new(sink.clone()));
		let pipeline = Arc::new(RequestPipeline::new(
			config.clone(),
			transport,
			coordinator.clone(),
			teardown.clone(),
		));

		Self { config, store, coordinator, teardown, sink, pipeline }
	}
}

/// Session sink that records the return paths it receives.
#[derive(Debug, Default)]
pub struct RecordingSink(Mutex<Vec<Option<String>>>);
impl RecordingSink {
	pub fn terminations(&self) -> Vec<Option<String>> {
		self.0.lock().clone()
	}
}
impl SessionSink for RecordingSink {
	fn on_session_terminated(&self, return_to: Option<&str>) {
		self.0.lock().push(return_to.map(str::to_owned));
	}
}

/// Route materializer loading the menu through the authenticated pipeline.
pub struct MenuRoutes(pub Arc<RequestPipeline<ReqwestTransport>>);
impl RouteMaterializer for MenuRoutes {
	fn build_routes(&self) -> RouteFuture<'_> {
		Box::pin(async move {
			let response = self.0.get("/get-async-routes").await?;
			let routes: Vec<RouteDefinition> = response
				.json_value()
				.and_then(|body| serde_json::from_value(body["data"].clone()).ok())
				.unwrap_or_default();

			Ok(RouteTable::from_iter(routes))
		})
	}
}

/// Credential that expired a minute ago.
pub fn expired(access: &str, refresh: &str) -> Credential {
	let now = OffsetDateTime::now_utc();

	Credential::builder()
		.access_token(access)
		.refresh_token(refresh)
		.issued_at(now - Duration::hours(2))
		.expires_at(now - Duration::minutes(1))
		.build()
		.expect("Expired credential fixture should build.")
}

/// Credential valid for another hour, carrying `roles`.
pub fn fresh(access: &str, refresh: &str, roles: &[&str]) -> Credential {
	let now = OffsetDateTime::now_utc();

	Credential::builder()
		.access_token(access)
		.refresh_token(refresh)
		.issued_at(now)
		.expires_at(now + Duration::hours(1))
		.roles(RoleSet::new(roles.iter().copied()).expect("Role fixture should be valid."))
		.build()
		.expect("Fresh credential fixture should build.")
}

/// Expiry as the backend reports it: an RFC 3339 timestamp.
pub const FAR_FUTURE: &str = "2099-01-01T00:00:00Z";
