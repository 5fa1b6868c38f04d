// self
use crate::{
	_prelude::*,
	config::{ExpiryMarkers, RoutePolicy, SessionConfig, SessionEndpoints},
	error::ConfigError,
};

/// Builder for [`SessionConfig`] values.
#[derive(Debug)]
pub struct SessionConfigBuilder {
	/// Base URL of the application's API.
	pub base_url: Url,
	/// Credential-exempt endpoints.
	pub endpoints: SessionEndpoints,
	/// Route policy for the navigation guard.
	pub routes: RoutePolicy,
	/// Expired-credential markers.
	pub expiry: ExpiryMarkers,
	/// Authorization header scheme.
	pub auth_scheme: String,
	/// Per-request timeout.
	pub request_timeout: Duration,
}
impl SessionConfigBuilder {
	/// Creates a new builder seeded with defaults for everything but the base URL.
	pub fn new(base_url: Url) -> Self {
		Self {
			base_url,
			endpoints: SessionEndpoints::default(),
			routes: RoutePolicy::default(),
			expiry: ExpiryMarkers::default(),
			auth_scheme: "Bearer".into(),
			request_timeout: SessionConfig::DEFAULT_REQUEST_TIMEOUT,
		}
	}

	/// Overrides the credential-exempt endpoints.
	pub fn endpoints(mut self, endpoints: SessionEndpoints) -> Self {
		self.endpoints = endpoints;

		self
	}

	/// Overrides the route policy.
	pub fn routes(mut self, routes: RoutePolicy) -> Self {
		self.routes = routes;

		self
	}

	/// Adds a route reachable without a credential.
	pub fn allow_route(mut self, path: impl Into<String>) -> Self {
		self.routes.allowlist.push(path.into());

		self
	}

	/// Adds a route that must be reported as not found.
	pub fn hide_route(mut self, path: impl Into<String>) -> Self {
		self.routes.hidden.push(path.into());

		self
	}

	/// Overrides the expired-credential markers.
	pub fn expiry(mut self, expiry: ExpiryMarkers) -> Self {
		self.expiry = expiry;

		self
	}

	/// Overrides the authorization header scheme.
	pub fn auth_scheme(mut self, scheme: impl Into<String>) -> Self {
		self.auth_scheme = scheme.into();

		self
	}

	/// Overrides the per-request timeout.
	pub fn request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<SessionConfig, ConfigError> {
		let config = SessionConfig {
			base_url: self.base_url,
			endpoints: self.endpoints,
			routes: self.routes,
			expiry: self.expiry,
			auth_scheme: self.auth_scheme,
			request_timeout: self.request_timeout,
		};

		config.validate()?;

		Ok(config)
	}
}

impl SessionConfig {
	/// Validates invariants for the configuration.
	pub(crate) fn validate(&self) -> Result<(), ConfigError> {
		if !matches!(self.base_url.scheme(), "http" | "https") {
			return Err(ConfigError::UnsupportedScheme { url: self.base_url.to_string() });
		}
		if self.auth_scheme.is_empty() || self.auth_scheme.chars().any(char::is_whitespace) {
			return Err(ConfigError::InvalidAuthScheme);
		}
		if self.routes.return_to_param.is_empty() {
			return Err(ConfigError::EmptyReturnParam);
		}
		if !self.request_timeout.is_positive() {
			return Err(ConfigError::NonPositiveTimeout);
		}

		validate_path("endpoints.login", &self.endpoints.login)?;
		validate_path("endpoints.refresh", &self.endpoints.refresh)?;
		validate_path("endpoints.logout", &self.endpoints.logout)?;
		validate_path("routes.login", &self.routes.login)?;
		validate_path("routes.forbidden", &self.routes.forbidden)?;
		validate_path("routes.not_found", &self.routes.not_found)?;
		validate_path("routes.error", &self.routes.error)?;

		for route in &self.routes.allowlist {
			validate_path("routes.allowlist", route)?;
		}
		for route in &self.routes.hidden {
			validate_path("routes.hidden", route)?;
		}

		Ok(())
	}
}

fn validate_path(field: &'static str, value: &str) -> Result<(), ConfigError> {
	if value.starts_with('/') {
		Ok(())
	} else {
		Err(ConfigError::RelativePath { field, value: value.to_owned() })
	}
}
