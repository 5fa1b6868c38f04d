//! Validated session configuration: endpoints, route policy, expiry markers, and timeouts.
//!
//! The configuration is plain data so it can be assembled through
//! [`SessionConfigBuilder`] or deserialized from JSON with [`SessionConfig::from_json`];
//! both paths run the same validation.

/// Builder API for assembling session configuration.
pub mod builder;

pub use builder::*;

// self
use crate::_prelude::*;

/// Credential-exempt API endpoints (matched by path suffix).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionEndpoints {
	/// Login endpoint.
	pub login: String,
	/// Refresh-token endpoint, also the renewal call target.
	pub refresh: String,
	/// Logout endpoint.
	pub logout: String,
}
impl SessionEndpoints {
	/// Returns `true` when `url` targets one of the exempt endpoints.
	///
	/// Matching is done on the path suffix so a base URL or proxy prefix in front of the
	/// endpoint does not defeat the check.
	pub fn is_exempt(&self, url: &Url) -> bool {
		let path = url.path().trim_end_matches('/');

		[&self.login, &self.refresh, &self.logout]
			.into_iter()
			.map(|endpoint| endpoint.trim_end_matches('/'))
			.any(|endpoint| !endpoint.is_empty() && path.ends_with(endpoint))
	}
}
impl Default for SessionEndpoints {
	fn default() -> Self {
		Self {
			login: "/auth/login".into(),
			refresh: "/auth/refresh-token".into(),
			logout: "/auth/logout".into(),
		}
	}
}

/// Route-level policy consulted by the navigation guard.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutePolicy {
	/// Login route that unauthenticated transitions are redirected to.
	pub login: String,
	/// Page shown when the user lacks the required roles.
	pub forbidden: String,
	/// Page shown for unknown or hidden routes.
	pub not_found: String,
	/// Page shown when evaluation fails unexpectedly.
	pub error: String,
	/// Routes reachable without a credential (the login route is always included).
	pub allowlist: Vec<String>,
	/// Routes that exist but must be reported as not found.
	pub hidden: Vec<String>,
	/// Query parameter carrying the original target on login redirects.
	pub return_to_param: String,
}
impl RoutePolicy {
	/// Returns `true` if `path` may be entered without a credential.
	pub fn is_allowlisted(&self, path: &str) -> bool {
		path == self.login || self.allowlist.iter().any(|route| route == path)
	}

	/// Returns `true` if `path` is configured as hidden.
	pub fn is_hidden(&self, path: &str) -> bool {
		self.hidden.iter().any(|route| route == path)
	}

	/// Builds the login redirect target carrying `return_to` as a query parameter.
	pub fn login_redirect(&self, return_to: &str) -> String {
		let query = url::form_urlencoded::Serializer::new(String::new())
			.append_pair(&self.return_to_param, return_to)
			.finish();

		format!("{}?{query}", self.login)
	}
}
impl Default for RoutePolicy {
	fn default() -> Self {
		Self {
			login: "/login".into(),
			forbidden: "/error/403".into(),
			not_found: "/error/404".into(),
			error: "/error/500".into(),
			allowlist: Vec::new(),
			hidden: Vec::new(),
			return_to_param: "redirect".into(),
		}
	}
}

/// Response markers that mean "the credential has expired".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiryMarkers {
	/// Transport-level statuses (e.g., `401`).
	pub statuses: Vec<u16>,
	/// Business codes embedded in a successful envelope (e.g., `99998`).
	pub business_codes: Vec<i64>,
}
impl Default for ExpiryMarkers {
	fn default() -> Self {
		Self { statuses: vec![401], business_codes: vec![99998] }
	}
}

/// Immutable session configuration shared by every component.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
	/// Base URL the application's API lives under.
	pub base_url: Url,
	/// Credential-exempt endpoints.
	#[serde(default)]
	pub endpoints: SessionEndpoints,
	/// Route policy used by the navigation guard.
	#[serde(default)]
	pub routes: RoutePolicy,
	/// Expired-credential markers used by the default strategy.
	#[serde(default)]
	pub expiry: ExpiryMarkers,
	/// Scheme prefixed to the access token in the `Authorization` header.
	#[serde(default = "default_auth_scheme")]
	pub auth_scheme: String,
	/// Per-request timeout applied by the built-in transport.
	#[serde(default = "default_request_timeout", with = "duration_secs")]
	pub request_timeout: Duration,
}
impl SessionConfig {
	const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::seconds(10);

	/// Creates a new builder for the provided base URL.
	pub fn builder(base_url: Url) -> SessionConfigBuilder {
		SessionConfigBuilder::new(base_url)
	}

	/// Parses and validates a JSON configuration document.
	pub fn from_json(raw: &str) -> Result<Self, crate::error::ConfigError> {
		let mut deserializer = serde_json::Deserializer::from_str(raw);
		let config: Self = serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| crate::error::ConfigError::Parse { source })?;

		config.validate()?;

		Ok(config)
	}

	/// Resolves the renewal endpoint against the base URL.
	pub fn refresh_url(&self) -> Url {
		self.endpoint_url(&self.endpoints.refresh)
	}

	/// Resolves an endpoint path against the base URL, keeping any base path prefix.
	pub fn endpoint_url(&self, path: &str) -> Url {
		let mut url = self.base_url.clone();
		let joined = format!("{}{}", self.base_url.path().trim_end_matches('/'), path);

		url.set_path(&joined);
		url.set_query(None);

		url
	}
}

fn default_auth_scheme() -> String {
	"Bearer".into()
}

fn default_request_timeout() -> Duration {
	SessionConfig::DEFAULT_REQUEST_TIMEOUT
}

mod duration_secs {
	// crates.io
	use serde::{Deserializer, Serializer, de::Error as DeError};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_f64(value.as_seconds_f64())
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
	where
		D: Deserializer<'de>,
	{
		let seconds = f64::deserialize(deserializer)?;

		Duration::checked_seconds_f64(seconds)
			.ok_or_else(|| D::Error::custom(format!("{seconds} seconds is out of range")))
	}
}
