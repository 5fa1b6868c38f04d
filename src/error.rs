//! Session-level error types shared across the coordinator, pipeline, and navigation guard.

// self
use crate::{_prelude::*, http::ApiResponse};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Credential persistence failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS, timeout).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Credential renewal failed; the session must re-authenticate.
	#[error(transparent)]
	Auth(#[from] AuthFailure),

	/// The request was aborted by the client before it completed.
	#[error("Request was cancelled by the client.")]
	Cancelled,
	/// Upstream answered with a non-success status unrelated to credentials.
	#[error("Request failed with HTTP status {}.", .response.status)]
	RequestFailed {
		/// Unmodified upstream response.
		response: ApiResponse,
	},
	/// Upstream rejected the credential again after a successful renewal and replay.
	#[error("Credential was rejected again after renewal (HTTP status {}).", .response.status)]
	CredentialRejected {
		/// Response returned by the replayed request.
		response: ApiResponse,
	},
	/// The authenticated user holds none of the roles the route requires.
	#[error("User lacks the roles required by `{route}`.")]
	AuthorizationDenied {
		/// Route path that was denied.
		route: String,
	},
	/// The route does not exist in the materialized route table.
	#[error("Route `{route}` does not exist.")]
	RouteNotFound {
		/// Route path that was requested.
		route: String,
	},
}
impl Error {
	/// Returns `true` if the error represents a client-side abort.
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled | Self::Transport(TransportError::Cancelled))
	}

	/// Returns the renewal failure, if this error signals a lost session.
	pub fn auth_failure(&self) -> Option<&AuthFailure> {
		match self {
			Self::Auth(failure) => Some(failure),
			_ => None,
		}
	}
}

/// Renewal failures; every variant means "must re-authenticate".
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum AuthFailure {
	/// No refresh token is available, so renewal cannot be attempted.
	#[error("No refresh token is available for renewal.")]
	NoRefreshToken,
	/// The renewal endpoint rejected the refresh token.
	#[error("Renewal endpoint rejected the refresh token: {reason}.")]
	RefreshRejected {
		/// Server- or strategy-supplied reason string.
		reason: String,
	},
	/// The renewal call failed before the server could judge the refresh token.
	#[error("Renewal failed with a network error: {message}.")]
	NetworkError {
		/// Transport-supplied message summarizing the failure.
		message: String,
	},
}
impl AuthFailure {
	/// Returns `true` for transient failures that a caller may choose to retry manually.
	pub fn is_transient(&self) -> bool {
		matches!(self, Self::NetworkError { .. })
	}

	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(&self) -> &'static str {
		match self {
			Self::NoRefreshToken => "no_refresh_token",
			Self::RefreshRejected { .. } => "refresh_rejected",
			Self::NetworkError { .. } => "network_error",
		}
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// Configuration document could not be parsed.
	#[error("Session configuration is malformed.")]
	Parse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
	},
	/// Base URL uses a scheme other than HTTP(S).
	#[error("Base URL must use http or https: {url}.")]
	UnsupportedScheme {
		/// Offending URL.
		url: String,
	},
	/// Endpoint or route paths must be absolute.
	#[error("The {field} path must start with `/`: {value}.")]
	RelativePath {
		/// Which configuration field failed validation.
		field: &'static str,
		/// Value that failed validation.
		value: String,
	},
	/// Authorization scheme must be a single non-empty token.
	#[error("Authorization scheme must be a non-empty token without whitespace.")]
	InvalidAuthScheme,
	/// Query parameter used for the return path must be non-empty.
	#[error("Return-to parameter name cannot be empty.")]
	EmptyReturnParam,
	/// Request timeout must be strictly positive.
	#[error("Request timeout must be positive.")]
	NonPositiveTimeout,
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	Body(#[from] serde_json::Error),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, timeout, abort).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while sending the request.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// The request exceeded its deadline.
	#[error("Request timed out.")]
	Timeout,
	/// The request was aborted by the client.
	#[error("Request was aborted.")]
	Cancelled,
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while sending the request.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::Timeout } else { Self::network(e) }
	}
}
