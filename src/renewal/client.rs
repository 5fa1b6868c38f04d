//! HTTP implementation of [`RenewalClient`] for the refresh-token endpoint.

// crates.io
use serde::Deserializer;
use time::format_description::well_known::Rfc3339;
// self
use crate::{
	_prelude::*,
	auth::{Credential, RoleSet, TokenSecret},
	clock::{Clock, SystemClock},
	config::SessionConfig,
	error::AuthFailure,
	http::{ApiRequest, ApiResponse, HttpTransport},
	renewal::{RenewalClient, RenewalFuture},
	strategy::{RenewalErrorKind, ResponseContext, SessionStrategy},
};

/// Posts `{"refreshToken": ...}` to the configured refresh endpoint.
///
/// The response may be a bare token payload or the backend's `{success, code, msg, data}`
/// envelope. Expiry is read from `expiresAt` (unix seconds or milliseconds, or an RFC 3339
/// string; `accessTokenExpires` and `expires` are accepted as aliases) or from a relative
/// `expiresIn` in seconds. When the server does not rotate the refresh token or omits the
/// roles, the previous values are kept.
pub struct HttpRenewalClient<T>
where
	T: ?Sized + HttpTransport,
{
	transport: Arc<T>,
	endpoint: Url,
	strategy: Arc<dyn SessionStrategy>,
	clock: Arc<dyn Clock>,
}
impl<T> HttpRenewalClient<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates a client posting to the configured refresh endpoint.
	pub fn new(
		transport: Arc<T>,
		config: &SessionConfig,
		strategy: Arc<dyn SessionStrategy>,
	) -> Self {
		Self {
			transport,
			endpoint: config.refresh_url(),
			strategy,
			clock: Arc::new(SystemClock),
		}
	}

	/// Overrides the clock used to resolve relative expiries.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Endpoint the client posts to.
	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	async fn renew_inner(
		&self,
		refresh_token: &TokenSecret,
		previous: &Credential,
	) -> Result<Credential, AuthFailure> {
		let request = ApiRequest::post(self.endpoint.clone())
			.with_json(&RenewalRequest { refresh_token: refresh_token.expose() })
			.map_err(|e| AuthFailure::NetworkError { message: e.to_string() })?;
		let response = self
			.transport
			.send(request)
			.await
			.map_err(|e| AuthFailure::NetworkError { message: e.to_string() })?;
		let ctx = ResponseContext::from_response(&response);

		if !response.is_success() || ctx.success == Some(false) {
			let failure = match self.strategy.classify_renewal_error(&ctx) {
				RenewalErrorKind::Rejected => AuthFailure::RefreshRejected { reason: ctx.reason() },
				RenewalErrorKind::Transient => AuthFailure::NetworkError { message: ctx.reason() },
			};

			return Err(failure);
		}

		let payload = RenewalPayload::from_response(&response)
			.map_err(|message| AuthFailure::NetworkError { message })?;

		payload.into_credential(self.clock.now(), refresh_token, previous)
	}
}
impl<T> RenewalClient for HttpRenewalClient<T>
where
	T: ?Sized + HttpTransport,
{
	fn renew<'a>(
		&'a self,
		refresh_token: &'a TokenSecret,
		previous: &'a Credential,
	) -> RenewalFuture<'a> {
		Box::pin(self.renew_inner(refresh_token, previous))
	}
}
impl<T> Debug for HttpRenewalClient<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("HttpRenewalClient").field("endpoint", &self.endpoint.as_str()).finish()
	}
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RenewalRequest<'a> {
	refresh_token: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RenewalPayload {
	access_token: String,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default, alias = "accessTokenExpires", alias = "expires")]
	expires_at: Option<ExpiryValue>,
	#[serde(default)]
	expires_in: Option<i64>,
	#[serde(default)]
	roles: Option<RoleSet>,
}
impl RenewalPayload {
	const MILLIS_THRESHOLD: i64 = 100_000_000_000;

	fn from_response(response: &ApiResponse) -> Result<Self, String> {
		let value = response
			.json_value()
			.ok_or_else(|| "Renewal response is not valid JSON".to_owned())?;
		let payload = match value {
			serde_json::Value::Object(mut envelope) if envelope.contains_key("success") =>
				envelope.remove("data").unwrap_or(serde_json::Value::Null),
			other => other,
		};

		serde_path_to_error::deserialize(payload)
			.map_err(|e| format!("Renewal payload is malformed at `{}`: {}", e.path(), e.inner()))
	}

	fn into_credential(
		self,
		now: OffsetDateTime,
		presented: &TokenSecret,
		previous: &Credential,
	) -> Result<Credential, AuthFailure> {
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(value), _) => value.resolve()?,
			(None, Some(seconds)) => now.checked_add(Duration::seconds(seconds)).ok_or_else(|| {
				AuthFailure::NetworkError {
					message: format!("Renewal payload expiry of {seconds}s is out of range"),
				}
			})?,
			(None, None) =>
				return Err(AuthFailure::NetworkError {
					message: "Renewal payload carries no expiry".into(),
				}),
		};
		let refresh = match self.refresh_token {
			Some(token) if !token.trim().is_empty() => TokenSecret::new(token),
			_ => presented.clone(),
		};

		Credential::builder()
			.access_token(self.access_token)
			.refresh_secret(Some(refresh))
			.issued_at(now)
			.expires_at(expires_at)
			.roles(self.roles.unwrap_or_else(|| previous.roles.clone()))
			.build()
			.map_err(|e| AuthFailure::NetworkError { message: e.to_string() })
	}
}

#[derive(Debug)]
enum ExpiryValue {
	Unix(i64),
	Text(String),
}
impl ExpiryValue {
	fn resolve(self) -> Result<OffsetDateTime, AuthFailure> {
		let invalid = |detail: String| AuthFailure::NetworkError {
			message: format!("Renewal payload carries an invalid expiry: {detail}"),
		};

		match self {
			ExpiryValue::Unix(raw) if raw >= RenewalPayload::MILLIS_THRESHOLD =>
				OffsetDateTime::from_unix_timestamp_nanos(i128::from(raw) * 1_000_000)
					.map_err(|e| invalid(e.to_string())),
			ExpiryValue::Unix(raw) =>
				OffsetDateTime::from_unix_timestamp(raw).map_err(|e| invalid(e.to_string())),
			ExpiryValue::Text(text) =>
				OffsetDateTime::parse(&text, &Rfc3339).map_err(|e| invalid(e.to_string())),
		}
	}
}
impl<'de> Deserialize<'de> for ExpiryValue {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		#[derive(Deserialize)]
		#[serde(untagged)]
		enum Raw {
			Int(i64),
			Float(f64),
			Text(String),
		}

		Ok(match Raw::deserialize(deserializer)? {
			Raw::Int(value) => ExpiryValue::Unix(value),
			Raw::Float(value) => ExpiryValue::Unix(value as i64),
			Raw::Text(text) => match text.trim().parse::<i64>() {
				Ok(value) => ExpiryValue::Unix(value),
				Err(_) => ExpiryValue::Text(text),
			},
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::{_preludet::*, error::TransportError, strategy::DefaultSessionStrategy};

	fn config() -> SessionConfig {
		SessionConfig::builder(
			Url::parse("https://app.example.com/api").expect("Base URL fixture should parse."),
		)
		.build()
		.expect("Configuration fixture should build.")
	}

	fn client(transport: Arc<ScriptedTransport>) -> HttpRenewalClient<ScriptedTransport> {
		HttpRenewalClient::new(transport, &config(), Arc::new(DefaultSessionStrategy::default()))
			.with_clock(Arc::new(ManualClock::at(1_000)))
	}

	fn json(status: u16, body: serde_json::Value) -> ApiResponse {
		ApiResponse::json_body(status, &body).expect("Response fixture should serialize.")
	}

	#[tokio::test]
	async fn envelope_payload_renews_and_keeps_previous_values() {
		let transport = Arc::new(ScriptedTransport::new(|_| {
			Ok(json(
				200,
				serde_json::json!({
					"success": true,
					"code": 200,
					"msg": "ok",
					"data": { "accessToken": "a-2", "expiresIn": 600 }
				}),
			))
		}));
		let previous = credential_with_roles("a-1", 900, &["admin"]);
		let refresh = TokenSecret::new("r-1");
		let renewed = client(transport.clone())
			.renew(&refresh, &previous)
			.await
			.expect("Envelope payload should renew.");

		assert_eq!(renewed.access_token.expose(), "a-2");
		assert_eq!(renewed.refresh_token.as_ref().map(TokenSecret::expose), Some("r-1"));
		assert_eq!(renewed.expires_at, at(1_600));
		assert!(renewed.roles.contains("admin"));

		let sent = transport.requests();

		assert_eq!(sent.len(), 1);
		assert_eq!(sent[0].url.as_str(), "https://app.example.com/api/auth/refresh-token");
		assert_eq!(sent[0].body.as_deref(), Some(br#"{"refreshToken":"r-1"}"#.as_slice()));
	}

	#[tokio::test]
	async fn bare_payload_accepts_rotation_and_absolute_expiry() {
		let transport = Arc::new(ScriptedTransport::new(|_| {
			Ok(json(
				200,
				serde_json::json!({
					"accessToken": "a-3",
					"refreshToken": "r-3",
					"accessTokenExpires": "1970-01-01T01:00:00Z",
					"roles": ["viewer"]
				}),
			))
		}));
		let renewed = client(transport)
			.renew(&TokenSecret::new("r-2"), &credential("a-2", Some("r-2"), 10))
			.await
			.expect("Bare payload should renew.");

		assert_eq!(renewed.refresh_token.as_ref().map(TokenSecret::expose), Some("r-3"));
		assert_eq!(renewed.expires_at, at(3_600));
		assert!(renewed.roles.contains("viewer"));
	}

	#[tokio::test]
	async fn millisecond_expiry_is_detected() {
		let transport = Arc::new(ScriptedTransport::new(|_| {
			let expires_at = 7_200_000_000_000_i64;

			Ok(json(200, serde_json::json!({ "accessToken": "a", "expiresAt": expires_at })))
		}));
		let renewed = client(transport)
			.renew(&TokenSecret::new("r"), &credential("old", Some("r"), 10))
			.await
			.expect("Millisecond expiry should parse.");

		assert_eq!(renewed.expires_at, at(7_200_000_000));
	}

	#[tokio::test]
	async fn out_of_range_relative_expiry_is_a_network_error() {
		let transport = Arc::new(ScriptedTransport::new(|_| {
			Ok(json(200, serde_json::json!({ "accessToken": "a", "expiresIn": i64::MAX })))
		}));
		let err = client(transport)
			.renew(&TokenSecret::new("r"), &credential("old", Some("r"), 10))
			.await
			.expect_err("An expiry past the representable range must be rejected.");

		assert!(matches!(err, AuthFailure::NetworkError { .. }));
	}

	#[tokio::test]
	async fn failures_are_classified() {
		let previous = credential("a", Some("r"), 10);
		let presented = TokenSecret::new("r");
		let rejected = Arc::new(ScriptedTransport::new(|_| {
			let body = serde_json::json!({
				"success": false,
				"code": 10012,
				"msg": "refresh token missing",
			});

			Ok(json(401, body))
		}));
		let failure = client(rejected)
			.renew(&presented, &previous)
			.await
			.expect_err("401 must reject the refresh token.");

		assert_eq!(
			failure,
			AuthFailure::RefreshRejected { reason: "refresh token missing".into() }
		);

		let envelope_failure = Arc::new(ScriptedTransport::new(|_| {
			Ok(json(200, serde_json::json!({ "success": false, "code": 10012, "msg": "gone" })))
		}));

		assert!(matches!(
			client(envelope_failure).renew(&presented, &previous).await,
			Err(AuthFailure::RefreshRejected { .. })
		));

		let unavailable = Arc::new(ScriptedTransport::new(|_| Ok(ApiResponse::new(503, "busy"))));

		assert_eq!(
			client(unavailable).renew(&presented, &previous).await,
			Err(AuthFailure::NetworkError { message: "busy".into() })
		);

		let offline = Arc::new(ScriptedTransport::new(|_| Err(TransportError::Timeout)));

		assert!(matches!(
			client(offline).renew(&presented, &previous).await,
			Err(AuthFailure::NetworkError { .. })
		));

		let malformed =
			Arc::new(ScriptedTransport::new(|_| Ok(json(200, serde_json::json!({ "token": 1 })))));

		assert!(matches!(
			client(malformed).renew(&presented, &previous).await,
			Err(AuthFailure::NetworkError { .. })
		));
	}
}
