//! Response classification hooks shared by the request pipeline and the renewal client.
//!
//! Backends disagree on how they signal an expired credential: some answer `401`, others
//! return `200` with a business code inside a `{success, code, msg, data}` envelope. The
//! [`SessionStrategy`] trait keeps that knowledge in one place so the pipeline and the
//! renewal client never inspect raw bodies themselves.

// self
use crate::{
	_prelude::*,
	config::{ExpiryMarkers, SessionConfig},
	http::ApiResponse,
};

/// Classification hook for API and renewal responses.
///
/// Implementors are required to be `Send + Sync` and work on crate-owned
/// [`ResponseContext`] values, so they stay independent of the HTTP client in use.
pub trait SessionStrategy: Send + Sync {
	/// Decides whether an API response succeeded, failed, or signals an expired credential.
	fn classify_response(&self, ctx: &ResponseContext) -> ResponseClass;

	/// Decides whether a failed renewal response rejected the refresh token or was transient.
	fn classify_renewal_error(&self, ctx: &ResponseContext) -> RenewalErrorKind;
}

/// Outcome categories for API responses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseClass {
	/// Hand the response to the caller.
	Success,
	/// The credential is no longer accepted; renew and replay.
	CredentialExpired,
	/// Non-credential failure; surface to the caller unchanged.
	Failed,
}

/// Outcome categories for failed renewal calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenewalErrorKind {
	/// The server judged the refresh token and refused it.
	Rejected,
	/// The server could not judge the refresh token (overload, gateway failure, ...).
	Transient,
}

/// Primitive view of a response passed to [`SessionStrategy`] hooks.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResponseContext {
	/// HTTP status code.
	pub status: u16,
	/// Envelope `success` flag, when the body is an envelope.
	pub success: Option<bool>,
	/// Envelope business `code`, when present (numbers or numeric strings).
	pub business_code: Option<i64>,
	/// Envelope `msg` (or `message`) field.
	pub message: Option<String>,
	/// Preview of the body for non-envelope payloads.
	pub body_preview: Option<String>,
}
impl ResponseContext {
	const BODY_PREVIEW_LIMIT: usize = 256;

	/// Creates a context carrying only a status code.
	pub fn new(status: u16) -> Self {
		Self { status, success: None, business_code: None, message: None, body_preview: None }
	}

	/// Extracts the envelope fields (if any) from `response`.
	pub fn from_response(response: &ApiResponse) -> Self {
		let mut ctx = Self::new(response.status);

		match response.json_value() {
			Some(serde_json::Value::Object(envelope)) => {
				ctx.success = envelope.get("success").and_then(serde_json::Value::as_bool);
				ctx.business_code = envelope.get("code").and_then(parse_code);
				ctx.message = envelope
					.get("msg")
					.or_else(|| envelope.get("message"))
					.and_then(serde_json::Value::as_str)
					.map(str::to_owned);
			},
			_ =>
				if !response.body.is_empty() {
					ctx.body_preview = Some(truncate_preview(&response.text()));
				},
		}

		ctx
	}

	/// Adds an envelope business code.
	pub fn with_business_code(mut self, code: i64) -> Self {
		self.business_code = Some(code);

		self
	}

	/// Adds an envelope message.
	pub fn with_message(mut self, message: impl Into<String>) -> Self {
		self.message = Some(message.into());

		self
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_http_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Best human-readable reason for a failure.
	pub fn reason(&self) -> String {
		self.message
			.clone()
			.or_else(|| self.body_preview.clone())
			.unwrap_or_else(|| format!("HTTP status {}", self.status))
	}

	fn text_hint(&self) -> Option<String> {
		self.message.as_deref().or(self.body_preview.as_deref()).map(str::to_ascii_lowercase)
	}
}

/// Default strategy driven by the configured [`ExpiryMarkers`].
///
/// Responses are treated as expired when the status or business code matches a marker, or
/// when the message carries the "token is invalid or expired" hint. Any other 2xx response
/// counts as success, whatever its envelope says.
#[derive(Clone, Debug, Default)]
pub struct DefaultSessionStrategy {
	markers: ExpiryMarkers,
}
impl DefaultSessionStrategy {
	const EXPIRED_HINT: &'static str = "token is invalid or expired";

	/// Creates a strategy for the provided markers.
	pub fn new(markers: ExpiryMarkers) -> Self {
		Self { markers }
	}

	/// Creates a strategy from the session configuration.
	pub fn from_config(config: &SessionConfig) -> Self {
		Self::new(config.expiry.clone())
	}
}
impl Display for DefaultSessionStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("default-session-strategy")
	}
}
impl SessionStrategy for DefaultSessionStrategy {
	fn classify_response(&self, ctx: &ResponseContext) -> ResponseClass {
		if self.markers.statuses.contains(&ctx.status) {
			return ResponseClass::CredentialExpired;
		}
		if ctx.business_code.is_some_and(|code| self.markers.business_codes.contains(&code)) {
			return ResponseClass::CredentialExpired;
		}
		if ctx.text_hint().is_some_and(|text| text.contains(Self::EXPIRED_HINT)) {
			return ResponseClass::CredentialExpired;
		}

		if ctx.is_http_success() { ResponseClass::Success } else { ResponseClass::Failed }
	}

	fn classify_renewal_error(&self, ctx: &ResponseContext) -> RenewalErrorKind {
		match ctx.status {
			408 | 429 => RenewalErrorKind::Transient,
			code if code >= 500 => RenewalErrorKind::Transient,
			400..=499 => RenewalErrorKind::Rejected,
			200..=299 if ctx.success == Some(false) || ctx.business_code.is_some() =>
				RenewalErrorKind::Rejected,
			_ => RenewalErrorKind::Transient,
		}
	}
}

fn parse_code(value: &serde_json::Value) -> Option<i64> {
	match value {
		serde_json::Value::Number(number) => number.as_i64(),
		serde_json::Value::String(text) => text.trim().parse().ok(),
		_ => None,
	}
}

fn truncate_preview(body: &str) -> String {
	if body.chars().count() <= ResponseContext::BODY_PREVIEW_LIMIT {
		return body.to_owned();
	}

	let mut buf = body.chars().take(ResponseContext::BODY_PREVIEW_LIMIT).collect::<String>();

	buf.push('…');

	buf
}
