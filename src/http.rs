//! Transport primitives for authenticated API calls.
//!
//! [`HttpTransport`] is the crate's only dependency on an HTTP stack. Requests and responses
//! are plain owned values ([`ApiRequest`], [`ApiResponse`]) so the request pipeline can
//! clone a request for replay and inspect a response body before handing it to the caller.
//! [`AbortSignal`] lets callers cancel an in-flight request from another task.

// std
use std::{
	borrow::Cow,
	sync::atomic::{AtomicBool, Ordering},
};
// crates.io
use serde::de::DeserializeOwned;
use time::format_description::well_known::Rfc2822;
use tokio::sync::Notify;
// self
use crate::{_prelude::*, error::{ConfigError, TransportError}};
#[cfg(feature = "reqwest")] use crate::config::SessionConfig;

/// Boxed future returned by [`HttpTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP stacks capable of executing one [`ApiRequest`].
///
/// Implementations must be `Send + Sync + 'static` so a single transport can be shared by the
/// request pipeline and the renewal client. They should not retry on their own; replay after
/// renewal is the pipeline's job.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Sends `request` and resolves with the full response, whatever its status.
	fn send(&self, request: ApiRequest) -> TransportFuture<'_>;
}

/// HTTP methods supported by [`ApiRequest`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HttpMethod {
	/// `GET`
	Get,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `PATCH`
	Patch,
	/// `DELETE`
	Delete,
}
impl HttpMethod {
	/// Returns the method name as sent on the wire.
	pub const fn as_str(self) -> &'static str {
		match self {
			HttpMethod::Get => "GET",
			HttpMethod::Post => "POST",
			HttpMethod::Put => "PUT",
			HttpMethod::Patch => "PATCH",
			HttpMethod::Delete => "DELETE",
		}
	}
}
impl Display for HttpMethod {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outbound API call. Header names are stored lowercase.
#[derive(Clone)]
pub struct ApiRequest {
	/// Request method.
	pub method: HttpMethod,
	/// Absolute request URL.
	pub url: Url,
	/// Request headers keyed by lowercase name.
	pub headers: BTreeMap<String, String>,
	/// Optional request body.
	pub body: Option<Vec<u8>>,
	/// Optional cancellation handle shared with the caller.
	pub abort: Option<AbortSignal>,
}
impl ApiRequest {
	const AUTHORIZATION: &'static str = "authorization";

	/// Creates a request without headers or body.
	pub fn new(method: HttpMethod, url: Url) -> Self {
		Self { method, url, headers: BTreeMap::new(), body: None, abort: None }
	}

	/// Creates a `GET` request.
	pub fn get(url: Url) -> Self {
		Self::new(HttpMethod::Get, url)
	}

	/// Creates a `POST` request.
	pub fn post(url: Url) -> Self {
		Self::new(HttpMethod::Post, url)
	}

	/// Sets a header, replacing any previous value under the same (case-insensitive) name.
	pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
		self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());

		self
	}

	/// Serializes `body` as JSON and sets the matching content type.
	pub fn with_json<T>(mut self, body: &T) -> Result<Self, ConfigError>
	where
		T: ?Sized + Serialize,
	{
		self.body = Some(serde_json::to_vec(body)?);

		Ok(self.header("content-type", "application/json"))
	}

	/// Sets a raw body.
	pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = Some(body.into());

		self
	}

	/// Ties the request to a caller-owned abort handle.
	pub fn abort_on(mut self, signal: AbortSignal) -> Self {
		self.abort = Some(signal);

		self
	}

	/// Returns the current `Authorization` header value, if any.
	pub fn authorization(&self) -> Option<&str> {
		self.headers.get(Self::AUTHORIZATION).map(String::as_str)
	}

	/// Replaces the `Authorization` header.
	pub fn set_authorization(&mut self, value: String) {
		self.headers.insert(Self::AUTHORIZATION.into(), value);
	}

	/// Returns `true` once the attached abort handle has fired.
	pub fn is_aborted(&self) -> bool {
		self.abort.as_ref().is_some_and(AbortSignal::is_aborted)
	}
}
impl Debug for ApiRequest {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let headers = self
			.headers
			.iter()
			.map(|(name, value)| {
				let value = if name == Self::AUTHORIZATION { "<redacted>" } else { value.as_str() };

				(name.as_str(), value)
			})
			.collect::<BTreeMap<_, _>>();

		f.debug_struct("ApiRequest")
			.field("method", &self.method)
			.field("url", &self.url.as_str())
			.field("headers", &headers)
			.field("body_len", &self.body.as_ref().map(Vec::len))
			.field("aborted", &self.is_aborted())
			.finish()
	}
}

/// Fully buffered response returned by a transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Response headers keyed by lowercase name.
	pub headers: BTreeMap<String, String>,
	/// Raw response body.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Creates a response with no headers.
	pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
		Self { status, headers: BTreeMap::new(), body: body.into() }
	}

	/// Creates a JSON response from any serializable value.
	pub fn json_body<T>(status: u16, body: &T) -> Result<Self, ConfigError>
	where
		T: ?Sized + Serialize,
	{
		Ok(Self::new(status, serde_json::to_vec(body)?)
			.with_header("content-type", "application/json"))
	}

	/// Adds a header (name stored lowercase).
	pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
		self.headers.insert(name.as_ref().to_ascii_lowercase(), value.into());

		self
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Looks up a header by (case-insensitive) name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Body decoded as UTF-8, replacing invalid sequences.
	pub fn text(&self) -> Cow<'_, str> {
		String::from_utf8_lossy(&self.body)
	}

	/// Deserializes the body as JSON.
	pub fn json<T>(&self) -> Result<T, serde_json::Error>
	where
		T: DeserializeOwned,
	{
		serde_json::from_slice(&self.body)
	}

	/// Parses the body as a JSON value, or `None` when it is not JSON.
	pub fn json_value(&self) -> Option<serde_json::Value> {
		serde_json::from_slice(&self.body).ok()
	}

	/// `Retry-After` hint expressed as a duration relative to `now`.
	pub fn retry_after(&self, now: OffsetDateTime) -> Option<Duration> {
		let raw = self.header("retry-after")?.trim();

		if let Ok(secs) = raw.parse::<u32>() {
			return Some(Duration::seconds(secs.into()));
		}
		if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
			let delta = moment - now;

			if delta.is_positive() {
				return Some(delta);
			}
		}

		None
	}
}

/// Cloneable cancellation handle; aborting wakes every task waiting on it.
#[derive(Clone, Debug, Default)]
pub struct AbortSignal(Arc<AbortState>);
impl AbortSignal {
	/// Creates a handle that has not fired.
	pub fn new() -> Self {
		Self::default()
	}

	/// Fires the handle. Later calls are no-ops.
	pub fn abort(&self) {
		if !self.0.aborted.swap(true, Ordering::SeqCst) {
			self.0.notify.notify_waiters();
		}
	}

	/// Returns `true` once [`AbortSignal::abort`] has been called.
	pub fn is_aborted(&self) -> bool {
		self.0.aborted.load(Ordering::SeqCst)
	}

	/// Resolves once the handle fires (immediately if it already has).
	pub async fn aborted(&self) {
		let mut notified = std::pin::pin!(self.0.notify.notified());

		notified.as_mut().enable();

		if self.is_aborted() {
			return;
		}

		notified.await;
	}
}

#[derive(Debug, Default)]
struct AbortState {
	aborted: AtomicBool,
	notify: Notify,
}

/// [`HttpTransport`] backed by a shared [`ReqwestClient`].
///
/// Clients built through [`ReqwestTransport::new`] carry the configured timeout plus the
/// `Accept` and `X-Requested-With` headers every API call is expected to send.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug)]
pub struct ReqwestTransport(ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Builds a client from the session configuration.
	pub fn new(config: &SessionConfig) -> Result<Self, ConfigError> {
		// crates.io
		use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};

		let timeout = std::time::Duration::try_from(config.request_timeout)
			.map_err(ConfigError::http_client_build)?;
		let mut headers = HeaderMap::new();

		headers.insert(ACCEPT, HeaderValue::from_static("application/json, text/plain, */*"));
		headers.insert(
			HeaderName::from_static("x-requested-with"),
			HeaderValue::from_static("XMLHttpRequest"),
		);

		let client = ReqwestClient::builder().default_headers(headers).timeout(timeout).build()?;

		Ok(Self(client))
	}

	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
		Box::pin(async move {
			let method = match request.method {
				HttpMethod::Get => reqwest::Method::GET,
				HttpMethod::Post => reqwest::Method::POST,
				HttpMethod::Put => reqwest::Method::PUT,
				HttpMethod::Patch => reqwest::Method::PATCH,
				HttpMethod::Delete => reqwest::Method::DELETE,
			};
			let mut builder = self.0.request(method, request.url);

			for (name, value) in &request.headers {
				builder = builder.header(name.as_str(), value.as_str());
			}
			if let Some(body) = request.body {
				builder = builder.body(body);
			}

			let response = builder.send().await?;
			let status = response.status().as_u16();
			let headers = response
				.headers()
				.iter()
				.filter_map(|(name, value)| {
					value.to_str().ok().map(|value| (name.as_str().to_owned(), value.to_owned()))
				})
				.collect();
			let body = response.bytes().await?.to_vec();

			Ok(ApiResponse { status, headers, body })
		})
	}
}
