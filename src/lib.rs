//! Client-side session gate: single-flight credential renewal and authenticated request
//! replay, with a role-aware navigation guard sharing the same renewal coordinator.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

#[macro_use]
pub mod obs;

pub mod auth;
pub mod clock;
pub mod config;
pub mod error;
pub mod http;
pub mod navigation;
pub mod pipeline;
pub mod renewal;
pub mod session;
pub mod store;
pub mod strategy;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and scripted collaborators for tests; enabled via `cfg(test)` or
	//! the `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::sync::atomic::{AtomicUsize, Ordering};
	// crates.io
	use tokio::sync::Notify;
	// self
	use crate::{
		auth::{Credential, RoleSet, TokenSecret},
		clock::Clock,
		error::{AuthFailure, TransportError},
		http::{ApiRequest, ApiResponse, HttpTransport, TransportFuture},
		navigation::{
			ProgressIndicator, RouteDefinition, RouteFuture, RouteMaterializer, RouteTable,
		},
		renewal::{RenewalClient, RenewalFuture},
		session::SessionSink,
	};

	/// Returns the instant `secs` seconds after the unix epoch.
	pub fn at(secs: i64) -> OffsetDateTime {
		OffsetDateTime::from_unix_timestamp(secs).expect("Test timestamp should be in range.")
	}

	/// Builds a credential fixture issued at the epoch and expiring at `expires_at`.
	pub fn credential(access: &str, refresh: Option<&str>, expires_at: i64) -> Credential {
		let mut builder = Credential::builder()
			.access_token(access)
			.issued_at(at(0))
			.expires_at(at(expires_at));

		if let Some(refresh) = refresh {
			builder = builder.refresh_token(refresh);
		}

		builder.build().expect("Credential fixture should build.")
	}

	/// Builds a credential fixture carrying the provided roles.
	pub fn credential_with_roles(access: &str, expires_at: i64, roles: &[&str]) -> Credential {
		Credential::builder()
			.access_token(access)
			.refresh_token(format!("{access}-refresh"))
			.issued_at(at(0))
			.expires_at(at(expires_at))
			.roles(RoleSet::new(roles.iter().copied()).expect("Role fixture should be valid."))
			.build()
			.expect("Credential fixture should build.")
	}

	/// Clock whose reading is set explicitly by the test.
	#[derive(Debug)]
	pub struct ManualClock(Mutex<OffsetDateTime>);
	impl ManualClock {
		/// Creates a clock frozen at `secs` seconds after the epoch.
		pub fn at(secs: i64) -> Self {
			Self(Mutex::new(at(secs)))
		}

		/// Moves the clock to `secs` seconds after the epoch.
		pub fn set(&self, secs: i64) {
			*self.0.lock() = at(secs);
		}
	}
	impl Clock for ManualClock {
		fn now(&self) -> OffsetDateTime {
			*self.0.lock()
		}
	}

	/// Renewal client that replays scripted outcomes and can hold calls until released.
	#[derive(Debug, Default)]
	pub struct ScriptedRenewalClient {
		outcomes: Mutex<VecDeque<Result<Credential, AuthFailure>>>,
		gate: Option<Notify>,
		calls: AtomicUsize,
		seen_refresh: Mutex<Vec<String>>,
	}
	impl ScriptedRenewalClient {
		/// Creates a client that answers immediately with the scripted outcomes.
		pub fn new<I>(outcomes: I) -> Self
		where
			I: IntoIterator<Item = Result<Credential, AuthFailure>>,
		{
			Self { outcomes: Mutex::new(outcomes.into_iter().collect()), ..Default::default() }
		}

		/// Creates a client whose calls block until [`ScriptedRenewalClient::release`].
		pub fn gated<I>(outcomes: I) -> Self
		where
			I: IntoIterator<Item = Result<Credential, AuthFailure>>,
		{
			Self { gate: Some(Notify::new()), ..Self::new(outcomes) }
		}

		/// Lets one blocked (or the next) renewal call complete.
		pub fn release(&self) {
			if let Some(gate) = &self.gate {
				gate.notify_one();
			}
		}

		/// Number of renewal calls issued so far.
		pub fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}

		/// Refresh tokens presented to the client, in call order.
		pub fn seen_refresh_tokens(&self) -> Vec<String> {
			self.seen_refresh.lock().clone()
		}
	}
	impl RenewalClient for ScriptedRenewalClient {
		fn renew<'a>(
			&'a self,
			refresh_token: &'a TokenSecret,
			_previous: &'a Credential,
		) -> RenewalFuture<'a> {
			Box::pin(async move {
				self.calls.fetch_add(1, Ordering::SeqCst);
				self.seen_refresh.lock().push(refresh_token.expose().to_owned());

				if let Some(gate) = &self.gate {
					gate.notified().await;
				}

				self.outcomes.lock().pop_front().unwrap_or_else(|| {
					Err(AuthFailure::NetworkError { message: "renewal script exhausted".into() })
				})
			})
		}
	}

	/// Session sink that records every termination it receives.
	#[derive(Debug, Default)]
	pub struct RecordingSink(Mutex<Vec<Option<String>>>);
	impl RecordingSink {
		/// Return-to paths received so far.
		pub fn terminations(&self) -> Vec<Option<String>> {
			self.0.lock().clone()
		}
	}
	impl SessionSink for RecordingSink {
		fn on_session_terminated(&self, return_to: Option<&str>) {
			self.0.lock().push(return_to.map(str::to_owned));
		}
	}

	/// Progress indicator that counts `start`/`done` calls.
	#[derive(Debug, Default)]
	pub struct CountingProgress {
		started: AtomicUsize,
		finished: AtomicUsize,
	}
	impl CountingProgress {
		/// Returns `(start, done)` call counts.
		pub fn counts(&self) -> (usize, usize) {
			(self.started.load(Ordering::SeqCst), self.finished.load(Ordering::SeqCst))
		}
	}
	impl ProgressIndicator for CountingProgress {
		fn start(&self) {
			self.started.fetch_add(1, Ordering::SeqCst);
		}

		fn done(&self) {
			self.finished.fetch_add(1, Ordering::SeqCst);
		}
	}

	/// Route materializer that serves a fixed table and counts builds.
	#[derive(Debug)]
	pub struct StaticRoutes {
		routes: Vec<RouteDefinition>,
		builds: AtomicUsize,
		failure: Mutex<Option<AuthFailure>>,
	}
	impl StaticRoutes {
		/// Creates a materializer serving the provided routes.
		pub fn new<I>(routes: I) -> Self
		where
			I: IntoIterator<Item = RouteDefinition>,
		{
			Self {
				routes: routes.into_iter().collect(),
				builds: AtomicUsize::new(0),
				failure: Mutex::new(None),
			}
		}

		/// Makes the next build fail with the provided authentication failure.
		pub fn fail_next_with(&self, failure: AuthFailure) {
			*self.failure.lock() = Some(failure);
		}

		/// Number of builds performed so far.
		pub fn builds(&self) -> usize {
			self.builds.load(Ordering::SeqCst)
		}
	}
	impl RouteMaterializer for StaticRoutes {
		fn build_routes(&self) -> RouteFuture<'_> {
			Box::pin(async move {
				self.builds.fetch_add(1, Ordering::SeqCst);

				if let Some(failure) = self.failure.lock().take() {
					return Err(Error::Auth(failure));
				}

				Ok(RouteTable::from_iter(self.routes.iter().cloned()))
			})
		}
	}

	type Responder = dyn Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync;

	/// In-process transport that answers through a closure and records every request.
	pub struct ScriptedTransport {
		responder: Box<Responder>,
		requests: Mutex<Vec<ApiRequest>>,
	}
	impl ScriptedTransport {
		/// Creates a transport answering through `responder`.
		pub fn new<F>(responder: F) -> Self
		where
			F: 'static + Fn(&ApiRequest) -> Result<ApiResponse, TransportError> + Send + Sync,
		{
			Self { responder: Box::new(responder), requests: Mutex::new(Vec::new()) }
		}

		/// Requests dispatched so far.
		pub fn requests(&self) -> Vec<ApiRequest> {
			self.requests.lock().clone()
		}
	}
	impl Debug for ScriptedTransport {
		fn fmt(&self, f: &mut Formatter) -> FmtResult {
			f.debug_struct("ScriptedTransport")
				.field("requests", &self.requests.lock().len())
				.finish()
		}
	}
	impl HttpTransport for ScriptedTransport {
		fn send(&self, request: ApiRequest) -> TransportFuture<'_> {
			Box::pin(async move {
				let response = (self.responder)(&request);

				self.requests.lock().push(request);

				response
			})
		}
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
