#![cfg(feature = "reqwest")]

mod common;

// std
use std::sync::Arc;
// crates.io
use httpmock::prelude::*;
use serde_json::json;
use time::macros::datetime;
// self
use common::{FAR_FUTURE, Session, expired, fresh};
use session_gate::{
	error::{AuthFailure, Error},
	http::ApiResponse,
};

#[tokio::test]
async fn expired_credential_is_renewed_before_the_request() {
	let server = MockServer::start_async().await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/api/auth/refresh-token")
				.json_body(json!({ "refreshToken": "r-1" }));
			then.status(200).json_body(json!({
				"success": true,
				"code": 0,
				"msg": "ok",
				"data": {
					"accessToken": "a-2",
					"refreshToken": "r-2",
					"expires": FAR_FUTURE,
					"roles": ["admin"],
				},
			}));
		})
		.await;
	let profile = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/user/profile").header("authorization", "Bearer a-2");
			then.status(200).json_body(json!({ "success": true, "data": { "name": "kim" } }));
		})
		.await;
	let session = Session::start(&server, Some(expired("a-1", "r-1"))).await;
	let response =
		session.pipeline.get("/user/profile").await.expect("Request should succeed after renewal.");

	assert_eq!(response.status, 200);

	refresh.assert_async().await;
	profile.assert_async().await;

	let stored = session.store.get().expect("Renewed credential should be stored.");

	assert_eq!(stored.access_token.expose(), "a-2");
	assert_eq!(stored.expires_at, datetime!(2099-01-01 0:00 UTC));
	assert_eq!(stored.refresh_token.as_ref().map(|secret| secret.expose()), Some("r-2"));
	assert!(stored.roles.contains("admin"));
}

#[tokio::test]
async fn concurrent_requests_share_one_renewal() {
	let server = MockServer::start_async().await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/refresh-token");
			then.status(200)
				.delay(std::time::Duration::from_millis(150))
				.json_body(json!({
					"success": true,
					"data": { "accessToken": "a-2", "expires": FAR_FUTURE },
				}));
		})
		.await;
	let list = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/list").header("authorization", "Bearer a-2");
			then.status(200).json_body(json!({ "success": true, "data": [] }));
		})
		.await;
	let session = Session::start(&server, Some(expired("a-1", "r-1"))).await;

	for result in get_concurrently(&session, 5).await {
		let response =
			result.expect("Every request should succeed with the renewed credential.");

		assert_eq!(response.status, 200);
	}

	refresh.assert_calls_async(1).await;
	list.assert_calls_async(5).await;
	assert_eq!(session.coordinator.rounds(), 1);
	assert_eq!(session.coordinator.pending_waiters(), 0);
}

#[tokio::test]
async fn expired_business_code_is_replayed_once() {
	let server = MockServer::start_async().await;
	let stale = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/orders").header("authorization", "Bearer a-1");
			then.status(200).json_body(json!({
				"success": false,
				"code": 99998,
				"msg": "token is invalid or expired",
			}));
		})
		.await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/refresh-token");
			then.status(200).json_body(json!({
				"success": true,
				"data": { "accessToken": "a-2", "refreshToken": "r-2", "expires": FAR_FUTURE },
			}));
		})
		.await;
	let replayed = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/api/orders")
				.header("authorization", "Bearer a-2")
				.json_body(json!({ "item": 7 }));
			then.status(200).json_body(json!({ "success": true, "data": { "id": 1 } }));
		})
		.await;
	let session = Session::start(&server, Some(fresh("a-1", "r-1", &["admin"]))).await;
	let response = session
		.pipeline
		.post_json("/orders", &json!({ "item": 7 }))
		.await
		.expect("Replay should succeed with the renewed credential.");

	assert_eq!(response.json_value().map(|body| body["data"]["id"].clone()), Some(json!(1)));

	stale.assert_calls_async(1).await;
	refresh.assert_calls_async(1).await;
	replayed.assert_calls_async(1).await;
}

#[tokio::test]
async fn rejected_refresh_tears_the_session_down_once() {
	let server = MockServer::start_async().await;
	let refresh = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/refresh-token");
			then.status(401).delay(std::time::Duration::from_millis(150)).json_body(json!({
				"success": false,
				"code": 10012,
				"msg": "refresh token missing",
			}));
		})
		.await;
	let guarded = server
		.mock_async(|when, then| {
			when.method(GET).path("/api/list");
			then.status(200);
		})
		.await;
	let session = Session::start(&server, Some(expired("a-1", "r-1"))).await;

	session.teardown.record_location("/system/user");

	for result in get_concurrently(&session, 3).await {
		match result {
			Err(Error::Auth(AuthFailure::RefreshRejected { reason })) =>
				assert_eq!(reason, "refresh token missing"),
			other => panic!("Unexpected result: {other:?}."),
		}
	}

	refresh.assert_calls_async(1).await;
	guarded.assert_calls_async(0).await;
	assert!(session.store.get().is_none());
	assert_eq!(session.sink.terminations(), vec![Some("/system/user".to_owned())]);
}

#[tokio::test]
async fn session_endpoints_bypass_the_gate() {
	let server = MockServer::start_async().await;
	let login = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/login");
			then.status(200).json_body(json!({ "success": true, "data": {} }));
		})
		.await;
	let session = Session::start(&server, None).await;
	let response = session
		.pipeline
		.post_json("/auth/login", &json!({ "username": "kim", "password": "secret" }))
		.await
		.expect("Login should not require a credential.");

	assert_eq!(response.status, 200);

	login.assert_async().await;
	assert_eq!(session.coordinator.rounds(), 0);
}

#[tokio::test]
async fn logout_clears_the_session() -> color_eyre::Result<()> {
	let server = MockServer::start_async().await;
	let logout = server
		.mock_async(|when, then| {
			when.method(POST).path("/api/auth/logout").header("authorization", "Bearer a-1");
			then.status(200).json_body(json!({ "success": true }));
		})
		.await;
	let session = Session::start(&server, Some(fresh("a-1", "r-1", &[]))).await;

	session.pipeline.logout().await?;

	logout.assert_async().await;
	assert!(session.store.get().is_none());
	assert_eq!(session.teardown.epoch(), 1);
	assert!(session.config.endpoints.is_exempt(&session.pipeline.url("/auth/logout")));

	Ok(())
}

async fn get_concurrently(session: &Session, count: usize) -> Vec<Result<ApiResponse, Error>> {
	let handles = (0..count)
		.map(|_| {
			let pipeline = Arc::clone(&session.pipeline);

			tokio::spawn(async move { pipeline.get("/list").await })
		})
		.collect::<Vec<_>>();
	let mut results = Vec::with_capacity(count);

	for handle in handles {
		results.push(handle.await.expect("Request task should not panic."));
	}

	results
}
