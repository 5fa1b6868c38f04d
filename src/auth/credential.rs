//! Immutable credential snapshots and their builder.

// self
use crate::{
	_prelude::*,
	auth::{RoleSet, TokenSecret},
};

/// Errors produced by [`CredentialBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum CredentialBuilderError {
	/// Issued when no (or a blank) access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
}

/// Access/refresh token pair plus expiry, issued at login and replaced wholesale on renewal.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
	/// Access token attached to outbound requests; callers must avoid logging it.
	pub access_token: TokenSecret,
	/// Refresh token used to renew the access token, if one was issued.
	pub refresh_token: Option<TokenSecret>,
	/// Instant the credential was issued.
	pub issued_at: OffsetDateTime,
	/// Instant from which the access token is considered expired.
	pub expires_at: OffsetDateTime,
	/// Roles held by the authenticated user.
	#[serde(default)]
	pub roles: RoleSet,
}
impl Credential {
	/// Returns a builder for constructing credentials.
	pub fn builder() -> CredentialBuilder {
		CredentialBuilder::default()
	}

	/// Returns `true` once `now` reaches the expiry instant.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		now >= self.expires_at
	}

	/// Time left before expiry; negative once expired.
	pub fn remaining(&self, now: OffsetDateTime) -> Duration {
		self.expires_at - now
	}

	/// Returns the refresh token when it can be presented to the renewal endpoint.
	pub fn renewable_refresh_token(&self) -> Option<&TokenSecret> {
		self.refresh_token.as_ref().filter(|secret| !secret.is_blank())
	}
}
impl Debug for Credential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credential")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("roles", &self.roles)
			.finish()
	}
}

/// Builder for [`Credential`].
#[derive(Clone, Debug, Default)]
pub struct CredentialBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
	roles: RoleSet,
}
impl CredentialBuilder {
	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides an already wrapped refresh token, if any.
	pub fn refresh_secret(mut self, secret: Option<TokenSecret>) -> Self {
		self.refresh_token = secret;

		self
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Sets the roles held by the authenticated user.
	pub fn roles(mut self, roles: RoleSet) -> Self {
		self.roles = roles;

		self
	}

	/// Consumes the builder and produces a [`Credential`].
	pub fn build(self) -> Result<Credential, CredentialBuilderError> {
		let access_token = self
			.access_token
			.filter(|secret| !secret.is_blank())
			.ok_or(CredentialBuilderError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(CredentialBuilderError::MissingExpiry),
		};

		Ok(Credential {
			access_token,
			refresh_token: self.refresh_token,
			issued_at,
			expires_at,
			roles: self.roles,
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn expiry_is_inclusive_of_the_deadline() {
		let credential = Credential::builder()
			.access_token("access")
			.refresh_token("refresh")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_at(macros::datetime!(2025-01-01 01:00 UTC))
			.build()
			.expect("Credential builder should succeed for expiry checks.");

		assert!(!credential.is_expired_at(macros::datetime!(2025-01-01 00:59:59 UTC)));
		assert!(credential.is_expired_at(macros::datetime!(2025-01-01 01:00 UTC)));
		assert_eq!(
			credential.remaining(macros::datetime!(2025-01-01 00:30 UTC)),
			Duration::minutes(30)
		);
	}

	#[test]
	fn builder_handles_relative_expiry_and_validation() {
		let credential = Credential::builder()
			.access_token("secret")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::minutes(30))
			.build()
			.expect("Credential builder should support relative expiry calculations.");

		assert_eq!(credential.expires_at, macros::datetime!(2025-01-01 00:30 UTC));
		assert!(credential.renewable_refresh_token().is_none());
		assert_eq!(
			Credential::builder().access_token(" ").expires_in(Duration::MINUTE).build(),
			Err(CredentialBuilderError::MissingAccessToken)
		);
		assert_eq!(
			Credential::builder().access_token("a").build(),
			Err(CredentialBuilderError::MissingExpiry)
		);
	}

	#[test]
	fn blank_refresh_tokens_are_not_renewable() {
		let credential = Credential::builder()
			.access_token("access")
			.refresh_token("")
			.expires_in(Duration::MINUTE)
			.build()
			.expect("Credential builder should accept blank refresh tokens.");

		assert!(credential.renewable_refresh_token().is_none());
	}

	#[test]
	fn debug_output_redacts_secrets() {
		let credential = Credential::builder()
			.access_token("very-secret-access")
			.refresh_token("very-secret-refresh")
			.expires_in(Duration::MINUTE)
			.build()
			.expect("Credential builder should succeed.");
		let rendered = format!("{credential:?}");

		assert!(!rendered.contains("very-secret"));
		assert!(rendered.contains("<redacted>"));
	}
}
