//! Redacting wrapper for access and refresh token material.

// crates.io
use serde::{Deserializer, Serializer};
// self
use crate::_prelude::*;

/// Token material that prints as `<redacted>`.
///
/// The value is shared, so cloning a credential for every caller resumed by a renewal round
/// does not copy the token.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct TokenSecret(Arc<str>);
impl TokenSecret {
	const REDACTED: &'static str = "<redacted>";

	/// Wraps a token value.
	pub fn new(value: impl Into<String>) -> Self {
		Self(Arc::from(value.into()))
	}

	/// Raw token value; never log it.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// `true` for empty or whitespace-only values, which are never sent.
	pub fn is_blank(&self) -> bool {
		self.0.trim().is_empty()
	}

	/// `Authorization` header value, e.g. `Bearer <token>`.
	pub fn authorization_value(&self, scheme: &str) -> String {
		format!("{scheme} {}", self.0)
	}
}
impl AsRef<str> for TokenSecret {
	fn as_ref(&self) -> &str {
		self.expose()
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "TokenSecret({})", Self::REDACTED)
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(Self::REDACTED)
	}
}
impl Serialize for TokenSecret {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.0)
	}
}
impl<'de> Deserialize<'de> for TokenSecret {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		String::deserialize(deserializer).map(Self::new)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn formatting_never_leaks_the_token() {
		let secret = TokenSecret::new("a-1b2c3");

		assert_eq!(format!("{secret:?}"), "TokenSecret(<redacted>)");
		assert_eq!(secret.to_string(), "<redacted>");
		assert_eq!(secret.authorization_value("Bearer"), "Bearer a-1b2c3");
		assert!(TokenSecret::new(" \t").is_blank());
	}

	#[test]
	fn persists_as_a_plain_string() {
		let secret = TokenSecret::new("r-1");
		let raw = serde_json::to_string(&secret).expect("Secret should serialize.");

		assert_eq!(raw, "\"r-1\"");
		assert_eq!(
			serde_json::from_str::<TokenSecret>(&raw).expect("Secret should deserialize."),
			secret
		);
	}
}
