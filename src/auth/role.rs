//! Role sets attached to credentials and route definitions.

// std
use std::collections::BTreeSet;
// crates.io
use serde::{Deserializer, Serializer, de::Error as DeError, ser::SerializeSeq};
// self
use crate::_prelude::*;

/// Errors emitted when validating role names.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum RoleValidationError {
	/// Empty role names are not allowed.
	#[error("Role names cannot be empty.")]
	Empty,
	/// Role names cannot contain whitespace characters.
	#[error("Role contains whitespace: {role}.")]
	ContainsWhitespace {
		/// The offending role name.
		role: String,
	},
}

/// Normalized (sorted, deduplicated) set of role names.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct RoleSet(Arc<[String]>);
impl RoleSet {
	/// Creates a normalized role set from any iterator.
	pub fn new<I, S>(roles: I) -> Result<Self, RoleValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut set = BTreeSet::new();

		for role in roles {
			let owned: String = role.into();

			if owned.is_empty() {
				return Err(RoleValidationError::Empty);
			}
			if owned.chars().any(char::is_whitespace) {
				return Err(RoleValidationError::ContainsWhitespace { role: owned });
			}

			set.insert(owned);
		}

		Ok(Self(Arc::from(set.into_iter().collect::<Vec<_>>())))
	}

	/// Number of distinct roles.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true if no roles are defined.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns true if the set contains the provided role.
	pub fn contains(&self, role: &str) -> bool {
		self.0.binary_search_by(|candidate| candidate.as_str().cmp(role)).is_ok()
	}

	/// Iterator over normalized role names.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(String::as_str)
	}

	/// Checks a route requirement against this (user) role set.
	///
	/// An empty requirement admits everyone; otherwise holding any one of the
	/// required roles is sufficient.
	pub fn satisfies(&self, required: &RoleSet) -> bool {
		required.is_empty() || required.iter().any(|role| self.contains(role))
	}
}
impl Debug for RoleSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("RoleSet").field(&self.0).finish()
	}
}
impl Display for RoleSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.0.join(","))
	}
}
impl TryFrom<Vec<String>> for RoleSet {
	type Error = RoleValidationError;

	fn try_from(value: Vec<String>) -> Result<Self, Self::Error> {
		Self::new(value)
	}
}
impl Serialize for RoleSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		let mut seq = serializer.serialize_seq(Some(self.0.len()))?;

		for role in self.0.iter() {
			seq.serialize_element(role)?;
		}

		seq.end()
	}
}
impl<'de> Deserialize<'de> for RoleSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let values = <Vec<String>>::deserialize(deserializer)?;

		RoleSet::new(values).map_err(DeError::custom)
	}
}
