//! Credential model: token secrets, the immutable credential snapshot, and role sets.

pub mod credential;
pub mod role;
pub mod secret;

pub use credential::*;
pub use role::*;
pub use secret::*;
