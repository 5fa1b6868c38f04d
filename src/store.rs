//! Credential holder plus the persistence contract and built-in persistence backends.

pub mod file;
pub mod memory;

pub use file::FilePersistence;
pub use memory::MemoryPersistence;

// self
use crate::{_prelude::*, auth::Credential};

/// Boxed future returned by [`CredentialPersistence`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persisted-credential reader/writer (browser storage, cookie jar, file, ...).
pub trait CredentialPersistence
where
	Self: Send + Sync,
{
	/// Loads the previously persisted credential, if any.
	fn load(&self) -> StoreFuture<'_, Option<Credential>>;

	/// Persists `credential`, replacing whatever was stored before.
	fn save(&self, credential: Credential) -> StoreFuture<'_, ()>;

	/// Removes the persisted credential and any associated state.
	fn clear(&self) -> StoreFuture<'_, ()>;
}

/// Error type produced by [`CredentialPersistence`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

/// Plain holder of the session's current credential.
///
/// The in-memory snapshot is authoritative; persistence is written through on every
/// mutation. The store performs no coordination of its own; the renewal coordinator
/// decides when credentials are replaced or cleared.
pub struct TokenStore {
	current: RwLock<Option<Credential>>,
	persistence: Arc<dyn CredentialPersistence>,
}
impl TokenStore {
	/// Creates an empty store writing through to `persistence`.
	pub fn new(persistence: Arc<dyn CredentialPersistence>) -> Self {
		Self { current: RwLock::new(None), persistence }
	}

	/// Creates an empty store backed by a fresh [`MemoryPersistence`].
	pub fn in_memory() -> Self {
		Self::new(Arc::new(MemoryPersistence::default()))
	}

	/// Loads the persisted credential into memory (session resume at startup).
	pub async fn restore(&self) -> Result<Option<Credential>, StoreError> {
		let loaded = self.persistence.load().await?;

		*self.current.write() = loaded.clone();

		Ok(loaded)
	}

	/// Returns a snapshot of the current credential.
	pub fn get(&self) -> Option<Credential> {
		self.current.read().clone()
	}

	/// Returns `true` when `credential` is expired at `now`.
	pub fn is_expired(credential: &Credential, now: OffsetDateTime) -> bool {
		credential.is_expired_at(now)
	}

	/// Replaces the current credential and persists it.
	pub async fn set(&self, credential: Credential) -> Result<(), StoreError> {
		*self.current.write() = Some(credential.clone());

		self.persistence.save(credential).await
	}

	/// Removes the credential and its persisted state (logout).
	pub async fn clear(&self) -> Result<(), StoreError> {
		self.current.write().take();

		self.persistence.clear().await
	}
}
impl Debug for TokenStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenStore").field("current", &*self.current.read()).finish()
	}
}
