//! In-memory [`CredentialPersistence`] for tests and sessions that must not outlive the process.

// self
use crate::{
	_prelude::*,
	auth::Credential,
	store::{CredentialPersistence, StoreFuture},
};

/// Keeps the persisted credential in-process.
#[derive(Clone, Debug, Default)]
pub struct MemoryPersistence(Arc<RwLock<Option<Credential>>>);
impl MemoryPersistence {
	/// Creates a backend that already holds `credential`.
	pub fn seeded(credential: Credential) -> Self {
		Self(Arc::new(RwLock::new(Some(credential))))
	}

	/// Returns what is currently persisted.
	pub fn snapshot(&self) -> Option<Credential> {
		self.0.read().clone()
	}
}
impl CredentialPersistence for MemoryPersistence {
	fn load(&self) -> StoreFuture<'_, Option<Credential>> {
		let slot = self.0.clone();

		Box::pin(async move { Ok(slot.read().clone()) })
	}

	fn save(&self, credential: Credential) -> StoreFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move {
			*slot.write() = Some(credential);

			Ok(())
		})
	}

	fn clear(&self) -> StoreFuture<'_, ()> {
		let slot = self.0.clone();

		Box::pin(async move {
			slot.write().take();

			Ok(())
		})
	}
}
