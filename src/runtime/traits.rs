//! Trait abstractions for wizard I/O
//!
//! Persistence is the only collaborator with side effects outside the
//! process. Tests swap in the mocks from `testing`.

use crate::error::PersistenceError;
use crate::state_machine::{PersistedState, WizardState};
use async_trait::async_trait;
use std::sync::Arc;

/// External storage for a wizard's serializable state
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    /// Store the given snapshot, replacing whatever was saved before
    async fn save(&self, state: &WizardState) -> Result<(), PersistenceError>;

    /// Snapshot to resume from, read once when the wizard is built
    async fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        Ok(None)
    }

    /// Forget the saved snapshot
    async fn clear(&self) -> Result<(), PersistenceError> {
        Ok(())
    }
}

// ============================================================================
// Arc implementation for trait objects
// ============================================================================

#[async_trait]
impl<T: PersistenceAdapter + ?Sized> PersistenceAdapter for Arc<T> {
    async fn save(&self, state: &WizardState) -> Result<(), PersistenceError> {
        (**self).save(state).await
    }

    async fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        (**self).load().await
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        (**self).clear().await
    }
}
