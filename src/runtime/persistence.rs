//! Background persistence worker and in-crate adapters
//!
//! The engine never awaits the adapter on the transition path. Commands are
//! queued on an unbounded channel and applied in order by one task per wizard;
//! failures are logged and broadcast as `PersistenceFailed` events.

use super::traits::PersistenceAdapter;
use crate::error::PersistenceError;
use crate::state_machine::{PersistedState, WizardEvent, WizardState};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::sync::{broadcast, mpsc, oneshot};

// ============================================================================
// Worker
// ============================================================================

#[derive(Debug)]
pub(crate) enum PersistCommand {
    Save(Arc<WizardState>),
    Clear,
    /// Acknowledged once every earlier command has been applied
    Flush(oneshot::Sender<()>),
}

/// Sender side of a wizard's persistence queue
#[derive(Debug, Clone)]
pub(crate) struct PersistenceQueue {
    tx: Option<mpsc::UnboundedSender<PersistCommand>>,
}

impl PersistenceQueue {
    /// Queue that drops every command, used when no adapter is configured
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// Spawn the worker task for `adapter`. Must be called inside a Tokio runtime.
    pub fn spawn(
        wizard_id: String,
        adapter: Arc<dyn PersistenceAdapter>,
        events: broadcast::Sender<WizardEvent>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_worker(wizard_id, adapter, events, rx));
        Self { tx: Some(tx) }
    }

    pub fn save(&self, state: Arc<WizardState>) {
        self.send(PersistCommand::Save(state));
    }

    pub fn clear(&self) {
        self.send(PersistCommand::Clear);
    }

    /// Wait until everything queued so far has reached the adapter
    pub async fn flush(&self) {
        let Some(tx) = &self.tx else {
            return;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if tx.send(PersistCommand::Flush(ack_tx)).is_ok() {
            // A closed worker has nothing left to flush
            let _ = ack_rx.await;
        }
    }

    fn send(&self, command: PersistCommand) {
        if let Some(tx) = &self.tx {
            if tx.send(command).is_err() {
                tracing::error!("Persistence worker is gone, dropping command");
            }
        }
    }
}

async fn run_worker(
    wizard_id: String,
    adapter: Arc<dyn PersistenceAdapter>,
    events: broadcast::Sender<WizardEvent>,
    mut rx: mpsc::UnboundedReceiver<PersistCommand>,
) {
    tracing::debug!(wizard_id = %wizard_id, "Persistence worker started");

    while let Some(command) = rx.recv().await {
        let (operation, result) = match command {
            PersistCommand::Save(state) => ("save", adapter.save(&state).await),
            PersistCommand::Clear => ("clear", adapter.clear().await),
            PersistCommand::Flush(ack) => {
                let _ = ack.send(());
                continue;
            }
        };

        if let Err(e) = result {
            tracing::warn!(wizard_id = %wizard_id, operation, error = %e, "Persistence failed");
            let _ = events.send(WizardEvent::PersistenceFailed {
                operation: operation.to_string(),
                message: e.to_string(),
            });
        }
    }

    tracing::debug!(wizard_id = %wizard_id, "Persistence worker stopped");
}

// ============================================================================
// In-memory adapter
// ============================================================================

/// Keeps the last saved snapshot in process memory, as serialized JSON
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    slot: Mutex<Option<Value>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adapter that resumes from `snapshot` on load
    pub fn with_snapshot(snapshot: Value) -> Self {
        Self {
            slot: Mutex::new(Some(snapshot)),
        }
    }

    /// Raw JSON of the last save
    pub fn stored(&self) -> Option<Value> {
        self.slot.lock().clone()
    }
}

#[async_trait]
impl PersistenceAdapter for MemoryPersistence {
    async fn save(&self, state: &WizardState) -> Result<(), PersistenceError> {
        let value = serde_json::to_value(state)?;
        *self.slot.lock() = Some(value);
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        let stored = self.slot.lock().clone();
        match stored {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        *self.slot.lock() = None;
        Ok(())
    }
}

// ============================================================================
// JSON file adapter
// ============================================================================

/// Stores the snapshot as a JSON file, replaced atomically on every save
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    path: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Write via a temp file in the same directory, then rename over the target
fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl PersistenceAdapter for JsonFilePersistence {
    async fn save(&self, state: &WizardState) -> Result<(), PersistenceError> {
        let contents = serde_json::to_vec_pretty(state)?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, &contents))
            .await
            .map_err(|e| PersistenceError::other(format!("write task failed: {e}")))??;
        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistedState>, PersistenceError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self) -> Result<(), PersistenceError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
