//! Database schema and types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS wizard_snapshots (
    key TEXT PRIMARY KEY,
    step TEXT NOT NULL,
    state TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_wizard_snapshots_updated ON wizard_snapshots(updated_at DESC);
";

/// One saved wizard state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub key: String,
    /// Active step at save time, kept in its own column for listing
    pub step: String,
    /// Serialized `WizardState`
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
