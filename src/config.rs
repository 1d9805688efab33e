//! Wizard configuration

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Back-navigation history settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub enabled: bool,
    /// Oldest entries are evicted beyond this many
    pub max_size: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 50,
        }
    }
}

impl HistoryConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn bounded(max_size: usize) -> Self {
        Self {
            enabled: true,
            max_size,
        }
    }

    /// Whether entries are recorded at all
    pub fn is_active(&self) -> bool {
        self.enabled && self.max_size > 0
    }
}

/// How `progress()` computes its percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressMode {
    /// Each countable step counts once
    #[default]
    Count,
    /// Steps count by their `weight`
    Weighted,
}

impl FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(ProgressMode::Count),
            "weighted" | "weight" => Ok(ProgressMode::Weighted),
            other => Err(format!("unknown progress mode '{other}'")),
        }
    }
}

/// Per-wizard settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WizardConfig {
    pub history: HistoryConfig,
    pub progress_mode: ProgressMode,
    /// Buffer size of the `events()` broadcast channel
    pub event_capacity: usize,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self {
            history: HistoryConfig::default(),
            progress_mode: ProgressMode::default(),
            event_capacity: 64,
        }
    }
}

impl WizardConfig {
    /// Defaults overridden by `WIZARD_*` environment variables.
    /// Unparsable values are ignored.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(enabled) = lookup("WIZARD_HISTORY_ENABLED").and_then(|v| parse_bool(&v)) {
            config.history.enabled = enabled;
        }
        if let Some(max) = lookup("WIZARD_HISTORY_MAX").and_then(|v| v.trim().parse().ok()) {
            config.history.max_size = max;
        }
        if let Some(mode) = lookup("WIZARD_PROGRESS_MODE").and_then(|v| v.parse().ok()) {
            config.progress_mode = mode;
        }
        if let Some(capacity) = lookup("WIZARD_EVENT_CAPACITY")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|c| *c > 0)
        {
            config.event_capacity = capacity;
        }

        config
    }

    #[must_use]
    pub fn with_history(mut self, history: HistoryConfig) -> Self {
        self.history = history;
        self
    }

    #[must_use]
    pub fn with_progress_mode(mut self, mode: ProgressMode) -> Self {
        self.progress_mode = mode;
        self
    }

    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
