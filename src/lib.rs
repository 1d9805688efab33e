//! Wizard Flow - step orchestration for multi-step interactive flows
//!
//! A wizard is an ordered set of named steps. Each step carries its own data,
//! may validate it, may guard entry and exit, may run hooks, and names its
//! successors statically, dynamically or with a wildcard. The engine moves
//! between steps one transition at a time and keeps the whole state in a
//! reactive store that UI layers subscribe to.
//!
//! ```no_run
//! use serde_json::json;
//! use wizard_flow::{StepDefinition, StepRegistry, Wizard};
//!
//! # async fn demo() -> wizard_flow::WizardResult<()> {
//! let registry = StepRegistry::builder()
//!     .step("account", StepDefinition::new().validate_sync(|data, _| {
//!         if data["email"].is_string() { Ok(()) } else { Err(json!("email required")) }
//!     }))
//!     .step("plan", StepDefinition::new())
//!     .step("done", StepDefinition::new())
//!     .build()?;
//!
//! let wizard = Wizard::builder(registry).build().await?;
//! wizard.next(Some(json!({ "email": "ada@example.com" }))).await?;
//! assert_eq!(wizard.current_step(), "plan");
//! # Ok(())
//! # }
//! ```

#![allow(clippy::missing_errors_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod db;
pub mod error;
pub mod helpers;
pub mod logging;
pub mod registry;
pub mod runtime;
pub mod state_machine;
pub mod store;

pub use config::{HistoryConfig, ProgressMode, WizardConfig};
pub use db::{Database, SqlitePersistence};
pub use error::{ErrorValue, HookPhase, PersistenceError, WizardError, WizardResult};
pub use helpers::Progress;
pub use registry::{
    GuardArgs, HookArgs, NextSpec, NextTargets, RetryPolicy, StepDefinition, StepRegistry,
};
pub use runtime::{
    HookHandle, JsonFilePersistence, MemoryPersistence, PersistenceAdapter, StepHandle, Wizard,
    WizardBuilder,
};
pub use state_machine::{
    Context, HistoryEntry, PersistedState, RuntimeStatus, StepData, StepMeta, StepName,
    TransitionEvent, TransitionKind, WizardEvent, WizardState,
};
pub use store::{Store, Subscription};
