//! Wizard runtime
//!
//! The transition engine, per-step handles, hooks, history and the
//! persistence plumbing that sits behind them.

mod engine;
mod history;
mod hooks;
pub mod persistence;
mod step;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use engine::{TransitionObserver, Wizard, WizardBuilder};
pub use hooks::HookHandle;
pub use persistence::{JsonFilePersistence, MemoryPersistence};
pub use step::StepHandle;
pub use traits::*;
