//! Wizard state model
//!
//! Plain data: the state snapshot, per-step runtime status and its pure
//! transition rules, and the events a wizard publishes.

pub mod event;
pub mod state;
pub mod status;


pub use event::{TransitionEvent, TransitionKind, WizardEvent};
pub use state::{
    merge_data, Context, HistoryEntry, PersistedState, RuntimeStatus, StepData, StepMeta,
    StepName, WizardState,
};
pub use status::{can_transition, transition_status, StatusTransitionError};
