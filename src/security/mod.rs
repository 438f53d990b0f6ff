//! Security subsystem
//!
//! Spam/raid detection over in-memory event history, graduated moderation
//! actions with scheduled reversal, and the guild lockdown state machine.

pub mod action;
pub mod error;
pub mod executor;
pub mod history;
pub mod lockdown;
pub mod patterns;
pub mod profile;
pub mod rules;
pub mod service;
pub mod store;

pub use action::{ModActionKind, TempAction, TempActionState};
pub use error::{SecurityError, SecurityResult};
pub use executor::{ActionExecutor, ActionHandlerRegistry};
pub use history::EventHistoryStore;
pub use lockdown::{EngageOutcome, LockdownState};
pub use patterns::{PatternConfig, PatternSet};
pub use profile::{SecurityLevel, ShieldLevel, ShieldProfile, SpamProfile};
pub use rules::Verdict;
pub use service::SecurityService;

/// Request type for the sweeper task
#[derive(Debug, Clone)]
pub enum SweepRequest {
    /// Run a full sweep immediately
    Sweep,
    /// Shut the sweeper down
    Shutdown,
}
