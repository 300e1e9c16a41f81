pub mod attack_loop;
pub mod config;
pub mod error;
pub mod grader;
pub mod json_extract;
pub mod memory;
pub mod message;
pub mod provider;
pub mod provider_manager;
pub mod result;
pub mod scorer;
pub mod strategy;
pub mod token_aggregator;
pub mod unblocking;

pub use crate::attack_loop::{AttackLoop, AttackState, RunOutcome, StopReason, SuccessfulAttack};
pub use crate::config::OrchestratorConfig;
pub use crate::error::{OrchestratorError, Result};
pub use crate::result::ResultEnvelope;
