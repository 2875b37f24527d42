//! Assignment orchestration for SpoolSync.
//!
//! - [`AssignmentOrchestrator`]: the assign → wait → calibrate → finalize state machine
//! - [`CompletionPoller`]: fixed-cadence completion and reading-mask checks
//! - [`SessionRuntime`]: a single task owning both, driven through a [`SessionHandle`]

pub mod orchestrator;
pub mod poller;
pub mod runtime;
pub mod session;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use orchestrator::{
    AssignmentOrchestrator, CancelOutcome, OrchestratorSettings, SubmitOutcome,
    completion_summary,
};
pub use poller::{CompletionPoller, TickReport};
pub use runtime::{SessionHandle, SessionRuntime};
pub use session::{AssignmentSession, SessionState, WaitingTarget};
