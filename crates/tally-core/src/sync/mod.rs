//! Offline-first sync orchestration

mod connectivity;
mod orchestrator;
mod status;

pub use connectivity::Connectivity;
pub use orchestrator::SyncOrchestrator;
pub use status::{
    CollectionStatus, CycleFailure, CycleOutcome, CycleReport, SyncHealth, SyncPhase,
};
