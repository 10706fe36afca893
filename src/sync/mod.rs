mod orchestrator;

pub use orchestrator::{
    CycleReport, SyncError, SyncOrchestrator, SyncState, UplinkFailure, UplinkReport,
};
