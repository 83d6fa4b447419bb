//! Resumable batch alpha-simulation orchestrator.
//!
//! This crate submits manifests of alpha simulation requests to a remote
//! asynchronous simulation service and survives interruption. The building
//! blocks are a shared [`SessionManager`](session::SessionManager) with lazy
//! renewal, content fingerprints with an append-only
//! [`CheckpointStore`](checkpoint::CheckpointStore), a slot
//! [packer](packer::pack), a bounded-concurrency
//! [`Dispatcher`](dispatcher::Dispatcher) driving the server-paced
//! [poller](poller::poll_job), an optional [`Analyzer`](analyzer::Analyzer)
//! and the [`BatchOrchestrator`](orchestrator::BatchOrchestrator) tying them
//! together per manifest.

pub mod analyzer;
pub mod api;
pub mod checkpoint;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod fingerprint;
pub mod logging;
pub mod manifest;
pub mod model;
pub mod orchestrator;
pub mod packer;
pub mod poller;
pub mod report;
pub mod session;

#[cfg(test)]
mod tests {
    pub(crate) mod mock_api;
    mod batch_scenario_tests;
    mod resume_tests;
}

/// Convenient re-export of the most common items used when embedding the engine.
pub mod prelude {
    pub use crate::api::{ApiResponse, HttpSimulationApi, SharedApi, SimulationApi};
    pub use crate::checkpoint::CheckpointStore;
    pub use crate::config::{AnalysisConfig, ApiConfig, BatchConfig, Credentials};
    pub use crate::errors::{AlphaBatchError, Result};
    pub use crate::manifest::{load_manifest, ManifestEntry};
    pub use crate::model::{AlphaResult, AlphaType, SimulationRequest, SimulationSettings};
    pub use crate::orchestrator::BatchOrchestrator;
    pub use crate::report::{BatchSummary, RunReport};
    pub use crate::session::SessionManager;
}
