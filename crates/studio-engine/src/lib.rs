pub mod access;
pub mod client;
pub mod config;
pub mod controller;
pub mod download;
pub mod error;
pub mod ingest;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use access::{HostEnvironment, StaticHost, TierGatekeeper, TierToggle};
pub use client::{extract_image_data_url, GenerationClient};
pub use config::EngineConfig;
pub use controller::{
    BatchProgress, ControllerPolicy, RunOutcome, SkipReason, WorkflowController, WorkflowMode,
    WorkflowState,
};
pub use download::{schedule_downloads, DownloadBatch};
pub use error::StudioError;
pub use ingest::{ingest_file, ingest_files};
pub use transport::{Credential, DryrunTransport, GeminiTransport, ImageTransport};
