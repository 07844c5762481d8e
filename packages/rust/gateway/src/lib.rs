//! HTTP clients for every external collaborator of the pipeline.
//!
//! - [`BackendClient`]: the backend REST surface (write-backs, symbolize,
//!   query, validator registry, health)
//! - [`StorageGateway`]: content-addressed storage downloads
//! - [`TranscriptionEngine`] implementations: Whisper, HuggingFace, and the
//!   backend's own transcription endpoint
//!
//! Every call carries a timeout and reports failures as [`ErrorClass::Transport`]
//! (worth retrying) or [`ErrorClass::Application`] (will fail the same way again).

mod backend;
mod engines;
mod storage;

use std::time::Duration;

use reqwest::Client;

use afriverse_shared::{AfriverseError, ErrorClass, Result};

pub use backend::{
    BackendClient, QueryAnswer, TranscriptUpdate, ValidationSubmission, ValidatorRoster,
};
pub use engines::{
    AudioClip, BackendTranscriber, HuggingFaceEngine, Transcription, TranscriptionEngine,
    WhisperEngine,
};
pub use storage::{FetchedContent, StorageGateway};

/// User-Agent string for outbound requests.
const USER_AGENT: &str = concat!("AfriVerse/", env!("CARGO_PKG_VERSION"));

/// Build a reqwest client with the given request timeout.
fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| AfriverseError::config(format!("failed to build HTTP client: {e}")))
}

/// Classify a reqwest failure: bad status and undecodable bodies are application errors.
fn classify(err: &reqwest::Error) -> ErrorClass {
    if err.is_status() || err.is_decode() {
        ErrorClass::Application
    } else {
        ErrorClass::Transport
    }
}

/// Join a base URL and an absolute path without doubling the slash.
fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
