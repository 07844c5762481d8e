//! Shared types, error model, and configuration for AfriVerse.
//!
//! This crate is the foundation depended on by all other AfriVerse crates.
//! It provides:
//! - [`AfriverseError`]: the unified error type
//! - Domain identifiers ([`EntryId`], [`WorkerAddress`], [`Decision`])
//! - The job/result contracts exchanged between workers ([`Message`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod messages;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BackendConfig, ConsensusConfig, EnginesConfig, GatewayConfig, RegistryConfig,
    WorkerConfig, WorkersConfig, apply_env_overrides, config_dir, config_file_path, credential,
    init_config, load_config, load_config_from, validate_config,
};
pub use error::{AfriverseError, ErrorClass, Result};
pub use messages::{
    ConsensusDecision, Contract, FaultReply, IngestJob, IngestResult, Message, MessageKind,
    QueryRequest, QueryResponse, SymbolizeJob, SymbolizeResult, TranscribeJob, TranscribeResult,
    ValidationRequest, ValidationResult,
};
pub use types::{ContextMap, Decision, EntryId, EntryStatus, WorkerAddress};
