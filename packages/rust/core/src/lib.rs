//! Pipeline stages and domain logic for AfriVerse.
//!
//! This crate turns the runtime, the HTTP clients, and the shared contracts
//! into the running ingestion pipeline: ingest → symbolize → validate, plus
//! standalone transcription and knowledge queries.

pub mod atoms;
pub mod checks;
pub mod consensus;
pub mod fallback;
pub mod pipeline;
pub mod registry;
pub mod stages;
