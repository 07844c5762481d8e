//! Core domain identifiers shared by every pipeline stage.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Free-form context carried alongside a job (`community`, `language`, ...).
pub type ContextMap = BTreeMap<String, serde_json::Value>;

// ---------------------------------------------------------------------------
// EntryId
// ---------------------------------------------------------------------------

/// Backend identifier of a knowledge entry. Fixed for every stage of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntryId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

// ---------------------------------------------------------------------------
// WorkerAddress
// ---------------------------------------------------------------------------

/// Stable identity of a worker: `agent://<name>/<uuid-v7>`.
///
/// The UUID keeps two workers with the same name distinct for the lifetime
/// of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerAddress(String);

impl WorkerAddress {
    /// Mint a fresh address for a worker called `name`.
    pub fn new(name: &str) -> Self {
        Self(format!("agent://{name}/{}", Uuid::now_v7()))
    }

    /// The human-readable name segment of the address.
    pub fn name(&self) -> &str {
        self.0
            .strip_prefix("agent://")
            .and_then(|rest| rest.split('/').next())
            .unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Decision / EntryStatus
// ---------------------------------------------------------------------------

/// Admission decision of a single validator or of the consensus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn is_approved(self) -> bool {
        self == Self::Approved
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approved => f.write_str("approved"),
            Self::Rejected => f.write_str("rejected"),
        }
    }
}

/// Status tags the pipeline writes back to an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Transcribed,
    Symbolized,
}
