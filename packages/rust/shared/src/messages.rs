//! Job/result contracts exchanged between pipeline workers.
//!
//! Every payload is a plain serde struct; in-process they travel wrapped in
//! [`Message`]. A stage result is built through its `ok`/`failed`
//! constructors so `success` and `error` can never disagree.

use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{ContextMap, Decision, EntryId, WorkerAddress};

fn default_language() -> String {
    "sw".into()
}
fn default_content_type() -> String {
    "audio".into()
}
fn default_user_id() -> String {
    "anonymous".into()
}

// ---------------------------------------------------------------------------
// Ingest
// ---------------------------------------------------------------------------

/// A new submission: the content reference points into the storage gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestJob {
    pub entry_id: EntryId,
    pub content_reference: String,
    pub filename: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResult {
    pub entry_id: EntryId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestResult {
    pub fn ok(entry_id: EntryId, transcript: String) -> Self {
        Self {
            entry_id,
            success: true,
            transcript: Some(transcript),
            error: None,
        }
    }

    pub fn failed(entry_id: EntryId, error: impl Into<String>) -> Self {
        Self {
            entry_id,
            success: false,
            transcript: None,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Transcribe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribeJob {
    pub entry_id: EntryId,
    pub content_reference: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

/// Outcome of a transcription. `duration` stays `None` when the serving
/// engine does not report one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscribeResult {
    pub entry_id: EntryId,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcript: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TranscribeResult {
    pub fn ok(
        entry_id: EntryId,
        transcript: String,
        language: Option<String>,
        duration: Option<f64>,
    ) -> Self {
        Self {
            entry_id,
            success: true,
            transcript: Some(transcript),
            language,
            duration,
            error: None,
        }
    }

    pub fn failed(entry_id: EntryId, error: impl Into<String>) -> Self {
        Self {
            entry_id,
            success: false,
            transcript: None,
            language: None,
            duration: None,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Symbolize
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolizeJob {
    pub entry_id: EntryId,
    pub transcript: String,
    #[serde(default)]
    pub context: ContextMap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolizeResult {
    pub entry_id: EntryId,
    pub success: bool,
    #[serde(default)]
    pub atoms: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SymbolizeResult {
    pub fn ok(entry_id: EntryId, atoms: Vec<String>) -> Self {
        Self {
            entry_id,
            success: true,
            atoms,
            error: None,
        }
    }

    pub fn failed(entry_id: EntryId, error: impl Into<String>) -> Self {
        Self {
            entry_id,
            success: false,
            atoms: Vec::new(),
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Ask the validator stage to judge a set of atoms.
///
/// An empty `validators` list means "use the registry roster for the
/// `community` in `context`".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub entry_id: EntryId,
    #[serde(default)]
    pub validators: Vec<String>,
    pub atoms: Vec<String>,
    #[serde(default)]
    pub context: ContextMap,
}

/// Notes prefix of an opinion that reports a failed validation request.
const ERRORED_NOTES: &str = "Validation error: ";

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

fn clamped_confidence<'de, D>(deserializer: D) -> std::result::Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    f64::deserialize(deserializer).map(clamp_confidence)
}

/// One validator opinion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub entry_id: EntryId,
    pub validator: String,
    pub decision: Decision,
    #[serde(deserialize_with = "clamped_confidence")]
    pub confidence: f64,
    pub notes: String,
    #[serde(default)]
    pub validated_atoms: Vec<String>,
}

impl ValidationResult {
    /// Build an opinion, clamping `confidence` into `[0, 1]` (NaN becomes 0).
    pub fn new(
        entry_id: EntryId,
        validator: impl Into<String>,
        decision: Decision,
        confidence: f64,
        notes: impl Into<String>,
        validated_atoms: Vec<String>,
    ) -> Self {
        Self {
            entry_id,
            validator: validator.into(),
            decision,
            confidence: clamp_confidence(confidence),
            notes: notes.into(),
            validated_atoms,
        }
    }

    /// The single opinion sent when a validation request failed as a whole.
    pub fn errored(entry_id: EntryId, validator: impl Into<String>, error: &str) -> Self {
        Self::new(
            entry_id,
            validator,
            Decision::Rejected,
            0.0,
            format!("{ERRORED_NOTES}{error}"),
            Vec::new(),
        )
    }

    /// Rejection for one atom whose checks faulted. The request goes on.
    pub fn check_faulted(entry_id: EntryId, validator: impl Into<String>, error: &str) -> Self {
        Self::new(
            entry_id,
            validator,
            Decision::Rejected,
            0.0,
            format!("Atom check error: {error}"),
            Vec::new(),
        )
    }

    pub fn is_errored(&self) -> bool {
        self.decision == Decision::Rejected
            && self.confidence == 0.0
            && self.notes.starts_with(ERRORED_NOTES)
    }
}

/// Aggregate admission decision for one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusDecision {
    pub entry_id: EntryId,
    pub decision: Decision,
    pub approval_rate: f64,
    pub average_confidence: f64,
    pub approved_count: usize,
    pub total_count: usize,
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default = "default_user_id")]
    pub user_id: String,
    #[serde(default)]
    pub context: ContextMap,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id: default_user_id(),
            context: ContextMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default)]
    pub reasoning_trace: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            answer: None,
            reasoning_trace: Vec::new(),
            sources: Vec::new(),
            confidence: None,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Message envelope payload
// ---------------------------------------------------------------------------

/// Discriminant used to key handler registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    IngestJob,
    IngestResult,
    TranscribeJob,
    TranscribeResult,
    SymbolizeJob,
    SymbolizeResult,
    ValidationRequest,
    ValidationResult,
    ConsensusDecision,
    QueryRequest,
    QueryResponse,
}

/// Any contract, as carried through a worker mailbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Message {
    IngestJob(IngestJob),
    IngestResult(IngestResult),
    TranscribeJob(TranscribeJob),
    TranscribeResult(TranscribeResult),
    SymbolizeJob(SymbolizeJob),
    SymbolizeResult(SymbolizeResult),
    ValidationRequest(ValidationRequest),
    ValidationResult(ValidationResult),
    ConsensusDecision(ConsensusDecision),
    QueryRequest(QueryRequest),
    QueryResponse(QueryResponse),
}

/// A payload type that can travel as a [`Message`].
pub trait Contract: Into<Message> + TryFrom<Message, Error = Message> + Send + 'static {
    const KIND: MessageKind;
}

macro_rules! contracts {
    ($($name:ident),* $(,)?) => {
        $(
            impl From<$name> for Message {
                fn from(value: $name) -> Self {
                    Message::$name(value)
                }
            }

            impl TryFrom<Message> for $name {
                type Error = Message;

                fn try_from(message: Message) -> std::result::Result<Self, Message> {
                    match message {
                        Message::$name(value) => Ok(value),
                        other => Err(other),
                    }
                }
            }

            impl Contract for $name {
                const KIND: MessageKind = MessageKind::$name;
            }
        )*

        impl Message {
            pub fn kind(&self) -> MessageKind {
                match self {
                    $(Message::$name(_) => MessageKind::$name,)*
                }
            }
        }
    };
}

contracts!(
    IngestJob,
    IngestResult,
    TranscribeJob,
    TranscribeResult,
    SymbolizeJob,
    SymbolizeResult,
    ValidationRequest,
    ValidationResult,
    ConsensusDecision,
    QueryRequest,
    QueryResponse,
);

impl Message {
    /// Entry the message concerns, when it concerns one.
    pub fn entry_id(&self) -> Option<EntryId> {
        match self {
            Message::IngestJob(m) => Some(m.entry_id),
            Message::IngestResult(m) => Some(m.entry_id),
            Message::TranscribeJob(m) => Some(m.entry_id),
            Message::TranscribeResult(m) => Some(m.entry_id),
            Message::SymbolizeJob(m) => Some(m.entry_id),
            Message::SymbolizeResult(m) => Some(m.entry_id),
            Message::ValidationRequest(m) => Some(m.entry_id),
            Message::ValidationResult(m) => Some(m.entry_id),
            Message::ConsensusDecision(m) => Some(m.entry_id),
            Message::QueryRequest(_) | Message::QueryResponse(_) => None,
        }
    }

    /// False for a stage result that reports failure, including the errored
    /// opinion a failed validation request answers with.
    pub fn is_success(&self) -> bool {
        match self {
            Message::IngestResult(m) => m.success,
            Message::TranscribeResult(m) => m.success,
            Message::SymbolizeResult(m) => m.success,
            Message::QueryResponse(m) => m.success,
            Message::ValidationResult(m) => !m.is_errored(),
            _ => true,
        }
    }
}

// ---------------------------------------------------------------------------
// FaultReply
// ---------------------------------------------------------------------------

/// What to send back when the handler for a message faults.
///
/// Captured before the message is handed to its handler, so the runtime can
/// still answer after the payload has been consumed. Results have no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultReply {
    kind: MessageKind,
    entry_id: Option<EntryId>,
}

impl FaultReply {
    pub fn for_message(message: &Message) -> Self {
        Self {
            kind: message.kind(),
            entry_id: message.entry_id(),
        }
    }

    /// Failure result for the captured job, answered by `responder`.
    pub fn reply(&self, responder: &WorkerAddress, error: &str) -> Option<Message> {
        let entry_id = self.entry_id;
        match self.kind {
            MessageKind::IngestJob => entry_id.map(|id| IngestResult::failed(id, error).into()),
            MessageKind::TranscribeJob => {
                entry_id.map(|id| TranscribeResult::failed(id, error).into())
            }
            MessageKind::SymbolizeJob => {
                entry_id.map(|id| SymbolizeResult::failed(id, error).into())
            }
            MessageKind::ValidationRequest => entry_id
                .map(|id| ValidationResult::errored(id, responder.as_str(), error).into()),
            MessageKind::QueryRequest => Some(QueryResponse::failed(error).into()),
            _ => None,
        }
    }
}
