//! Client for the backend REST surface.

use std::collections::BTreeMap;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use url::Url;

use afriverse_shared::{
    AfriverseError, BackendConfig, ContextMap, Decision, EntryId, EntryStatus, ErrorClass, Result,
};

use crate::{build_client, classify, join_url};

/// Community name → validator ids, as served by `GET /api/validators`.
pub type ValidatorRoster = BTreeMap<String, Vec<String>>;

type ErrorCtor = fn(ErrorClass, String) -> AfriverseError;

// ---------------------------------------------------------------------------
// Payloads
// ---------------------------------------------------------------------------

/// Body of `PATCH /api/entries/{id}/transcript`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptUpdate {
    pub transcript: String,
    pub status: EntryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

impl TranscriptUpdate {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            status: EntryStatus::Transcribed,
            language: None,
            duration: None,
        }
    }
}

#[derive(Serialize)]
struct AtomsUpdate<'a> {
    atoms: &'a [String],
    status: EntryStatus,
}

#[derive(Serialize)]
struct SymbolizeBody<'a> {
    transcript: &'a str,
    context: &'a ContextMap,
}

#[derive(Deserialize)]
struct SymbolizeReply {
    #[serde(default)]
    atoms: Vec<String>,
}

#[derive(Serialize)]
struct QueryBody<'a> {
    query: &'a str,
    context: &'a ContextMap,
}

/// Body of `POST /api/validate/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationSubmission {
    pub decision: Decision,
    pub notes: String,
    pub validator: String,
    pub confidence: f64,
    /// Roster the decision was made for.
    pub validators: Vec<String>,
}

/// Reply of `POST /api/entries/query`. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueryAnswer {
    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub reasoning_trace: Vec<String>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Deserialize)]
struct TranscribeReply {
    #[serde(default)]
    transcript: String,
}

// ---------------------------------------------------------------------------
// BackendClient
// ---------------------------------------------------------------------------

/// Stateless client for the backend. Cheap to clone.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    health_client: Client,
    base_url: String,
}

impl BackendClient {
    pub fn new(config: &BackendConfig) -> Result<Self> {
        Url::parse(&config.base_url).map_err(|e| {
            AfriverseError::config(format!("invalid backend url {:?}: {e}", config.base_url))
        })?;
        Ok(Self {
            client: build_client(config.timeout())?,
            health_client: build_client(config.health_timeout())?,
            base_url: config.base_url.clone(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        join_url(&self.base_url, path)
    }

    /// `POST /api/transcribe` as multipart (`file`, `language`).
    #[instrument(skip_all, fields(filename = %filename, language = %language))]
    pub async fn transcribe(&self, bytes: Vec<u8>, filename: &str, language: &str) -> Result<String> {
        let url = self.url("/api/transcribe");
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str("audio/wav")
            .map_err(|e| AfriverseError::engine(ErrorClass::Application, e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .text("language", language.to_string())
            .part("file", part);

        let reply: TranscribeReply = send_json(
            self.client.post(&url).multipart(form),
            &url,
            |c, m| AfriverseError::engine(c, m),
        )
        .await?;
        Ok(reply.transcript)
    }

    /// `PATCH /api/entries/{id}/transcript`.
    #[instrument(skip_all, fields(entry_id = %entry_id))]
    pub async fn update_transcript(&self, entry_id: EntryId, update: &TranscriptUpdate) -> Result<()> {
        let url = self.url(&format!("/api/entries/{entry_id}/transcript"));
        send_empty(
            self.client.patch(&url).json(update),
            &url,
            |c, m| AfriverseError::backend_update(c, m),
        )
        .await
    }

    /// `POST /api/symbolize`, returning the raw (unvalidated) atoms.
    #[instrument(skip_all)]
    pub async fn symbolize(&self, transcript: &str, context: &ContextMap) -> Result<Vec<String>> {
        let url = self.url("/api/symbolize");
        let body = SymbolizeBody {
            transcript,
            context,
        };
        let reply: SymbolizeReply =
            send_json(self.client.post(&url).json(&body), &url, |c, m| AfriverseError::backend(c, m)).await?;
        debug!(atoms = reply.atoms.len(), "symbolizer replied");
        Ok(reply.atoms)
    }

    /// `PATCH /api/entries/{id}/atoms`.
    #[instrument(skip_all, fields(entry_id = %entry_id, atoms = atoms.len()))]
    pub async fn update_atoms(&self, entry_id: EntryId, atoms: &[String]) -> Result<()> {
        let url = self.url(&format!("/api/entries/{entry_id}/atoms"));
        let body = AtomsUpdate {
            atoms,
            status: EntryStatus::Symbolized,
        };
        send_empty(
            self.client.patch(&url).json(&body),
            &url,
            |c, m| AfriverseError::backend_update(c, m),
        )
        .await
    }

    /// `POST /api/entries/query`.
    #[instrument(skip_all)]
    pub async fn query(&self, query: &str, context: &ContextMap) -> Result<QueryAnswer> {
        let url = self.url("/api/entries/query");
        let body = QueryBody { query, context };
        send_json(self.client.post(&url).json(&body), &url, |c, m| AfriverseError::backend(c, m)).await
    }

    /// `POST /api/validate/{id}`.
    #[instrument(skip_all, fields(entry_id = %entry_id, decision = %submission.decision))]
    pub async fn submit_validation(
        &self,
        entry_id: EntryId,
        submission: &ValidationSubmission,
    ) -> Result<()> {
        let url = self.url(&format!("/api/validate/{entry_id}"));
        send_empty(
            self.client.post(&url).json(submission),
            &url,
            |c, m| AfriverseError::backend_update(c, m),
        )
        .await
    }

    /// `GET /api/validators`.
    pub async fn fetch_validators(&self) -> Result<ValidatorRoster> {
        let url = self.url("/api/validators");
        send_json(self.client.get(&url), &url, |c, m| AfriverseError::backend(c, m)).await
    }

    /// `GET /health`, bounded by the health timeout.
    pub async fn health(&self) -> Result<()> {
        let url = self.url("/health");
        send_empty(self.health_client.get(&url), &url, |c, m| AfriverseError::backend(c, m)).await
    }
}

async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    url: &str,
    make_error: ErrorCtor,
) -> Result<T> {
    let response = request
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| make_error(classify(&e), format!("{url}: {e}")))?;

    response
        .json::<T>()
        .await
        .map_err(|e| make_error(classify(&e), format!("{url}: invalid response body: {e}")))
}

async fn send_empty(request: RequestBuilder, url: &str, make_error: ErrorCtor) -> Result<()> {
    request
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| make_error(classify(&e), format!("{url}: {e}")))?;
    Ok(())
}
