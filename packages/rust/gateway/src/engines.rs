//! Speech-to-text engines behind one async trait.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

use afriverse_shared::{AfriverseError, EnginesConfig, ErrorClass, Result, credential};

use crate::{BackendClient, build_client, classify, join_url};

/// Audio handed to an engine.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, filename: impl Into<String>) -> Self {
        Self {
            bytes,
            filename: filename.into(),
            mime_type: "audio/wav".into(),
        }
    }
}

/// What an engine produced. Metadata the engine does not report stays `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcription {
    pub transcript: String,
    pub language: Option<String>,
    pub duration: Option<f64>,
}

/// A speech-to-text service.
#[async_trait]
pub trait TranscriptionEngine: Send + Sync {
    /// Short identifier used in logs and error messages.
    fn name(&self) -> &str;

    async fn transcribe(&self, clip: &AudioClip, language: &str) -> Result<Transcription>;

    /// Check the engine is usable without transcribing anything.
    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}

fn engine_error(engine: &str, err: &reqwest::Error) -> AfriverseError {
    AfriverseError::engine(classify(err), format!("{engine}: {err}"))
}

fn non_empty(engine: &str, transcript: String) -> Result<String> {
    if transcript.trim().is_empty() {
        Err(AfriverseError::engine(
            ErrorClass::Application,
            format!("{engine}: empty transcript"),
        ))
    } else {
        Ok(transcript)
    }
}

fn missing_credential(engine: &str, var_name: &str) -> AfriverseError {
    AfriverseError::engine(
        ErrorClass::Application,
        format!("{engine}: credential not configured, set {var_name}"),
    )
}

// ---------------------------------------------------------------------------
// Whisper
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct WhisperReply {
    text: String,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

/// OpenAI Whisper (`POST {base}/audio/transcriptions`, `verbose_json`).
pub struct WhisperEngine {
    client: Client,
    base_url: String,
    model: String,
    key_env: String,
    api_key: Option<String>,
}

impl WhisperEngine {
    /// Build from config, reading the key from the configured env var.
    pub fn new(config: &EnginesConfig) -> Result<Self> {
        Self::with_key(config, credential(&config.openai_api_key_env))
    }

    pub fn with_key(config: &EnginesConfig, api_key: Option<String>) -> Result<Self> {
        Url::parse(&config.openai_base_url)
            .map_err(|e| AfriverseError::config(format!("invalid openai url: {e}")))?;
        Ok(Self {
            client: build_client(std::time::Duration::from_secs(config.timeout_secs))?,
            base_url: config.openai_base_url.clone(),
            model: config.whisper_model.clone(),
            key_env: config.openai_api_key_env.clone(),
            api_key,
        })
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| missing_credential(self.name(), &self.key_env))
    }
}

#[async_trait]
impl TranscriptionEngine for WhisperEngine {
    fn name(&self) -> &str {
        "whisper"
    }

    #[instrument(skip_all, fields(engine = "whisper", language = %language))]
    async fn transcribe(&self, clip: &AudioClip, language: &str) -> Result<Transcription> {
        let key = self.key()?;
        let url = join_url(&self.base_url, "/audio/transcriptions");

        let part = reqwest::multipart::Part::bytes(clip.bytes.clone())
            .file_name(clip.filename.clone())
            .mime_str(&clip.mime_type)
            .map_err(|e| engine_error(self.name(), &e))?;
        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("language", language.to_string())
            .text("response_format", "verbose_json")
            .part("file", part);

        let reply: WhisperReply = self
            .client
            .post(&url)
            .bearer_auth(key)
            .multipart(form)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| engine_error(self.name(), &e))?
            .json()
            .await
            .map_err(|e| engine_error(self.name(), &e))?;

        debug!(duration = ?reply.duration, "whisper transcription complete");
        Ok(Transcription {
            transcript: non_empty(self.name(), reply.text)?,
            language: reply.language,
            duration: reply.duration,
        })
    }

    /// `GET {base}/models/{model}`: checks the key and the model in one call.
    async fn probe(&self) -> Result<()> {
        let key = self.key()?;
        let url = join_url(&self.base_url, &format!("/models/{}", self.model));
        self.client
            .get(&url)
            .bearer_auth(key)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| engine_error(self.name(), &e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// HuggingFace
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct HuggingFaceReply {
    #[serde(default)]
    text: String,
}

/// HuggingFace inference API: raw audio bytes in, `{ "text": ... }` out.
///
/// Reports no language or duration; the requested language is echoed back.
pub struct HuggingFaceEngine {
    client: Client,
    url: String,
    token_env: String,
    token: Option<String>,
}

impl HuggingFaceEngine {
    pub fn new(config: &EnginesConfig) -> Result<Self> {
        Self::with_token(config, credential(&config.huggingface_token_env))
    }

    pub fn with_token(config: &EnginesConfig, token: Option<String>) -> Result<Self> {
        Url::parse(&config.huggingface_url)
            .map_err(|e| AfriverseError::config(format!("invalid huggingface url: {e}")))?;
        Ok(Self {
            client: build_client(std::time::Duration::from_secs(config.timeout_secs))?,
            url: config.huggingface_url.clone(),
            token_env: config.huggingface_token_env.clone(),
            token,
        })
    }
}

#[async_trait]
impl TranscriptionEngine for HuggingFaceEngine {
    fn name(&self) -> &str {
        "huggingface"
    }

    #[instrument(skip_all, fields(engine = "huggingface", language = %language))]
    async fn transcribe(&self, clip: &AudioClip, language: &str) -> Result<Transcription> {
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, clip.mime_type.as_str())
            .body(clip.bytes.clone());
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let reply: HuggingFaceReply = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| engine_error(self.name(), &e))?
            .json()
            .await
            .map_err(|e| engine_error(self.name(), &e))?;

        Ok(Transcription {
            transcript: non_empty(self.name(), reply.text)?,
            language: Some(language.to_string()),
            duration: None,
        })
    }

    /// The inference API has no cheap authenticated endpoint; a configured token is enough.
    async fn probe(&self) -> Result<()> {
        match self.token {
            Some(_) => Ok(()),
            None => Err(missing_credential(self.name(), &self.token_env)),
        }
    }
}

// ---------------------------------------------------------------------------
// Backend transcription endpoint
// ---------------------------------------------------------------------------

/// The backend's own `POST /api/transcribe`, used by the ingest stage.
pub struct BackendTranscriber {
    backend: BackendClient,
}

impl BackendTranscriber {
    pub fn new(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl TranscriptionEngine for BackendTranscriber {
    fn name(&self) -> &str {
        "backend"
    }

    async fn transcribe(&self, clip: &AudioClip, language: &str) -> Result<Transcription> {
        let transcript = self
            .backend
            .transcribe(clip.bytes.clone(), &clip.filename, language)
            .await?;
        Ok(Transcription {
            transcript: non_empty(self.name(), transcript)?,
            language: Some(language.to_string()),
            duration: None,
        })
    }

    async fn probe(&self) -> Result<()> {
        self.backend.health().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afriverse_shared::BackendConfig;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn engines_config(server: &MockServer) -> EnginesConfig {
        EnginesConfig {
            openai_base_url: format!("{}/v1", server.uri()),
            huggingface_url: format!("{}/models/wav2vec2", server.uri()),
            timeout_secs: 5,
            ..EnginesConfig::default()
        }
    }

    fn clip() -> AudioClip {
        AudioClip::new(b"RIFF0000WAVE".to_vec(), "story.wav")
    }

    #[tokio::test]
    async fn whisper_passes_metadata_through() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "text": "Mwarubaini hutibu malaria.",
                "language": "swahili",
                "duration": 4.2
            })))
            .mount(&server)
            .await;

        let engine =
            WhisperEngine::with_key(&engines_config(&server), Some("sk-test".into())).expect("engine");
        let result = engine.transcribe(&clip(), "sw").await.expect("transcribe");
        assert_eq!(result.transcript, "Mwarubaini hutibu malaria.");
        assert_eq!(result.language.as_deref(), Some("swahili"));
        assert_eq!(result.duration, Some(4.2));
    }

    #[tokio::test]
    async fn whisper_without_key_fails_before_any_request() {
        let server = MockServer::start().await;
        let engine = WhisperEngine::with_key(&engines_config(&server), None).expect("engine");
        let err = engine.transcribe(&clip(), "sw").await.unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
        assert!(engine.probe().await.is_err());
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn huggingface_echoes_language_and_omits_duration() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/models/wav2vec2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "habari"})))
            .mount(&server)
            .await;

        let engine =
            HuggingFaceEngine::with_token(&engines_config(&server), Some("hf".into())).expect("engine");
        let result = engine.transcribe(&clip(), "sw").await.expect("transcribe");
        assert_eq!(result.language.as_deref(), Some("sw"));
        assert_eq!(result.duration, None);
        assert!(engine.probe().await.is_ok());
    }

    #[tokio::test]
    async fn empty_transcript_counts_as_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "  "})))
            .mount(&server)
            .await;

        let engine = HuggingFaceEngine::with_token(&engines_config(&server), None).expect("engine");
        let err = engine.transcribe(&clip(), "sw").await.unwrap_err();
        assert!(matches!(
            err,
            AfriverseError::Engine {
                class: ErrorClass::Application,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn backend_transcriber_reads_transcript_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/transcribe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"transcript": "jambo"})))
            .mount(&server)
            .await;

        let backend = BackendClient::new(&BackendConfig {
            base_url: server.uri(),
            ..BackendConfig::default()
        })
        .expect("backend");
        let result = BackendTranscriber::new(backend)
            .transcribe(&clip(), "sw")
            .await
            .expect("transcribe");
        assert_eq!(result.transcript, "jambo");
        assert_eq!(result.language.as_deref(), Some("sw"));
    }
}
