//! The bureau: every pipeline worker wired together and running.
//!
//! Ingest → Symbolize → Validate progress on their own: each stage forwards
//! to the next on success and stops on failure. Ingest transcribes through
//! the backend itself, so the Transcribe worker (Whisper with a HuggingFace
//! fallback) sits outside that chain and serves standalone `TranscribeJob`s,
//! forwarding to Symbolize the same way. Submissions are tracked from outside
//! by watching the results that come back to the requester.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument, warn};

use afriverse_gateway::{
    BackendClient, BackendTranscriber, HuggingFaceEngine, StorageGateway, TranscriptionEngine,
    WhisperEngine,
};
use afriverse_runtime::{Mailbox, Router, WorkerHandle};
use afriverse_shared::{
    AppConfig, ConsensusDecision, EntryId, IngestJob, Message, Result, WorkerAddress,
    WorkerConfig,
};

use crate::checks::{AtomChecker, CheckPolicy};
use crate::consensus::ConsensusPolicy;
use crate::fallback::TranscriptionChain;
use crate::registry::ValidatorRegistry;
use crate::stages::{IngestStage, QueryStage, SymbolizerStage, TranscribeStage, ValidatorStage};

/// Address of every stage, minted before any worker starts so each can be
/// told where to forward.
#[derive(Debug, Clone)]
pub struct Routes {
    pub ingest: WorkerAddress,
    pub transcribe: WorkerAddress,
    pub symbolizer: WorkerAddress,
    pub validator: WorkerAddress,
    pub query: WorkerAddress,
}

impl Routes {
    pub fn from_config(config: &AppConfig) -> Self {
        let workers = &config.workers;
        Self {
            ingest: mint(&workers.ingest),
            transcribe: mint(&workers.transcribe),
            symbolizer: mint(&workers.symbolizer),
            validator: mint(&workers.validator),
            query: mint(&workers.query),
        }
    }
}

fn mint(worker: &WorkerConfig) -> WorkerAddress {
    let address = WorkerAddress::new(&worker.name);
    debug!(name = %worker.name, port = worker.port, %address, "worker address minted");
    address
}

// ---------------------------------------------------------------------------
// Bureau
// ---------------------------------------------------------------------------

/// The router plus the set of running workers.
pub struct Bureau {
    router: Router,
    routes: Routes,
    registry: Arc<ValidatorRegistry>,
    workers: Vec<WorkerHandle>,
}

impl Bureau {
    /// Build every collaborator from `config` and spawn all five workers.
    #[instrument(skip_all, fields(backend = %config.backend.base_url))]
    pub fn start(config: &AppConfig) -> Result<Self> {
        let backend = BackendClient::new(&config.backend)?;
        let storage = StorageGateway::new(&config.gateway)?;
        let whisper: Arc<dyn TranscriptionEngine> = Arc::new(WhisperEngine::new(&config.engines)?);
        let huggingface: Arc<dyn TranscriptionEngine> =
            Arc::new(HuggingFaceEngine::new(&config.engines)?);

        let registry = Arc::new(ValidatorRegistry::from_config(&config.registry));
        let checker = AtomChecker::new(
            CheckPolicy::from(&config.consensus),
            Arc::new(backend.clone()),
        );

        let router = Router::new();
        let routes = Routes::from_config(config);
        let workers = &config.workers;

        let handles = vec![
            IngestStage::new(
                storage.clone(),
                Arc::new(BackendTranscriber::new(backend.clone())),
                backend.clone(),
                Some(routes.symbolizer.clone()),
            )
            .worker(routes.ingest.clone())
            .spawn(&router),
            TranscribeStage::new(
                storage,
                Arc::new(TranscriptionChain::new(whisper, Some(huggingface))),
                backend.clone(),
                Some(routes.symbolizer.clone()),
                Duration::from_secs(workers.transcribe_health_secs),
            )
            .worker(routes.transcribe.clone())
            .spawn(&router),
            SymbolizerStage::new(backend.clone(), Some(routes.validator.clone()))
                .worker(routes.symbolizer.clone())
                .spawn(&router),
            ValidatorStage::new(
                checker,
                ConsensusPolicy::from(&config.consensus),
                Arc::clone(&registry),
                backend.clone(),
                Duration::from_secs(workers.registry_refresh_secs),
            )
            .worker(routes.validator.clone())
            .spawn(&router),
            QueryStage::new(backend, Duration::from_secs(workers.query_health_secs))
                .worker(routes.query.clone())
                .spawn(&router),
        ];

        info!(workers = handles.len(), "bureau started");
        Ok(Self {
            router,
            routes,
            registry,
            workers: handles,
        })
    }

    pub fn routes(&self) -> &Routes {
        &self.routes
    }

    pub fn registry(&self) -> &Arc<ValidatorRegistry> {
        &self.registry
    }

    /// A mailbox for an outside requester.
    pub fn mailbox(&self, name: &str) -> Mailbox {
        self.router.mailbox(name)
    }

    /// Stop every worker, letting queued messages drain.
    pub async fn shutdown(self) {
        for worker in self.workers {
            worker.shutdown().await;
        }
        info!("bureau stopped");
    }
}

// ---------------------------------------------------------------------------
// Submission tracking
// ---------------------------------------------------------------------------

/// How a tracked submission ended.
#[derive(Debug, Default)]
pub struct SubmissionOutcome {
    /// Every result received, in arrival order.
    pub results: Vec<Message>,
    /// Set when the submission reached consensus.
    pub decision: Option<ConsensusDecision>,
    /// Error of the first failed stage result.
    pub failure: Option<String>,
    /// True when no result arrived within the idle timeout.
    pub timed_out: bool,
    pub elapsed: Duration,
}

/// Progress callback for reporting submission status.
pub trait ProgressReporter: Send + Sync {
    /// Called for every result that arrives.
    fn result(&self, message: &Message);
    /// Called once the submission has ended.
    fn done(&self, outcome: &SubmissionOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn result(&self, _message: &Message) {}
    fn done(&self, _outcome: &SubmissionOutcome) {}
}

/// Send `job` to the ingest worker and follow it to its end.
pub async fn submit(
    bureau: &Bureau,
    job: IngestJob,
    idle_timeout: Duration,
    progress: &dyn ProgressReporter,
) -> SubmissionOutcome {
    let mut mailbox = bureau.mailbox("cli");
    let entry_id = job.entry_id;
    mailbox.send(&bureau.routes().ingest, job);
    track_submission(&mut mailbox, entry_id, idle_timeout, progress).await
}

/// Collect results for `entry_id` until a stage fails, consensus is
/// reached, or nothing arrives for `idle_timeout`.
#[instrument(skip_all, fields(entry_id = %entry_id))]
pub async fn track_submission(
    mailbox: &mut Mailbox,
    entry_id: EntryId,
    idle_timeout: Duration,
    progress: &dyn ProgressReporter,
) -> SubmissionOutcome {
    let start = Instant::now();
    let mut outcome = SubmissionOutcome::default();

    loop {
        let Some(envelope) = mailbox.recv_timeout(idle_timeout).await else {
            warn!(waited_secs = idle_timeout.as_secs(), "no result before idle timeout");
            outcome.timed_out = true;
            break;
        };

        let message = envelope.message;
        if message.entry_id() != Some(entry_id) {
            debug!(kind = ?message.kind(), "ignoring result for another entry");
            continue;
        }

        progress.result(&message);
        let finished = match &message {
            Message::ConsensusDecision(decision) => {
                outcome.decision = Some(decision.clone());
                true
            }
            failed if !failed.is_success() => {
                outcome.failure = Some(failure_text(failed));
                true
            }
            _ => false,
        };
        outcome.results.push(message);
        if finished {
            break;
        }
    }

    outcome.elapsed = start.elapsed();
    info!(
        results = outcome.results.len(),
        decision = ?outcome.decision.as_ref().map(|d| d.decision),
        failed = outcome.failure.is_some(),
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "submission finished"
    );
    progress.done(&outcome);
    outcome
}

fn failure_text(message: &Message) -> String {
    let error = match message {
        Message::IngestResult(r) => r.error.clone(),
        Message::TranscribeResult(r) => r.error.clone(),
        Message::SymbolizeResult(r) => r.error.clone(),
        Message::QueryResponse(r) => r.error.clone(),
        Message::ValidationResult(r) => Some(r.notes.clone()),
        _ => None,
    };
    error.unwrap_or_else(|| format!("{:?} failed", message.kind()))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use afriverse_shared::{BackendConfig, Decision, EnginesConfig, GatewayConfig};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const IDLE: Duration = Duration::from_secs(5);

    fn config(server: &MockServer) -> AppConfig {
        AppConfig {
            backend: BackendConfig {
                base_url: server.uri(),
                ..BackendConfig::default()
            },
            gateway: GatewayConfig {
                base_url: format!("{}/ipfs", server.uri()),
                ..GatewayConfig::default()
            },
            engines: EnginesConfig {
                openai_base_url: server.uri(),
                huggingface_url: format!("{}/hf", server.uri()),
                ..EnginesConfig::default()
            },
            ..AppConfig::default()
        }
    }

    fn job(id: u64) -> IngestJob {
        IngestJob {
            entry_id: EntryId(id),
            content_reference: "QmRemedy".into(),
            filename: "remedy.wav".into(),
            language: "sw".into(),
            content_type: "audio".into(),
        }
    }

    async fn mock(server: &MockServer, verb: &str, route: &str, response: ResponseTemplate) {
        Mock::given(method(verb))
            .and(path(route))
            .respond_with(response)
            .mount(server)
            .await;
    }

    async fn mock_through_symbolize(server: &MockServer, id: u64) {
        mock(server, "GET", "/ipfs/QmRemedy", ResponseTemplate::new(200).set_body_bytes(vec![7u8; 32])).await;
        mock(
            server,
            "POST",
            "/api/transcribe",
            ResponseTemplate::new(200).set_body_json(json!({"transcript": "Mwarubaini hutibu malaria"})),
        )
        .await;
        mock(server, "PATCH", &format!("/api/entries/{id}/transcript"), ResponseTemplate::new(200)).await;
        mock(
            server,
            "POST",
            "/api/symbolize",
            ResponseTemplate::new(200)
                .set_body_json(json!({"atoms": ["(treats neem malaria)", "has neem bitterness"]})),
        )
        .await;
        mock(server, "PATCH", &format!("/api/entries/{id}/atoms"), ResponseTemplate::new(200)).await;
    }

    /// Records the kinds it is told about.
    #[derive(Default)]
    struct Recorder {
        kinds: Mutex<Vec<String>>,
        done: Mutex<bool>,
    }

    impl ProgressReporter for Recorder {
        fn result(&self, message: &Message) {
            self.kinds.lock().expect("lock").push(format!("{:?}", message.kind()));
        }
        fn done(&self, _outcome: &SubmissionOutcome) {
            *self.done.lock().expect("lock") = true;
        }
    }

    #[tokio::test]
    async fn submission_runs_through_every_stage_to_consensus() {
        let server = MockServer::start().await;
        mock_through_symbolize(&server, 21).await;
        mock(
            &server,
            "POST",
            "/api/entries/query",
            ResponseTemplate::new(200).set_body_json(json!({"confidence": 0.9})),
        )
        .await;
        mock(&server, "POST", "/api/validate/21", ResponseTemplate::new(200)).await;

        let bureau = Bureau::start(&config(&server)).expect("bureau");
        let recorder = Recorder::default();
        let outcome = submit(&bureau, job(21), IDLE, &recorder).await;

        assert!(!outcome.timed_out);
        assert!(outcome.failure.is_none());
        let decision = outcome.decision.expect("decision");
        assert_eq!(decision.decision, Decision::Approved);
        assert_eq!(decision.total_count, 2);
        assert_eq!(
            *recorder.kinds.lock().expect("lock"),
            vec![
                "IngestResult",
                "SymbolizeResult",
                "ValidationResult",
                "ValidationResult",
                "ConsensusDecision"
            ]
        );
        assert!(*recorder.done.lock().expect("lock"));

        bureau.shutdown().await;
    }

    #[tokio::test]
    async fn transcript_write_back_failure_stops_the_submission() {
        let server = MockServer::start().await;
        mock(&server, "GET", "/ipfs/QmRemedy", ResponseTemplate::new(200).set_body_bytes(vec![7u8; 32])).await;
        mock(
            &server,
            "POST",
            "/api/transcribe",
            ResponseTemplate::new(200).set_body_json(json!({"transcript": "Mwarubaini hutibu malaria"})),
        )
        .await;
        mock(&server, "PATCH", "/api/entries/22/transcript", ResponseTemplate::new(500)).await;
        Mock::given(method("POST"))
            .and(path("/api/symbolize"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let bureau = Bureau::start(&config(&server)).expect("bureau");
        let outcome = submit(&bureau, job(22), IDLE, &SilentProgress).await;

        assert!(outcome.decision.is_none());
        assert_eq!(outcome.results.len(), 1);
        match &outcome.results[0] {
            Message::IngestResult(result) => assert!(!result.success),
            other => panic!("unexpected {other:?}"),
        }
        assert!(outcome.failure.expect("failure").contains("backend update error"));

        bureau.shutdown().await;
    }

    #[tokio::test]
    async fn decision_write_back_failure_ends_on_the_errored_opinion() {
        let server = MockServer::start().await;
        mock_through_symbolize(&server, 23).await;
        mock(
            &server,
            "POST",
            "/api/entries/query",
            ResponseTemplate::new(200).set_body_json(json!({"confidence": 0.9})),
        )
        .await;
        mock(&server, "POST", "/api/validate/23", ResponseTemplate::new(500)).await;

        let bureau = Bureau::start(&config(&server)).expect("bureau");
        let outcome = submit(&bureau, job(23), IDLE, &SilentProgress).await;

        assert!(!outcome.timed_out);
        assert!(outcome.decision.is_none());
        assert_eq!(outcome.results.len(), 3);
        match &outcome.results[2] {
            Message::ValidationResult(opinion) => {
                assert_eq!(opinion.decision, Decision::Rejected);
                assert_eq!(opinion.confidence, 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(outcome.failure.expect("failure").starts_with("Validation error"));

        bureau.shutdown().await;
    }

    #[tokio::test]
    async fn idle_submission_times_out() {
        let server = MockServer::start().await;
        let bureau = Bureau::start(&config(&server)).expect("bureau");

        let mut mailbox = bureau.mailbox("cli");
        let outcome = track_submission(
            &mut mailbox,
            EntryId(99),
            Duration::from_millis(100),
            &SilentProgress,
        )
        .await;

        assert!(outcome.timed_out);
        assert!(outcome.results.is_empty());
        bureau.shutdown().await;
    }

    #[test]
    fn routes_are_distinct_and_named_after_config() {
        let routes = Routes::from_config(&AppConfig::default());
        assert_eq!(routes.ingest.name(), "ingest_agent");
        assert_eq!(routes.validator.name(), "validator_agent");
        assert_ne!(routes.ingest, routes.transcribe);
    }
}
