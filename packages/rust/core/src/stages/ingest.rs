//! Ingest: download a submission, transcribe it, record the transcript.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use afriverse_gateway::{AudioClip, BackendClient, StorageGateway, TranscriptUpdate, TranscriptionEngine};
use afriverse_runtime::{Context, WorkerBuilder};
use afriverse_shared::{IngestJob, IngestResult, Result, SymbolizeJob, WorkerAddress};

use super::symbolize_context;

pub struct IngestStage {
    storage: StorageGateway,
    transcriber: Arc<dyn TranscriptionEngine>,
    backend: BackendClient,
    symbolizer: Option<WorkerAddress>,
}

impl IngestStage {
    pub fn new(
        storage: StorageGateway,
        transcriber: Arc<dyn TranscriptionEngine>,
        backend: BackendClient,
        symbolizer: Option<WorkerAddress>,
    ) -> Self {
        Self {
            storage,
            transcriber,
            backend,
            symbolizer,
        }
    }

    /// Worker at `address` handling [`IngestJob`]s.
    pub fn worker(self, address: WorkerAddress) -> WorkerBuilder {
        let stage = Arc::new(self);
        WorkerBuilder::with_address(address).on_message(move |ctx, job: IngestJob| {
            let stage = Arc::clone(&stage);
            async move { stage.handle(ctx, job).await }
        })
    }

    #[instrument(skip_all, fields(entry_id = %job.entry_id, reference = %job.content_reference))]
    async fn handle(&self, ctx: Context, job: IngestJob) -> Result<()> {
        let transcript = match self.ingest(&job).await {
            Ok(transcript) => transcript,
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "ingest failed");
                ctx.reply(IngestResult::failed(job.entry_id, e.to_string()));
                return Ok(());
            }
        };

        info!(chars = transcript.len(), "entry ingested");
        ctx.reply(IngestResult::ok(job.entry_id, transcript.clone()));

        if let Some(symbolizer) = &self.symbolizer {
            ctx.forward(
                symbolizer,
                SymbolizeJob {
                    entry_id: job.entry_id,
                    transcript,
                    context: symbolize_context(
                        job.entry_id,
                        &job.language,
                        &job.content_type,
                        Some(&job.filename),
                    ),
                },
            );
        }
        Ok(())
    }

    /// Download → transcribe → write back. A failed write-back fails the job.
    async fn ingest(&self, job: &IngestJob) -> Result<String> {
        let content = self.storage.fetch(&job.content_reference).await?;
        info!(bytes = content.bytes.len(), hash = %content.content_hash, "content fetched");

        let clip = AudioClip::new(content.bytes, job.filename.clone());
        let transcription = self.transcriber.transcribe(&clip, &job.language).await?;

        self.backend
            .update_transcript(job.entry_id, &TranscriptUpdate::new(transcription.transcript.clone()))
            .await?;
        Ok(transcription.transcript)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{WAIT, backend, gateway, next};
    use afriverse_gateway::BackendTranscriber;
    use afriverse_runtime::Router;
    use afriverse_shared::{EntryId, Message};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job(id: u64) -> IngestJob {
        IngestJob {
            entry_id: EntryId(id),
            content_reference: "QmStory".into(),
            filename: "story.wav".into(),
            language: "sw".into(),
            content_type: "audio".into(),
        }
    }

    async fn mock_download_and_transcribe(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/ipfs/QmStory"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"RIFF....WAVE".to_vec()))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/transcribe"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"transcript": "Mwarubaini hutibu malaria"})),
            )
            .mount(server)
            .await;
    }

    fn spawn_stage(server: &MockServer, router: &Router, symbolizer: Option<WorkerAddress>) -> WorkerAddress {
        let client = backend(server);
        let stage = IngestStage::new(
            gateway(server),
            Arc::new(BackendTranscriber::new(client.clone())),
            client,
            symbolizer,
        );
        let address = WorkerAddress::new("ingest_agent");
        stage.worker(address.clone()).spawn(router);
        address
    }

    #[tokio::test]
    async fn successful_ingest_replies_and_forwards() {
        let server = MockServer::start().await;
        mock_download_and_transcribe(&server).await;
        Mock::given(method("PATCH"))
            .and(path("/api/entries/7/transcript"))
            .and(body_partial_json(json!({
                "transcript": "Mwarubaini hutibu malaria",
                "status": "transcribed"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let router = Router::new();
        let mut requester = router.mailbox("cli");
        let mut symbolizer = router.mailbox("symbolizer_agent");
        let ingest = spawn_stage(&server, &router, Some(symbolizer.address().clone()));

        requester.send(&ingest, job(7));

        match next(&mut requester).await {
            Message::IngestResult(result) => {
                assert!(result.success);
                assert_eq!(result.transcript.as_deref(), Some("Mwarubaini hutibu malaria"));
            }
            other => panic!("unexpected {other:?}"),
        }

        let envelope = symbolizer.recv_timeout(WAIT).await.expect("forwarded job");
        assert_eq!(&envelope.reply_to, requester.address());
        match envelope.message {
            Message::SymbolizeJob(job) => {
                assert_eq!(job.entry_id, EntryId(7));
                assert_eq!(job.context["language"], json!("sw"));
                assert_eq!(job.context["filename"], json!("story.wav"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_write_back_fails_the_job_and_stops_progression() {
        let server = MockServer::start().await;
        mock_download_and_transcribe(&server).await;
        Mock::given(method("PATCH"))
            .and(path("/api/entries/8/transcript"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let router = Router::new();
        let mut requester = router.mailbox("cli");
        let mut symbolizer = router.mailbox("symbolizer_agent");
        let ingest = spawn_stage(&server, &router, Some(symbolizer.address().clone()));

        requester.send(&ingest, job(8));

        match next(&mut requester).await {
            Message::IngestResult(result) => {
                assert!(!result.success);
                assert!(result.transcript.is_none());
                assert!(result.error.expect("error").contains("backend update error"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(symbolizer.recv_timeout(std::time::Duration::from_millis(200)).await.is_none());
    }

    #[tokio::test]
    async fn missing_content_fails_before_transcription() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ipfs/QmStory"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/transcribe"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let router = Router::new();
        let mut requester = router.mailbox("cli");
        let ingest = spawn_stage(&server, &router, None);

        requester.send(&ingest, job(9));

        match next(&mut requester).await {
            Message::IngestResult(result) => {
                assert!(!result.success);
                assert!(result.error.expect("error").contains("fetch error"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
