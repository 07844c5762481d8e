//! Standalone transcription behind the engine fallback chain.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use afriverse_gateway::{
    AudioClip, BackendClient, StorageGateway, Transcription, TranscriptUpdate, TranscriptionEngine,
};
use afriverse_runtime::{Context, WorkerBuilder};
use afriverse_shared::{Result, SymbolizeJob, TranscribeJob, TranscribeResult, WorkerAddress};

use super::symbolize_context;

pub struct TranscribeStage {
    storage: StorageGateway,
    engine: Arc<dyn TranscriptionEngine>,
    backend: BackendClient,
    symbolizer: Option<WorkerAddress>,
    health_period: Duration,
}

impl TranscribeStage {
    pub fn new(
        storage: StorageGateway,
        engine: Arc<dyn TranscriptionEngine>,
        backend: BackendClient,
        symbolizer: Option<WorkerAddress>,
        health_period: Duration,
    ) -> Self {
        Self {
            storage,
            engine,
            backend,
            symbolizer,
            health_period,
        }
    }

    /// Worker at `address` handling [`TranscribeJob`]s, probing its engines
    /// every health period.
    pub fn worker(self, address: WorkerAddress) -> WorkerBuilder {
        let period = self.health_period;
        let stage = Arc::new(self);
        let probe = Arc::clone(&stage);

        WorkerBuilder::with_address(address)
            .on_message(move |ctx, job: TranscribeJob| {
                let stage = Arc::clone(&stage);
                async move { stage.handle(ctx, job).await }
            })
            .on_interval(period, move |_ctx| {
                let stage = Arc::clone(&probe);
                async move { stage.probe().await }
            })
    }

    #[instrument(skip_all, fields(entry_id = %job.entry_id, engine = %self.engine.name()))]
    async fn handle(&self, ctx: Context, job: TranscribeJob) -> Result<()> {
        let transcription = match self.transcribe(&job).await {
            Ok(t) => t,
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "transcription failed");
                ctx.reply(TranscribeResult::failed(job.entry_id, e.to_string()));
                return Ok(());
            }
        };

        info!(
            chars = transcription.transcript.len(),
            language = ?transcription.language,
            duration = ?transcription.duration,
            "entry transcribed"
        );

        let language = transcription
            .language
            .clone()
            .unwrap_or_else(|| job.language.clone());
        ctx.reply(TranscribeResult::ok(
            job.entry_id,
            transcription.transcript.clone(),
            transcription.language,
            transcription.duration,
        ));

        if let Some(symbolizer) = &self.symbolizer {
            ctx.forward(
                symbolizer,
                SymbolizeJob {
                    entry_id: job.entry_id,
                    transcript: transcription.transcript,
                    context: symbolize_context(job.entry_id, &language, &job.content_type, None),
                },
            );
        }
        Ok(())
    }

    /// Download → fallback-transcribe → write back with whatever metadata
    /// the serving engine reported.
    async fn transcribe(&self, job: &TranscribeJob) -> Result<Transcription> {
        let content = self.storage.fetch(&job.content_reference).await?;
        debug!(bytes = content.bytes.len(), "content fetched");

        let clip = AudioClip::new(content.bytes, format!("{}.wav", job.entry_id));
        let transcription = self.engine.transcribe(&clip, &job.language).await?;

        let update = TranscriptUpdate {
            language: transcription.language.clone(),
            duration: transcription.duration,
            ..TranscriptUpdate::new(transcription.transcript.clone())
        };
        self.backend.update_transcript(job.entry_id, &update).await?;
        Ok(transcription)
    }

    /// Availability check only; failures are logged by the timer.
    async fn probe(&self) -> Result<()> {
        self.engine.probe().await?;
        debug!(engine = self.engine.name(), "transcription engines healthy");
        Ok(())
    }
}
