//! Query: answer free-text questions from the knowledge base.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use afriverse_gateway::BackendClient;
use afriverse_runtime::{Context, WorkerBuilder};
use afriverse_shared::{QueryRequest, QueryResponse, Result, WorkerAddress};

pub struct QueryStage {
    backend: BackendClient,
    health_period: Duration,
}

impl QueryStage {
    pub fn new(backend: BackendClient, health_period: Duration) -> Self {
        Self {
            backend,
            health_period,
        }
    }

    /// Worker at `address` handling [`QueryRequest`]s, probing backend
    /// health every health period.
    pub fn worker(self, address: WorkerAddress) -> WorkerBuilder {
        let period = self.health_period;
        let stage = Arc::new(self);
        let prober = Arc::clone(&stage);

        WorkerBuilder::with_address(address)
            .on_message(move |ctx, request: QueryRequest| {
                let stage = Arc::clone(&stage);
                async move { stage.handle(ctx, request).await }
            })
            .on_interval(period, move |_ctx| {
                let stage = Arc::clone(&prober);
                async move { stage.probe().await }
            })
    }

    async fn probe(&self) -> Result<()> {
        self.backend.health().await?;
        debug!(backend = self.backend.base_url(), "backend healthy");
        Ok(())
    }

    #[instrument(skip_all, fields(user_id = %request.user_id))]
    async fn handle(&self, ctx: Context, request: QueryRequest) -> Result<()> {
        let response = match self.backend.query(&request.query, &request.context).await {
            Ok(answer) => {
                info!(
                    sources = answer.sources.len(),
                    confidence = ?answer.confidence,
                    "query answered"
                );
                QueryResponse {
                    success: true,
                    answer: answer.answer,
                    reasoning_trace: answer.reasoning_trace,
                    sources: answer.sources,
                    confidence: answer.confidence,
                    error: None,
                }
            }
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "query failed");
                QueryResponse::failed(e.to_string())
            }
        };
        ctx.reply(response);
        Ok(())
    }
}
