//! Symbolize: turn a transcript into validated atoms and record them.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use afriverse_gateway::BackendClient;
use afriverse_runtime::{Context, WorkerBuilder};
use afriverse_shared::{
    Result, SymbolizeJob, SymbolizeResult, ValidationRequest, WorkerAddress,
};

use crate::atoms;

pub struct SymbolizerStage {
    backend: BackendClient,
    validator: Option<WorkerAddress>,
}

impl SymbolizerStage {
    pub fn new(backend: BackendClient, validator: Option<WorkerAddress>) -> Self {
        Self { backend, validator }
    }

    pub fn worker(self, address: WorkerAddress) -> WorkerBuilder {
        let stage = Arc::new(self);
        WorkerBuilder::with_address(address).on_message(move |ctx, job: SymbolizeJob| {
            let stage = Arc::clone(&stage);
            async move { stage.handle(ctx, job).await }
        })
    }

    #[instrument(skip_all, fields(entry_id = %job.entry_id))]
    async fn handle(&self, ctx: Context, job: SymbolizeJob) -> Result<()> {
        let atoms = match self.symbolize(&job).await {
            Ok(atoms) => atoms,
            Err(e) => {
                warn!(error = %e, retryable = e.is_retryable(), "symbolization failed");
                ctx.reply(SymbolizeResult::failed(job.entry_id, e.to_string()));
                return Ok(());
            }
        };

        ctx.reply(SymbolizeResult::ok(job.entry_id, atoms.clone()));

        // An empty validator list lets the validator pick the community roster.
        if let Some(validator) = &self.validator {
            ctx.forward(
                validator,
                ValidationRequest {
                    entry_id: job.entry_id,
                    validators: Vec::new(),
                    atoms,
                    context: job.context,
                },
            );
        }
        Ok(())
    }

    async fn symbolize(&self, job: &SymbolizeJob) -> Result<Vec<String>> {
        let raw = self.backend.symbolize(&job.transcript, &job.context).await?;
        let atoms = atoms::validate_batch(&raw);
        info!(proposed = raw.len(), kept = atoms.len(), "atoms extracted");

        self.backend.update_atoms(job.entry_id, &atoms).await?;
        Ok(atoms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{WAIT, backend, next};
    use afriverse_runtime::Router;
    use afriverse_shared::{ContextMap, EntryId, Message};
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn job(id: u64) -> SymbolizeJob {
        let mut context = ContextMap::new();
        context.insert("community".into(), json!("kikuyu"));
        SymbolizeJob {
            entry_id: EntryId(id),
            transcript: "Mwarubaini hutibu malaria".into(),
            context,
        }
    }

    async fn mock_symbolize(server: &MockServer, atoms: serde_json::Value) {
        Mock::given(method("POST"))
            .and(path("/api/symbolize"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "atoms": atoms })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn repairs_drops_records_and_forwards() {
        let server = MockServer::start().await;
        mock_symbolize(&server, json!(["(treats neem malaria)", "is_a neem tree", "(x)"])).await;
        Mock::given(method("PATCH"))
            .and(path("/api/entries/5/atoms"))
            .and(body_json(json!({
                "atoms": ["(treats neem malaria)", "(is_a neem tree)"],
                "status": "symbolized"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let router = Router::new();
        let mut requester = router.mailbox("cli");
        let mut validator = router.mailbox("validator_agent");
        let address = WorkerAddress::new("symbolizer_agent");
        SymbolizerStage::new(backend(&server), Some(validator.address().clone()))
            .worker(address.clone())
            .spawn(&router);

        requester.send(&address, job(5));

        match next(&mut requester).await {
            Message::SymbolizeResult(result) => {
                assert!(result.success);
                assert_eq!(result.atoms, vec!["(treats neem malaria)", "(is_a neem tree)"]);
            }
            other => panic!("unexpected {other:?}"),
        }

        let envelope = validator.recv_timeout(WAIT).await.expect("forwarded request");
        assert_eq!(&envelope.reply_to, requester.address());
        match envelope.message {
            Message::ValidationRequest(request) => {
                assert!(request.validators.is_empty());
                assert_eq!(request.atoms.len(), 2);
                assert_eq!(request.context["community"], json!("kikuyu"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_atoms_write_back_fails_the_job() {
        let server = MockServer::start().await;
        mock_symbolize(&server, json!(["(has baobab water)"])).await;
        Mock::given(method("PATCH"))
            .and(path("/api/entries/6/atoms"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let router = Router::new();
        let mut requester = router.mailbox("cli");
        let address = WorkerAddress::new("symbolizer_agent");
        SymbolizerStage::new(backend(&server), None)
            .worker(address.clone())
            .spawn(&router);

        requester.send(&address, job(6));

        match next(&mut requester).await {
            Message::SymbolizeResult(result) => {
                assert!(!result.success);
                assert!(result.atoms.is_empty());
                assert!(result.error.expect("error").contains("backend update error"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
