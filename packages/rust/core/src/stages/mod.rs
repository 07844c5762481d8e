//! The pipeline stages, one worker each.
//!
//! Every stage owns its collaborators, handles one job contract, and decides
//! for itself whether to forward follow-up work. Forwarded jobs keep the
//! original requester as `reply_to`, so each stage's result reaches it.

mod ingest;
mod query;
mod symbolizer;
mod transcribe;
mod validator;

use serde_json::json;

use afriverse_shared::{ContextMap, EntryId};

pub use ingest::IngestStage;
pub use query::QueryStage;
pub use symbolizer::SymbolizerStage;
pub use transcribe::TranscribeStage;
pub use validator::ValidatorStage;

/// Context handed to the symbolizer for a freshly transcribed entry.
fn symbolize_context(
    entry_id: EntryId,
    language: &str,
    content_type: &str,
    filename: Option<&str>,
) -> ContextMap {
    let mut context = ContextMap::new();
    context.insert("entry_id".into(), json!(entry_id));
    context.insert("language".into(), json!(language));
    context.insert("content_type".into(), json!(content_type));
    if let Some(filename) = filename {
        context.insert("filename".into(), json!(filename));
    }
    context
}

#[cfg(test)]
pub(crate) mod testing {
    //! Mock backend and gateway wiring shared by the stage tests.

    use std::time::Duration;

    use afriverse_gateway::{BackendClient, StorageGateway};
    use afriverse_runtime::{Envelope, Mailbox};
    use afriverse_shared::{BackendConfig, GatewayConfig, Message};
    use wiremock::MockServer;

    pub const WAIT: Duration = Duration::from_secs(5);

    pub fn backend(server: &MockServer) -> BackendClient {
        BackendClient::new(&BackendConfig {
            base_url: server.uri(),
            ..BackendConfig::default()
        })
        .expect("backend client")
    }

    pub fn gateway(server: &MockServer) -> StorageGateway {
        StorageGateway::new(&GatewayConfig {
            base_url: format!("{}/ipfs", server.uri()),
            ..GatewayConfig::default()
        })
        .expect("gateway client")
    }

    /// Next message delivered to `mailbox`, failing the test after [`WAIT`].
    pub async fn next(mailbox: &mut Mailbox) -> Message {
        let Envelope { message, .. } = mailbox.recv_timeout(WAIT).await.expect("message");
        message
    }
}
