//! Community → validator roster, shared by the validator worker and its refresh timer.

use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info};

use afriverse_gateway::{BackendClient, ValidatorRoster};
use afriverse_shared::{AfriverseError, RegistryConfig, Result};

/// Community used when a job names none, or names one the registry lacks.
pub const DEFAULT_COMMUNITY: &str = "general";

/// Readers take an immutable snapshot; the refresh timer swaps in a whole new map.
#[derive(Debug, Default)]
pub struct ValidatorRegistry {
    roster: RwLock<Arc<ValidatorRoster>>,
}

impl ValidatorRegistry {
    pub fn new(initial: ValidatorRoster) -> Self {
        Self {
            roster: RwLock::new(Arc::new(initial)),
        }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        Self::new(config.communities.clone())
    }

    /// The current roster. Unaffected by later replacements.
    pub fn snapshot(&self) -> Arc<ValidatorRoster> {
        self.roster
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Swap in a new roster wholesale.
    pub fn replace(&self, roster: ValidatorRoster) {
        *self.roster.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(roster);
    }

    /// Validators for `community`, falling back to the default community.
    pub fn roster_for(&self, community: &str) -> Vec<String> {
        let snapshot = self.snapshot();
        snapshot
            .get(community)
            .or_else(|| snapshot.get(DEFAULT_COMMUNITY))
            .cloned()
            .unwrap_or_default()
    }

    /// Fetch the roster from the backend and replace ours. An empty reply is ignored.
    pub async fn refresh(&self, backend: &BackendClient) -> Result<usize> {
        let roster = backend.fetch_validators().await?;
        if roster.is_empty() {
            return Err(AfriverseError::validation(
                "backend returned an empty validator roster",
            ));
        }

        let communities = roster.len();
        debug!(communities, "validator roster fetched");
        self.replace(roster);
        info!(communities, "validator registry refreshed");
        Ok(communities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afriverse_shared::BackendConfig;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn seeded() -> ValidatorRegistry {
        ValidatorRegistry::from_config(&RegistryConfig::default())
    }

    #[test]
    fn roster_falls_back_to_general() {
        let registry = seeded();
        assert_eq!(registry.roster_for("kikuyu").len(), 2);
        assert_eq!(
            registry.roster_for("unknown"),
            vec!["validator1", "validator2", "validator3"]
        );
    }

    #[test]
    fn snapshot_survives_replacement() {
        let registry = seeded();
        let before = registry.snapshot();
        registry.replace(ValidatorRoster::from([(
            "luo".to_string(),
            vec!["luo_elder1".to_string()],
        )]));

        assert!(before.contains_key("maasai"));
        assert!(!registry.snapshot().contains_key("maasai"));
        assert!(registry.roster_for("maasai").is_empty());
    }

    #[tokio::test]
    async fn refresh_replaces_and_ignores_empty_replies() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/validators"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "general": ["g1"],
                "luo": ["luo_elder1", "luo_elder2"]
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/validators"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let backend = BackendClient::new(&BackendConfig {
            base_url: server.uri(),
            ..BackendConfig::default()
        })
        .expect("backend");
        let registry = seeded();

        assert_eq!(registry.refresh(&backend).await.expect("refresh"), 2);
        assert_eq!(registry.roster_for("luo").len(), 2);

        assert!(registry.refresh(&backend).await.is_err());
        assert_eq!(registry.roster_for("general"), vec!["g1"]);
    }
}
