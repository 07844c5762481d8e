//! Per-atom validation checks: syntax, restricted content, knowledge consistency.
//!
//! Checks run in that order and the first rejection wins. Each check yields a
//! finished opinion; a failed knowledge query becomes a low-confidence
//! rejection rather than an error.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::{debug, warn};

use afriverse_gateway::{BackendClient, QueryAnswer};
use afriverse_shared::{
    AfriverseError, ConsensusConfig, ContextMap, Decision, EntryId, Result, ValidationResult,
};

use crate::atoms;

/// Confidence attached to a syntax rejection.
const SYNTAX_REJECTION_CONFIDENCE: f64 = 0.9;

/// Confidence attached to a restricted-content rejection.
const SENSITIVITY_REJECTION_CONFIDENCE: f64 = 0.8;

/// Source of knowledge-base answers for consistency checks.
#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    async fn query(&self, query: &str, context: &ContextMap) -> Result<QueryAnswer>;
}

#[async_trait]
impl KnowledgeBase for BackendClient {
    async fn query(&self, query: &str, context: &ContextMap) -> Result<QueryAnswer> {
        BackendClient::query(self, query, context).await
    }
}

// ---------------------------------------------------------------------------
// CheckPolicy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CheckPolicy {
    /// Lower-cased restricted terms.
    pub sensitive_terms: Vec<String>,
    /// The knowledge base must score strictly above this.
    pub consistency_threshold: f64,
    /// Used when the knowledge base answers without a confidence.
    pub default_confidence: f64,
    /// Used when the knowledge base could not be asked.
    pub failure_confidence: f64,
}

impl From<&ConsensusConfig> for CheckPolicy {
    fn from(config: &ConsensusConfig) -> Self {
        Self {
            sensitive_terms: config
                .sensitive_terms
                .iter()
                .map(|t| t.to_lowercase())
                .collect(),
            consistency_threshold: config.consistency_threshold,
            default_confidence: config.consistency_default_confidence,
            failure_confidence: config.consistency_failure_confidence,
        }
    }
}

impl Default for CheckPolicy {
    fn default() -> Self {
        Self::from(&ConsensusConfig::default())
    }
}

// ---------------------------------------------------------------------------
// AtomChecker
// ---------------------------------------------------------------------------

pub struct AtomChecker {
    policy: CheckPolicy,
    knowledge: Arc<dyn KnowledgeBase>,
}

impl AtomChecker {
    pub fn new(policy: CheckPolicy, knowledge: Arc<dyn KnowledgeBase>) -> Self {
        Self { policy, knowledge }
    }

    /// First restricted term contained in `atom`, case-insensitively.
    pub fn sensitive_term(&self, atom: &str) -> Option<&str> {
        let lowered = atom.to_lowercase();
        self.policy
            .sensitive_terms
            .iter()
            .find(|term| lowered.contains(term.as_str()))
            .map(String::as_str)
    }

    /// Judge one atom on behalf of `validator`.
    pub async fn check(
        &self,
        entry_id: EntryId,
        validator: &str,
        atom: &str,
        community: &str,
    ) -> ValidationResult {
        let reject = |confidence: f64, notes: String| {
            ValidationResult::new(entry_id, validator, Decision::Rejected, confidence, notes, vec![])
        };

        if !atoms::is_well_formed(atom) {
            return reject(
                SYNTAX_REJECTION_CONFIDENCE,
                format!("Invalid atom syntax: {atom}"),
            );
        }

        if let Some(term) = self.sensitive_term(atom) {
            return reject(
                SENSITIVITY_REJECTION_CONFIDENCE,
                format!("Culturally sensitive content: contains sensitive term: {term}"),
            );
        }

        match self.consistency(atom, community).await {
            Ok(Some(confidence)) if confidence > self.policy.consistency_threshold => {
                ValidationResult::new(
                    entry_id,
                    validator,
                    Decision::Approved,
                    confidence,
                    "Atom validated successfully",
                    vec![atom.to_string()],
                )
            }
            Ok(confidence) => reject(
                confidence.unwrap_or(self.policy.default_confidence),
                "Knowledge inconsistency: low confidence in existing knowledge".into(),
            ),
            Err(e) => {
                warn!(%entry_id, atom, error = %e, "consistency check failed");
                reject(
                    self.policy.failure_confidence,
                    format!("Knowledge inconsistency: {e}"),
                )
            }
        }
    }

    /// Ask the knowledge base how well `atom` fits what is already known.
    async fn consistency(&self, atom: &str, community: &str) -> Result<Option<f64>> {
        let mut context = ContextMap::new();
        context.insert("key_terms".into(), json!(atoms::key_terms(atom)));
        context.insert("community".into(), json!(community));

        let answer = self
            .knowledge
            .query(&format!("Check consistency for: {atom}"), &context)
            .await
            .map_err(|e| AfriverseError::ConsistencyCheck(e.to_string()))?;

        debug!(atom, confidence = ?answer.confidence, "consistency answer");
        Ok(answer.confidence)
    }
}
