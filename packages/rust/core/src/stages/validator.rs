//! Validate: judge each atom, reach consensus, record the decision.
//!
//! The terminal stage. The decision is recorded before anything is replied.
//! On success the requester gets one [`ValidationResult`] per atom and then
//! the [`ConsensusDecision`]; a failed write-back answers with a single
//! errored opinion instead.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, instrument, warn};

use afriverse_gateway::{BackendClient, ValidationSubmission};
use afriverse_runtime::{Context, WorkerBuilder};
use afriverse_shared::{
    ConsensusDecision, EntryId, Result, ValidationRequest, ValidationResult, WorkerAddress,
};

use crate::checks::AtomChecker;
use crate::consensus::{ConsensusPolicy, decision_notes};
use crate::registry::{DEFAULT_COMMUNITY, ValidatorRegistry};

pub struct ValidatorStage {
    checker: Arc<AtomChecker>,
    policy: ConsensusPolicy,
    registry: Arc<ValidatorRegistry>,
    backend: BackendClient,
    refresh_period: Duration,
}

impl ValidatorStage {
    pub fn new(
        checker: AtomChecker,
        policy: ConsensusPolicy,
        registry: Arc<ValidatorRegistry>,
        backend: BackendClient,
        refresh_period: Duration,
    ) -> Self {
        Self {
            checker: Arc::new(checker),
            policy,
            registry,
            backend,
            refresh_period,
        }
    }

    /// Worker at `address` handling [`ValidationRequest`]s and refreshing
    /// the registry every refresh period.
    pub fn worker(self, address: WorkerAddress) -> WorkerBuilder {
        let period = self.refresh_period;
        let stage = Arc::new(self);
        let refresher = Arc::clone(&stage);

        WorkerBuilder::with_address(address)
            .on_message(move |ctx, request: ValidationRequest| {
                let stage = Arc::clone(&stage);
                async move { stage.handle(ctx, request).await }
            })
            .on_interval(period, move |_ctx| {
                let stage = Arc::clone(&refresher);
                async move { stage.registry.refresh(&stage.backend).await.map(|_| ()) }
            })
    }

    #[instrument(skip_all, fields(entry_id = %request.entry_id, atoms = request.atoms.len()))]
    async fn handle(&self, ctx: Context, request: ValidationRequest) -> Result<()> {
        let validator = ctx.address().to_string();
        let community = request
            .context
            .get("community")
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_COMMUNITY)
            .to_string();
        let validators = if request.validators.is_empty() {
            self.registry.roster_for(&community)
        } else {
            request.validators.clone()
        };

        let mut opinions = Vec::with_capacity(request.atoms.len());
        for atom in &request.atoms {
            opinions.push(
                self.judge(request.entry_id, &validator, atom, &community)
                    .await,
            );
        }

        let decision = self.policy.aggregate(request.entry_id, &opinions);
        info!(
            decision = %decision.decision,
            approval_rate = decision.approval_rate,
            average_confidence = decision.average_confidence,
            %community,
            "consensus reached"
        );

        self.record(&decision, &validator, validators).await?;

        for opinion in opinions {
            ctx.reply(opinion);
        }
        ctx.reply(decision);
        Ok(())
    }

    /// Run the checks for one atom in their own task, so a fault inside
    /// them becomes a rejected opinion instead of failing the request.
    async fn judge(
        &self,
        entry_id: EntryId,
        validator: &str,
        atom: &str,
        community: &str,
    ) -> ValidationResult {
        let checker = Arc::clone(&self.checker);
        let (v, a, c) = (validator.to_string(), atom.to_string(), community.to_string());
        let task = tokio::spawn(async move { checker.check(entry_id, &v, &a, &c).await });

        match task.await {
            Ok(opinion) => opinion,
            Err(e) => {
                warn!(%entry_id, atom, error = %e, "atom check faulted");
                ValidationResult::check_faulted(entry_id, validator, &e.to_string())
            }
        }
    }

    async fn record(
        &self,
        decision: &ConsensusDecision,
        validator: &str,
        validators: Vec<String>,
    ) -> Result<()> {
        let submission = ValidationSubmission {
            decision: decision.decision,
            notes: decision_notes(decision),
            validator: validator.to_string(),
            confidence: decision.average_confidence,
            validators,
        };
        self.backend
            .submit_validation(decision.entry_id, &submission)
            .await
    }
}
