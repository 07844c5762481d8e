//! Consensus over independent validator opinions.

use afriverse_shared::{ConsensusConfig, ConsensusDecision, Decision, EntryId, ValidationResult};

/// Admission thresholds. Both must be met for an entry to be approved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusPolicy {
    /// Minimum `approved / total`.
    pub approval_threshold: f64,
    /// Minimum mean confidence over all opinions.
    pub confidence_threshold: f64,
}

impl Default for ConsensusPolicy {
    fn default() -> Self {
        Self {
            approval_threshold: 0.70,
            confidence_threshold: 0.60,
        }
    }
}

impl From<&ConsensusConfig> for ConsensusPolicy {
    fn from(config: &ConsensusConfig) -> Self {
        Self {
            approval_threshold: config.approval_threshold,
            confidence_threshold: config.confidence_threshold,
        }
    }
}

impl ConsensusPolicy {
    /// Combine opinions into one decision. Pure: same opinions, same decision.
    ///
    /// An empty opinion set is rejected with rate and confidence 0.
    pub fn aggregate(&self, entry_id: EntryId, opinions: &[ValidationResult]) -> ConsensusDecision {
        let total_count = opinions.len();
        let approved_count = opinions
            .iter()
            .filter(|o| o.decision.is_approved())
            .count();

        let (approval_rate, average_confidence) = if total_count == 0 {
            (0.0, 0.0)
        } else {
            let total = total_count as f64;
            let confidence_sum: f64 = opinions.iter().map(|o| o.confidence).sum();
            (approved_count as f64 / total, confidence_sum / total)
        };

        let decision = if total_count > 0
            && approval_rate >= self.approval_threshold
            && average_confidence >= self.confidence_threshold
        {
            Decision::Approved
        } else {
            Decision::Rejected
        };

        ConsensusDecision {
            entry_id,
            decision,
            approval_rate,
            average_confidence,
            approved_count,
            total_count,
        }
    }
}

/// Notes recorded with the decision on the backend.
pub fn decision_notes(decision: &ConsensusDecision) -> String {
    format!(
        "Automated validation: {:.1}% approval rate",
        decision.approval_rate * 100.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    /// `approved` approving opinions out of `total`, every one at `confidence`.
    fn opinions(approved: usize, total: usize, confidence: f64) -> Vec<ValidationResult> {
        (0..total)
            .map(|i| {
                let decision = if i < approved {
                    Decision::Approved
                } else {
                    Decision::Rejected
                };
                ValidationResult::new(EntryId(1), format!("v{i}"), decision, confidence, "", vec![])
            })
            .collect()
    }

    #[test]
    fn eight_of_ten_with_good_confidence_is_approved() {
        let d = ConsensusPolicy::default().aggregate(EntryId(1), &opinions(8, 10, 0.75));
        assert!((d.approval_rate - 0.8).abs() < EPS);
        assert!((d.average_confidence - 0.75).abs() < EPS);
        assert_eq!(d.decision, Decision::Approved);
        assert_eq!((d.approved_count, d.total_count), (8, 10));
    }

    #[test]
    fn half_approval_with_low_confidence_is_rejected() {
        let d = ConsensusPolicy::default().aggregate(EntryId(1), &opinions(5, 10, 0.50));
        assert!((d.approval_rate - 0.5).abs() < EPS);
        assert_eq!(d.decision, Decision::Rejected);
    }

    #[test]
    fn low_confidence_alone_rejects() {
        let d = ConsensusPolicy::default().aggregate(EntryId(1), &opinions(9, 10, 0.55));
        assert!((d.approval_rate - 0.9).abs() < EPS);
        assert_eq!(d.decision, Decision::Rejected);
    }

    #[test]
    fn empty_set_is_rejected_without_dividing_by_zero() {
        let d = ConsensusPolicy::default().aggregate(EntryId(1), &[]);
        assert_eq!(d.decision, Decision::Rejected);
        assert_eq!(d.approval_rate, 0.0);
        assert_eq!(d.average_confidence, 0.0);
        assert_eq!(d.total_count, 0);
    }

    #[test]
    fn thresholds_are_inclusive_and_overridable() {
        let set = opinions(7, 10, 0.75);
        let d = ConsensusPolicy::default().aggregate(EntryId(1), &set);
        assert_eq!(d.decision, Decision::Approved);

        let strict = ConsensusPolicy {
            approval_threshold: 0.9,
            confidence_threshold: 0.6,
        };
        assert_eq!(strict.aggregate(EntryId(1), &set).decision, Decision::Rejected);

        let single = opinions(1, 1, 0.60);
        assert_eq!(
            ConsensusPolicy::default().aggregate(EntryId(1), &single).decision,
            Decision::Approved
        );
    }

    #[test]
    fn aggregation_is_deterministic() {
        let set = opinions(6, 9, 0.8);
        let policy = ConsensusPolicy::default();
        assert_eq!(policy.aggregate(EntryId(2), &set), policy.aggregate(EntryId(2), &set));
    }

    #[test]
    fn notes_format_rate_as_percentage() {
        let d = ConsensusPolicy::default().aggregate(EntryId(1), &opinions(8, 10, 0.75));
        assert_eq!(decision_notes(&d), "Automated validation: 80.0% approval rate");
    }
}
