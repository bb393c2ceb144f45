use crate::error::{AnomalyError, FixError};
use crate::types::{AnomalyStatus, FixStatus};

pub fn validate_anomaly_transition(
    from: AnomalyStatus,
    to: AnomalyStatus,
) -> Result<(), AnomalyError> {
    use AnomalyStatus::{
        Analyzed, Ignored, Pending, ProposalReady, Resolved, SandboxReady, Validated,
    };

    if from == to {
        return Ok(());
    }

    let valid = match (from, to) {
        (Pending, Validated) => true,
        (Pending, Ignored) => true,
        (Validated, Analyzed) => true,
        (Analyzed, ProposalReady) => true,
        (ProposalReady, SandboxReady) => true,
        (SandboxReady, Resolved) => true,
        // rejection sends the anomaly back for a new proposal
        (ProposalReady, Analyzed) => true,
        (SandboxReady, Analyzed) => true,
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(AnomalyError::InvalidTransition { from, to })
    }
}

pub fn validate_fix_transition(from: FixStatus, to: FixStatus) -> Result<(), FixError> {
    use FixStatus::{AppliedSandbox, Approved, Merged, Pending, Rejected};

    if from == Merged {
        return Err(FixError::AlreadyMerged);
    }
    if from == to {
        return Ok(());
    }

    let valid = match (from, to) {
        (Pending, Approved) => true,
        (Pending, AppliedSandbox) => true,
        (Approved, AppliedSandbox) => true,
        (AppliedSandbox, Merged) => true,
        (Pending, Rejected) => true,
        (Approved, Rejected) => true,
        (AppliedSandbox, Rejected) => true,
        // refinement or a fresh proposal
        (Approved, Pending) => true,
        (Rejected, Pending) => true,
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(FixError::InvalidTransition { from, to })
    }
}

/// Whether an anomaly at `anomaly` may carry a fix at `fix`.
pub fn statuses_consistent(anomaly: AnomalyStatus, fix: FixStatus) -> bool {
    match anomaly {
        AnomalyStatus::ProposalReady => matches!(fix, FixStatus::Pending | FixStatus::Approved),
        AnomalyStatus::SandboxReady => fix == FixStatus::AppliedSandbox,
        AnomalyStatus::Resolved => fix == FixStatus::Merged,
        AnomalyStatus::Analyzed => fix == FixStatus::Rejected,
        AnomalyStatus::Pending | AnomalyStatus::Ignored | AnomalyStatus::Validated => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_allowed() {
        let path = [
            AnomalyStatus::Pending,
            AnomalyStatus::Validated,
            AnomalyStatus::Analyzed,
            AnomalyStatus::ProposalReady,
            AnomalyStatus::SandboxReady,
            AnomalyStatus::Resolved,
        ];
        for pair in path.windows(2) {
            assert!(validate_anomaly_transition(pair[0], pair[1]).is_ok());
        }
    }

    #[test]
    fn terminal_states_stay_put() {
        for to in AnomalyStatus::ALL {
            if to == AnomalyStatus::Resolved {
                continue;
            }
            assert!(validate_anomaly_transition(AnomalyStatus::Resolved, to).is_err());
        }
        assert!(
            validate_anomaly_transition(AnomalyStatus::Ignored, AnomalyStatus::Validated).is_err()
        );
    }

    #[test]
    fn skipping_states_is_rejected() {
        assert!(matches!(
            validate_anomaly_transition(AnomalyStatus::Pending, AnomalyStatus::ProposalReady),
            Err(AnomalyError::InvalidTransition { .. })
        ));
        assert!(
            validate_anomaly_transition(AnomalyStatus::ProposalReady, AnomalyStatus::Resolved)
                .is_err()
        );
    }

    #[test]
    fn merged_fixes_are_final() {
        for to in FixStatus::ALL {
            assert!(matches!(
                validate_fix_transition(FixStatus::Merged, to),
                Err(FixError::AlreadyMerged)
            ));
        }
    }

    #[test]
    fn fix_must_be_applied_before_merge() {
        assert!(matches!(
            validate_fix_transition(FixStatus::Pending, FixStatus::Merged),
            Err(FixError::InvalidTransition { .. })
        ));
        assert!(validate_fix_transition(FixStatus::Approved, FixStatus::AppliedSandbox).is_ok());
        assert!(validate_fix_transition(FixStatus::Rejected, FixStatus::AppliedSandbox).is_err());
    }

    #[test]
    fn consistency_mapping() {
        assert!(statuses_consistent(AnomalyStatus::ProposalReady, FixStatus::Approved));
        assert!(statuses_consistent(AnomalyStatus::SandboxReady, FixStatus::AppliedSandbox));
        assert!(statuses_consistent(AnomalyStatus::Resolved, FixStatus::Merged));
        assert!(!statuses_consistent(AnomalyStatus::Resolved, FixStatus::AppliedSandbox));
    }
}
