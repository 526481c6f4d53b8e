//! Operation phases and the trail kept for each operation.

use std::fmt;

use crate::error::ErrorKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Phase {
    Validating,
    CheckingConflicts,
    Staging,
    Merging,
    RunningHooks,
    Finalizing,
    Done,
    RollingBack,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    /// Phases in which a failure leaves work to undo.
    pub fn needs_rollback(&self) -> bool {
        matches!(
            self,
            Self::Staging | Self::Merging | Self::RunningHooks | Self::Finalizing
        )
    }

    /// Whether `next` may follow `self`.
    pub fn can_advance_to(&self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (RollingBack, Failed) => true,
            (RollingBack, _) => false,
            (_, Failed) => true,
            (current, RollingBack) => current.needs_rollback(),
            (current, next) => next > *current && next <= Done,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Validating => "validating",
            Self::CheckingConflicts => "checking_conflicts",
            Self::Staging => "staging",
            Self::Merging => "merging",
            Self::RunningHooks => "running_hooks",
            Self::Finalizing => "finalizing",
            Self::Done => "done",
            Self::RollingBack => "rolling_back",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Install,
    InstallLocal,
    Upgrade,
    Uninstall,
    Enable,
    Disable,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Install => "install",
            Self::InstallLocal => "install_local",
            Self::Upgrade => "upgrade",
            Self::Uninstall => "uninstall",
            Self::Enable => "enable",
            Self::Disable => "disable",
        };
        f.write_str(name)
    }
}

/// Summary of the last finished operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationOutcome {
    pub operation: Operation,
    pub package: String,
    /// Every phase entered, in order
    pub trail: Vec<Phase>,
    pub error: Option<ErrorKind>,
}

impl OperationOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    pub fn final_phase(&self) -> Option<Phase> {
        self.trail.last().copied()
    }
}

/// Forward-only phase state machine for one operation.
#[derive(Debug)]
pub(crate) struct PhaseTracker {
    operation: Operation,
    package: String,
    trail: Vec<Phase>,
}

impl PhaseTracker {
    pub(crate) fn start(operation: Operation, package: impl Into<String>) -> Self {
        let package = package.into();
        tracing::debug!(%operation, %package, phase = %Phase::Validating, "phase");
        Self {
            operation,
            package,
            trail: vec![Phase::Validating],
        }
    }

    pub(crate) fn current(&self) -> Phase {
        self.trail.last().copied().unwrap_or(Phase::Validating)
    }

    /// Rename the package once the manifest resolved it.
    pub(crate) fn set_package(&mut self, package: &str) {
        self.package = package.to_string();
    }

    /// Enter `next`. Transitions that would go backwards are ignored and
    /// logged.
    pub(crate) fn advance(&mut self, next: Phase) {
        let current = self.current();
        if !current.can_advance_to(next) {
            tracing::warn!(%current, %next, "ignored phase transition");
            return;
        }
        tracing::debug!(
            operation = %self.operation,
            package = %self.package,
            phase = %next,
            "phase"
        );
        self.trail.push(next);
    }

    pub(crate) fn finish(mut self, error: Option<ErrorKind>) -> OperationOutcome {
        if error.is_none() {
            self.advance(Phase::Done);
        } else {
            self.advance(Phase::Failed);
        }
        OperationOutcome {
            operation: self.operation,
            package: self.package,
            trail: self.trail,
            error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Phase::Validating, Phase::CheckingConflicts, true)]
    #[case(Phase::Validating, Phase::Merging, true)]
    #[case(Phase::Merging, Phase::Staging, false)]
    #[case(Phase::Validating, Phase::RollingBack, false)]
    #[case(Phase::CheckingConflicts, Phase::RollingBack, false)]
    #[case(Phase::Staging, Phase::RollingBack, true)]
    #[case(Phase::Finalizing, Phase::RollingBack, true)]
    #[case(Phase::RollingBack, Phase::Failed, true)]
    #[case(Phase::RollingBack, Phase::Done, false)]
    #[case(Phase::Validating, Phase::Failed, true)]
    #[case(Phase::Done, Phase::Failed, false)]
    #[case(Phase::Finalizing, Phase::Done, true)]
    fn transitions(#[case] from: Phase, #[case] to: Phase, #[case] allowed: bool) {
        assert_eq!(from.can_advance_to(to), allowed);
    }

    #[test]
    fn tracker_records_trail() {
        let mut tracker = PhaseTracker::start(Operation::Install, "demo");
        tracker.advance(Phase::CheckingConflicts);
        tracker.advance(Phase::Staging);
        tracker.advance(Phase::Validating);
        tracker.advance(Phase::RollingBack);
        let outcome = tracker.finish(Some(ErrorKind::HookFailed));

        assert_eq!(
            outcome.trail,
            vec![
                Phase::Validating,
                Phase::CheckingConflicts,
                Phase::Staging,
                Phase::RollingBack,
                Phase::Failed
            ]
        );
        assert!(!outcome.succeeded());
        assert_eq!(outcome.final_phase(), Some(Phase::Failed));
    }

    #[test]
    fn success_ends_in_done() {
        let outcome = PhaseTracker::start(Operation::Enable, "demo").finish(None);
        assert_eq!(outcome.trail, vec![Phase::Validating, Phase::Done]);
    }
}
