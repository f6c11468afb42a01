//! Idempotent steps of multi-step commands.

use std::fmt::Display;

use crate::commands::CliError;

/// What a step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Created,
    AlreadyExists,
    Failed(String),
}

impl StepOutcome {
    /// Outcome of a step reporting whether it changed anything.
    pub fn of<E: Display>(result: Result<bool, E>) -> Self {
        match result {
            Ok(true) => StepOutcome::Created,
            Ok(false) => StepOutcome::AlreadyExists,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }
}

/// A step and the lines printed for each outcome.
#[derive(Debug)]
pub struct Step {
    pub name: &'static str,
    pub created: String,
    pub exists: String,
}

impl Step {
    /// Prints the outcome. A failed step aborts the flow.
    pub fn report(self, outcome: StepOutcome) -> Result<StepOutcome, CliError> {
        match &outcome {
            StepOutcome::Created => println!("{}", self.created),
            StepOutcome::AlreadyExists => println!("{}", self.exists),
            StepOutcome::Failed(reason) => {
                tracing::debug!(step = self.name, %reason, "step failed");
                return Err(CliError::Step {
                    step: self.name,
                    reason: reason.clone(),
                });
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step() -> Step {
        Step {
            name: "bare repo",
            created: "created".into(),
            exists: "exists".into(),
        }
    }

    #[test]
    fn test_outcome_of_result() {
        assert_eq!(StepOutcome::of::<String>(Ok(true)), StepOutcome::Created);
        assert_eq!(StepOutcome::of::<String>(Ok(false)), StepOutcome::AlreadyExists);
        assert_eq!(
            StepOutcome::of(Err::<bool, _>("disk full")),
            StepOutcome::Failed("disk full".into())
        );
    }

    #[test]
    fn test_failed_step_aborts() {
        assert!(step().report(StepOutcome::Created).is_ok());
        assert!(step().report(StepOutcome::AlreadyExists).is_ok());
        let err = step().report(StepOutcome::Failed("boom".into())).unwrap_err();
        assert_eq!(err.to_string(), "bare repo: boom");
    }
}
