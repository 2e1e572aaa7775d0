use std::time::Duration;

use serde::Serialize;

/// Why a case failed. Every variant except `Internal` is local to one case and never
/// stops the suite.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("{0}")]
    Configuration(String),

    #[error("{step}: {detail}")]
    UnexpectedFailure { step: String, detail: String },

    #[error("{step}: timed out after {}s", .timeout.as_secs_f64())]
    Timeout { step: String, timeout: Duration },

    #[error("{label}: {detail}")]
    ComparisonMismatch { label: String, detail: String },

    #[error("{step}: not attempted because {preceding} did not succeed")]
    PrecedingStepFailed { step: String, preceding: String },

    #[error("{step}: {reason}")]
    Cancelled { step: String, reason: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    #[serde(rename = "configuration_error")]
    Configuration,
    UnexpectedFailure,
    Timeout,
    ComparisonMismatch,
    PrecedingStepFailed,
    Cancelled,
    #[serde(rename = "internal_error")]
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration_error",
            ErrorKind::UnexpectedFailure => "unexpected_failure",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ComparisonMismatch => "comparison_mismatch",
            ErrorKind::PrecedingStepFailed => "preceding_step_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal_error",
        }
    }
}

impl HarnessError {
    pub fn config(msg: impl Into<String>) -> Self {
        HarnessError::Configuration(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HarnessError::Configuration(_) => ErrorKind::Configuration,
            HarnessError::UnexpectedFailure { .. } => ErrorKind::UnexpectedFailure,
            HarnessError::Timeout { .. } => ErrorKind::Timeout,
            HarnessError::ComparisonMismatch { .. } => ErrorKind::ComparisonMismatch,
            HarnessError::PrecedingStepFailed { .. } => ErrorKind::PrecedingStepFailed,
            HarnessError::Cancelled { .. } => ErrorKind::Cancelled,
            HarnessError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Label of the step or comparison the error is attributed to, if any.
    pub fn step_label(&self) -> Option<&str> {
        match self {
            HarnessError::UnexpectedFailure { step, .. }
            | HarnessError::Timeout { step, .. }
            | HarnessError::PrecedingStepFailed { step, .. }
            | HarnessError::Cancelled { step, .. } => Some(step),
            HarnessError::ComparisonMismatch { label, .. } => Some(label),
            HarnessError::Configuration(_) | HarnessError::Internal(_) => None,
        }
    }

    /// Human-readable detail without the step label prefix.
    pub fn detail(&self) -> String {
        match self {
            HarnessError::Configuration(msg) => msg.clone(),
            HarnessError::UnexpectedFailure { detail, .. }
            | HarnessError::ComparisonMismatch { detail, .. } => detail.clone(),
            HarnessError::Timeout { timeout, .. } => {
                format!("timed out after {}s", timeout.as_secs_f64())
            }
            HarnessError::PrecedingStepFailed { preceding, .. } => {
                format!("not attempted because {preceding} did not succeed")
            }
            HarnessError::Cancelled { reason, .. } => reason.clone(),
            HarnessError::Internal(err) => format!("{err:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_step_label() {
        let err = HarnessError::Timeout {
            step: "execute".to_string(),
            timeout: Duration::from_millis(1500),
        };
        assert_eq!(err.to_string(), "execute: timed out after 1.5s");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.step_label(), Some("execute"));
    }

    #[test]
    fn internal_errors_keep_their_context_chain() {
        let err: HarnessError = anyhow::anyhow!("disk full")
            .context("write step log")
            .into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert_eq!(err.detail(), "write step log: disk full");
    }
}
