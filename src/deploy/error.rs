use std::path::PathBuf;
use thiserror::Error;

/// Failures raised while negotiating deployment inputs.
///
/// These travel inside `anyhow::Error`; callers recover the kind with
/// `downcast_ref::<DeployInputError>()`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeployInputError {
    #[error("{field} is required (pass a flag or run interactively)")]
    MissingRequiredValue { field: String },

    #[error(
        "{field} mismatch: {asserted_source} value '{asserted}' conflicts with running value '{inferred}' ({inferred_provenance}); pass --force to keep '{asserted}'"
    )]
    Conflict {
        field: String,
        asserted: String,
        asserted_source: String,
        inferred: String,
        inferred_provenance: String,
    },

    #[error("parameter '{name}' {reason}")]
    InvalidParameterValue { name: String, reason: String },

    #[error("template not found: {}", path.display())]
    TemplateNotFound { path: PathBuf },

    #[error("no template.yaml or template.yml in directory: {}", path.display())]
    AmbiguousTemplateDirectory { path: PathBuf },

    #[error("container runtime unavailable: {0}")]
    RuntimeProbeFailure(String),

    #[error("multiple running stacks found ({}); pass --project to choose one", stacks.join(", "))]
    MultipleLiveStacks { stacks: Vec<String> },

    #[error("invalid mode '{value}' (expected process-isolated, kernel-isolated or micro-vm)")]
    InvalidMode { value: String },

    #[error("cancelled by user")]
    Cancelled,
}

impl DeployInputError {
    pub fn missing(field: &str) -> Self {
        Self::MissingRequiredValue {
            field: field.to_string(),
        }
    }

    /// Errors a prompt loop can show to the operator and ask again
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidParameterValue { .. }
                | Self::TemplateNotFound { .. }
                | Self::AmbiguousTemplateDirectory { .. }
                | Self::InvalidMode { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message_names_both_values() {
        let err = DeployInputError::Conflict {
            field: "env".into(),
            asserted: "staging".into(),
            asserted_source: "flag".into(),
            inferred: "prod".into(),
            inferred_provenance: "stack sbx-prod".into(),
        };
        let message = err.to_string();
        assert!(message.contains("staging"));
        assert!(message.contains("prod"));
        assert!(message.starts_with("env mismatch"));
    }

    #[test]
    fn test_recoverable_kinds() {
        assert!(DeployInputError::InvalidMode { value: "x".into() }.is_recoverable());
        assert!(!DeployInputError::Cancelled.is_recoverable());
        assert!(!DeployInputError::missing("env").is_recoverable());
    }
}
