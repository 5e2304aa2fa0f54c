use thiserror::Error;

use crate::region::NamedRegion;

/// Failure taxonomy of a run.
///
/// Soft misses never show up here: a probe that times out without being
/// fatal returns `found == false` and the caller picks a recovery.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The operator raised the panic signal.
    #[error("cancelled by operator")]
    Cancelled,

    /// A fatal probe timed out. The diagnostic capture is already on disk.
    #[error("'{template}' not found in {region} (best confidence {best:.2})")]
    HardMiss {
        template: String,
        region: NamedRegion,
        best: f32,
    },

    #[error("{step} failed after {attempts} attempt(s)")]
    RetriesExhausted { step: &'static str, attempts: u32 },

    /// Leaving the unsafe window could not be confirmed. The network guard
    /// is still engaged when this is returned.
    #[error("safe state not confirmed, network guard left engaged")]
    SafeStateUnconfirmed,

    #[error("online mode not confirmed within the load bound")]
    OnlineUnconfirmed,

    #[error("template '{0}' is not loaded")]
    MissingAsset(String),

    #[error(transparent)]
    Platform(#[from] anyhow::Error),
}

impl WorkflowError {
    /// Errors absorbed at the iteration boundary instead of ending the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, WorkflowError::Platform(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_platform_failures_are_recoverable() {
        assert!(WorkflowError::Platform(anyhow::anyhow!("capture failed")).is_recoverable());
        assert!(!WorkflowError::Cancelled.is_recoverable());
        assert!(!WorkflowError::SafeStateUnconfirmed.is_recoverable());
        assert!(!WorkflowError::RetriesExhausted { step: "select item", attempts: 3 }.is_recoverable());
    }

    #[test]
    fn hard_miss_message_names_template_and_region() {
        let err = WorkflowError::HardMiss {
            template: "return_link".into(),
            region: NamedRegion::Full,
            best: 0.4321,
        };
        assert_eq!(err.to_string(), "'return_link' not found in full (best confidence 0.43)");
    }
}
