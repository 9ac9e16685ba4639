// Audio error taxonomy
//
// Host failures are surfaced with the raw host status so callers can log or
// compare it. Directory queries never produce errors; they answer with empty
// or sentinel values instead.

use super::host::HostStatus;
use super::types::DeviceChangeKind;

/// Errors that can occur while driving the host audio layer
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AudioError {
    #[error("No output hardware available or the host refused a rendering session (status {status})")]
    HostResourceUnavailable { status: HostStatus },

    #[error("Host rejected the {step} (status {status})")]
    HostConfigurationRejected { step: &'static str, status: HostStatus },

    #[error("Host failed to {operation} (status {status})")]
    HostOperationFailed {
        operation: &'static str,
        status: HostStatus,
    },

    #[error("Subscription to {event:?} unavailable (status {status})")]
    SubscriptionUnavailable {
        event: DeviceChangeKind,
        status: HostStatus,
    },

    #[error("Invalid stream format: {0}")]
    InvalidStreamFormat(String),

    #[error("{operation} must not be called from inside a render callback")]
    RenderContextViolation { operation: &'static str },

    #[error("Audio backend unavailable: {0}")]
    BackendUnavailable(String),
}

impl AudioError {
    /// Raw host status carried by the error, if any
    pub fn status(&self) -> Option<HostStatus> {
        match self {
            AudioError::HostResourceUnavailable { status }
            | AudioError::HostConfigurationRejected { status, .. }
            | AudioError::HostOperationFailed { status, .. }
            | AudioError::SubscriptionUnavailable { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AudioError>;
