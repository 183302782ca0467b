use thiserror::Error;

use crate::layer::LayerId;

/// Result alias used by every engine operation.
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
/// Reasons an edit is rejected. Every variant is raised before any buffer is
/// allocated or any history entry is created.
pub enum EngineError {
    #[error("layer {0} is not in the current layer list")]
    InvalidLayerReference(LayerId),

    #[error("operation requires a non-empty mask")]
    EmptyMaskOperation,

    #[error("dimension mismatch: expected {expected:?}, got {actual:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("cannot delete the only remaining layer")]
    LastLayerDeletion,

    #[error("generative edit failed: {message}")]
    ExternalServiceFailure { message: String },

    #[error("failed to decode asset: {reason}")]
    DecodeFailure { reason: String },

    #[error("invalid operation: {reason}")]
    InvalidOperation { reason: String },

    #[error("history index {index} out of range (len {len})")]
    HistoryIndexOutOfRange { index: usize, len: usize },
}

impl EngineError {
    pub(crate) fn decode(reason: impl std::fmt::Display) -> Self {
        Self::DecodeFailure {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation {
            reason: reason.into(),
        }
    }
}

/// Fails with [`EngineError::DimensionMismatch`] unless both sizes agree.
pub(crate) fn ensure_dimensions(expected: (u32, u32), actual: (u32, u32)) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(EngineError::DimensionMismatch { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dimension_check_reports_both_sizes() {
        assert!(ensure_dimensions((4, 4), (4, 4)).is_ok());
        let err = ensure_dimensions((4, 4), (2, 8)).unwrap_err();
        assert_eq!(
            err.to_string(),
            "dimension mismatch: expected (4, 4), got (2, 8)"
        );
    }
}
