use thiserror::Error;

/// Canonical error type for harness operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The consensus handle was used before `start()`.
    #[error("consensus node `{name}` has not been started")]
    NotStarted {
        /// Name of the node that rejected the call.
        name: String,
    },

    /// A proposal could not be committed.
    #[error("propose failed: {message}")]
    ProposeFailed {
        /// Human-readable reason reported by the consensus layer.
        message: String,
    },

    /// The membership gate was dropped before it released its waiter.
    #[error("membership gate closed before quorum of {target} members was reached")]
    GateClosed {
        /// Target peer count the gate was waiting for.
        target: usize,
    },

    /// Operation violates current state machine rules.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Human-readable explanation of the invalid state.
        message: String,
    },

    /// Unexpected internal error occurred.
    #[error("internal error: {message}")]
    Internal {
        /// Human-readable details for debugging purposes.
        message: String,
    },

    /// I/O error occurred during file or network operations.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error occurred.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error occurred.
    #[error("deserialization error: {0}")]
    DeserializationError(String),

    /// Validation error for input data.
    #[error("validation error: {0}")]
    ValidationError(String),
}

impl CoreError {
    /// Creates a `NotStarted` variant.
    #[must_use]
    pub fn not_started(name: impl Into<String>) -> Self {
        Self::NotStarted { name: name.into() }
    }

    /// Creates a `ProposeFailed` variant.
    #[must_use]
    pub fn propose_failed(message: impl Into<String>) -> Self {
        Self::ProposeFailed {
            message: message.into(),
        }
    }

    /// Creates an `InvalidState` variant.
    #[must_use]
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates an `Internal` variant.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

impl CoreError {
    /// Creates a `SerializationError` from an encode failure.
    #[must_use]
    pub fn serialization(err: impl std::fmt::Display) -> Self {
        Self::SerializationError(err.to_string())
    }

    /// Creates a `DeserializationError` from a decode failure.
    #[must_use]
    pub fn deserialization(err: impl std::fmt::Display) -> Self {
        Self::DeserializationError(err.to_string())
    }
}

/// Fallback for `?` on serde_json results.
///
/// serde_json reports encode and decode failures with the same categories,
/// so call sites that know the direction use [`CoreError::serialization`] or
/// [`CoreError::deserialization`] instead. Here only writer I/O failures
/// count as serialization errors.
impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Self::SerializationError(err.to_string())
        } else {
            Self::DeserializationError(err.to_string())
        }
    }
}

/// Convenient result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_decode_errors_map_to_deserialization() {
        // Type mismatch (Category::Data)
        let err: CoreError = serde_json::from_str::<u64>("{not json").unwrap_err().into();
        assert!(matches!(err, CoreError::DeserializationError(_)));

        // Malformed input (Category::Syntax)
        let err: CoreError = serde_json::from_str::<u64>("12x").unwrap_err().into();
        assert!(matches!(err, CoreError::DeserializationError(_)));

        // Truncated input (Category::Eof)
        let err: CoreError = serde_json::from_str::<Vec<u64>>("[1, 2").unwrap_err().into();
        assert!(matches!(err, CoreError::DeserializationError(_)));
    }

    #[test]
    fn test_snapshot_meta_with_wrong_field_types_is_deserialization() {
        #[derive(Debug, serde::Deserialize)]
        #[allow(dead_code)]
        struct Meta {
            last_index: u64,
        }

        let err = serde_json::from_str::<Meta>(r#"{"last_index":"five"}"#)
            .map_err(CoreError::deserialization)
            .unwrap_err();
        assert!(matches!(err, CoreError::DeserializationError(_)));
    }

    #[test]
    fn test_encode_failure_maps_to_serialization() {
        use std::collections::HashMap;

        // Non-string map keys cannot be encoded as JSON object keys
        let mut map = HashMap::new();
        map.insert(vec![1u8], 1u8);
        let err = serde_json::to_vec(&map)
            .map_err(CoreError::serialization)
            .unwrap_err();
        assert!(matches!(err, CoreError::SerializationError(_)));
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            CoreError::not_started("node-a").to_string(),
            "consensus node `node-a` has not been started"
        );
        assert_eq!(
            CoreError::GateClosed { target: 3 }.to_string(),
            "membership gate closed before quorum of 3 members was reached"
        );
    }
}
