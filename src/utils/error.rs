//! Error Handling Module
//!
//! Defines the error type shared by the dataset loaders, the converter,
//! the interpreter and the benchmark runner. Uses thiserror for ergonomic
//! error definitions.

use thiserror::Error;

/// Main error type for tinyedge operations
#[derive(Error, Debug)]
pub enum EdgeError {
    /// Error with dataset loading or parsing
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Error with model construction, loading or saving
    #[error("Model error: {0}")]
    Model(String),

    /// Error while converting a model into an artifact
    #[error("Conversion error: {0}")]
    Conversion(String),

    /// An operator has no kernel at the requested precision
    #[error("Operator '{op}' cannot be expressed with {precision} kernels")]
    UnsupportedOperation { op: String, precision: String },

    /// Full-integer quantization was requested without calibration data
    #[error("Full-integer quantization requires a representative dataset")]
    MissingRepresentativeDataset,

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The artifact bytes could not be decoded or failed validation
    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    /// Error raised while executing a graph
    #[error("Interpreter error: {0}")]
    Interpreter(String),

    /// `invoke` or `set_tensor` was called before `allocate_tensors`
    #[error("Tensors are not allocated; call allocate_tensors() first")]
    TensorsNotAllocated,

    /// Element count mismatch when reshaping or feeding a tensor
    #[error("Shape mismatch: expected {expected} elements, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Numeric type mismatch when feeding a tensor
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    /// Predictions and ground truth differ in length
    #[error("Length mismatch: {predictions} predictions for {labels} labels")]
    LengthMismatch { predictions: usize, labels: usize },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Convenience Result type for tinyedge operations
pub type Result<T> = std::result::Result<T, EdgeError>;

impl From<serde_json::Error> for EdgeError {
    fn from(e: serde_json::Error) -> Self {
        EdgeError::Serialization(e.to_string())
    }
}

impl From<bincode::Error> for EdgeError {
    fn from(e: bincode::Error) -> Self {
        EdgeError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EdgeError::Dataset("test error".to_string());
        assert_eq!(format!("{}", err), "Dataset error: test error");
    }

    #[test]
    fn test_unsupported_operation_display() {
        let err = EdgeError::UnsupportedOperation {
            op: "Softmax".to_string(),
            precision: "int8".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Softmax"));
        assert!(msg.contains("int8"));
    }

    #[test]
    fn test_length_mismatch_display() {
        let err = EdgeError::LengthMismatch {
            predictions: 9,
            labels: 10,
        };
        assert_eq!(
            format!("{}", err),
            "Length mismatch: 9 predictions for 10 labels"
        );
    }
}
