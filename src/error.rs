use thiserror::Error;

/// Main error type for the operator core
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QError {
    /// Broadcast-incompatible shapes, wrong arity or rank
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Unsupported quantization type, unknown operator kind, bad task count
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Attribute key absent from a serialized node
    #[error("Attribute '{key}' missing on node '{node}'")]
    AttributeMissing { node: String, key: String },

    /// Attribute present but declared with another type
    #[error("Attribute '{key}' on node '{node}' is not a {expected}")]
    AttributeType {
        node: String,
        key: String,
        expected: &'static str,
    },

    /// Operation errors with context
    #[error("Operation error: {operation} - {message}")]
    OperationError { operation: String, message: String },

    /// Invalid input errors
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Invalid state errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// IO errors
    #[error("IO error: {0}")]
    IoError(String),
}

impl QError {
    /// Create a shape error naming both operands
    pub fn shape_error(lhs: &[usize], rhs: &[usize], reason: &str) -> Self {
        QError::ShapeMismatch(format!("{:?} vs {:?}: {}", lhs, rhs, reason))
    }

    /// Create an operation error with context
    pub fn operation_error(operation: &str, message: &str) -> Self {
        QError::OperationError {
            operation: operation.to_string(),
            message: message.to_string(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        QError::Configuration(message.into())
    }
}

impl From<std::io::Error> for QError {
    fn from(err: std::io::Error) -> Self {
        QError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for QError {
    fn from(err: serde_json::Error) -> Self {
        QError::SerializationError(err.to_string())
    }
}

/// Result type for operator-core operations
pub type QResult<T> = Result<T, QError>;

/// Error context for providing additional debugging information
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub operation: String,
    pub tensor_shapes: Vec<String>,
    pub quant_type: Option<String>,
}

impl ErrorContext {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            tensor_shapes: Vec::new(),
            quant_type: None,
        }
    }

    pub fn with_shape(mut self, shape: &[usize]) -> Self {
        self.tensor_shapes.push(format!("{:?}", shape));
        self
    }

    pub fn with_quant_type(mut self, quant_type: &str) -> Self {
        self.quant_type = Some(quant_type.to_string());
        self
    }

    pub fn to_error_message(&self) -> String {
        let mut message = format!("Operation: {}", self.operation);

        if !self.tensor_shapes.is_empty() {
            message.push_str(&format!("\nTensor shapes: {}", self.tensor_shapes.join(", ")));
        }

        if let Some(ref quant_type) = self.quant_type {
            message.push_str(&format!("\nQuant type: {}", quant_type));
        }

        message
    }
}

/// Helper trait for adding context to errors
pub trait WithContext<T> {
    fn with_context<F>(self, f: F) -> QResult<T>
    where
        F: FnOnce() -> ErrorContext;
}

impl<T> WithContext<T> for QResult<T> {
    fn with_context<F>(self, f: F) -> QResult<T>
    where
        F: FnOnce() -> ErrorContext,
    {
        self.map_err(|e| {
            let context = f();
            match e {
                QError::ShapeMismatch(msg) => {
                    QError::ShapeMismatch(format!("{}\nContext: {}", msg, context.to_error_message()))
                }
                QError::Configuration(msg) => {
                    QError::Configuration(format!("{}\nContext: {}", msg, context.to_error_message()))
                }
                QError::InvalidInput(msg) => {
                    QError::InvalidInput(format!("{}\nContext: {}", msg, context.to_error_message()))
                }
                _ => e,
            }
        })
    }
}

/// Error codes for programmatic error handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ShapeMismatch,
    ConfigInvalid,
    MalformedNode,
    InvalidOperation,
    SerializationFailed,
}

impl QError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            QError::ShapeMismatch(_) => ErrorCode::ShapeMismatch,
            QError::Configuration(_) => ErrorCode::ConfigInvalid,
            QError::AttributeMissing { .. } | QError::AttributeType { .. } => ErrorCode::MalformedNode,
            QError::OperationError { .. } => ErrorCode::InvalidOperation,
            QError::InvalidInput(_) => ErrorCode::InvalidOperation,
            QError::InvalidState(_) => ErrorCode::InvalidOperation,
            QError::SerializationError(_) => ErrorCode::SerializationFailed,
            QError::IoError(_) => ErrorCode::SerializationFailed,
        }
    }

    /// Every error here comes from a malformed graph or an unsupported
    /// configuration, so only I/O failures while reading config are transient.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, QError::IoError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_error() {
        let error = QError::shape_error(&[2, 3], &[2, 4], "dimension 1 differs");
        assert!(error.to_string().contains("[2, 3] vs [2, 4]"));
        assert_eq!(error.code(), ErrorCode::ShapeMismatch);
    }

    #[test]
    fn test_error_context() {
        let result: QResult<()> = Err(QError::ShapeMismatch("bad".to_string()));
        let err = result
            .with_context(|| ErrorContext::new("Div").with_shape(&[1, 2]).with_quant_type("int8"))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Operation: Div"));
        assert!(message.contains("Tensor shapes: [1, 2]"));
        assert!(message.contains("Quant type: int8"));
    }

    #[test]
    fn test_error_codes() {
        let missing = QError::AttributeMissing {
            node: "n0".to_string(),
            key: "quant_type".to_string(),
        };
        assert_eq!(missing.code(), ErrorCode::MalformedNode);
        assert!(!missing.is_recoverable());
        assert!(QError::IoError("disk".to_string()).is_recoverable());
    }
}
