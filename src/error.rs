//! Error taxonomy for transform operations.

use thiserror::Error;

/// Errors produced while decoding, applying, inverting or estimating transforms.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransformError {
    /// The transform variant lacks the requested capability.
    #[error("{operation} is not supported by {transform}")]
    UnsupportedOperation {
        /// Operation that was attempted (`apply`, `invert`, ...).
        operation: &'static str,
        /// Short description of the offending transform.
        transform: String,
    },

    /// The forward matrix is not invertible within tolerance.
    #[error("transform is singular (determinant {determinant:e}, tolerance {tolerance:e})")]
    SingularTransform {
        /// Determinant of the linear part.
        determinant: f64,
        /// Tolerance the determinant was compared against.
        tolerance: f64,
    },

    /// Too few (or degenerate) correspondences for the number of free parameters.
    #[error("insufficient data: {required} independent samples required, got {provided}")]
    InsufficientData {
        /// Minimum number of samples the model needs.
        required: usize,
        /// Number of samples supplied (or the effective rank for degenerate input).
        provided: usize,
    },

    /// A reference id is missing from the shared transform table, or resolves
    /// to something that is not concrete.
    #[error("unresolved reference transform '{ref_id}'")]
    UnresolvedReference {
        /// The id that could not be resolved.
        ref_id: String,
    },

    /// An iterative solve stopped before reaching its precision.
    #[error("{operation} did not converge within {iterations} iterations")]
    NotConverged {
        /// Operation that was attempted.
        operation: &'static str,
        /// Iteration limit that was reached.
        iterations: usize,
    },

    /// Parameter count or shape does not match the declared variant.
    #[error("malformed parameters: {0}")]
    MalformedParameters(String),

    /// A failure at a given position of a transform chain.
    #[error("step {index} of transform chain failed: {source}")]
    InChain {
        /// Zero-based position of the failing step.
        index: usize,
        /// The underlying failure.
        #[source]
        source: Box<TransformError>,
    },
}

impl TransformError {
    pub(crate) fn unsupported(operation: &'static str, transform: impl Into<String>) -> Self {
        Self::UnsupportedOperation {
            operation,
            transform: transform.into(),
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedParameters(message.into())
    }

    pub(crate) fn at_index(self, index: usize) -> Self {
        Self::InChain {
            index,
            source: Box::new(self),
        }
    }

    /// The innermost error, with chain positions stripped.
    pub fn root(&self) -> &TransformError {
        match self {
            Self::InChain { source, .. } => source.root(),
            other => other,
        }
    }

    /// Position of the outermost failing chain step, if any.
    pub fn chain_index(&self) -> Option<usize> {
        match self {
            Self::InChain { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Result type for transform operations.
pub type TransformResult<T> = std::result::Result<T, TransformError>;
