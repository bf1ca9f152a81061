//! Error taxonomy for an estimation run.
//!
//! Every failure is fatal for the run. Variants are grouped into the three
//! categories callers branch on: validation problems detected before any
//! record is computed, computation problems raised while evaluating the
//! operation chain, and I/O problems surfaced by collaborators.

use std::fmt;

use thiserror::Error;

pub type Result<T, E = EstimationError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Validation,
    Computation,
    Io,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorCategory::Validation => "validation",
            ErrorCategory::Computation => "computation",
            ErrorCategory::Io => "io",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Error)]
pub enum EstimationError {
    #[error("Column '{column}' mapped for file '{file}' is not present in the header")]
    MissingColumn { column: String, file: String },
    #[error("File '{file}' contains no data")]
    EmptyFile { file: String },
    #[error("File '{file}' could not be read: {reason}")]
    UnreadableFile { file: String, reason: String },
    #[error("Unsupported input file type '{0}'")]
    UnsupportedInputType(String),
    #[error("Plan configuration declares no active input file")]
    NoInputFile,
    #[error("Assumption key '{0}' is declared more than once among active assumptions")]
    DuplicateAssumption(String),
    #[error("Operation '{operation}' references '{operand}' before it is produced")]
    ForwardReference { operation: String, operand: String },
    #[error("Invalid plan configuration: {0}")]
    InvalidPlan(String),
    #[error("Section '{section}' has an empty header row")]
    EmptyHeader { section: String },

    #[error("Operand '{operand}' of operation '{operation}' could not be resolved")]
    UnresolvedOperand { operand: String, operation: String },
    #[error("Value '{value}' in column '{column}' of record {record} is not numeric")]
    NonNumeric {
        record: String,
        column: String,
        value: String,
    },
    #[error("Operation '{operation}' divides by zero for record {record}")]
    DivideByZero { operation: String, record: String },
    #[error("Operation '{operation}' overflowed for record {record}")]
    Overflow { operation: String, record: String },
    #[error("Operation '{operation}' needs a whole-number exponent, got {value} for record {record}")]
    InvalidExponent {
        operation: String,
        record: String,
        value: String,
    },

    #[error("File store failure for '{file}': {source}")]
    FileStore {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{service} collaborator failed: {reason}")]
    Collaborator { service: String, reason: String },
    #[error("Failed to encode {format} output: {reason}")]
    Encode { format: String, reason: String },
}

impl EstimationError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EstimationError::MissingColumn { .. }
            | EstimationError::EmptyFile { .. }
            | EstimationError::UnreadableFile { .. }
            | EstimationError::UnsupportedInputType(_)
            | EstimationError::NoInputFile
            | EstimationError::DuplicateAssumption(_)
            | EstimationError::ForwardReference { .. }
            | EstimationError::InvalidPlan(_)
            | EstimationError::EmptyHeader { .. } => ErrorCategory::Validation,
            EstimationError::UnresolvedOperand { .. }
            | EstimationError::NonNumeric { .. }
            | EstimationError::DivideByZero { .. }
            | EstimationError::Overflow { .. }
            | EstimationError::InvalidExponent { .. } => ErrorCategory::Computation,
            EstimationError::FileStore { .. }
            | EstimationError::Collaborator { .. }
            | EstimationError::Encode { .. } => ErrorCategory::Io,
        }
    }

    pub(crate) fn unreadable(file: &str, reason: impl fmt::Display) -> Self {
        EstimationError::UnreadableFile {
            file: file.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn collaborator(service: &str, reason: impl fmt::Display) -> Self {
        EstimationError::Collaborator {
            service: service.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn encode(format: &str, reason: impl fmt::Display) -> Self {
        EstimationError::Encode {
            format: format.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_taxonomy() {
        let missing = EstimationError::MissingColumn {
            column: "Households".into(),
            file: "f-1".into(),
        };
        assert_eq!(missing.category(), ErrorCategory::Validation);

        let zero = EstimationError::DivideByZero {
            operation: "op-1".into(),
            record: "Sheet1#2".into(),
        };
        assert_eq!(zero.category(), ErrorCategory::Computation);

        let io = EstimationError::collaborator("locale", "timeout");
        assert_eq!(io.category(), ErrorCategory::Io);
        assert_eq!(io.to_string(), "locale collaborator failed: timeout");
    }

    #[test]
    fn missing_column_message_names_column_and_file() {
        let err = EstimationError::MissingColumn {
            column: "HH_COUNT".into(),
            file: "store-42".into(),
        };
        let message = err.to_string();
        assert!(message.contains("HH_COUNT"));
        assert!(message.contains("store-42"));
    }
}
