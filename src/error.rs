use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HopperError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Unsupported download strategy: {name}{}", suggestion_suffix(.suggestion))]
    UnsupportedStrategy {
        name: String,
        suggestion: Option<String>,
    },

    #[error("{0} is not installed")]
    NotInstalled(String),

    #[error("GPG failed to retrieve the {dependent} signing key: {key}")]
    KeyImportFailed {
        dependent: String,
        key: String,
        output: String,
    },

    #[error(
        "GPG signature verification failed for {dependent}: {} (signature {})",
        .artifact.display(),
        .signature.display()
    )]
    SignatureVerificationFailed {
        dependent: String,
        artifact: PathBuf,
        signature: PathBuf,
        output: String,
    },

    #[error("Invalid quarantine attribute: {0}")]
    InvalidAttributeFormat(String),

    #[error("Failed to fetch {dependent}: {reason}")]
    FetchFailed {
        dependent: String,
        reason: String,
        transient: bool,
    },

    #[error("Checksum mismatch for {dependent}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        dependent: String,
        expected: String,
        actual: String,
    },

    #[error("No available formula or cask with the name \"{name}\"{}", suggestion_suffix(.suggestion))]
    DependentNotFound {
        name: String,
        suggestion: Option<String>,
    },

    #[error("{dependent} has an unsatisfied requirement: {message}")]
    UnsatisfiedRequirement { dependent: String, message: String },

    #[error("Command timed out after {seconds}s: {command}")]
    CommandTimeout { command: String, seconds: u64 },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(" (did you mean {}?)", s),
        None => String::new(),
    }
}

impl HopperError {
    /// Malformed requests stop the whole batch instead of a single dependent.
    pub fn aborts_batch(&self) -> bool {
        matches!(
            self,
            HopperError::InvalidArgument(_) | HopperError::UnsupportedStrategy { .. }
        )
    }

    /// Transport failures worth exactly one more attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            HopperError::FetchFailed { transient, .. } => *transient,
            HopperError::HttpError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }

    /// Captured stdout/stderr of the external process behind this error, if any.
    pub fn process_output(&self) -> Option<&str> {
        match self {
            HopperError::KeyImportFailed { output, .. }
            | HopperError::SignatureVerificationFailed { output, .. } => {
                Some(output.as_str()).filter(|s| !s.is_empty())
            }
            _ => None,
        }
    }

    /// Short machine-friendly name of the failure kind
    pub fn kind(&self) -> &'static str {
        match self {
            HopperError::InvalidArgument(_) => "InvalidArgument",
            HopperError::UnsupportedStrategy { .. } => "UnsupportedStrategy",
            HopperError::NotInstalled(_) => "NotInstalled",
            HopperError::KeyImportFailed { .. } => "KeyImportFailed",
            HopperError::SignatureVerificationFailed { .. } => "SignatureVerificationFailed",
            HopperError::InvalidAttributeFormat(_) => "InvalidAttributeFormat",
            HopperError::FetchFailed { .. } | HopperError::HttpError(_) => "FetchFailed",
            HopperError::ChecksumMismatch { .. } => "ChecksumMismatch",
            HopperError::DependentNotFound { .. } => "DependentNotFound",
            HopperError::UnsatisfiedRequirement { .. } => "UnsatisfiedRequirement",
            HopperError::CommandTimeout { .. } => "CommandTimeout",
            HopperError::IoError(_) => "Io",
            HopperError::JsonError(_) => "Json",
        }
    }
}

pub type Result<T> = std::result::Result<T, HopperError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_abort_kinds() {
        assert!(HopperError::InvalidArgument("x".into()).aborts_batch());
        assert!(
            HopperError::UnsupportedStrategy {
                name: "gti".into(),
                suggestion: Some("git".into())
            }
            .aborts_batch()
        );
        assert!(!HopperError::NotInstalled("wget".into()).aborts_batch());
    }

    #[test]
    fn test_suggestion_in_message() {
        let err = HopperError::UnsupportedStrategy {
            name: "gti".into(),
            suggestion: Some("git".into()),
        };
        assert_eq!(
            err.to_string(),
            "Unsupported download strategy: gti (did you mean git?)"
        );
    }

    #[test]
    fn test_transient_fetch_failure() {
        let err = HopperError::FetchFailed {
            dependent: "wget".into(),
            reason: "connection reset".into(),
            transient: true,
        };
        assert!(err.is_transient());
        assert_eq!(err.kind(), "FetchFailed");
    }
}
