//! Error taxonomy for a single ingest invocation.

use thiserror::Error;

/// Everything that can stop (or taint) the processing of one notification.
#[derive(Error, Debug)]
pub enum IngestError {
    /// The event is not an SES receipt notification, or lacks required fields.
    #[error("Unexpected event: {0}. see https://docs.aws.amazon.com/ses/latest/dg/receiving-email-action-lambda-event.html")]
    MalformedEvent(String),

    /// At least one authenticity verdict came back as `FAIL`.
    #[error("Message security check failed: {}", .failed.join(", "))]
    SecurityCheckFailed { failed: Vec<String> },

    /// The raw message could not be parsed.
    #[error("MIME parse error: {0}")]
    Parse(#[from] mailparse::MailParseError),

    /// A call to the object store failed.
    #[error("storage {operation} failed for '{key}': {source}")]
    Storage {
        operation: &'static str,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    /// Some attachment uploads failed; the others were stored.
    #[error("{failed} of {total} attachment uploads failed")]
    IncompleteUpload { failed: usize, total: usize },
}

/// Convenience alias for `Result<T, IngestError>`.
pub type Result<T> = std::result::Result<T, IngestError>;

impl IngestError {
    pub fn storage(operation: &'static str, key: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Storage {
            operation,
            key: key.into(),
            source,
        }
    }

    /// Whether redelivering the same notification could succeed.
    ///
    /// Malformed events, security rejections and unparsable messages fail the
    /// same way every time; storage trouble may not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::IncompleteUpload { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permanent_and_transient_are_distinguished() {
        assert!(!IngestError::MalformedEvent("no record".into()).is_retryable());
        assert!(!IngestError::SecurityCheckFailed {
            failed: vec!["spam".into()]
        }
        .is_retryable());
        assert!(IngestError::storage("get", "abc", anyhow::anyhow!("timeout")).is_retryable());
        assert!(IngestError::IncompleteUpload { failed: 1, total: 2 }.is_retryable());
    }

    #[test]
    fn security_error_names_failed_verdicts() {
        let err = IngestError::SecurityCheckFailed {
            failed: vec!["spam".into(), "dkim".into()],
        };
        assert_eq!(err.to_string(), "Message security check failed: spam, dkim");
    }
}
