//! Error types for payload encoding and transmission.
//!
//! Every fallible operation in the crate returns [`TagalongError`]. Errors are
//! scoped to a unit of work: a failed key search or radio command affects one
//! chunk, one key or one row, and the transmitter keeps going with the next.
//!
//! ## Error Categories
//!
//! - **Encoding Errors**: invalid chunk widths, payloads that cannot be segmented
//! - **Search Errors**: the discriminant bound was reached without a valid key
//! - **Radio Errors**: the radio driver rejected one of the four commands
//! - **Source Errors**: unreadable or malformed rows, checkpoint persistence
//! - **Configuration Errors**: invalid or unparseable configuration files
//!
//! ## Recovery
//!
//! ```rust
//! use tagalong::TagalongError;
//!
//! let error = TagalongError::search_exhausted(7, 65_536);
//! assert!(!error.is_retryable());
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

use crate::radio::RadioCommandKind;

/// Result type alias for tagalong operations.
pub type Result<T, E = TagalongError> = std::result::Result<T, E>;

/// Main error type for encoding and transmission.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum TagalongError {
    #[error("Invalid chunk width {width}: must be between 1 and 8 bits")]
    InvalidChunkWidth { width: u8 },

    #[error("Payload cannot be encoded: {reason}")]
    Payload { reason: String },

    #[error(
        "No valid key for message {message_id} (segment {}, chunk {}) after {attempts} attempts",
        fmt_index(.segment),
        fmt_index(.chunk)
    )]
    SearchExhausted {
        message_id: u32,
        segment: Option<usize>,
        chunk: Option<usize>,
        attempts: u32,
    },

    #[error("Radio command '{command}' failed: {reason}")]
    RadioCommand {
        command: RadioCommandKind,
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Data source error: {reason}")]
    DataSource {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Malformed row {row}: {details}")]
    MalformedRow { row: usize, details: String },

    #[error("Checkpoint store error: {reason}")]
    Checkpoint {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("File error: {path}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error in {context}: {details}")]
    Config { context: String, details: String },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Transmission cancelled")]
    Cancelled,
}

fn fmt_index(index: &Option<usize>) -> String {
    index.map_or_else(|| "?".to_string(), |i| i.to_string())
}

impl TagalongError {
    /// Returns whether this error is potentially recoverable through retry.
    ///
    /// Radio failures are transient from the sender's point of view, but the
    /// transmitter never retries them on its own; the classification is for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            TagalongError::RadioCommand { .. } => true,
            TagalongError::DataSource { .. } => true,
            TagalongError::Checkpoint { .. } => true,
            TagalongError::InvalidChunkWidth { .. } => false,
            TagalongError::Payload { .. } => false,
            TagalongError::SearchExhausted { .. } => false,
            TagalongError::MalformedRow { .. } => false,
            TagalongError::File { .. } => false,
            TagalongError::Config { .. } => false,
            TagalongError::Parse { .. } => false,
            TagalongError::Cancelled => false,
        }
    }

    /// Returns whether the error only invalidates a single row or key.
    ///
    /// The transmitter records these and moves on instead of ending the run.
    pub fn is_per_unit(&self) -> bool {
        matches!(
            self,
            TagalongError::SearchExhausted { .. }
                | TagalongError::RadioCommand { .. }
                | TagalongError::MalformedRow { .. }
                | TagalongError::Payload { .. }
        )
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            TagalongError::InvalidChunkWidth { .. } => {
                vec!["Use a chunk width between 1 and 8 bits", "Use 8 for one key per payload byte"]
            }
            TagalongError::Payload { .. } => vec![
                "Check the payload is not empty",
                "Use the per-segment message id policy for payloads longer than one segment",
                "Lower the first message id so the run does not overflow u32",
            ],
            TagalongError::SearchExhausted { .. } => vec![
                "Raise search.max_attempts",
                "Switch search.on_exhausted to wrap",
                "Change the message id or device id so the candidate differs",
            ],
            TagalongError::RadioCommand { .. } => vec![
                "Check the HCI interface exists and is up (hciconfig)",
                "Run with sufficient privileges for raw HCI commands",
                "Increase radio.settle_delay_ms or radio.restart_delay_ms",
            ],
            TagalongError::DataSource { .. } => vec![
                "Check the source file exists and is readable",
                "Verify the configured timestamp and payload columns",
            ],
            TagalongError::MalformedRow { .. } => vec![
                "Check the row has a numeric timestamp",
                "Check the row has a non-empty payload column",
            ],
            TagalongError::Checkpoint { .. } => vec![
                "Check the checkpoint path is writable",
                "Delete a corrupted checkpoint file to resend from the start",
            ],
            TagalongError::File { .. } => {
                vec!["Check file exists and is readable", "Check file permissions"]
            }
            TagalongError::Config { .. } => vec![
                "Run `tagalong init-config` to write a default configuration",
                "Compare the file against the documented keys",
            ],
            TagalongError::Parse { .. } => {
                vec!["Check the input format", "Check for stray characters"]
            }
            TagalongError::Cancelled => vec!["Run again to resume from the saved checkpoint"],
        }
    }

    /// Helper constructor for payload errors.
    pub fn payload(reason: impl Into<String>) -> Self {
        TagalongError::Payload { reason: reason.into() }
    }

    /// Helper constructor for an exhausted search on a bare record.
    pub fn search_exhausted(message_id: u32, attempts: u32) -> Self {
        TagalongError::SearchExhausted { message_id, segment: None, chunk: None, attempts }
    }

    /// Attach the chunk index to a search error; other errors pass through.
    pub fn at_chunk(self, index: usize) -> Self {
        match self {
            TagalongError::SearchExhausted { message_id, segment, attempts, .. } => {
                TagalongError::SearchExhausted { message_id, segment, chunk: Some(index), attempts }
            }
            other => other,
        }
    }

    /// Attach the segment index to a search error; other errors pass through.
    pub fn at_segment(self, index: usize) -> Self {
        match self {
            TagalongError::SearchExhausted { message_id, chunk, attempts, .. } => {
                TagalongError::SearchExhausted { message_id, segment: Some(index), chunk, attempts }
            }
            other => other,
        }
    }

    /// Helper constructor for radio command failures.
    pub fn radio_failed(command: RadioCommandKind, reason: impl Into<String>) -> Self {
        TagalongError::RadioCommand { command, reason: reason.into(), source: None }
    }

    /// Helper constructor for radio command failures with source.
    pub fn radio_failed_with_source(
        command: RadioCommandKind,
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        TagalongError::RadioCommand { command, reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for data source errors with source.
    pub fn data_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        TagalongError::DataSource { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for checkpoint errors.
    pub fn checkpoint(
        reason: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        TagalongError::Checkpoint { reason: reason.into(), source }
    }

    /// Helper constructor for file errors with path context.
    pub fn file_error(path: PathBuf, source: std::io::Error) -> Self {
        TagalongError::File { path, source }
    }

    /// Helper constructor for configuration errors.
    pub fn config(context: impl Into<String>, details: impl Into<String>) -> Self {
        TagalongError::Config { context: context.into(), details: details.into() }
    }

    /// Helper constructor for parse errors.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        TagalongError::Parse { context: context.into(), details: details.into() }
    }
}

impl From<std::io::Error> for TagalongError {
    fn from(err: std::io::Error) -> Self {
        TagalongError::File { path: PathBuf::from("<unknown>"), source: err }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(test)]
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn search_errors_keep_their_indices(
            message_id in any::<u32>(),
            attempts in 1u32..1_000_000,
            segment in 0usize..64,
            chunk in 0usize..128
          ) {
            let error = TagalongError::search_exhausted(message_id, attempts)
                .at_segment(segment)
                .at_chunk(chunk);
            match &error {
              TagalongError::SearchExhausted {
                message_id: m, segment: s, chunk: c, attempts: a
              } => {
                prop_assert_eq!(*m, message_id);
                prop_assert_eq!(*s, Some(segment));
                prop_assert_eq!(*c, Some(chunk));
                prop_assert_eq!(*a, attempts);
              }
              _ => prop_assert!(false, "Expected SearchExhausted"),
            }

            let message = error.to_string();
            prop_assert!(message.contains(&message_id.to_string()));
            prop_assert!(message.contains(&attempts.to_string()));
            prop_assert!(error.is_per_unit());
          }

          #[test]
          fn error_messages_carry_their_context(
            reason in ".*",
            context in "\\w+",
            row in 0usize..10_000
          ) {
            let payload = TagalongError::payload(reason.clone());
            prop_assert!(payload.to_string().contains(&reason));

            let config = TagalongError::config(context.clone(), reason.clone());
            prop_assert!(config.to_string().contains(&context));

            let malformed = TagalongError::MalformedRow { row, details: reason.clone() };
            prop_assert!(malformed.to_string().contains(&row.to_string()));
          }
        }
    }

    #[test]
    fn chunk_annotation_leaves_other_errors_alone() {
        let error = TagalongError::payload("empty").at_chunk(3).at_segment(1);
        assert!(matches!(error, TagalongError::Payload { .. }));
    }

    #[test]
    fn unknown_indices_render_as_placeholder() {
        let error = TagalongError::search_exhausted(9, 100);
        assert_eq!(
            error.to_string(),
            "No valid key for message 9 (segment ?, chunk ?) after 100 attempts"
        );
    }

    #[test]
    fn radio_errors_chain_their_source() {
        let io = std::io::Error::other("hcitool not found");
        let error = TagalongError::radio_failed_with_source(
            RadioCommandKind::SetAdvertisingData,
            "spawn failed",
            Box::new(io),
        );
        let source = std::error::Error::source(&error).expect("source should be kept");
        assert!(source.to_string().contains("hcitool not found"));
        assert!(error.is_retryable());
        assert!(error.is_per_unit());
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<TagalongError>();
    }

    #[test]
    fn recovery_methods_work() {
        let errors = [
            TagalongError::InvalidChunkWidth { width: 9 },
            TagalongError::search_exhausted(1, 10),
            TagalongError::radio_failed(RadioCommandKind::EnableAdvertising, "timeout"),
            TagalongError::Cancelled,
        ];
        for error in &errors {
            let suggestions = error.recovery_suggestions();
            assert!(!suggestions.is_empty());
            for suggestion in suggestions {
                assert!(suggestion.len() > 5);
            }
        }
        assert!(!TagalongError::Cancelled.is_per_unit());
    }

    #[test]
    fn from_io_error_becomes_file_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "checkpoint");
        let error: TagalongError = io_err.into();
        match error {
            TagalongError::File { source, .. } => assert_eq!(source.to_string(), "checkpoint"),
            _ => panic!("Expected File error variant"),
        }
    }
}
