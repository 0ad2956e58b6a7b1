//! Error types for the scoresync pipeline.
//!
//! Fatal conditions are variants of [`SyncError`] and abort a run before any
//! frame reaches the sink. Non-fatal conditions are plain values
//! ([`RecoverableNoteError`], [`UnmappedPhonemeWarning`]) that are logged and
//! kept next to the structure they were found in.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    /// Malformed or unsupported musicxml structure.
    ///
    /// # Example
    /// ```
    /// # use scoresync::SyncError;
    /// let err = SyncError::Parse("missing <part-list>".to_string());
    /// assert_eq!(err.to_string(), "Parse error: missing <part-list>");
    /// ```
    #[error("Parse error: {0}")]
    Parse(String),

    /// The input file could not be read.
    #[error("Failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Timing information that would corrupt every downstream timestamp:
    /// unmatched ties or tempo breakpoints out of position order.
    ///
    /// # Example
    /// ```
    /// # use scoresync::SyncError;
    /// let err = SyncError::TimelineInconsistency {
    ///     measure: 3,
    ///     message: "tie stop without a matching start".to_string(),
    /// };
    /// assert_eq!(
    ///     err.to_string(),
    ///     "Timeline inconsistency at measure 3: tie stop without a matching start"
    /// );
    /// ```
    #[error("Timeline inconsistency at measure {measure}: {message}")]
    TimelineInconsistency { measure: usize, message: String },

    /// The render/mux collaborator cannot accept frames.
    #[error("Sink unavailable: {0}")]
    SinkUnavailable(String),

    /// Invalid configuration value or unreadable config file.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SyncError {
    pub(crate) fn sink(err: impl std::fmt::Display) -> Self {
        SyncError::SinkUnavailable(err.to_string())
    }
}

/// A single note or directive that could not be parsed and was skipped.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("part {part}, measure {measure}: {reason}")]
pub struct RecoverableNoteError {
    /// Part id as written in the score.
    pub part: String,
    /// Measure number attribute (or its position when unnumbered).
    pub measure: String,
    pub reason: String,
}

/// A lyric syllable with no entry in the phoneme table.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("no mouth shape for syllable '{text}' at {onset_seconds:.3}s")]
pub struct UnmappedPhonemeWarning {
    pub text: String,
    pub onset_seconds: f64,
}
