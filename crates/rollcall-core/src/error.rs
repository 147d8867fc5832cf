//! Error taxonomy shared by every pipeline stage.
//!
//! Each module owns its own `thiserror` enum; all of them map onto an
//! [`ErrorKind`] so the presentation layer can react to a stable code
//! without matching on module-specific variants.

use std::fmt;

/// Stable classification of pipeline failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No capture device index could be opened.
    CaptureUnavailable,
    /// A reference image could not be read, decoded or encoded.
    DecodeFailure,
    /// The recognizer failed on a frame.
    DetectionFailure,
    /// The attendance log or the faces directory could not be written.
    PersistenceFailure,
    /// A name is already taken by another identity.
    DuplicateNameCollision,
    /// Caller supplied something unusable (bad name, bad config value).
    InvalidInput,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::CaptureUnavailable => "capture_unavailable",
            ErrorKind::DecodeFailure => "decode_failure",
            ErrorKind::DetectionFailure => "detection_failure",
            ErrorKind::PersistenceFailure => "persistence_failure",
            ErrorKind::DuplicateNameCollision => "duplicate_name_collision",
            ErrorKind::InvalidInput => "invalid_input",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recoverable failure as handed to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub context: String,
}

impl ErrorReport {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.context)
    }
}
