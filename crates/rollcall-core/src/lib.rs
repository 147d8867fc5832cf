//! rollcall-core — face recognition to attendance pipeline.
//!
//! Frames are sampled from a capture device, faces are detected (SCRFD) and
//! encoded (ArcFace) via ONNX Runtime on CPU, matched against a registry of
//! reference identities, and recorded once per identity per day in a
//! per-day CSV log.

pub mod capture;
pub mod config;
pub mod detector;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod ledger;
pub mod matcher;
pub mod recognizer;
pub mod registry;
pub mod sampler;
pub mod session;
pub mod types;

pub use capture::{CaptureBackend, CaptureError, CaptureHandle, CaptureSettings};
pub use config::Config;
pub use error::{ErrorKind, ErrorReport};
pub use frame::Frame;
pub use ledger::{AttendanceRecord, Ledger, LedgerError, RecordOutcome};
pub use matcher::{EuclideanMatcher, Matcher};
pub use recognizer::{OnnxRecognizer, Recognizer, RecognizerError};
pub use registry::{ImportReport, Registry, RegistryError};
pub use session::{Overlay, Presenter, Session, SessionConfig, SessionError, SessionStatus, TickReport};
pub use types::{Detection, Embedding, Identity, MatchResult, Region};
