//! Session controller: owns the capture loop state and wires
//! sampler → recognizer → matcher → ledger → presenter.
//!
//! Single-threaded by construction. The caller drives [`Session::tick`] from
//! a periodic timer; each tick runs to completion before the next one, so
//! the registry, ledger and capture device are never accessed concurrently.

use crate::capture::{CaptureBackend, CaptureError, CaptureHandle, CaptureSettings};
use crate::error::{ErrorKind, ErrorReport};
use crate::frame::Frame;
use crate::ledger::{Ledger, RecordOutcome};
use crate::matcher::{EuclideanMatcher, Matcher};
use crate::recognizer::Recognizer;
use crate::registry::{Registry, RegistryError};
use crate::sampler::{FrameSampler, DEFAULT_DOWNSAMPLE, DEFAULT_SAMPLE_EVERY};
use crate::types::{Identity, Region};
use chrono::{NaiveDateTime, NaiveTime};
use std::path::Path;
use thiserror::Error;

/// Label shown for faces that match nobody.
pub const UNKNOWN_LABEL: &str = "unknown";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("no capture device could be opened (tried indices {tried:?})")]
    CaptureUnavailable {
        tried: Vec<u32>,
        #[source]
        last: Option<CaptureError>,
    },
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::CaptureUnavailable { .. } => ErrorKind::CaptureUnavailable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Tunables for the capture + recognition loop.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Device indices tried in order by `start()`.
    pub device_indices: Vec<u32>,
    pub capture: CaptureSettings,
    pub sample_every: u32,
    pub downsample: u32,
    pub match_threshold: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_indices: vec![0, 1],
            capture: CaptureSettings::default(),
            sample_every: DEFAULT_SAMPLE_EVERY,
            downsample: DEFAULT_DOWNSAMPLE,
            match_threshold: crate::matcher::DEFAULT_MATCH_THRESHOLD,
        }
    }
}

/// A face box to draw over the displayed frame, in full-frame coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub region: Region,
    /// Matched identity name, `None` when unknown.
    pub name: Option<String>,
    pub distance: f32,
}

impl Overlay {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

/// Callbacks into the presentation layer. The core never renders anything.
pub trait Presenter {
    fn on_frame_ready(&mut self, frame: &Frame, overlays: &[Overlay]);

    /// Fired once per identity per day, on the first accepted match.
    fn on_attendance_recorded(&mut self, name: &str, time: NaiveTime);

    fn on_capture_error(&mut self, reason: &str);

    /// Recoverable failures that did not stop the loop.
    fn on_error(&mut self, report: &ErrorReport) {
        tracing::warn!(kind = %report.kind, context = %report.context, "recoverable error");
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Whether detection ran on this tick.
    pub sampled: bool,
    pub detections: usize,
    /// Names newly recorded present on this tick.
    pub recorded: Vec<String>,
    /// Device reported end of stream; the session has stopped.
    pub stream_ended: bool,
}

/// Live capture state. Exists only while the session is running.
pub struct SessionState<H: CaptureHandle> {
    sampler: FrameSampler<H>,
    device_index: u32,
}

pub struct Session<B: CaptureBackend, R: Recognizer> {
    backend: B,
    recognizer: R,
    matcher: EuclideanMatcher,
    registry: Registry,
    ledger: Ledger,
    config: SessionConfig,
    status: SessionStatus,
    state: Option<SessionState<B::Handle>>,
}

impl<B: CaptureBackend, R: Recognizer> Session<B, R> {
    pub fn new(backend: B, recognizer: R, registry: Registry, ledger: Ledger, config: SessionConfig) -> Self {
        Self {
            backend,
            recognizer,
            matcher: EuclideanMatcher::new(config.match_threshold),
            registry,
            ledger,
            config,
            status: SessionStatus::Stopped,
            state: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == SessionStatus::Running
    }

    /// Index of the open capture device, if running.
    pub fn device_index(&self) -> Option<u32> {
        self.state.as_ref().map(|s| s.device_index)
    }

    /// Open the first capture device that works and enter `Running`.
    ///
    /// Calling `start` while running is a no-op.
    pub fn start(&mut self) -> Result<(), SessionError> {
        if self.status == SessionStatus::Running {
            return Ok(());
        }
        self.status = SessionStatus::Starting;

        let mut last = None;
        for &index in &self.config.device_indices {
            match self.backend.open(index) {
                Ok(mut handle) => {
                    if let Err(e) = handle.configure(&self.config.capture) {
                        tracing::warn!(index, error = %e, "capture settings rejected, using device defaults");
                    }
                    tracing::info!(index, "capture device opened");
                    self.state = Some(SessionState {
                        sampler: FrameSampler::new(handle, self.config.sample_every, self.config.downsample),
                        device_index: index,
                    });
                    self.status = SessionStatus::Running;
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!(index, error = %e, "capture device failed to open");
                    last = Some(e);
                }
            }
        }

        self.status = SessionStatus::Stopped;
        let err = SessionError::CaptureUnavailable {
            tried: self.config.device_indices.clone(),
            last,
        };
        tracing::error!(error = %err, "session start failed");
        Err(err)
    }

    /// Release the device and stop. Safe to call in any state.
    pub fn stop(&mut self) {
        let Some(state) = self.state.take() else {
            self.status = SessionStatus::Stopped;
            return;
        };
        self.status = SessionStatus::Stopping;
        state.sampler.into_handle().release();
        self.status = SessionStatus::Stopped;
        tracing::info!(index = state.device_index, "capture device released");
    }

    /// Run one cycle using the local wall clock.
    pub fn tick(&mut self, presenter: &mut dyn Presenter) -> TickReport {
        self.tick_at(chrono::Local::now().naive_local(), presenter)
    }

    /// Run one cycle as if the time were `now`.
    pub fn tick_at(&mut self, now: NaiveDateTime, presenter: &mut dyn Presenter) -> TickReport {
        let mut report = TickReport::default();
        let Some(state) = self.state.as_mut() else {
            return report;
        };
        // Roll the day even when nobody is seen, so absence reads stay current.
        if let Err(e) = self.ledger.roll_to(now.date()) {
            tracing::error!(error = %e, "attendance day rollover failed");
            presenter.on_error(&ErrorReport::new(e.kind(), e.to_string()));
        }
        let scale = state.sampler.downsample();

        let sampled = match state.sampler.next_frame() {
            Ok(Some(s)) => s,
            Ok(None) => {
                tracing::info!("capture stream ended");
                self.stop();
                presenter.on_capture_error("capture stream ended");
                report.stream_ended = true;
                return report;
            }
            Err(e) => {
                tracing::warn!(error = %e, "frame read failed");
                presenter.on_capture_error(&e.to_string());
                return report;
            }
        };

        let mut overlays = Vec::new();
        if let Some(small) = &sampled.detect_input {
            report.sampled = true;
            let detections = match self.recognizer.detect_and_encode(&small.image) {
                Ok(d) => d,
                Err(e) => {
                    tracing::warn!(error = %e, "detection failed, skipping cycle");
                    presenter.on_error(&ErrorReport::new(e.kind(), e.to_string()));
                    Vec::new()
                }
            };
            report.detections = detections.len();

            for detection in detections {
                let result = self.matcher.compare(detection, self.registry.all());
                overlays.push(Overlay {
                    region: result.detection.region.upscale(scale),
                    name: result.name().map(str::to_string),
                    distance: result.distance,
                });
                let Some(identity) = result.identity else {
                    continue;
                };
                match self.ledger.record(&identity.name, now) {
                    Ok(RecordOutcome::Recorded(record)) => {
                        presenter.on_attendance_recorded(&record.name, record.time);
                        report.recorded.push(record.name);
                    }
                    Ok(RecordOutcome::AlreadyPresent) => {}
                    Err(e) => {
                        tracing::error!(name = %identity.name, error = %e, "attendance not persisted");
                        presenter.on_error(&ErrorReport::new(e.kind(), format!("{}: {e}", identity.name)));
                    }
                }
            }
        }

        presenter.on_frame_ready(&sampled.frame, &overlays);
        if report.sampled {
            tracing::trace!(
                seq = sampled.frame.sequence,
                latency_ms = sampled.frame.timestamp.elapsed().as_millis() as u64,
                detections = report.detections,
                "frame processed"
            );
        }
        report
    }

    /// Register a new identity. Safe while running: ticks and registry
    /// edits happen on the same thread.
    pub fn register(&mut self, name: &str, image: &Path) -> Result<&Identity, RegistryError> {
        self.registry.register(name, image, &mut self.recognizer)
    }

    pub fn remove(&mut self, name: &str) -> Result<Identity, RegistryError> {
        self.registry.remove(name)
    }

    /// Registered names not yet present today.
    pub fn absent(&self) -> Vec<&str> {
        self.ledger.absent(self.registry.names())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

impl<B: CaptureBackend, R: Recognizer> Drop for Session<B, R> {
    fn drop(&mut self) {
        self.stop();
    }
}
