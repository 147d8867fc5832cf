//! Headless presenter: every session event becomes a tracing event.

use chrono::NaiveTime;
use rollcall_core::{ErrorReport, Frame, Overlay, Presenter};

#[derive(Debug, Default)]
pub struct LogPresenter {
    frames: u64,
    recorded: u64,
    /// Labels seen on the previous frame, to avoid logging the same set every tick.
    last_labels: Vec<String>,
}

impl LogPresenter {
    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn recorded(&self) -> u64 {
        self.recorded
    }
}

impl Presenter for LogPresenter {
    fn on_frame_ready(&mut self, frame: &Frame, overlays: &[Overlay]) {
        self.frames += 1;
        let labels: Vec<String> = overlays.iter().map(|o| o.label().to_string()).collect();
        if labels != self.last_labels {
            if !labels.is_empty() {
                tracing::debug!(
                    seq = frame.sequence,
                    faces = labels.len(),
                    labels = %labels.join(","),
                    "faces in view"
                );
            }
            self.last_labels = labels;
        }
    }

    fn on_attendance_recorded(&mut self, name: &str, time: NaiveTime) {
        self.recorded += 1;
        tracing::info!(name, time = %time.format("%H:%M:%S"), "attendance recorded");
    }

    fn on_capture_error(&mut self, reason: &str) {
        tracing::warn!(reason, "capture error");
    }

    fn on_error(&mut self, report: &ErrorReport) {
        tracing::error!(kind = %report.kind, context = %report.context, "recoverable error");
    }
}
