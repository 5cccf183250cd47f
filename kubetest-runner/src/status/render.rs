//! Status renderers
//!
//! The reporter actor owns one renderer and calls it for every state change.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{error, info};

/// Draws status changes
pub trait Render: Send + 'static {
    /// A status became active; show a busy indicator
    fn active(&mut self, label: &str);

    fn progress(&mut self, label: &str, message: &str);

    fn succeeded(&mut self, label: &str);

    fn failed(&mut self, label: &str, error: &str);
}

/// Spinner on stderr, for operators at a terminal
#[derive(Default)]
pub struct TerminalRender {
    bar: Option<ProgressBar>,
}

impl TerminalRender {
    pub fn new() -> Self {
        Self::default()
    }

    fn clear(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl Render for TerminalRender {
    fn active(&mut self, label: &str) {
        self.clear();
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.blue} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(100));
        self.bar = Some(bar);
    }

    fn progress(&mut self, label: &str, message: &str) {
        if let Some(bar) = &self.bar {
            bar.set_message(format!("{} {}", label, message.dimmed()));
        }
    }

    fn succeeded(&mut self, label: &str) {
        self.clear();
        eprintln!("{} {}", "✓".green(), label);
    }

    fn failed(&mut self, label: &str, error: &str) {
        self.clear();
        eprintln!("{} {}: {}", "✗".red(), label, error);
    }
}

/// Status as log lines, for in-cluster processes without a terminal
pub struct LogRender {
    prefix: String,
}

impl LogRender {
    /// `prefix` identifies the job in interleaved logs
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Render for LogRender {
    fn active(&mut self, label: &str) {
        info!("[{}] {}...", self.prefix, label);
    }

    fn progress(&mut self, label: &str, message: &str) {
        info!("[{}] {}: {}", self.prefix, label, message);
    }

    fn succeeded(&mut self, label: &str) {
        info!("[{}] {} done", self.prefix, label);
    }

    fn failed(&mut self, label: &str, error: &str) {
        error!("[{}] {} failed: {}", self.prefix, label, error);
    }
}

/// One recorded render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Active(String),
    Progress(String, String),
    Succeeded(String),
    Failed(String, String),
}

/// Records frames instead of drawing them
#[derive(Debug, Clone, Default)]
pub struct RecordingRender {
    frames: Arc<Mutex<Vec<Frame>>>,
}

impl RecordingRender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames rendered so far; clones share the same recording
    pub fn frames(&self) -> Vec<Frame> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push(&self, frame: Frame) {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(frame);
    }
}

impl Render for RecordingRender {
    fn active(&mut self, label: &str) {
        self.push(Frame::Active(label.to_string()));
    }

    fn progress(&mut self, label: &str, message: &str) {
        self.push(Frame::Progress(label.to_string(), message.to_string()));
    }

    fn succeeded(&mut self, label: &str) {
        self.push(Frame::Succeeded(label.to_string()));
    }

    fn failed(&mut self, label: &str, error: &str) {
        self.push(Frame::Failed(label.to_string(), error.to_string()));
    }
}
