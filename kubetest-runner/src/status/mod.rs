//! Status reporter
//!
//! A single actor task owns all status state and timing. Callers only send
//! events over a channel, so nothing is shared and nothing is locked.
//!
//! States are `Idle` and `Active(label)`:
//! - `Start` finalizes an active status as succeeded, then activates the new label
//! - `Progress` updates the active line; ignored while idle
//! - `Succeed` / `Fail` render the final line and go idle; ignored while idle
//!
//! Renders are spaced by a minimum interval: when an event arrives sooner
//! the actor sleeps out the remainder first.

mod render;

pub use render::{Frame, LogRender, RecordingRender, Render, TerminalRender};

use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

/// Events consumed by the actor, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    Start(String),
    Progress(String),
    Succeed,
    Fail(String),
}

/// What the actor hands back when its channel closes
type ActorOutput = (Box<dyn Render>, Vec<String>);

/// Handle to the status actor
///
/// The channel pair is opened lazily by `start` and closed by `close`; a
/// `start` after `close` opens a fresh pair, so one reporter can serve
/// several setup phases.
pub struct StatusReporter {
    interval: Duration,
    sender: Option<UnboundedSender<StatusEvent>>,
    actor: Option<JoinHandle<ActorOutput>>,
    /// Parked here while no actor is running
    render: Option<Box<dyn Render>>,
    failures: Vec<String>,
}

impl StatusReporter {
    pub fn new(render: impl Render, interval: Duration) -> Self {
        Self {
            interval,
            sender: None,
            actor: None,
            render: Some(Box::new(render)),
            failures: Vec::new(),
        }
    }

    pub fn start(&mut self, label: impl Into<String>) {
        self.reset();
        self.send(StatusEvent::Start(label.into()));
    }

    pub fn progress(&mut self, message: impl Into<String>) {
        self.send(StatusEvent::Progress(message.into()));
    }

    pub fn succeed(&mut self) {
        self.send(StatusEvent::Succeed);
    }

    pub fn fail(&mut self, error: impl fmt::Display) {
        self.send(StatusEvent::Fail(error.to_string()));
    }

    /// Closes the channel and waits until every queued event is rendered
    ///
    /// Idempotent.
    pub async fn close(&mut self) {
        self.sender = None;
        if let Some(actor) = self.actor.take() {
            match actor.await {
                Ok((render, failures)) => {
                    self.render = Some(render);
                    self.failures.extend(failures);
                }
                Err(e) => warn!("Status actor stopped abnormally: {}", e),
            }
        }
    }

    /// Same as `close`
    pub async fn drain(&mut self) {
        self.close().await;
    }

    /// Whether any status failed, once everything queued is rendered
    pub async fn failed(&mut self) -> bool {
        self.close().await;
        !self.failures.is_empty()
    }

    /// Every recorded failure, once everything queued is rendered
    pub async fn errors(&mut self) -> Vec<String> {
        self.close().await;
        self.failures.clone()
    }

    /// Opens a new channel pair when closed
    fn reset(&mut self) {
        if self.sender.is_some() {
            return;
        }
        let Some(render) = self.render.take() else {
            warn!("Status renderer lost; events will be dropped");
            return;
        };
        let (sender, receiver) = mpsc::unbounded_channel();
        self.actor = Some(tokio::spawn(run_actor(receiver, render, self.interval)));
        self.sender = Some(sender);
    }

    fn send(&self, event: StatusEvent) {
        match &self.sender {
            Some(sender) => {
                if sender.send(event).is_err() {
                    warn!("Status actor is gone");
                }
            }
            // Closed means idle: nothing to update
            None => debug!("Status event {:?} while closed", event),
        }
    }
}

/// Sleeps out whatever remains of `interval` since the last render
async fn pace(last_render: &mut Option<Instant>, interval: Duration) {
    if let Some(last) = *last_render {
        let elapsed = last.elapsed();
        if elapsed < interval {
            time::sleep(interval - elapsed).await;
        }
    }
    *last_render = Some(Instant::now());
}

async fn run_actor(
    mut events: UnboundedReceiver<StatusEvent>,
    mut render: Box<dyn Render>,
    interval: Duration,
) -> ActorOutput {
    let mut active: Option<String> = None;
    let mut failures = Vec::new();
    let mut last_render = None;

    while let Some(event) = events.recv().await {
        match event {
            StatusEvent::Start(label) => {
                if let Some(current) = active.take() {
                    pace(&mut last_render, interval).await;
                    render.succeeded(&current);
                }
                pace(&mut last_render, interval).await;
                render.active(&label);
                active = Some(label);
            }
            StatusEvent::Progress(message) => {
                if let Some(current) = &active {
                    pace(&mut last_render, interval).await;
                    render.progress(current, &message);
                }
            }
            StatusEvent::Succeed => {
                if let Some(current) = active.take() {
                    pace(&mut last_render, interval).await;
                    render.succeeded(&current);
                }
            }
            StatusEvent::Fail(error) => {
                if let Some(current) = active.take() {
                    pace(&mut last_render, interval).await;
                    render.failed(&current, &error);
                    failures.push(error);
                }
            }
        }
    }

    // Closing while active finalizes like a following Start would
    if let Some(current) = active.take() {
        pace(&mut last_render, interval).await;
        render.succeeded(&current);
    }

    (render, failures)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporter(interval: Duration) -> (StatusReporter, RecordingRender) {
        let recording = RecordingRender::new();
        (StatusReporter::new(recording.clone(), interval), recording)
    }

    #[tokio::test]
    async fn test_start_finalizes_previous_status() {
        let (mut status, recording) = reporter(Duration::ZERO);
        status.start("A");
        status.start("B");
        status.succeed();
        status.close().await;

        assert_eq!(
            recording.frames(),
            vec![
                Frame::Active("A".to_string()),
                Frame::Succeeded("A".to_string()),
                Frame::Active("B".to_string()),
                Frame::Succeeded("B".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_events_while_idle_are_ignored() {
        let (mut status, recording) = reporter(Duration::ZERO);
        status.progress("nobody listening");
        status.succeed();
        status.start("A");
        status.fail("boom");
        status.fail("again");
        status.progress("late");
        status.close().await;

        assert_eq!(
            recording.frames(),
            vec![
                Frame::Active("A".to_string()),
                Frame::Failed("A".to_string(), "boom".to_string()),
            ]
        );
        assert_eq!(status.errors().await, vec!["boom".to_string()]);
    }

    #[tokio::test]
    async fn test_renders_are_spaced() {
        let interval = Duration::from_millis(40);
        let (mut status, recording) = reporter(interval);

        let started = Instant::now();
        status.start("A");
        status.progress("1");
        status.progress("2");
        status.close().await;

        // Four renders need at least three full intervals between them
        assert_eq!(recording.frames().len(), 4);
        assert!(started.elapsed() >= interval * 3);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut status, recording) = reporter(Duration::ZERO);
        status.start("A");
        status.fail("timeout");
        status.close().await;
        let frames = recording.frames();

        status.close().await;
        assert_eq!(recording.frames(), frames);

        let first = status.errors().await;
        let second = status.errors().await;
        assert_eq!(first, vec!["timeout".to_string()]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_reusable_after_close() {
        let (mut status, recording) = reporter(Duration::ZERO);
        status.start("phase one");
        status.fail("broken");
        status.close().await;

        status.start("phase two");
        status.succeed();
        assert!(status.failed().await);
        assert_eq!(recording.frames().len(), 4);
        assert_eq!(status.errors().await, vec!["broken".to_string()]);
    }
}
