use crate::component::Component;
use crate::config::HeartbeatConfig;
use crate::status::Status;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Periodic liveness log, the simplest useful managed component
pub struct Heartbeat {
    tag: String,
    interval: Duration,
    max_beats: Option<u64>,
    status: Status,
    beats: u64,
    last_beat: Option<Instant>,
}

impl Heartbeat {
    pub fn new(config: &HeartbeatConfig) -> Self {
        Self {
            tag: config.tag.clone(),
            interval: config.interval(),
            max_beats: config.max_beats,
            status: Status::Uninitialized,
            beats: 0,
            last_beat: None,
        }
    }

    /// Beats emitted since the last initialization
    pub fn beats(&self) -> u64 {
        self.beats
    }

    fn limit_reached(&self) -> bool {
        self.max_beats.is_some_and(|max| self.beats >= max)
    }
}

impl Component for Heartbeat {
    fn tag(&self) -> &str {
        &self.tag
    }

    fn status(&self) -> Status {
        self.status
    }

    fn initialize(&mut self) -> Status {
        self.status = Status::Initializing;
        self.beats = 0;
        self.last_beat = Some(Instant::now());
        self.status = Status::Running;
        info!(component = %self.tag, interval = ?self.interval, "Heartbeat started");
        self.status
    }

    fn run(&mut self) -> Status {
        if self.status != Status::Running {
            return self.status;
        }

        if self.limit_reached() {
            self.status = Status::Deinitialized;
            return self.status;
        }

        let due = self
            .last_beat
            .map_or(true, |last| last.elapsed() >= self.interval);
        if !due {
            return Status::Running;
        }

        self.beats += 1;
        self.last_beat = Some(Instant::now());
        info!(component = %self.tag, beats = self.beats, "Heartbeat");

        if self.limit_reached() {
            info!(component = %self.tag, "Heartbeat reached its beat limit");
            self.status = Status::Deinitialized;
        }
        self.status
    }

    fn stop(&mut self) -> Status {
        debug!(component = %self.tag, beats = self.beats, "Heartbeat stopped");
        self.status = Status::Stopped;
        self.status
    }
}
