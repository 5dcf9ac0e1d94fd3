//! Reader/writer/all idle detection for one link.
//!
//! An idle event fires once per full period of silence in its direction and
//! is then re-armed for the next period, so a link that stays silent keeps
//! producing one event per period.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

use crate::config::HeartbeatConfig;

/// Which direction went quiet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleEvent {
    ReaderIdle,
    WriterIdle,
    AllIdle,
}

#[derive(Debug)]
pub struct IdleTimers {
    reader_idle: Duration,
    writer_idle: Duration,
    all_idle: Option<Duration>,
    reader_deadline: Instant,
    writer_deadline: Instant,
    all_deadline: Option<Instant>,
}

impl IdleTimers {
    pub fn new(config: &HeartbeatConfig) -> Self {
        let now = Instant::now();
        Self {
            reader_idle: config.reader_idle,
            writer_idle: config.writer_idle,
            all_idle: config.all_idle,
            reader_deadline: now + config.reader_idle,
            writer_deadline: now + config.writer_idle,
            all_deadline: config.all_idle.map(|period| now + period),
        }
    }

    /// Inbound traffic seen.
    pub fn on_read(&mut self) {
        let now = Instant::now();
        self.reader_deadline = now + self.reader_idle;
        self.rearm_all(now);
    }

    /// Outbound traffic written.
    pub fn on_write(&mut self) {
        let now = Instant::now();
        self.writer_deadline = now + self.writer_idle;
        self.rearm_all(now);
    }

    /// Waits for the next idle event.
    ///
    /// Cancel safe: state only changes after the wait completes, so this can
    /// sit in a `tokio::select!` next to the socket.
    pub async fn next_event(&mut self) -> IdleEvent {
        let (event, deadline) = self.earliest();
        sleep_until(deadline).await;

        let now = Instant::now();
        match event {
            IdleEvent::ReaderIdle => self.reader_deadline = now + self.reader_idle,
            IdleEvent::WriterIdle => self.writer_deadline = now + self.writer_idle,
            IdleEvent::AllIdle => self.rearm_all(now),
        }
        event
    }

    fn earliest(&self) -> (IdleEvent, Instant) {
        let mut earliest = (IdleEvent::ReaderIdle, self.reader_deadline);
        if self.writer_deadline < earliest.1 {
            earliest = (IdleEvent::WriterIdle, self.writer_deadline);
        }
        if let Some(all) = self.all_deadline {
            if all < earliest.1 {
                earliest = (IdleEvent::AllIdle, all);
            }
        }
        earliest
    }

    fn rearm_all(&mut self, now: Instant) {
        if let Some(period) = self.all_idle {
            self.all_deadline = Some(now + period);
        }
    }
}
