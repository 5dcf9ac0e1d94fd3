//! Heartbeat handling shared by the client leg and the backend leg.
//!
//! [`LinkMonitor`] sits between a framed socket and the code that consumes
//! its frames. Heartbeat requests are answered in place, heartbeat
//! responses are absorbed, and everything else is handed on. Idle events
//! turn into heartbeat requests (writer/all idle) or missed-heartbeat
//! counting (reader idle).

use gate_protocol::{current_millis, HeartbeatFactory, Packet, ProtocolType};

use crate::config::HeartbeatConfig;
use super::idle::{IdleEvent, IdleTimers};

/// Missed-heartbeat counter.
///
/// Only inbound traffic resets it; writes never count as proof of life.
#[derive(Debug, Clone)]
pub struct Liveness {
    missed: u32,
    max_missed: u32,
}

impl Liveness {
    pub fn new(max_missed: u32) -> Self {
        Self {
            missed: 0,
            max_missed: max_missed.max(1),
        }
    }

    pub fn on_inbound(&mut self) {
        self.missed = 0;
    }

    /// Counts one reader-idle period.
    ///
    /// # Returns
    ///
    /// `true` exactly when the count reaches the configured maximum, at
    /// which point the link should be closed.
    pub fn on_reader_idle(&mut self) -> bool {
        self.missed = self.missed.saturating_add(1);
        self.missed >= self.max_missed
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }
}

/// What to do with an inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Heartbeat request; write this response back on the same link.
    Reply(Packet),
    /// Heartbeat response; nothing to forward.
    Absorbed { latency_ms: Option<i64> },
    /// Business frame for the caller.
    Deliver(Packet),
}

/// What to do after an idle period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdleAction {
    /// Write this heartbeat request.
    SendHeartbeat(Packet),
    /// Reader idle below the threshold.
    Missed(u32),
    /// Reader idle reached the threshold.
    Close(u32),
}

/// Per-link heartbeat state.
#[derive(Debug)]
pub struct LinkMonitor {
    heartbeat: HeartbeatFactory,
    liveness: Liveness,
    timers: IdleTimers,
}

impl LinkMonitor {
    pub fn new(protocol: ProtocolType, config: &HeartbeatConfig) -> Self {
        Self {
            heartbeat: HeartbeatFactory::new(protocol),
            liveness: Liveness::new(config.max_missed),
            timers: IdleTimers::new(config),
        }
    }

    /// Records inbound traffic and classifies the frame.
    pub fn on_inbound(&mut self, packet: Packet) -> Inbound {
        self.liveness.on_inbound();
        self.timers.on_read();

        if HeartbeatFactory::is_request(&packet) {
            Inbound::Reply(self.heartbeat.response_to(&packet, current_millis()))
        } else if HeartbeatFactory::is_response(&packet) {
            Inbound::Absorbed {
                latency_ms: HeartbeatFactory::latency(&packet, current_millis()),
            }
        } else {
            Inbound::Deliver(packet)
        }
    }

    /// Records a successful write.
    pub fn on_outbound(&mut self) {
        self.timers.on_write();
    }

    /// Waits for the next idle period. Cancel safe.
    pub async fn next_idle(&mut self) -> IdleEvent {
        self.timers.next_event().await
    }

    pub fn on_idle(&mut self, event: IdleEvent) -> IdleAction {
        match event {
            IdleEvent::WriterIdle | IdleEvent::AllIdle => {
                IdleAction::SendHeartbeat(self.heartbeat.request(current_millis()))
            }
            IdleEvent::ReaderIdle => {
                if self.liveness.on_reader_idle() {
                    IdleAction::Close(self.liveness.missed())
                } else {
                    IdleAction::Missed(self.liveness.missed())
                }
            }
        }
    }

    pub fn missed(&self) -> u32 {
        self.liveness.missed()
    }
}
