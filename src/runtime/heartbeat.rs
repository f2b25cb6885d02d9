//! Counter heartbeat published every cycle.

use core::fmt::Write;

use heapless::String;

use super::traits::{PublishOutbox, TelemetryModule};
use crate::packet::QoS;

/// Default heartbeat topic.
pub const HEARTBEAT_TOPIC: &str = "test";

/// Publishes `Hello, World! <n>` with an increasing counter on every tick.
pub struct HeartbeatModule {
    topic: &'static str,
    qos: QoS,
    counter: u32,
}

impl HeartbeatModule {
    pub const fn new(topic: &'static str) -> Self {
        Self {
            topic,
            qos: QoS::AtLeastOnce,
            counter: 0,
        }
    }

    pub const fn with_qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    /// Number of heartbeats produced so far.
    pub fn count(&self) -> u32 {
        self.counter
    }
}

impl Default for HeartbeatModule {
    fn default() -> Self {
        Self::new(HEARTBEAT_TOPIC)
    }
}

impl TelemetryModule for HeartbeatModule {
    fn on_tick(&mut self, outbox: &mut dyn PublishOutbox) {
        let mut payload: String<32> = String::new();
        // "Hello, World! " plus at most 10 digits always fits
        let _ = write!(payload, "Hello, World! {}", self.counter);
        debug!("Publish: {}", payload.as_str());
        outbox.publish(self.topic, payload.as_bytes(), self.qos);
        self.counter = self.counter.wrapping_add(1);
    }
}
