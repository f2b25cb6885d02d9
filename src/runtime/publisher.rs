//! Telemetry queueing.
//!
//! Two paths lead into a publish cycle: other tasks push borrowed messages into
//! a bounded `TelemetryQueue` through a `TelemetryHandle`, and modules write
//! owned copies into the `CycleOutbox` the runtime lends them for one callback.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, Receiver, Sender};
use heapless::{String, Vec};

use super::traits::PublishOutbox;
use crate::packet::QoS;

/// A message waiting in the telemetry queue.
///
/// Topic and payload are borrowed, typically `'static` buffers owned by the
/// producing task.
#[derive(Debug, Clone, Copy)]
pub struct QueuedTelemetry<'a> {
    pub topic: &'a str,
    pub payload: &'a [u8],
    pub qos: QoS,
}

/// Bounded queue between producer tasks and the uplink task.
pub type TelemetryQueue<'a, const DEPTH: usize> = Channel<CriticalSectionRawMutex, QueuedTelemetry<'a>, DEPTH>;

pub type TelemetrySender<'a, const DEPTH: usize> =
    Sender<'a, CriticalSectionRawMutex, QueuedTelemetry<'a>, DEPTH>;

pub type TelemetryReceiver<'a, const DEPTH: usize> =
    Receiver<'a, CriticalSectionRawMutex, QueuedTelemetry<'a>, DEPTH>;

/// Producer side of a `TelemetryQueue`. Cheap to copy into several tasks.
#[derive(Clone, Copy)]
pub struct TelemetryHandle<'a, const DEPTH: usize> {
    sender: TelemetrySender<'a, DEPTH>,
}

impl<'a, const DEPTH: usize> TelemetryHandle<'a, DEPTH> {
    pub fn new(sender: TelemetrySender<'a, DEPTH>) -> Self {
        Self { sender }
    }

    /// Queues a message, waiting for room.
    pub async fn publish(&self, topic: &'a str, payload: &'a [u8], qos: QoS) {
        self.sender.send(QueuedTelemetry { topic, payload, qos }).await;
    }

    /// Queues a message if there is room; returns `false` otherwise.
    pub fn try_publish(&self, topic: &'a str, payload: &'a [u8], qos: QoS) -> bool {
        match self.sender.try_send(QueuedTelemetry { topic, payload, qos }) {
            Ok(()) => true,
            Err(_) => {
                debug!("Telemetry queue full, dropping message for {}", topic);
                false
            }
        }
    }
}

/// A message copied out of a module callback.
#[derive(Debug, Clone)]
pub struct PendingPublish<const TOPIC_LEN: usize, const PAYLOAD_LEN: usize> {
    pub topic: String<TOPIC_LEN>,
    pub payload: Vec<u8, PAYLOAD_LEN>,
    pub qos: QoS,
}

impl<const TOPIC_LEN: usize, const PAYLOAD_LEN: usize> PendingPublish<TOPIC_LEN, PAYLOAD_LEN> {
    fn copy_of(topic: &str, payload: &[u8], qos: QoS) -> Option<Self> {
        Some(Self {
            topic: String::try_from(topic).ok()?,
            payload: Vec::from_slice(payload).ok()?,
            qos,
        })
    }
}

/// Fixed-capacity outbox lent to a module for one `on_start` or `on_tick`.
///
/// Messages that do not fit (too many, topic longer than `TOPIC_LEN` or
/// payload longer than `PAYLOAD_LEN`) are rejected and counted.
pub struct CycleOutbox<const SLOTS: usize, const TOPIC_LEN: usize, const PAYLOAD_LEN: usize> {
    pending: Vec<PendingPublish<TOPIC_LEN, PAYLOAD_LEN>, SLOTS>,
    rejected: usize,
}

impl<const SLOTS: usize, const TOPIC_LEN: usize, const PAYLOAD_LEN: usize>
    CycleOutbox<SLOTS, TOPIC_LEN, PAYLOAD_LEN>
{
    pub const fn new() -> Self {
        Self {
            pending: Vec::new(),
            rejected: 0,
        }
    }

    /// Hands out the accepted messages in order and empties the outbox.
    pub fn drain(&mut self) -> impl Iterator<Item = PendingPublish<TOPIC_LEN, PAYLOAD_LEN>> {
        core::mem::take(&mut self.pending).into_iter()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Messages turned away since the outbox was created.
    pub fn rejected(&self) -> usize {
        self.rejected
    }
}

impl<const SLOTS: usize, const TOPIC_LEN: usize, const PAYLOAD_LEN: usize> Default
    for CycleOutbox<SLOTS, TOPIC_LEN, PAYLOAD_LEN>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const SLOTS: usize, const TOPIC_LEN: usize, const PAYLOAD_LEN: usize> PublishOutbox
    for CycleOutbox<SLOTS, TOPIC_LEN, PAYLOAD_LEN>
{
    fn publish(&mut self, topic: &str, payload: &[u8], qos: QoS) -> bool {
        let accepted = PendingPublish::copy_of(topic, payload, qos)
            .is_some_and(|message| self.pending.push(message).is_ok());
        if !accepted {
            warn!("Outbox rejected {} ({} bytes)", topic, payload.len());
            self.rejected += 1;
        }
        accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drain_empties_the_outbox() {
        let mut outbox: CycleOutbox<4, 16, 16> = CycleOutbox::new();
        assert!(outbox.publish("a", b"1", QoS::AtMostOnce));
        assert!(outbox.publish("b", b"2", QoS::AtLeastOnce));

        let topics: std::vec::Vec<_> = outbox.drain().map(|r| r.topic).collect();
        assert_eq!(topics, ["a", "b"]);
        assert!(outbox.is_empty());
        assert_eq!(outbox.drain().count(), 0);
    }

    #[test]
    fn oversized_or_excess_messages_are_rejected() {
        let mut outbox: CycleOutbox<1, 4, 4> = CycleOutbox::new();
        assert!(!outbox.publish("too/long", b"x", QoS::AtMostOnce));
        assert!(!outbox.publish("t", b"12345", QoS::AtMostOnce));
        assert!(outbox.publish("t", b"1234", QoS::AtMostOnce));
        assert!(!outbox.publish("t", b"1", QoS::AtMostOnce));
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox.rejected(), 3);
    }

    #[test]
    fn handle_queues_in_order_until_full() {
        static QUEUE: TelemetryQueue<'static, 2> = Channel::new();
        let handle = TelemetryHandle::new(QUEUE.sender());
        assert!(handle.try_publish("t", b"1", QoS::AtMostOnce));
        embassy_futures::block_on(handle.publish("t", b"2", QoS::AtLeastOnce));
        assert!(!handle.try_publish("t", b"3", QoS::AtMostOnce));

        let first = QUEUE.try_receive().unwrap();
        assert_eq!(first.payload, b"1");
        let second = QUEUE.try_receive().unwrap();
        assert_eq!(second.qos, QoS::AtLeastOnce);
    }
}
