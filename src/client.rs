//! # MQTT Client
//!
//! A publishing-only MQTT 3.1.1 client for QoS 0 and QoS 1.
//!
//! The client walks a small state machine:
//!
//! ```text
//! Disconnected --CONNECT--> AwaitingConnAck --CONNACK(0)--> Connected
//! Connected --PUBLISH(QoS 1)--> AwaitingPubAck --next packet--> Connected
//! ```
//!
//! QoS 0 publishes never wait. A QoS 1 publish waits for the next inbound
//! packet and matches it against the packet identifier just sent. What happens
//! when that packet is not the expected PUBACK depends on the `AckPolicy`.
//! Any transport failure drops the client back to `Disconnected`.

use embassy_time::{Duration, Instant};

use crate::error::{MqttError, ProtocolError};
use crate::packet::{
    self, ConnAck, Connect, Disconnect, EncodePacket, MqttPacket, PacketType, PingReq, Publish,
    QoS,
};
use crate::transport::MqttTransport;

/// Keep-alive interval announced in CONNECT.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(20);

/// What to do when a QoS 1 publish is answered with something other than
/// the matching PUBACK.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AckPolicy {
    /// Log the anomaly and keep going.
    #[default]
    BestEffort,
    /// Fail the publish with a protocol error.
    Strict,
}

/// Options for the MQTT connection.
#[derive(Debug, Clone, Copy)]
pub struct MqttOptions<'a> {
    client_id: &'a str,
    keep_alive: Duration,
    username: Option<&'a str>,
    password: Option<&'a [u8]>,
    ack_policy: AckPolicy,
}

impl<'a> MqttOptions<'a> {
    /// Creates options with the given client id and default settings.
    pub fn new(client_id: &'a str) -> Self {
        Self {
            client_id,
            keep_alive: DEFAULT_KEEP_ALIVE,
            username: None,
            password: None,
            ack_policy: AckPolicy::BestEffort,
        }
    }

    /// Sets the keep-alive interval, rounded down to whole seconds.
    pub fn with_keep_alive(mut self, keep_alive: Duration) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Sets the user name and optional password sent in CONNECT.
    pub fn with_credentials(mut self, username: &'a str, password: Option<&'a [u8]>) -> Self {
        self.username = Some(username);
        self.password = password;
        self
    }

    pub fn with_ack_policy(mut self, policy: AckPolicy) -> Self {
        self.ack_policy = policy;
        self
    }

    pub fn client_id(&self) -> &'a str {
        self.client_id
    }

    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    pub fn ack_policy(&self) -> AckPolicy {
        self.ack_policy
    }

    fn keep_alive_secs(&self) -> u16 {
        u16::try_from(self.keep_alive.as_secs()).unwrap_or(u16::MAX)
    }
}

/// Where the client is in the connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectionState {
    Disconnected,
    AwaitingConnAck,
    Connected,
    AwaitingPubAck,
}

/// How a publish ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublishOutcome {
    /// QoS 0: the packet was written, no acknowledgement is expected.
    Sent,
    /// QoS 1: the broker acknowledged the packet with this identifier.
    Acknowledged(u16),
    /// QoS 1: a PUBACK arrived for a different identifier.
    Mismatched { expected: u16, received: u16 },
    /// QoS 1: some other packet arrived in place of the PUBACK.
    Unexpected(PacketType),
    /// QoS 1: a complete packet arrived in place of the PUBACK but its body
    /// could not be decoded.
    Malformed(PacketType),
}

/// Hands out packet identifiers for QoS 1 publishes.
///
/// Identifiers start at 1, increase by one per publish and skip 0 when they
/// wrap, since 0 is not a valid identifier.
#[derive(Debug, Clone)]
pub struct PacketIdGenerator {
    next: u16,
}

impl PacketIdGenerator {
    pub const fn new() -> Self {
        Self { next: 1 }
    }

    /// Starts the sequence at `first` (or 1 if `first` is 0).
    pub const fn starting_at(first: u16) -> Self {
        Self {
            next: if first == 0 { 1 } else { first },
        }
    }

    pub fn next_id(&mut self) -> u16 {
        let id = self.next;
        self.next = id.checked_add(1).unwrap_or(1);
        id
    }
}

impl Default for PacketIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Owned summary of an inbound packet, so the receive buffer can be reused.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Inbound {
    ConnAck(ConnAck),
    PubAck(u16),
    PingResp,
    Other(PacketType),
    /// The whole frame was read, so the stream is still in sync.
    Malformed(PacketType),
}

impl Inbound {
    fn packet_type(&self) -> PacketType {
        match self {
            Inbound::ConnAck(_) => PacketType::ConnAck,
            Inbound::PubAck(_) => PacketType::PubAck,
            Inbound::PingResp => PacketType::PingResp,
            Inbound::Other(t) | Inbound::Malformed(t) => *t,
        }
    }
}

/// The MQTT client.
///
/// `BUF_SIZE` bounds both outgoing packets and the inbound packets that are
/// decoded; larger inbound packets are skipped.
pub struct MqttClient<'a, T, const BUF_SIZE: usize>
where
    T: MqttTransport,
{
    transport: T,
    options: MqttOptions<'a>,
    state: ConnectionState,
    packet_ids: PacketIdGenerator,
    last_sent: Option<Instant>,
    buffer: [u8; BUF_SIZE],
}

impl<'a, T, const BUF_SIZE: usize> MqttClient<'a, T, BUF_SIZE>
where
    T: MqttTransport,
{
    /// Creates a new, disconnected client.
    pub fn new(transport: T, options: MqttOptions<'a>) -> Self {
        Self {
            transport,
            options,
            state: ConnectionState::Disconnected,
            packet_ids: PacketIdGenerator::new(),
            last_sent: None,
            buffer: [0; BUF_SIZE],
        }
    }

    /// Replaces the packet identifier sequence.
    pub fn with_packet_ids(mut self, packet_ids: PacketIdGenerator) -> Self {
        self.packet_ids = packet_ids;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn options(&self) -> &MqttOptions<'a> {
        &self.options
    }

    /// Sends CONNECT and waits for the broker's CONNACK.
    ///
    /// The session is always clean. A refusal leaves the client disconnected.
    pub async fn connect(&mut self) -> Result<ConnAck, MqttError<T::Error>> {
        let connect = Connect::new(self.options.client_id, self.options.keep_alive_secs(), true)
            .with_credentials(self.options.username, self.options.password);
        let len = connect
            .encode(&mut self.buffer)
            .map_err(MqttError::cast_transport_error)?;

        self.send(len).await?;
        self.state = ConnectionState::AwaitingConnAck;
        debug!("CONNECT sent for {}", self.options.client_id);

        match self.next_packet().await? {
            Inbound::ConnAck(ack) if ack.is_accepted() => {
                self.state = ConnectionState::Connected;
                info!("Connected to broker (session present: {})", ack.session_present);
                Ok(ack)
            }
            Inbound::ConnAck(ack) => {
                self.state = ConnectionState::Disconnected;
                let code = ack.return_code.into();
                error!("CONNACK rejected with return code {}", ack.return_code);
                Err(MqttError::ConnectionRefused(code))
            }
            other => {
                self.state = ConnectionState::Disconnected;
                error!("Expected CONNACK, got {:?}", other);
                Err(MqttError::Protocol(ProtocolError::InvalidResponse))
            }
        }
    }

    /// Publishes `payload` on `topic`.
    ///
    /// For QoS 1 this waits, bounded by the transport's read timeout, for the
    /// next packet from the broker and reports how it matched.
    pub async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        qos: QoS,
    ) -> Result<PublishOutcome, MqttError<T::Error>> {
        if self.state != ConnectionState::Connected {
            return Err(MqttError::NotConnected);
        }

        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(self.packet_ids.next_id()),
        };
        let publish = Publish {
            topic,
            qos,
            payload,
            packet_id,
        };
        let len = publish
            .encode(&mut self.buffer)
            .map_err(MqttError::cast_transport_error)?;
        self.send(len).await?;

        let Some(expected) = packet_id else {
            trace!("Published {} bytes to {}", payload.len(), topic);
            return Ok(PublishOutcome::Sent);
        };

        self.state = ConnectionState::AwaitingPubAck;
        let inbound = self.next_packet().await?;
        self.state = ConnectionState::Connected;

        match inbound {
            Inbound::PubAck(received) if received == expected => {
                info!("Publish succeeded, packet id {}", received);
                Ok(PublishOutcome::Acknowledged(received))
            }
            Inbound::PubAck(received) => {
                warn!("PUBACK for wrong packet id {} (expected {})", received, expected);
                match self.options.ack_policy {
                    AckPolicy::BestEffort => Ok(PublishOutcome::Mismatched { expected, received }),
                    AckPolicy::Strict => Err(MqttError::Protocol(ProtocolError::PacketIdMismatch {
                        expected,
                        received,
                    })),
                }
            }
            Inbound::Malformed(packet_type) => {
                warn!("Unable to decode {:?} received in place of PUBACK", packet_type);
                match self.options.ack_policy {
                    AckPolicy::BestEffort => Ok(PublishOutcome::Malformed(packet_type)),
                    AckPolicy::Strict => Err(MqttError::Protocol(ProtocolError::UndecodablePacket(
                        packet_type as u8,
                    ))),
                }
            }
            other => {
                let packet_type = other.packet_type();
                warn!("Unexpected response to publish: {:?}", packet_type);
                match self.options.ack_policy {
                    AckPolicy::BestEffort => Ok(PublishOutcome::Unexpected(packet_type)),
                    AckPolicy::Strict => Err(MqttError::Protocol(ProtocolError::UnexpectedPacket(
                        packet_type as u8,
                    ))),
                }
            }
        }
    }

    /// Returns `true` when nothing has been sent for half the keep-alive interval.
    pub fn needs_ping(&self) -> bool {
        match self.last_sent {
            Some(at) => self.is_connected() && at.elapsed() >= self.options.keep_alive / 2,
            None => false,
        }
    }

    /// Sends PINGREQ and waits for PINGRESP.
    pub async fn ping(&mut self) -> Result<(), MqttError<T::Error>> {
        if self.state != ConnectionState::Connected {
            return Err(MqttError::NotConnected);
        }
        let len = PingReq
            .encode(&mut self.buffer)
            .map_err(MqttError::cast_transport_error)?;
        self.send(len).await?;
        match self.next_packet().await? {
            Inbound::PingResp => {
                trace!("PINGRESP received");
                Ok(())
            }
            other => {
                warn!("Expected PINGRESP, got {:?}", other);
                Err(MqttError::Protocol(ProtocolError::InvalidResponse))
            }
        }
    }

    /// Sends DISCONNECT. The client is disconnected afterwards either way.
    pub async fn disconnect(&mut self) -> Result<(), MqttError<T::Error>> {
        if self.state == ConnectionState::Disconnected {
            return Ok(());
        }
        let len = Disconnect
            .encode(&mut self.buffer)
            .map_err(MqttError::cast_transport_error)?;
        let result = self.send(len).await;
        self.state = ConnectionState::Disconnected;
        info!("Disconnected from broker");
        result
    }

    /// Gives back the transport.
    pub fn into_transport(self) -> T {
        self.transport
    }

    async fn send(&mut self, len: usize) -> Result<(), MqttError<T::Error>> {
        match self.transport.send(&self.buffer[..len]).await {
            Ok(()) => {
                self.last_sent = Some(Instant::now());
                Ok(())
            }
            Err(e) => Err(self.link_failed(e)),
        }
    }

    async fn recv_exact(&mut self, start: usize, end: usize) -> Result<(), MqttError<T::Error>> {
        match self.transport.recv_exact(&mut self.buffer[start..end]).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.link_failed(e)),
        }
    }

    fn link_failed(&mut self, e: T::Error) -> MqttError<T::Error> {
        error!("Transport failed, connection lost");
        self.state = ConnectionState::Disconnected;
        MqttError::Transport(e)
    }

    /// Reads the next packet. Any failure leaves the client disconnected.
    async fn next_packet(&mut self) -> Result<Inbound, MqttError<T::Error>> {
        let result = self.read_packet().await;
        if result.is_err() {
            self.state = ConnectionState::Disconnected;
        }
        result
    }

    /// Reads one complete packet: fixed header, remaining length, then body.
    async fn read_packet(&mut self) -> Result<Inbound, MqttError<T::Error>> {
        if BUF_SIZE < 5 {
            return Err(MqttError::BufferTooSmall);
        }
        self.recv_exact(0, 1).await?;
        let packet_type =
            PacketType::from_header(self.buffer[0]).map_err(MqttError::cast_transport_error)?;

        let mut remaining = 0usize;
        let mut header_len = 1;
        loop {
            if header_len == 5 {
                return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
            }
            self.recv_exact(header_len, header_len + 1).await?;
            let byte = self.buffer[header_len];
            remaining |= usize::from(byte & 0x7F) << (7 * (header_len - 1));
            header_len += 1;
            if byte & 0x80 == 0 {
                break;
            }
        }

        let total = header_len + remaining;
        if total > BUF_SIZE {
            warn!("Skipping {:?} packet of {} bytes", packet_type, total);
            let mut left = remaining;
            while left > 0 {
                let chunk = left.min(BUF_SIZE);
                self.recv_exact(0, chunk).await?;
                left -= chunk;
            }
            return Ok(Inbound::Other(packet_type));
        }
        self.recv_exact(header_len, total).await?;

        let inbound = match packet::decode::<T::Error>(&self.buffer[..total]) {
            Ok(MqttPacket::ConnAck(ack)) => Inbound::ConnAck(ack),
            Ok(MqttPacket::PubAck(ack)) => Inbound::PubAck(ack.packet_id),
            Ok(MqttPacket::PingResp) => Inbound::PingResp,
            Ok(MqttPacket::Publish(_)) => Inbound::Other(PacketType::Publish),
            Ok(MqttPacket::Other(t)) => Inbound::Other(t),
            Err(_) => {
                warn!("Unable to decode {:?} packet of {} bytes", packet_type, total);
                Inbound::Malformed(packet_type)
            }
        };
        Ok(inbound)
    }
}
