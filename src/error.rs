//! # Error Types
//!
//! Error enums for every layer of the uplink: the MQTT engine, the credential
//! store, the operator command shell and the secure transport session.

use core::convert::Infallible;
use core::fmt;

use embedded_tls::TlsError;

use crate::transport::LinkError;

/// The primary error enum for the MQTT engine.
///
/// It is generic over the transport error type `T`, so the same engine can run
/// over a TLS stream in production and an in-memory stream in tests.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MqttError<T> {
    /// An error occurred in the underlying transport layer.
    Transport(T),
    /// The broker sent something that violates MQTT 3.1.1.
    Protocol(ProtocolError),
    /// The broker answered CONNECT with a non-zero return code.
    ConnectionRefused(ConnectReturnCode),
    /// The operation needs an established MQTT connection.
    NotConnected,
    /// The working buffer cannot hold the packet.
    BufferTooSmall,
}

/// Errors produced by packet encoding and decoding, which never touch a transport.
pub type CodecError = MqttError<Infallible>;

impl<T> MqttError<T> {
    /// Widens a codec error into an engine error for a concrete transport.
    pub fn cast_transport_error(other: CodecError) -> MqttError<T> {
        match other {
            MqttError::Protocol(p) => MqttError::Protocol(p),
            MqttError::ConnectionRefused(c) => MqttError::ConnectionRefused(c),
            MqttError::NotConnected => MqttError::NotConnected,
            MqttError::BufferTooSmall => MqttError::BufferTooSmall,
            MqttError::Transport(never) => match never {},
        }
    }

    /// Returns `true` when the error leaves the connection unusable.
    ///
    /// Transport failures, refusals and malformed headers all end the session.
    /// A mismatched, unexpected or undecodable acknowledgement does not, since
    /// the frame was read in full.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            MqttError::Protocol(
                ProtocolError::PacketIdMismatch { .. }
                    | ProtocolError::UnexpectedPacket(_)
                    | ProtocolError::UndecodablePacket(_)
            )
        )
    }
}

impl<T: fmt::Debug> fmt::Display for MqttError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MqttError::Transport(e) => write!(f, "transport error: {e:?}"),
            MqttError::Protocol(e) => write!(f, "protocol error: {e}"),
            MqttError::ConnectionRefused(code) => write!(f, "connection refused: {code}"),
            MqttError::NotConnected => f.write_str("not connected"),
            MqttError::BufferTooSmall => f.write_str("buffer too small"),
        }
    }
}

impl<T: fmt::Debug> core::error::Error for MqttError<T> {}

/// Return codes carried by CONNACK in MQTT 3.1.1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectReturnCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadUserNameOrPassword,
    NotAuthorized,
    /// Any value outside 0..=5.
    Other(u8),
}

impl From<u8> for ConnectReturnCode {
    fn from(val: u8) -> Self {
        match val {
            0 => Self::Accepted,
            1 => Self::UnacceptableProtocolVersion,
            2 => Self::IdentifierRejected,
            3 => Self::ServerUnavailable,
            4 => Self::BadUserNameOrPassword,
            5 => Self::NotAuthorized,
            _ => Self::Other(val),
        }
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => f.write_str("accepted"),
            Self::UnacceptableProtocolVersion => f.write_str("unacceptable protocol version"),
            Self::IdentifierRejected => f.write_str("identifier rejected"),
            Self::ServerUnavailable => f.write_str("server unavailable"),
            Self::BadUserNameOrPassword => f.write_str("bad user name or password"),
            Self::NotAuthorized => f.write_str("not authorized"),
            Self::Other(code) => write!(f, "return code {code}"),
        }
    }
}

/// Violations of the MQTT wire format or of the request/response ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// Fixed header type nibble outside 1..=14.
    InvalidPacketType(u8),
    /// A packet of the expected type with an invalid body.
    InvalidResponse,
    MalformedPacket,
    PayloadTooLarge,
    InvalidUtf8String,
    /// CONNECT carries a password but no user name.
    PasswordWithoutUsername,
    /// QoS 1 publish without a packet identifier.
    MissingPacketId,
    /// PUBACK acknowledged a different packet identifier.
    PacketIdMismatch { expected: u16, received: u16 },
    /// The broker answered with a packet type we did not wait for.
    UnexpectedPacket(u8),
    /// A complete packet of this type arrived where an acknowledgement was
    /// expected, but its body is malformed.
    UndecodablePacket(u8),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPacketType(t) => write!(f, "invalid packet type {t}"),
            Self::InvalidResponse => f.write_str("invalid response"),
            Self::MalformedPacket => f.write_str("malformed packet"),
            Self::PayloadTooLarge => f.write_str("payload too large"),
            Self::InvalidUtf8String => f.write_str("invalid UTF-8 string"),
            Self::PasswordWithoutUsername => f.write_str("password set without user name"),
            Self::MissingPacketId => f.write_str("missing packet identifier"),
            Self::PacketIdMismatch { expected, received } => {
                write!(f, "puback for packet {received}, expected {expected}")
            }
            Self::UnexpectedPacket(t) => write!(f, "unexpected packet type {t}"),
            Self::UndecodablePacket(t) => write!(f, "undecodable packet of type {t}"),
        }
    }
}

/// Failures of the streaming hexadecimal decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HexError {
    /// Input ended between the two digits of a byte.
    OddDigitCount,
    /// A character that is neither a hex digit nor a space.
    InvalidCharacter(u8),
    /// More bytes than the destination can hold.
    Overflow,
}

impl fmt::Display for HexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OddDigitCount => f.write_str("Uneven digits"),
            Self::InvalidCharacter(c) => write!(f, "Invalid hex character 0x{c:02X}"),
            Self::Overflow => f.write_str("Value too large"),
        }
    }
}

impl core::error::Error for HexError {}

/// Errors of the persistent credential store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StoreError {
    /// The key is not one of the recognized parameters.
    InvalidKey,
    NotFound,
    /// The value exceeds the maximum length for its key.
    ValueTooLong,
    InvalidHex(HexError),
    /// The backend rejected a write or failed to commit it.
    Persistence,
}

impl From<HexError> for StoreError {
    fn from(err: HexError) -> Self {
        StoreError::InvalidHex(err)
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => f.write_str("invalid key"),
            Self::NotFound => f.write_str("not found"),
            Self::ValueTooLong => f.write_str("value too long"),
            Self::InvalidHex(e) => write!(f, "{e}"),
            Self::Persistence => f.write_str("persistence failure"),
        }
    }
}

impl core::error::Error for StoreError {}

/// Errors reported by operator commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandError {
    /// Wrong argument count; usage has been printed.
    Usage,
    /// The parameter name is not valid for the command's domain.
    InvalidParam,
    /// The store failed to read, set or clear a parameter.
    Store(StoreError),
    /// Binary capture was aborted.
    Capture(HexError),
    /// No input arrived on the capture channel within the idle timeout.
    CaptureTimeout,
    /// The capture channel failed or closed before the terminator.
    CaptureInput,
    UnknownCommand,
    /// Writing to the output sink failed.
    Output,
}

impl CommandError {
    /// Non-zero status handed back to the console.
    pub fn exit_code(&self) -> u8 {
        1
    }
}

impl From<StoreError> for CommandError {
    fn from(err: StoreError) -> Self {
        CommandError::Store(err)
    }
}

impl From<HexError> for CommandError {
    fn from(err: HexError) -> Self {
        CommandError::Capture(err)
    }
}

impl From<fmt::Error> for CommandError {
    fn from(_: fmt::Error) -> Self {
        CommandError::Output
    }
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usage => f.write_str("usage error"),
            Self::InvalidParam => f.write_str("invalid parameter"),
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::Capture(e) => write!(f, "capture aborted: {e}"),
            Self::CaptureTimeout => f.write_str("capture timed out"),
            Self::CaptureInput => f.write_str("capture input closed"),
            Self::UnknownCommand => f.write_str("Invalid command"),
            Self::Output => f.write_str("output error"),
        }
    }
}

impl core::error::Error for CommandError {}

/// Failures while opening a TCP connection to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectError {
    /// The hostname did not resolve to an address.
    Dns,
    /// The TCP connection could not be established.
    Refused,
    /// The socket timeout could not be configured or expired.
    Timeout,
}

impl fmt::Display for ConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns => f.write_str("hostname lookup failed"),
            Self::Refused => f.write_str("connection refused"),
            Self::Timeout => f.write_str("connection timed out"),
        }
    }
}

/// Errors raised while bringing up the secure transport session.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    Store(StoreError),
    /// A required parameter is absent from the store.
    MissingParameter(&'static str),
    /// A parameter exceeds the length the session accepts.
    ParameterTooLong(&'static str),
    /// A text parameter is not valid UTF-8.
    InvalidParameter(&'static str),
    /// `mqtt.port` is not a decimal number in 1..=65535.
    InvalidPort,
    /// A stored certificate or key is neither DER nor a decodable PEM block.
    InvalidPem(&'static str),
    /// Verification is required but no CA certificate is configured.
    MissingTrustAnchor,
    Connect(ConnectError),
    /// The TLS handshake failed for a reason other than verification.
    Handshake(TlsError),
    /// The server certificate did not verify against the configured CA.
    Verification(TlsError),
}

impl SessionError {
    /// Returns `true` when the failure came from verifying the server certificate.
    pub fn is_verification_failure(&self) -> bool {
        matches!(self, SessionError::Verification(_))
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        SessionError::Store(err)
    }
}

impl From<ConnectError> for SessionError {
    fn from(err: ConnectError) -> Self {
        SessionError::Connect(err)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "store error: {e}"),
            Self::MissingParameter(key) => write!(f, "missing parameter {key}"),
            Self::ParameterTooLong(key) => write!(f, "parameter {key} too long"),
            Self::InvalidParameter(key) => write!(f, "parameter {key} is not valid text"),
            Self::InvalidPort => f.write_str("invalid port"),
            Self::InvalidPem(key) => write!(f, "invalid PEM in {key}"),
            Self::MissingTrustAnchor => f.write_str("no CA certificate configured"),
            Self::Connect(e) => write!(f, "connect failed: {e}"),
            Self::Handshake(e) => write!(f, "TLS handshake failed: {e:?}"),
            Self::Verification(e) => write!(f, "certificate verification failed: {e:?}"),
        }
    }
}

impl core::error::Error for SessionError {}

/// Failures of a complete uplink run.
#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UplinkError {
    /// The secure session could not be brought up.
    Session(SessionError),
    /// The MQTT connection failed or was refused once the session was up.
    Mqtt(MqttError<LinkError<TlsError>>),
}

impl From<SessionError> for UplinkError {
    fn from(err: SessionError) -> Self {
        UplinkError::Session(err)
    }
}

impl From<MqttError<LinkError<TlsError>>> for UplinkError {
    fn from(err: MqttError<LinkError<TlsError>>) -> Self {
        UplinkError::Mqtt(err)
    }
}

impl fmt::Display for UplinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Session(e) => write!(f, "session: {e}"),
            Self::Mqtt(e) => write!(f, "mqtt: {e}"),
        }
    }
}

impl core::error::Error for UplinkError {}
