//! # MQTT Packet Structures and Serialization
//!
//! The MQTT 3.1.1 control packets a publishing client needs, with the traits for
//! encoding them into and decoding them from a byte buffer.
//!
//! Encoders reserve four bytes for the remaining length, write the body, then
//! compact the body down behind the real length prefix.

use crate::error::{CodecError, MqttError, ProtocolError};
use crate::util::{self, read_u16, read_utf8_string, write_binary_data, write_u8, write_u16, write_utf8_string};

/// Protocol level byte for MQTT 3.1.1.
pub const PROTOCOL_LEVEL: u8 = 4;

/// Represents the Quality of Service (QoS) levels for MQTT messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
}

/// Control packet types, taken from the high nibble of the fixed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// Extracts the packet type from a fixed header byte.
    pub fn from_header(byte: u8) -> Result<Self, CodecError> {
        Ok(match byte >> 4 {
            1 => Self::Connect,
            2 => Self::ConnAck,
            3 => Self::Publish,
            4 => Self::PubAck,
            5 => Self::PubRec,
            6 => Self::PubRel,
            7 => Self::PubComp,
            8 => Self::Subscribe,
            9 => Self::SubAck,
            10 => Self::Unsubscribe,
            11 => Self::UnsubAck,
            12 => Self::PingReq,
            13 => Self::PingResp,
            14 => Self::Disconnect,
            other => {
                return Err(MqttError::Protocol(ProtocolError::InvalidPacketType(other)));
            }
        })
    }
}

/// A trait for packets that can be encoded into a byte buffer.
pub trait EncodePacket {
    /// Writes the complete packet to the start of `buf` and returns its length.
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError>;
}

/// A trait for packets that can be decoded from a byte buffer.
pub trait DecodePacket<'a>: Sized {
    /// Decodes a complete packet, fixed header included.
    fn decode(buf: &'a [u8]) -> Result<Self, CodecError>;
}

/// The packets a client can receive from a broker.
#[derive(Debug)]
pub enum MqttPacket<'a> {
    ConnAck(ConnAck),
    Publish(Publish<'a>),
    PubAck(PubAck),
    PingResp,
    /// A well-formed header of a type a publishing client never expects.
    Other(PacketType),
}

/// Decodes a complete packet received from the broker.
pub fn decode<'a, T>(buf: &'a [u8]) -> Result<MqttPacket<'a>, MqttError<T>> {
    let header = *buf
        .first()
        .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
    let packet_type = PacketType::from_header(header).map_err(MqttError::cast_transport_error)?;
    let packet = match packet_type {
        PacketType::ConnAck => {
            MqttPacket::ConnAck(ConnAck::decode(buf).map_err(MqttError::cast_transport_error)?)
        }
        PacketType::Publish => {
            MqttPacket::Publish(Publish::decode(buf).map_err(MqttError::cast_transport_error)?)
        }
        PacketType::PubAck => {
            MqttPacket::PubAck(PubAck::decode(buf).map_err(MqttError::cast_transport_error)?)
        }
        PacketType::PingResp => {
            PingResp::decode(buf).map_err(MqttError::cast_transport_error)?;
            MqttPacket::PingResp
        }
        other => MqttPacket::Other(other),
    };
    Ok(packet)
}

/// Writes the remaining length behind `header` and moves the body into place.
///
/// The body must have been written starting at offset 5.
fn finish_packet(buf: &mut [u8], body_end: usize) -> Result<usize, CodecError> {
    const BODY_START: usize = 5;
    let remaining_len = body_end - BODY_START;
    let len_bytes = util::write_variable_byte_integer_len(&mut buf[1..], remaining_len)?;
    let header_len = 1 + len_bytes;
    buf.copy_within(BODY_START..body_end, header_len);
    Ok(header_len + remaining_len)
}

/// Checks the fixed header of a packet with a fixed two byte body.
fn expect_short_packet(buf: &[u8], header: u8, body_len: usize) -> Result<usize, CodecError> {
    if buf.first() != Some(&header) {
        return Err(MqttError::Protocol(ProtocolError::InvalidResponse));
    }
    let mut cursor = 1;
    let remaining = util::read_variable_byte_integer(&mut cursor, buf)?;
    if remaining != body_len || buf.len() < cursor + remaining {
        return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
    }
    Ok(cursor)
}

// --- CONNECT Packet ---
#[derive(Debug)]
pub struct Connect<'a> {
    pub clean_session: bool,
    pub keep_alive: u16,
    pub client_id: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a [u8]>,
}

impl<'a> Connect<'a> {
    pub fn new(client_id: &'a str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            client_id,
            keep_alive,
            clean_session,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: Option<&'a str>, password: Option<&'a [u8]>) -> Self {
        self.username = username;
        self.password = password;
        self
    }
}

impl EncodePacket for Connect<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        if self.password.is_some() && self.username.is_none() {
            return Err(MqttError::Protocol(ProtocolError::PasswordWithoutUsername));
        }
        let mut cursor = 0;
        write_u8(&mut cursor, buf, 0x10)?;
        cursor = 5;
        write_utf8_string(&mut cursor, buf, "MQTT")?;
        write_u8(&mut cursor, buf, PROTOCOL_LEVEL)?;
        let mut flags = 0;
        if self.username.is_some() {
            flags |= 0x80;
        }
        if self.password.is_some() {
            flags |= 0x40;
        }
        if self.clean_session {
            flags |= 0x02;
        }
        write_u8(&mut cursor, buf, flags)?;
        write_u16(&mut cursor, buf, self.keep_alive)?;
        write_utf8_string(&mut cursor, buf, self.client_id)?;
        if let Some(username) = self.username {
            write_utf8_string(&mut cursor, buf, username)?;
        }
        if let Some(password) = self.password {
            write_binary_data(&mut cursor, buf, password)?;
        }
        finish_packet(buf, cursor)
    }
}

// --- CONNACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnAck {
    pub session_present: bool,
    pub return_code: u8,
}

impl ConnAck {
    /// The broker accepted the connection.
    pub fn is_accepted(&self) -> bool {
        self.return_code == 0
    }
}

impl DecodePacket<'_> for ConnAck {
    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let cursor = expect_short_packet(buf, 0x20, 2)?;
        let ack_flags = buf[cursor];
        if ack_flags & 0xFE != 0 {
            return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
        }
        Ok(Self {
            session_present: ack_flags & 0x01 != 0,
            return_code: buf[cursor + 1],
        })
    }
}

// --- PUBLISH Packet ---
#[derive(Debug)]
pub struct Publish<'a> {
    pub topic: &'a str,
    pub qos: QoS,
    pub payload: &'a [u8],
    pub packet_id: Option<u16>,
}

impl<'a> DecodePacket<'a> for Publish<'a> {
    fn decode(buf: &'a [u8]) -> Result<Self, CodecError> {
        let header = *buf
            .first()
            .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;
        let qos = match (header >> 1) & 0x03 {
            0 => QoS::AtMostOnce,
            1 => QoS::AtLeastOnce,
            _ => return Err(MqttError::Protocol(ProtocolError::MalformedPacket)),
        };

        let mut cursor = 1;
        let remaining_len = util::read_variable_byte_integer(&mut cursor, buf)?;
        let end = cursor + remaining_len;
        if buf.len() < end {
            return Err(MqttError::Protocol(ProtocolError::MalformedPacket));
        }

        let topic = read_utf8_string(&mut cursor, buf)?;
        let packet_id = match qos {
            QoS::AtMostOnce => None,
            QoS::AtLeastOnce => Some(read_u16(&mut cursor, buf)?),
        };
        let payload = buf
            .get(cursor..end)
            .ok_or(MqttError::Protocol(ProtocolError::MalformedPacket))?;

        Ok(Publish {
            topic,
            qos,
            payload,
            packet_id,
        })
    }
}

impl EncodePacket for Publish<'_> {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut cursor = 0;
        // DUP and RETAIN are always clear
        write_u8(&mut cursor, buf, 0x30 | ((self.qos as u8) << 1))?;
        cursor = 5;
        write_utf8_string(&mut cursor, buf, self.topic)?;
        if self.qos == QoS::AtLeastOnce {
            let id = self
                .packet_id
                .ok_or(MqttError::Protocol(ProtocolError::MissingPacketId))?;
            write_u16(&mut cursor, buf, id)?;
        }
        util::write_bytes(&mut cursor, buf, self.payload)?;
        finish_packet(buf, cursor)
    }
}

// --- PUBACK Packet ---
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PubAck {
    pub packet_id: u16,
}

impl DecodePacket<'_> for PubAck {
    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let mut cursor = expect_short_packet(buf, 0x40, 2)?;
        Ok(PubAck {
            packet_id: read_u16(&mut cursor, buf)?,
        })
    }
}

// --- PINGREQ Packet ---
#[derive(Debug)]
pub struct PingReq;

impl EncodePacket for PingReq {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut cursor = 0;
        util::write_bytes(&mut cursor, buf, &[0xC0, 0x00])?;
        Ok(cursor)
    }
}

// --- PINGRESP Packet ---
#[derive(Debug)]
pub struct PingResp;

impl DecodePacket<'_> for PingResp {
    fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        expect_short_packet(buf, 0xD0, 0)?;
        Ok(PingResp)
    }
}

// --- DISCONNECT Packet ---
#[derive(Debug)]
pub struct Disconnect;

impl EncodePacket for Disconnect {
    fn encode(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let mut cursor = 0;
        util::write_bytes(&mut cursor, buf, &[0xE0, 0x00])?;
        Ok(cursor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    #[test]
    fn connect_without_credentials() {
        let mut buf = [0u8; 64];
        let len = Connect::new("ESP-0A1B2C3D4E5F", 20, true).encode(&mut buf).unwrap();
        let mut expected = [0u8; 30];
        expected[..12].copy_from_slice(&[
            0x10, 28, 0x00, 0x04, b'M', b'Q', b'T', b'T', 0x04, 0x02, 0x00, 20,
        ]);
        expected[12..14].copy_from_slice(&[0x00, 16]);
        expected[14..].copy_from_slice(b"ESP-0A1B2C3D4E5F");
        assert_eq!(&buf[..len], &expected);
    }

    #[test]
    fn connect_with_credentials_sets_flags_and_payload() {
        let mut buf = [0u8; 64];
        let len = Connect::new("dev", 20, true)
            .with_credentials(Some("user"), Some(b"pw"))
            .encode(&mut buf)
            .unwrap();
        assert_eq!(buf[0], 0x10);
        assert_eq!(buf[1] as usize, len - 2);
        assert_eq!(buf[9], 0x80 | 0x40 | 0x02);
        assert_eq!(
            &buf[12..len],
            &[0, 3, b'd', b'e', b'v', 0, 4, b'u', b's', b'e', b'r', 0, 2, b'p', b'w']
        );
    }

    #[test]
    fn connect_rejects_password_without_username() {
        let mut buf = [0u8; 64];
        let err = Connect::new("dev", 20, true)
            .with_credentials(None, Some(b"pw"))
            .encode(&mut buf);
        assert!(matches!(
            err,
            Err(MqttError::Protocol(ProtocolError::PasswordWithoutUsername))
        ));
    }

    #[test]
    fn publish_qos1_carries_packet_id() {
        let mut buf = [0u8; 32];
        let packet = Publish {
            topic: "test",
            qos: QoS::AtLeastOnce,
            payload: b"hi",
            packet_id: Some(7),
        };
        let len = packet.encode(&mut buf).unwrap();
        assert_eq!(
            &buf[..len],
            &[0x32, 10, 0, 4, b't', b'e', b's', b't', 0, 7, b'h', b'i']
        );
    }

    #[test]
    fn publish_qos0_has_no_packet_id() {
        let mut buf = [0u8; 32];
        let packet = Publish {
            topic: "t",
            qos: QoS::AtMostOnce,
            payload: b"x",
            packet_id: Some(9),
        };
        let len = packet.encode(&mut buf).unwrap();
        assert_eq!(&buf[..len], &[0x30, 4, 0, 1, b't', b'x']);
    }

    #[test]
    fn publish_qos1_requires_packet_id() {
        let mut buf = [0u8; 32];
        let packet = Publish {
            topic: "t",
            qos: QoS::AtLeastOnce,
            payload: b"x",
            packet_id: None,
        };
        assert!(matches!(
            packet.encode(&mut buf),
            Err(MqttError::Protocol(ProtocolError::MissingPacketId))
        ));
    }

    #[test]
    fn publish_with_long_payload_uses_two_length_bytes() {
        let payload = [0x55u8; 200];
        let mut buf = [0u8; 256];
        let packet = Publish {
            topic: "t",
            qos: QoS::AtMostOnce,
            payload: &payload,
            packet_id: None,
        };
        let len = packet.encode(&mut buf).unwrap();
        assert_eq!(len, 3 + 3 + 200);
        assert_eq!(&buf[..3], &[0x30, 0xCB, 0x01]);
        assert_eq!(&buf[3..6], &[0, 1, b't']);
        assert!(buf[6..len].iter().all(|b| *b == 0x55));
    }

    #[test]
    fn publish_reports_small_buffer() {
        let mut buf = [0u8; 8];
        let packet = Publish {
            topic: "topic",
            qos: QoS::AtMostOnce,
            payload: b"payload",
            packet_id: None,
        };
        assert!(matches!(packet.encode(&mut buf), Err(MqttError::BufferTooSmall)));
    }

    #[test]
    fn connack_decoding() {
        let ack = ConnAck::decode(&[0x20, 0x02, 0x00, 0x00]).unwrap();
        assert!(ack.is_accepted());
        assert!(!ack.session_present);

        let refused = ConnAck::decode(&[0x20, 0x02, 0x00, 0x05]).unwrap();
        assert!(!refused.is_accepted());
        assert_eq!(refused.return_code, 5);

        assert!(ConnAck::decode(&[0x20, 0x03, 0x00, 0x00, 0x00]).is_err());
        assert!(ConnAck::decode(&[0x20, 0x02, 0x02, 0x00]).is_err());
        assert!(ConnAck::decode(&[0x40, 0x02, 0x00, 0x00]).is_err());
    }

    #[test]
    fn puback_decoding() {
        let ack = PubAck::decode(&[0x40, 0x02, 0x12, 0x34]).unwrap();
        assert_eq!(ack.packet_id, 0x1234);
        assert!(PubAck::decode(&[0x40, 0x02, 0x12]).is_err());
    }

    #[test]
    fn ping_and_disconnect_are_two_bytes() {
        let mut buf = [0u8; 2];
        assert_eq!(PingReq.encode(&mut buf).unwrap(), 2);
        assert_eq!(buf, [0xC0, 0x00]);
        assert_eq!(Disconnect.encode(&mut buf).unwrap(), 2);
        assert_eq!(buf, [0xE0, 0x00]);
        assert!(PingResp::decode(&[0xD0, 0x00]).is_ok());
    }

    #[test]
    fn decode_dispatches_on_type() {
        assert!(matches!(
            decode::<Infallible>(&[0x40, 0x02, 0x00, 0x01]),
            Ok(MqttPacket::PubAck(PubAck { packet_id: 1 }))
        ));
        assert!(matches!(
            decode::<Infallible>(&[0x90, 0x03, 0x00, 0x01, 0x00]),
            Ok(MqttPacket::Other(PacketType::SubAck))
        ));
        assert!(matches!(
            decode::<Infallible>(&[0xF0, 0x00]),
            Err(MqttError::Protocol(ProtocolError::InvalidPacketType(15)))
        ));
        assert!(matches!(
            decode::<Infallible>(&[0x00, 0x00]),
            Err(MqttError::Protocol(ProtocolError::InvalidPacketType(0)))
        ));

        let publish = [0x32, 0x07, 0x00, 0x01, b'a', 0x00, 0x09, b'o', b'k'];
        match decode::<Infallible>(&publish) {
            Ok(MqttPacket::Publish(p)) => {
                assert_eq!(p.topic, "a");
                assert_eq!(p.packet_id, Some(9));
                assert_eq!(p.payload, b"ok");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
