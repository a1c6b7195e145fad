//! Packet structure and wire serialization

use crate::{Error, Result};

/// Magic bytes identifying a HydraVPN packet ('H', 'V')
pub const MAGIC: [u8; 2] = [0x48, 0x56];

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Header length in bytes: magic(2) + version(1) + type(1) + session_id(8) + length(2)
pub const HEADER_LEN: usize = 14;

/// Maximum payload length carried by one packet
pub const MAX_PAYLOAD: usize = 65535;

/// Packet types
///
/// The type byte is carried raw in the header; [`Packet::kind`] maps it back
/// to this enum so that dispatch sites can gate on it explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    HandshakeInit = 0x01,
    HandshakeResponse = 0x02,
    Data = 0x03,
    KeepAlive = 0x04,
    Disconnect = 0x05,
}

impl PacketType {
    /// Map a raw type byte to a known packet type
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(PacketType::HandshakeInit),
            0x02 => Some(PacketType::HandshakeResponse),
            0x03 => Some(PacketType::Data),
            0x04 => Some(PacketType::KeepAlive),
            0x05 => Some(PacketType::Disconnect),
            _ => None,
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketType::HandshakeInit => write!(f, "HANDSHAKE_INIT"),
            PacketType::HandshakeResponse => write!(f, "HANDSHAKE_RESPONSE"),
            PacketType::Data => write!(f, "DATA"),
            PacketType::KeepAlive => write!(f, "KEEPALIVE"),
            PacketType::Disconnect => write!(f, "DISCONNECT"),
        }
    }
}

/// A complete wire packet: 14-byte header plus payload
///
/// ```text
/// +--------+--------+---------+--------+-----------------------+----------------+
/// | 0x48   | 0x56   | version |  type  | session id (u64, BE)  | length (u16 BE)|
/// +--------+--------+---------+--------+-----------------------+----------------+
/// | payload ...                                                                 |
/// +-----------------------------------------------------------------------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Raw type byte; see [`PacketType`]
    pub packet_type: u8,
    /// Session identifier (zero before a session is established)
    pub session_id: u64,
    /// Payload bytes; `header.length == payload.len()`
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a new packet. The payload must not exceed [`MAX_PAYLOAD`].
    pub fn new(packet_type: PacketType, session_id: u64, payload: Vec<u8>) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD);
        Self {
            packet_type: packet_type as u8,
            session_id,
            payload,
        }
    }

    /// Create a handshake init packet (session id is not yet assigned)
    pub fn handshake_init(payload: Vec<u8>) -> Self {
        Self::new(PacketType::HandshakeInit, 0, payload)
    }

    /// Create a handshake response packet
    pub fn handshake_response(session_id: u64, payload: Vec<u8>) -> Self {
        Self::new(PacketType::HandshakeResponse, session_id, payload)
    }

    /// Create a data packet carrying sealed tunnel bytes
    pub fn data(session_id: u64, ciphertext: Vec<u8>) -> Self {
        Self::new(PacketType::Data, session_id, ciphertext)
    }

    /// Create an empty keepalive packet
    pub fn keepalive(session_id: u64) -> Self {
        Self::new(PacketType::KeepAlive, session_id, Vec::new())
    }

    /// Create an empty disconnect packet
    pub fn disconnect(session_id: u64) -> Self {
        Self::new(PacketType::Disconnect, session_id, Vec::new())
    }

    /// The packet type, if the type byte is a known value
    pub fn kind(&self) -> Option<PacketType> {
        PacketType::from_u8(self.packet_type)
    }

    /// Serialize to wire bytes
    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&MAGIC);
        buf.push(PROTOCOL_VERSION);
        buf.push(self.packet_type);
        buf.extend_from_slice(&self.session_id.to_be_bytes());
        buf.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a packet from wire bytes
    ///
    /// Validates, in order: minimum length, magic, version, and that the
    /// declared payload length matches the actual payload. The type byte is
    /// not validated here; callers gate on [`Packet::kind`].
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::PacketTooShort {
                expected: HEADER_LEN,
                actual: data.len(),
            });
        }

        if data[0] != MAGIC[0] || data[1] != MAGIC[1] {
            return Err(Error::BadMagic([data[0], data[1]]));
        }

        if data[2] != PROTOCOL_VERSION {
            return Err(Error::BadVersion(data[2]));
        }

        let packet_type = data[3];
        let session_id = u64::from_be_bytes(data[4..12].try_into().unwrap());
        let declared = u16::from_be_bytes([data[12], data[13]]) as usize;

        if declared != data.len() - HEADER_LEN {
            return Err(Error::LengthMismatch {
                declared,
                actual: data.len() - HEADER_LEN,
            });
        }

        Ok(Self {
            packet_type,
            session_id,
            payload: data[HEADER_LEN..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marshal_parse_roundtrip() {
        let packet = Packet::data(0xDEADBEEF_CAFEBABE, vec![1, 2, 3, 4, 5]);
        let encoded = packet.marshal();
        assert_eq!(encoded.len(), HEADER_LEN + 5);

        let decoded = Packet::parse(&encoded).unwrap();
        assert_eq!(packet, decoded);
    }

    #[test]
    fn test_empty_payload_roundtrip() {
        let packet = Packet::keepalive(42);
        let encoded = packet.marshal();
        assert_eq!(encoded.len(), HEADER_LEN);

        let decoded = Packet::parse(&encoded).unwrap();
        assert_eq!(decoded.kind(), Some(PacketType::KeepAlive));
        assert_eq!(decoded.session_id, 42);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_header_layout() {
        let packet = Packet::data(0x0102030405060708, vec![0xAA; 3]);
        let encoded = packet.marshal();

        assert_eq!(&encoded[..2], &[0x48, 0x56]);
        assert_eq!(encoded[2], 0x01);
        assert_eq!(encoded[3], PacketType::Data as u8);
        assert_eq!(&encoded[4..12], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&encoded[12..14], &[0, 3]);
    }

    #[test]
    fn test_too_short() {
        let err = Packet::parse(&[0x48, 0x56, 0x01]).unwrap_err();
        assert!(matches!(err, Error::PacketTooShort { .. }));
    }

    #[test]
    fn test_bad_magic() {
        let mut encoded = Packet::keepalive(1).marshal();
        encoded[0] = 0x00;
        assert!(matches!(
            Packet::parse(&encoded).unwrap_err(),
            Error::BadMagic(_)
        ));

        let mut encoded = Packet::keepalive(1).marshal();
        encoded[1] = 0x00;
        assert!(matches!(
            Packet::parse(&encoded).unwrap_err(),
            Error::BadMagic(_)
        ));
    }

    #[test]
    fn test_bad_version() {
        let mut encoded = Packet::keepalive(1).marshal();
        encoded[2] = 0x02;
        assert!(matches!(
            Packet::parse(&encoded).unwrap_err(),
            Error::BadVersion(0x02)
        ));
    }

    #[test]
    fn test_length_mismatch() {
        let mut encoded = Packet::data(1, vec![0; 8]).marshal();
        // Declare one byte more than the payload actually has
        encoded[13] = 9;
        assert!(matches!(
            Packet::parse(&encoded).unwrap_err(),
            Error::LengthMismatch {
                declared: 9,
                actual: 8
            }
        ));
    }

    #[test]
    fn test_single_bit_tamper_is_malformed() {
        // Flipping any single bit in the magic, version, or length field
        // must make the packet unparseable.
        let packet = Packet::data(7, vec![0x55; 16]);
        let reference = packet.marshal();

        for byte_idx in [0usize, 1, 2, 12, 13] {
            for bit in 0..8 {
                let mut tampered = reference.clone();
                tampered[byte_idx] ^= 1 << bit;
                assert!(
                    Packet::parse(&tampered).is_err(),
                    "bit {} of byte {} did not invalidate the packet",
                    bit,
                    byte_idx
                );
            }
        }
    }

    #[test]
    fn test_type_byte_not_validated_by_parse() {
        let mut encoded = Packet::keepalive(9).marshal();
        encoded[3] = 0xFF;

        let decoded = Packet::parse(&encoded).unwrap();
        assert_eq!(decoded.packet_type, 0xFF);
        assert_eq!(decoded.kind(), None);
    }

    #[test]
    fn test_packet_type_from_u8() {
        assert_eq!(PacketType::from_u8(1), Some(PacketType::HandshakeInit));
        assert_eq!(PacketType::from_u8(5), Some(PacketType::Disconnect));
        assert_eq!(PacketType::from_u8(0), None);
        assert_eq!(PacketType::from_u8(6), None);
    }

    #[test]
    fn test_max_payload_roundtrip() {
        let packet = Packet::data(1, vec![0xA5; MAX_PAYLOAD]);
        let decoded = Packet::parse(&packet.marshal()).unwrap();
        assert_eq!(decoded.payload.len(), MAX_PAYLOAD);
    }
}
