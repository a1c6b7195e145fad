//! Handshake message bodies
//!
//! Two fixed-size layouts travel inside [`crate::Packet`] payloads during
//! session establishment. Both carry 32 bytes of random padding so their
//! size alone does not fingerprint the protocol stage.

use std::net::Ipv4Addr;

use rand::rngs::OsRng;
use rand::RngCore;

use crate::crypto::SALT_LEN;
use crate::{Error, Result};

/// Serialized length of [`HandshakeInit`]
pub const HANDSHAKE_INIT_LEN: usize = 72;

/// Serialized length of [`HandshakeResponse`]
pub const HANDSHAKE_RESPONSE_LEN: usize = 113;

/// First message, client to server
///
/// Layout: client public key (32) | timestamp (i64, BE) | padding (32)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeInit {
    pub client_public: [u8; 32],
    pub timestamp: i64,
    pub padding: [u8; 32],
}

impl HandshakeInit {
    /// Build an init message with fresh random padding
    pub fn new(client_public: [u8; 32], timestamp: i64) -> Self {
        let mut padding = [0u8; 32];
        OsRng.fill_bytes(&mut padding);
        Self {
            client_public,
            timestamp,
            padding,
        }
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HANDSHAKE_INIT_LEN);
        buf.extend_from_slice(&self.client_public);
        buf.extend_from_slice(&self.timestamp.to_be_bytes());
        buf.extend_from_slice(&self.padding);
        buf
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HANDSHAKE_INIT_LEN {
            return Err(Error::BodyTooShort {
                expected: HANDSHAKE_INIT_LEN,
                actual: data.len(),
            });
        }

        Ok(Self {
            client_public: data[0..32].try_into().unwrap(),
            timestamp: i64::from_be_bytes(data[32..40].try_into().unwrap()),
            padding: data[40..72].try_into().unwrap(),
        })
    }
}

/// Server's reply, completing key agreement and address assignment
///
/// Layout: server public key (32) | session id (u64, BE) | assigned client
/// address (4) | server tunnel address (4) | prefix length (1) | HKDF salt
/// (32) | padding (32)
///
/// The salt is the server-generated HKDF input; carrying it here is what
/// lets both peers derive the same directional keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeResponse {
    pub server_public: [u8; 32],
    pub session_id: u64,
    pub client_addr: Ipv4Addr,
    pub server_addr: Ipv4Addr,
    pub prefix_len: u8,
    pub salt: [u8; SALT_LEN],
    pub padding: [u8; 32],
}

impl HandshakeResponse {
    /// Build a response with fresh random padding
    pub fn new(
        server_public: [u8; 32],
        session_id: u64,
        client_addr: Ipv4Addr,
        server_addr: Ipv4Addr,
        prefix_len: u8,
        salt: [u8; SALT_LEN],
    ) -> Self {
        let mut padding = [0u8; 32];
        OsRng.fill_bytes(&mut padding);
        Self {
            server_public,
            session_id,
            client_addr,
            server_addr,
            prefix_len,
            salt,
            padding,
        }
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HANDSHAKE_RESPONSE_LEN);
        buf.extend_from_slice(&self.server_public);
        buf.extend_from_slice(&self.session_id.to_be_bytes());
        buf.extend_from_slice(&self.client_addr.octets());
        buf.extend_from_slice(&self.server_addr.octets());
        buf.push(self.prefix_len);
        buf.extend_from_slice(&self.salt);
        buf.extend_from_slice(&self.padding);
        buf
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HANDSHAKE_RESPONSE_LEN {
            return Err(Error::BodyTooShort {
                expected: HANDSHAKE_RESPONSE_LEN,
                actual: data.len(),
            });
        }

        let client: [u8; 4] = data[40..44].try_into().unwrap();
        let server: [u8; 4] = data[44..48].try_into().unwrap();

        Ok(Self {
            server_public: data[0..32].try_into().unwrap(),
            session_id: u64::from_be_bytes(data[32..40].try_into().unwrap()),
            client_addr: Ipv4Addr::from(client),
            server_addr: Ipv4Addr::from(server),
            prefix_len: data[48],
            salt: data[49..81].try_into().unwrap(),
            padding: data[81..113].try_into().unwrap(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_roundtrip() {
        let init = HandshakeInit::new([0x11; 32], 1_720_000_000);
        let encoded = init.marshal();
        assert_eq!(encoded.len(), HANDSHAKE_INIT_LEN);

        let decoded = HandshakeInit::parse(&encoded).unwrap();
        assert_eq!(init, decoded);
    }

    #[test]
    fn test_init_negative_timestamp() {
        let init = HandshakeInit::new([0; 32], -1);
        let decoded = HandshakeInit::parse(&init.marshal()).unwrap();
        assert_eq!(decoded.timestamp, -1);
    }

    #[test]
    fn test_init_too_short() {
        let err = HandshakeInit::parse(&[0u8; HANDSHAKE_INIT_LEN - 1]).unwrap_err();
        assert!(matches!(
            err,
            Error::BodyTooShort {
                expected: HANDSHAKE_INIT_LEN,
                ..
            }
        ));
    }

    #[test]
    fn test_response_roundtrip() {
        let resp = HandshakeResponse::new(
            [0x22; 32],
            0xAABBCCDD_11223344,
            Ipv4Addr::new(10, 8, 0, 2),
            Ipv4Addr::new(10, 8, 0, 1),
            24,
            [0x33; 32],
        );
        let encoded = resp.marshal();
        assert_eq!(encoded.len(), HANDSHAKE_RESPONSE_LEN);

        let decoded = HandshakeResponse::parse(&encoded).unwrap();
        assert_eq!(resp, decoded);
    }

    #[test]
    fn test_response_field_offsets() {
        let resp = HandshakeResponse::new(
            [0xAB; 32],
            1,
            Ipv4Addr::new(10, 8, 0, 5),
            Ipv4Addr::new(10, 8, 0, 1),
            24,
            [0xCD; 32],
        );
        let encoded = resp.marshal();

        assert_eq!(&encoded[40..44], &[10, 8, 0, 5]);
        assert_eq!(&encoded[44..48], &[10, 8, 0, 1]);
        assert_eq!(encoded[48], 24);
        assert_eq!(&encoded[49..81], &[0xCD; 32]);
    }

    #[test]
    fn test_response_too_short() {
        let err = HandshakeResponse::parse(&[0u8; 81]).unwrap_err();
        assert!(matches!(err, Error::BodyTooShort { .. }));
    }

    #[test]
    fn test_padding_is_random() {
        let a = HandshakeInit::new([0; 32], 0);
        let b = HandshakeInit::new([0; 32], 0);
        assert_ne!(a.padding, b.padding);
    }
}
