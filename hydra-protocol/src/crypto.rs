//! Session cryptography
//!
//! Ephemeral X25519 key agreement, HKDF-SHA256 key schedule, and
//! XChaCha20-Poly1305 sealing with a 24-byte nonce embedded in the wire
//! ciphertext. The nonce is the little-endian send counter in its low 8
//! bytes and fresh random bytes in the remaining 16, so uniqueness holds
//! even if a counter restarts.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Error, Result};

/// Length of X25519 keys and AEAD keys
pub const KEY_LEN: usize = 32;

/// Length of the extended AEAD nonce
pub const NONCE_LEN: usize = 24;

/// Length of the Poly1305 authentication tag
pub const TAG_LEN: usize = 16;

/// Length of the HKDF salt exchanged during the handshake
pub const SALT_LEN: usize = 32;

/// HKDF info label for the session key schedule
const HKDF_INFO: &[u8] = b"hydravpn-session-keys";

/// Which side of the handshake this peer played
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The dialing client
    Initiator,
    /// The accepting server
    Responder,
}

/// Ephemeral X25519 key pair, created once per session and never persisted
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the system CSPRNG
    ///
    /// The private scalar is clamped per RFC 7748 by the dalek
    /// implementation.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// The 32-byte public point
    pub fn public_bytes(&self) -> [u8; KEY_LEN] {
        self.public.to_bytes()
    }

    /// X25519 shared secret with a peer's public key
    ///
    /// An all-zero result means the peer supplied a low-order point; that
    /// is a fatal handshake failure, not a usable secret.
    pub fn shared_secret(&self, peer_public: &[u8; KEY_LEN]) -> Result<[u8; KEY_LEN]> {
        let peer = PublicKey::from(*peer_public);
        let shared = self.secret.diffie_hellman(&peer);
        if !shared.was_contributory() {
            return Err(Error::LowOrderPoint);
        }
        Ok(shared.to_bytes())
    }
}

/// Generate a random HKDF salt
pub fn generate_salt() -> [u8; SALT_LEN] {
    let mut salt = [0u8; SALT_LEN];
    OsRng.fill_bytes(&mut salt);
    salt
}

/// The two directional AEAD keys derived for one session
///
/// The initiator's send key equals the responder's receive key and vice
/// versa. Keys are wiped on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SessionKeys {
    send: [u8; KEY_LEN],
    recv: [u8; KEY_LEN],
}

impl SessionKeys {
    pub fn send_key(&self) -> &[u8; KEY_LEN] {
        &self.send
    }

    pub fn recv_key(&self) -> &[u8; KEY_LEN] {
        &self.recv
    }

    /// Consume the keys into a sealing and an opening half
    pub fn into_cipher_pair(self) -> (Sealer, Opener) {
        (Sealer::new(&self.send), Opener::new(&self.recv))
    }
}

/// Derive the directional session keys from a shared secret
///
/// HKDF-SHA256 with the handshake salt and the fixed info label, expanded
/// to two consecutive 32-byte keys K1 and K2. The initiator sends with K1
/// and receives with K2; the responder swaps them.
pub fn derive_session_keys(
    shared_secret: &[u8; KEY_LEN],
    salt: &[u8; SALT_LEN],
    role: Role,
) -> Result<SessionKeys> {
    let hk = Hkdf::<Sha256>::new(Some(salt.as_slice()), shared_secret);
    let mut okm = [0u8; 2 * KEY_LEN];
    hk.expand(HKDF_INFO, &mut okm)
        .map_err(|_| Error::KeyDerivation)?;

    let mut k1 = [0u8; KEY_LEN];
    let mut k2 = [0u8; KEY_LEN];
    k1.copy_from_slice(&okm[..KEY_LEN]);
    k2.copy_from_slice(&okm[KEY_LEN..]);
    okm.zeroize();

    let (send, recv) = match role {
        Role::Initiator => (k1, k2),
        Role::Responder => (k2, k1),
    };

    Ok(SessionKeys { send, recv })
}

/// Outbound AEAD state: key plus monotonically increasing send counter
pub struct Sealer {
    cipher: XChaCha20Poly1305,
    counter: u64,
}

impl Sealer {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.into()),
            counter: 0,
        }
    }

    /// Seal a plaintext; the wire form is `nonce || ciphertext+tag`
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        nonce[..8].copy_from_slice(&self.counter.to_le_bytes());
        OsRng.fill_bytes(&mut nonce[8..]);
        self.counter = self.counter.wrapping_add(1);

        let ciphertext = self
            .cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext)
            .map_err(|_| Error::Encrypt)?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }
}

/// Inbound AEAD state
pub struct Opener {
    cipher: XChaCha20Poly1305,
}

impl Opener {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(key.into()),
        }
    }

    /// Open a wire ciphertext produced by [`Sealer::seal`]
    ///
    /// A failure leaves no state behind; the caller drops the packet and
    /// the session continues.
    pub fn open(&self, data: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(Error::Decrypt);
        }

        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        self.cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| Error::Decrypt)
    }
}
