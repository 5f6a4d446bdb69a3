//! Per-session encryption state
//!
//! Key agreement is an in-band ECDH exchange on P-256: both sides mint an
//! ephemeral keypair and swap raw 64-byte (X||Y) public keys inside
//! ENC/INIT packets. Four symmetric keys are derived from the shared X
//! coordinate with SHA3-256 and a direction label; each MSG/FIN/PING is
//! then encrypted with Salsa20 under a 16-bit counter nonce and signed
//! with a truncated SHA3 MAC.
//!
//! Wire frame:
//!
//! ```text
//! +---- plaintext header ----+-- 6B sig --+-- 2B nonce --+-- ciphertext --+
//! ```
//!
//! Signature verification happens before decryption; any mismatch drops
//! the frame without revealing which check failed.

use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::generic_array::GenericArray;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, PublicKey};
use rand::rngs::OsRng;
use salsa20::cipher::{KeyIvInit, StreamCipher};
use salsa20::Salsa20;
use sha3::{Digest, Sha3_256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::crypto::sas::SAS_DICTIONARY;
use crate::packet::HEADER_LEN;

/// Wire overhead added to an encrypted packet: signature + nonce.
pub const ENCRYPTION_OVERHEAD: usize = SIGNATURE_LEN + 2;

const SIGNATURE_LEN: usize = 6;
const SAS_LABEL: &[u8] = b"authstring";

/// Renegotiate comfortably before the 16-bit nonce space runs out.
const NONCE_RENEGOTIATE_AT: u16 = 0xfff0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    #[error("peer public key is not a valid curve point")]
    InvalidPeerKey,

    #[error("signature mismatch")]
    BadSignature,

    #[error("encrypted frame too short: {0} bytes")]
    FrameTooShort(usize),

    #[error("key exchange has not completed")]
    NotNegotiated,

    #[error("nonce space exhausted")]
    NonceExhausted,
}

/// Which end of the tunnel this encryptor sits on. The client binary
/// always uses `Client`; `Server` exists so tests can stand up a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

impl Role {
    fn label(self) -> &'static [u8] {
        match self {
            Role::Client => b"client",
            Role::Server => b"server",
        }
    }
}

/// Keys derived once the peer's public key is known.
struct SessionKeys {
    their_public: [u8; 64],
    shared: [u8; 32],
    my_write_key: [u8; 32],
    my_mac_key: [u8; 32],
    their_write_key: [u8; 32],
    their_mac_key: [u8; 32],
    my_authenticator: Option<[u8; 32]>,
    their_authenticator: Option<[u8; 32]>,
}

/// Encryption state for one session and one key epoch. Renegotiation
/// builds a fresh `Encryptor` and swaps it in whole.
pub struct Encryptor {
    role: Role,
    secret: EphemeralSecret,
    my_public: [u8; 64],
    preshared: Option<String>,
    keys: Option<SessionKeys>,
    nonce: u16,
}

fn sha3(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

impl Encryptor {
    /// Mint a fresh ephemeral keypair.
    pub fn new(role: Role, preshared: Option<String>) -> Self {
        let secret = EphemeralSecret::random(&mut OsRng);
        let point = secret.public_key().to_encoded_point(false);
        let mut my_public = [0u8; 64];
        // Skip the 0x04 uncompressed-point tag; the wire carries X||Y only.
        my_public.copy_from_slice(&point.as_bytes()[1..65]);

        Self {
            role,
            secret,
            my_public,
            preshared,
            keys: None,
            nonce: 0,
        }
    }

    /// Our raw public key, as it appears in an ENC/INIT packet.
    pub fn public_key(&self) -> [u8; 64] {
        self.my_public
    }

    pub fn is_ready(&self) -> bool {
        self.keys.is_some()
    }

    pub fn nonce(&self) -> u16 {
        self.nonce
    }

    #[cfg(test)]
    pub fn set_nonce(&mut self, nonce: u16) {
        self.nonce = nonce;
    }

    /// Complete the key agreement with the peer's raw public key and
    /// derive the session keys.
    pub fn set_their_public_key(&mut self, their_public: &[u8; 64]) -> Result<(), CryptoError> {
        let point = EncodedPoint::from_untagged_bytes(GenericArray::from_slice(their_public));
        let peer: PublicKey = Option::from(PublicKey::from_encoded_point(&point))
            .ok_or(CryptoError::InvalidPeerKey)?;

        let shared_secret = self.secret.diffie_hellman(&peer);
        let mut shared = [0u8; 32];
        shared.copy_from_slice(shared_secret.raw_secret_bytes());

        let client_write = sha3(&[&shared, b"client_write_key"]);
        let client_mac = sha3(&[&shared, b"client_mac_key"]);
        let server_write = sha3(&[&shared, b"server_write_key"]);
        let server_mac = sha3(&[&shared, b"server_mac_key"]);

        let (my_write_key, my_mac_key, their_write_key, their_mac_key) = match self.role {
            Role::Client => (client_write, client_mac, server_write, server_mac),
            Role::Server => (server_write, server_mac, client_write, client_mac),
        };

        let (my_authenticator, their_authenticator) = match &self.preshared {
            Some(preshared) => {
                let mine = sha3(&[
                    self.role.label(),
                    &shared,
                    &self.my_public,
                    their_public,
                    preshared.as_bytes(),
                ]);
                let peer_role = match self.role {
                    Role::Client => Role::Server,
                    Role::Server => Role::Client,
                };
                // The peer hashes its own key material first.
                let theirs = sha3(&[
                    peer_role.label(),
                    &shared,
                    their_public,
                    &self.my_public,
                    preshared.as_bytes(),
                ]);
                (Some(mine), Some(theirs))
            }
            None => (None, None),
        };

        self.keys = Some(SessionKeys {
            their_public: *their_public,
            shared,
            my_write_key,
            my_mac_key,
            their_write_key,
            their_mac_key,
            my_authenticator,
            their_authenticator,
        });
        self.nonce = 0;

        Ok(())
    }

    /// Whether a preshared secret is in play for this epoch.
    pub fn authenticates(&self) -> bool {
        self.preshared.is_some()
    }

    /// The authenticator we send in our ENC/AUTH packet.
    pub fn my_authenticator(&self) -> Result<[u8; 32], CryptoError> {
        self.keys
            .as_ref()
            .and_then(|k| k.my_authenticator)
            .ok_or(CryptoError::NotNegotiated)
    }

    /// Constant-time check of the peer's ENC/AUTH payload.
    pub fn verify_their_authenticator(&self, theirs: &[u8; 32]) -> bool {
        match self.keys.as_ref().and_then(|k| k.their_authenticator) {
            Some(expected) => expected.ct_eq(theirs).into(),
            None => false,
        }
    }

    /// The six-word short authentication string for this key exchange.
    pub fn sas(&self) -> Result<String, CryptoError> {
        let keys = self.keys.as_ref().ok_or(CryptoError::NotNegotiated)?;
        let hash = sha3(&[SAS_LABEL, &keys.shared, &self.my_public, &keys.their_public]);

        let words: Vec<&str> = hash[..6]
            .iter()
            .map(|&b| SAS_DICTIONARY[b as usize])
            .collect();
        Ok(words.join(" "))
    }

    /// True once enough of the nonce space is burned that a new INIT
    /// round has to happen.
    pub fn should_renegotiate(&self) -> bool {
        self.nonce > NONCE_RENEGOTIATE_AT
    }

    fn salsa_nonce(nonce: u16) -> [u8; 8] {
        let mut out = [0u8; 8];
        out[6..].copy_from_slice(&nonce.to_be_bytes());
        out
    }

    fn apply_keystream(key: &[u8; 32], nonce: u16, data: &mut [u8]) {
        let iv = Self::salsa_nonce(nonce);
        let mut cipher = Salsa20::new(key.into(), (&iv).into());
        cipher.apply_keystream(data);
    }

    /// Encrypt and sign one serialised packet. The 5-byte header stays in
    /// the clear; the body is Salsa20-encrypted under the next nonce.
    pub fn encrypt_packet(&mut self, plain: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let keys = self.keys.as_ref().ok_or(CryptoError::NotNegotiated)?;
        if plain.len() < HEADER_LEN {
            return Err(CryptoError::FrameTooShort(plain.len()));
        }

        let nonce = self.nonce;
        self.nonce = self.nonce.checked_add(1).ok_or(CryptoError::NonceExhausted)?;

        let (header, body) = plain.split_at(HEADER_LEN);
        let mut ciphertext = body.to_vec();
        Self::apply_keystream(&keys.my_write_key, nonce, &mut ciphertext);

        let signature = sha3(&[
            &keys.my_mac_key,
            header,
            &nonce.to_be_bytes(),
            &ciphertext,
        ]);

        let mut out = Vec::with_capacity(plain.len() + ENCRYPTION_OVERHEAD);
        out.extend_from_slice(header);
        out.extend_from_slice(&signature[..SIGNATURE_LEN]);
        out.extend_from_slice(&nonce.to_be_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Verify the signature and decrypt one frame back into serialised
    /// packet bytes. Returns the recovered nonce alongside.
    pub fn decrypt_packet(&self, frame: &[u8]) -> Result<(u16, Vec<u8>), CryptoError> {
        let keys = self.keys.as_ref().ok_or(CryptoError::NotNegotiated)?;
        if frame.len() < HEADER_LEN + ENCRYPTION_OVERHEAD {
            return Err(CryptoError::FrameTooShort(frame.len()));
        }

        let header = &frame[..HEADER_LEN];
        let their_signature = &frame[HEADER_LEN..HEADER_LEN + SIGNATURE_LEN];
        let nonce_bytes = &frame[HEADER_LEN + SIGNATURE_LEN..HEADER_LEN + ENCRYPTION_OVERHEAD];
        let ciphertext = &frame[HEADER_LEN + ENCRYPTION_OVERHEAD..];

        let expected = sha3(&[&keys.their_mac_key, header, nonce_bytes, ciphertext]);
        let matches: bool = their_signature.ct_eq(&expected[..SIGNATURE_LEN]).into();
        if !matches {
            return Err(CryptoError::BadSignature);
        }

        let nonce = u16::from_be_bytes([nonce_bytes[0], nonce_bytes[1]]);
        let mut plain = ciphertext.to_vec();
        Self::apply_keystream(&keys.their_write_key, nonce, &mut plain);

        let mut out = Vec::with_capacity(HEADER_LEN + plain.len());
        out.extend_from_slice(header);
        out.extend_from_slice(&plain);
        Ok((nonce, out))
    }
}
