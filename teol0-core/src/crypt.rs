//! Optional payload transform applied before encode and after decode.
//!
//! The codec never sees plaintext vs ciphertext; the connection runs every payload except
//! login and crypto-key through the installed [`PayloadCipher`].

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CipherError {
    #[error("invalid key")]
    Key,
    #[error("encryption failed")]
    Encrypt,
    #[error("decryption failed")]
    Decrypt,
    #[error("sealed payload shorter than its nonce")]
    Truncated,
    #[error("nonce {got} replayed (last accepted {last})")]
    Replay { got: u64, last: u64 },
}

/// Payload transform seam. One instance per connection.
pub trait PayloadCipher: Send {
    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;
    fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// Which end of the link this cipher seals for. Keeps the two directions' nonces disjoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Relay,
}

impl Role {
    fn tag(self) -> u8 {
        match self {
            Role::Client => 0,
            Role::Relay => 1,
        }
    }

    fn peer(self) -> Role {
        match self {
            Role::Client => Role::Relay,
            Role::Relay => Role::Client,
        }
    }
}

/// Derive a 32-byte session key from a shared secret.
pub fn derive_session_key(shared_secret: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(b"teol0-session-v1");
    hasher.update(shared_secret);
    hasher.finalize().into()
}

const NONCE_PREFIX_LEN: usize = 8;

/// ChaCha20-Poly1305 with a 64-bit counter nonce carried in front of each sealed payload.
/// Sealed layout: counter (u64 LE) + ciphertext + tag.
pub struct ChaChaCipher {
    cipher: ChaCha20Poly1305,
    role: Role,
    next_send: u64,
    last_recv: Option<u64>,
}

impl ChaChaCipher {
    pub fn new(key: &[u8; 32], role: Role) -> Result<Self, CipherError> {
        let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| CipherError::Key)?;
        Ok(Self {
            cipher,
            role,
            next_send: 0,
            last_recv: None,
        })
    }

    fn nonce(role: Role, counter: u64) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0] = role.tag();
        out[4..12].copy_from_slice(&counter.to_le_bytes());
        out
    }
}

impl PayloadCipher for ChaChaCipher {
    fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let counter = self.next_send;
        let nonce = Self::nonce(self.role, counter);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CipherError::Encrypt)?;
        self.next_send = counter.checked_add(1).ok_or(CipherError::Encrypt)?;
        let mut out = Vec::with_capacity(NONCE_PREFIX_LEN + ciphertext.len());
        out.extend_from_slice(&counter.to_le_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn open(&mut self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < NONCE_PREFIX_LEN {
            return Err(CipherError::Truncated);
        }
        let (prefix, ciphertext) = sealed.split_at(NONCE_PREFIX_LEN);
        let mut raw = [0u8; NONCE_PREFIX_LEN];
        raw.copy_from_slice(prefix);
        let counter = u64::from_le_bytes(raw);
        if let Some(last) = self.last_recv {
            if counter <= last {
                return Err(CipherError::Replay { got: counter, last });
            }
        }
        let nonce = Self::nonce(self.role.peer(), counter);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt)?;
        self.last_recv = Some(counter);
        Ok(plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn pair() -> (ChaChaCipher, ChaChaCipher) {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let key = derive_session_key(&secret);
        (
            ChaChaCipher::new(&key, Role::Client).unwrap(),
            ChaChaCipher::new(&key, Role::Relay).unwrap(),
        )
    }

    #[test]
    fn seal_open_both_directions() {
        let (mut client, mut relay) = pair();
        let sealed = client.seal(b"hello relay").unwrap();
        assert_eq!(relay.open(&sealed).unwrap(), b"hello relay");
        let back = relay.seal(b"hello client").unwrap();
        assert_eq!(client.open(&back).unwrap(), b"hello client");
    }

    #[test]
    fn own_direction_cannot_be_opened() {
        let (mut client, _) = pair();
        let sealed = client.seal(b"x").unwrap();
        assert_eq!(client.open(&sealed), Err(CipherError::Decrypt));
    }

    #[test]
    fn replay_is_rejected() {
        let (mut client, mut relay) = pair();
        let first = client.seal(b"1").unwrap();
        let second = client.seal(b"2").unwrap();
        relay.open(&first).unwrap();
        relay.open(&second).unwrap();
        assert!(matches!(relay.open(&first), Err(CipherError::Replay { got: 0, last: 1 })));
    }

    #[test]
    fn tampered_payload_fails() {
        let (mut client, mut relay) = pair();
        let mut sealed = client.seal(b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert_eq!(relay.open(&sealed), Err(CipherError::Decrypt));
        assert_eq!(relay.open(&[1, 2]), Err(CipherError::Truncated));
    }
}
