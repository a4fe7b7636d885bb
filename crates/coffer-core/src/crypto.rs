//! Crypto engine: PBKDF2-HMAC-SHA256 key derivation + AES-256-GCM.
//!
//! Sealed layout: `salt(16) || nonce(12) || ciphertext || tag(16)`.
//! Salt and nonce are drawn independently from the OS RNG for every seal.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use thiserror::Error;

pub const SALT_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;
pub const KEY_LEN: usize = 32;
pub const TAG_LEN: usize = 16;
pub const HEADER_LEN: usize = SALT_LEN + NONCE_LEN;
pub const PBKDF2_ROUNDS: u32 = 100_000;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("failed to draw random bytes: {0}")]
    Random(#[from] rand::Error),

    #[error("encryption failed")]
    Seal,

    /// Wrong passphrase, or the data was modified or truncated.
    #[error("authentication failed: wrong passphrase or corrupted data")]
    Authentication,
}

/// The 28-byte prefix of a sealed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub salt: [u8; SALT_LEN],
    pub nonce: [u8; NONCE_LEN],
}

impl Header {
    fn random() -> Result<Self, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.try_fill_bytes(&mut salt)?;
        OsRng.try_fill_bytes(&mut nonce)?;
        Ok(Self { salt, nonce })
    }

    /// Split a sealed payload into header and ciphertext.
    pub fn parse(sealed: &[u8]) -> Option<(Self, &[u8])> {
        if sealed.len() < HEADER_LEN {
            return None;
        }
        let (head, body) = sealed.split_at(HEADER_LEN);
        let mut salt = [0u8; SALT_LEN];
        let mut nonce = [0u8; NONCE_LEN];
        salt.copy_from_slice(&head[..SALT_LEN]);
        nonce.copy_from_slice(&head[SALT_LEN..]);
        Some((Self { salt, nonce }, body))
    }
}

/// Derive a 256-bit key from `passphrase` and `salt`.
pub fn derive_key(passphrase: &str, salt: &[u8; SALT_LEN]) -> [u8; KEY_LEN] {
    derive_key_with_rounds(passphrase, salt, PBKDF2_ROUNDS)
}

fn derive_key_with_rounds(passphrase: &str, salt: &[u8; SALT_LEN], rounds: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, rounds, &mut key);
    key
}

/// Encrypt `plaintext` into `salt || nonce || ciphertext+tag`.
pub fn seal(plaintext: &[u8], passphrase: &str) -> Result<Vec<u8>, CryptoError> {
    seal_with_rounds(plaintext, passphrase, PBKDF2_ROUNDS)
}

/// Authenticate and decrypt a payload produced by [`seal`].
///
/// Fails closed: nothing is returned unless the tag verifies.
pub fn open(sealed: &[u8], passphrase: &str) -> Result<Vec<u8>, CryptoError> {
    open_with_rounds(sealed, passphrase, PBKDF2_ROUNDS)
}

pub(crate) fn seal_with_rounds(
    plaintext: &[u8],
    passphrase: &str,
    rounds: u32,
) -> Result<Vec<u8>, CryptoError> {
    let header = Header::random()?;
    let key = derive_key_with_rounds(passphrase, &header.salt, rounds);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&header.nonce), plaintext)
        .map_err(|_| CryptoError::Seal)?;

    let mut out = Vec::with_capacity(HEADER_LEN + ciphertext.len());
    out.extend_from_slice(&header.salt);
    out.extend_from_slice(&header.nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub(crate) fn open_with_rounds(
    sealed: &[u8],
    passphrase: &str,
    rounds: u32,
) -> Result<Vec<u8>, CryptoError> {
    let (header, ciphertext) = Header::parse(sealed).ok_or(CryptoError::Authentication)?;
    if ciphertext.len() < TAG_LEN {
        return Err(CryptoError::Authentication);
    }
    let key = derive_key_with_rounds(passphrase, &header.salt, rounds);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));

    cipher
        .decrypt(Nonce::from_slice(&header.nonce), ciphertext)
        .map_err(|_| CryptoError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::distributions::Alphanumeric;
    use rstest::rstest;

    // The KDF cost is irrelevant to AEAD behaviour; keep the many-trial tests fast.
    const FAST: u32 = 1_000;

    #[rstest]
    #[case::empty(b"".to_vec())]
    #[case::short(b"hello coffer".to_vec())]
    #[case::binary((0..=255u8).cycle().take(70_000).collect())]
    fn round_trip_recovers_plaintext(#[case] plaintext: Vec<u8>) {
        let sealed = seal(&plaintext, "pass phrase").unwrap();
        assert_eq!(sealed.len(), HEADER_LEN + plaintext.len() + TAG_LEN);
        assert_eq!(open(&sealed, "pass phrase").unwrap(), plaintext);
    }

    #[test]
    fn derive_key_is_deterministic_per_salt() {
        let salt = [7u8; SALT_LEN];
        assert_eq!(derive_key("pw", &salt), derive_key("pw", &salt));
        assert_ne!(derive_key("pw", &salt), derive_key("pw", &[8u8; SALT_LEN]));
        assert_ne!(derive_key("pw", &salt), derive_key("pw2", &salt));
    }

    #[test]
    fn every_single_byte_flip_is_rejected() {
        let sealed = seal_with_rounds(b"tamper evident payload", "k", FAST).unwrap();
        for i in 0..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x01;
            let opened = open_with_rounds(&tampered, "k", FAST);
            assert!(
                matches!(opened, Err(CryptoError::Authentication)),
                "flip at byte {i} was accepted"
            );
        }
    }

    #[test]
    fn wrong_passphrases_are_rejected() {
        let sealed = seal_with_rounds(b"secret", "the right one", FAST).unwrap();
        let mut rng = rand::thread_rng();
        for _ in 0..128 {
            let len = rng.gen_range(1..24);
            let guess: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(len)
                .map(char::from)
                .collect();
            if guess == "the right one" {
                continue;
            }
            assert!(matches!(
                open_with_rounds(&sealed, &guess, FAST),
                Err(CryptoError::Authentication)
            ));
        }
    }

    #[test]
    fn same_plaintext_seals_differently() {
        let a = seal_with_rounds(b"same", "k", FAST).unwrap();
        let b = seal_with_rounds(b"same", "k", FAST).unwrap();
        let (ha, ca) = Header::parse(&a).unwrap();
        let (hb, cb) = Header::parse(&b).unwrap();
        assert_ne!(ha.salt, hb.salt);
        assert_ne!(ha.nonce, hb.nonce);
        assert_ne!(ca, cb);
    }

    #[rstest]
    #[case::empty(0)]
    #[case::salt_only(SALT_LEN)]
    #[case::header_only(HEADER_LEN)]
    #[case::partial_tag(HEADER_LEN + TAG_LEN - 1)]
    fn truncated_input_fails_closed(#[case] len: usize) {
        let sealed = seal_with_rounds(b"payload", "k", FAST).unwrap();
        assert!(matches!(
            open_with_rounds(&sealed[..len], "k", FAST),
            Err(CryptoError::Authentication)
        ));
    }
}
