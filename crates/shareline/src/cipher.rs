//! Keyed stream cipher used to obfuscate downloads
//!
//! A 256-entry permutation is scheduled from the user key mixed with a
//! 16-byte IV, then walked to emit one keystream byte per payload byte.
//! Encryption and decryption are the same XOR. There is no integrity
//! protection, and one [`CipherContext`] keeps the same IV for its whole
//! lifetime, so every download in a session reuses the same keystream.

use crate::{Error, Result};
use rand::rngs::{OsRng, StdRng};
use rand::{RngCore, SeedableRng};
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Size of a client key file in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the per-context IV in bytes
pub const IV_SIZE: usize = 16;

/// Where a context's IV came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvSource {
    /// Operating system CSPRNG
    Os,
    /// Provided by the caller
    Supplied,
    /// Time-seeded PRNG, used when the OS source failed (lower quality)
    Fallback,
}

/// Key material plus the IV fixed at creation time
pub struct CipherContext {
    key: Vec<u8>,
    iv: [u8; IV_SIZE],
    iv_source: IvSource,
}

impl CipherContext {
    /// Create a context for `key`, generating a random IV unless one is supplied
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKey`] if `key` is empty.
    pub fn new(key: &[u8], iv: Option<[u8; IV_SIZE]>) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::InvalidKey("key must not be empty".to_string()));
        }

        let (iv, iv_source) = match iv {
            Some(iv) => (iv, IvSource::Supplied),
            None => generate_iv(),
        };

        Ok(Self {
            key: key.to_vec(),
            iv,
            iv_source,
        })
    }

    /// Key length in bytes
    pub fn key_size(&self) -> usize {
        self.key.len()
    }

    /// The IV used for every keystream produced by this context
    pub fn iv(&self) -> &[u8; IV_SIZE] {
        &self.iv
    }

    /// Whether the IV was supplied or generated
    pub fn iv_source(&self) -> IvSource {
        self.iv_source
    }

    /// Start a fresh keystream at position zero
    pub fn keystream(&self) -> Keystream {
        Keystream::new(&self.key, &self.iv)
    }

    /// XOR `plaintext` with the keystream
    pub fn encrypt(&self, plaintext: &[u8]) -> Vec<u8> {
        let mut out = plaintext.to_vec();
        self.keystream().apply(&mut out);
        out
    }

    /// Inverse of [`CipherContext::encrypt`] (the same operation)
    pub fn decrypt(&self, ciphertext: &[u8]) -> Vec<u8> {
        self.encrypt(ciphertext)
    }

    /// Short digest of the key, safe to log
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.key)
    }
}

impl fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherContext")
            .field("key_size", &self.key.len())
            .field("key_fingerprint", &self.fingerprint())
            .field("iv_source", &self.iv_source)
            .finish_non_exhaustive()
    }
}

/// Stateful keystream generator
///
/// Applying it to successive chunks gives the same bytes as applying
/// [`keystream`] to the concatenated buffer.
pub struct Keystream {
    state: [u8; 256],
    i: u8,
    k: u8,
}

impl Keystream {
    /// Run the key schedule for (`key`, `iv`)
    ///
    /// An empty key schedules as if every key byte were zero.
    pub fn new(key: &[u8], iv: &[u8; IV_SIZE]) -> Self {
        let mut state = [0u8; 256];
        for (slot, value) in state.iter_mut().zip(0u8..=255) {
            *slot = value;
        }

        let mut j: u8 = 0;
        for i in 0..256 {
            let key_byte = if key.is_empty() { 0 } else { key[i % key.len()] };
            j = j
                .wrapping_add(state[i])
                .wrapping_add(key_byte)
                .wrapping_add(iv[i % IV_SIZE]);
            state.swap(i, usize::from(j));
        }

        Self { state, i: 0, k: 0 }
    }

    /// Next keystream byte
    pub fn next_byte(&mut self) -> u8 {
        self.i = self.i.wrapping_add(1);
        self.k = self.k.wrapping_add(self.state[usize::from(self.i)]);
        self.state.swap(usize::from(self.i), usize::from(self.k));
        let idx = self.state[usize::from(self.i)].wrapping_add(self.state[usize::from(self.k)]);
        self.state[usize::from(idx)]
    }

    /// XOR `data` in place with the next `data.len()` keystream bytes
    pub fn apply(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            *byte ^= self.next_byte();
        }
    }
}

/// First `len` keystream bytes for (`key`, `iv`)
pub fn keystream(key: &[u8], iv: &[u8; IV_SIZE], len: usize) -> Vec<u8> {
    let mut stream = Keystream::new(key, iv);
    (0..len).map(|_| stream.next_byte()).collect()
}

/// XOR `data` in place with the keystream for (`key`, `iv`)
pub fn apply_keystream(key: &[u8], iv: &[u8; IV_SIZE], data: &mut [u8]) {
    Keystream::new(key, iv).apply(data);
}

/// First 8 bytes of SHA-256(key), hex encoded
pub fn fingerprint(key: &[u8]) -> String {
    let digest = Sha256::digest(key);
    hex::encode(&digest[..8])
}

fn generate_iv() -> ([u8; IV_SIZE], IvSource) {
    let mut iv = [0u8; IV_SIZE];
    match OsRng.try_fill_bytes(&mut iv) {
        Ok(()) => (iv, IvSource::Os),
        Err(e) => {
            warn!(
                event = "iv_fallback",
                error = %e,
                "OS random source unavailable, using lower-quality IV"
            );
            let seed = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default();
            StdRng::seed_from_u64(seed).fill_bytes(&mut iv);
            (iv, IvSource::Fallback)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZERO_IV: [u8; IV_SIZE] = [0u8; IV_SIZE];

    fn xor_with(key: &[u8], iv: &[u8; IV_SIZE], data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        apply_keystream(key, iv, &mut out);
        out
    }

    #[test]
    fn test_zero_iv_matches_rc4_vectors() {
        assert_eq!(
            hex::encode(xor_with(b"Key", &ZERO_IV, b"Plaintext")),
            "bbf316e8d940af0ad3"
        );
        assert_eq!(hex::encode(xor_with(b"Wiki", &ZERO_IV, b"pedia")), "1021bf0420");
        assert_eq!(
            hex::encode(xor_with(b"Secret", &ZERO_IV, b"Attack at dawn")),
            "45a01f645fc35b383552544b9bf5"
        );
    }

    #[test]
    fn test_round_trip() {
        let key = [0x42u8; KEY_SIZE];
        let ctx = CipherContext::new(&key, None).unwrap();
        let plaintext: Vec<u8> = (0..5000u32).map(|i| (i * 7 % 251) as u8).collect();

        let ciphertext = ctx.encrypt(&plaintext);
        assert_ne!(ciphertext, plaintext);
        assert_eq!(ctx.decrypt(&ciphertext), plaintext);
    }

    #[test]
    fn test_keystream_is_pure() {
        let key: Vec<u8> = (0..KEY_SIZE as u8).collect();
        let iv = [9u8; IV_SIZE];
        assert_eq!(keystream(&key, &iv, 1024), keystream(&key, &iv, 1024));
    }

    #[test]
    fn test_iv_changes_keystream() {
        let key = [1u8; KEY_SIZE];
        let mut other_iv = ZERO_IV;
        other_iv[15] = 1;
        assert_ne!(keystream(&key, &ZERO_IV, 64), keystream(&key, &other_iv, 64));
    }

    #[test]
    fn test_chunked_application_matches_whole_buffer() {
        let key = [7u8; KEY_SIZE];
        let iv = [3u8; IV_SIZE];
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();

        let whole = xor_with(&key, &iv, &data);

        let mut stream = Keystream::new(&key, &iv);
        let mut chunked = data.clone();
        for chunk in chunked.chunks_mut(4096) {
            stream.apply(chunk);
        }

        assert_eq!(chunked, whole);
    }

    #[test]
    fn test_context_iv_fixed_for_lifetime() {
        let ctx = CipherContext::new(&[5u8; KEY_SIZE], None).unwrap();
        let first = *ctx.iv();
        let _ = ctx.encrypt(b"one");
        let _ = ctx.encrypt(b"two");
        assert_eq!(*ctx.iv(), first);
        assert_eq!(ctx.encrypt(b"same"), ctx.encrypt(b"same"));
        assert_ne!(ctx.iv_source(), IvSource::Supplied);
    }

    #[test]
    fn test_supplied_iv() {
        let iv = [0xAAu8; IV_SIZE];
        let ctx = CipherContext::new(&[1u8; KEY_SIZE], Some(iv)).unwrap();
        assert_eq!(*ctx.iv(), iv);
        assert_eq!(ctx.iv_source(), IvSource::Supplied);
        assert_eq!(ctx.key_size(), KEY_SIZE);
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(matches!(
            CipherContext::new(&[], None),
            Err(Error::InvalidKey(_))
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let ctx = CipherContext::new(b"super-secret-key-material-000000", None).unwrap();
        let debug = format!("{ctx:?}");
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains(&ctx.fingerprint()));
    }
}
