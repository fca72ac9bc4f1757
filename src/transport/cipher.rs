//! Cipher registry, key derivation and the per-session AEAD.
//!
//! Every supported method is an AEAD construction keyed per direction:
//! the master key comes from the secret via `EVP_BytesToKey` (MD5), and each
//! direction derives a subkey from its random salt with HKDF-SHA1. The nonce
//! is a little-endian counter advanced after every seal or open.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
use hkdf::Hkdf;
use md5::{Digest, Md5};
use sha1::Sha1;

use super::error::CipherError;
use super::stream::EncryptedStream;

/// AEAD authentication tag length, the same for every supported method.
pub const TAG_LEN: usize = 16;

/// Largest payload carried by a single chunk.
pub const MAX_PAYLOAD: usize = 0x3FFF;

const SUBKEY_INFO: &[u8] = b"ss-subkey";

/// A supported cipher method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    /// `aes-128-gcm`
    Aes128Gcm,
    /// `aes-256-gcm`
    Aes256Gcm,
    /// `chacha20-ietf-poly1305`
    ChaCha20IetfPoly1305,
    /// `xchacha20-ietf-poly1305`, 24-byte nonce.
    XChaCha20IetfPoly1305,
    /// Pass-through, no salt and no framing. Only useful for testing.
    Dummy,
}

impl CipherKind {
    /// Resolve a method name, ignoring ASCII case.
    pub fn from_name(name: &str) -> Result<Self, CipherError> {
        match name.to_ascii_lowercase().as_str() {
            "aes-128-gcm" | "aead_aes_128_gcm" => Ok(Self::Aes128Gcm),
            "aes-256-gcm" | "aead_aes_256_gcm" => Ok(Self::Aes256Gcm),
            "chacha20-ietf-poly1305" | "aead_chacha20_poly1305" | "chacha20-poly1305" => {
                Ok(Self::ChaCha20IetfPoly1305)
            }
            "xchacha20-ietf-poly1305" | "aead_xchacha20_poly1305" => {
                Ok(Self::XChaCha20IetfPoly1305)
            }
            "dummy" | "none" | "plain" => Ok(Self::Dummy),
            _ => Err(CipherError::Unsupported(name.to_string())),
        }
    }

    /// Canonical method name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Aes128Gcm => "aes-128-gcm",
            Self::Aes256Gcm => "aes-256-gcm",
            Self::ChaCha20IetfPoly1305 => "chacha20-ietf-poly1305",
            Self::XChaCha20IetfPoly1305 => "xchacha20-ietf-poly1305",
            Self::Dummy => "dummy",
        }
    }

    /// Master key and subkey length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::Aes256Gcm | Self::ChaCha20IetfPoly1305 | Self::XChaCha20IetfPoly1305 => 32,
            Self::Dummy => 0,
        }
    }

    /// Salt length equals key length.
    pub fn salt_len(&self) -> usize {
        self.key_len()
    }

    /// AEAD nonce length in bytes.
    pub fn nonce_len(&self) -> usize {
        match self {
            Self::XChaCha20IetfPoly1305 => 24,
            Self::Dummy => 0,
            _ => 12,
        }
    }

    /// Whether this method encrypts at all.
    pub fn is_aead(&self) -> bool {
        !matches!(self, Self::Dummy)
    }
}

impl FromStr for CipherKind {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_name(s)
    }
}

impl fmt::Display for CipherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// OpenSSL `EVP_BytesToKey` with MD5, no salt and a single iteration.
pub fn evp_bytes_to_key(secret: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len + 16);
    let mut prev: Vec<u8> = Vec::new();
    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(secret);
        prev = hasher.finalize().to_vec();
        key.extend_from_slice(&prev);
    }
    key.truncate(key_len);
    key
}

/// HKDF-SHA1 session subkey for one direction.
pub fn derive_subkey(master_key: &[u8], salt: &[u8]) -> Result<Vec<u8>, CipherError> {
    let hk = Hkdf::<Sha1>::new(Some(salt), master_key);
    let mut subkey = vec![0u8; master_key.len()];
    hk.expand(SUBKEY_INFO, &mut subkey)
        .map_err(|_| CipherError::KeyDerivation)?;
    Ok(subkey)
}

enum AeadImpl {
    Aes128(Box<Aes128Gcm>),
    Aes256(Box<Aes256Gcm>),
    ChaCha(Box<ChaCha20Poly1305>),
    XChaCha(Box<XChaCha20Poly1305>),
}

/// One direction's AEAD state: subkey plus nonce counter.
pub struct SessionCipher {
    aead: AeadImpl,
    nonce_len: usize,
    counter: u64,
}

impl SessionCipher {
    /// Derive the subkey for `salt` and set up the cipher with a zero nonce.
    pub fn new(kind: CipherKind, master_key: &[u8], salt: &[u8]) -> Result<Self, CipherError> {
        let subkey = derive_subkey(master_key, salt)?;
        let invalid = |_| CipherError::InvalidKey { cipher: kind.name() };

        let aead = match kind {
            CipherKind::Aes128Gcm => {
                AeadImpl::Aes128(Box::new(Aes128Gcm::new_from_slice(&subkey).map_err(invalid)?))
            }
            CipherKind::Aes256Gcm => {
                AeadImpl::Aes256(Box::new(Aes256Gcm::new_from_slice(&subkey).map_err(invalid)?))
            }
            CipherKind::ChaCha20IetfPoly1305 => AeadImpl::ChaCha(Box::new(
                ChaCha20Poly1305::new_from_slice(&subkey).map_err(invalid)?,
            )),
            CipherKind::XChaCha20IetfPoly1305 => AeadImpl::XChaCha(Box::new(
                XChaCha20Poly1305::new_from_slice(&subkey).map_err(invalid)?,
            )),
            CipherKind::Dummy => return Err(CipherError::Unsupported(kind.name().to_string())),
        };

        Ok(Self {
            aead,
            nonce_len: kind.nonce_len(),
            counter: 0,
        })
    }

    fn next_nonce(&mut self) -> [u8; 24] {
        let mut nonce = [0u8; 24];
        nonce[..8].copy_from_slice(&self.counter.to_le_bytes());
        self.counter = self.counter.wrapping_add(1);
        nonce
    }

    /// Encrypt `plaintext`, returning ciphertext with the tag appended.
    pub fn seal(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce = self.next_nonce();
        let nonce = &nonce[..self.nonce_len];
        let sealed = match &self.aead {
            AeadImpl::Aes128(c) => c.encrypt(nonce.into(), plaintext),
            AeadImpl::Aes256(c) => c.encrypt(nonce.into(), plaintext),
            AeadImpl::ChaCha(c) => c.encrypt(nonce.into(), plaintext),
            AeadImpl::XChaCha(c) => c.encrypt(nonce.into(), plaintext),
        };
        sealed.map_err(|_| CipherError::Seal)
    }

    /// Authenticate and decrypt `ciphertext` (tag included).
    pub fn open(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let nonce = self.next_nonce();
        let nonce = &nonce[..self.nonce_len];
        let opened = match &self.aead {
            AeadImpl::Aes128(c) => c.decrypt(nonce.into(), ciphertext),
            AeadImpl::Aes256(c) => c.decrypt(nonce.into(), ciphertext),
            AeadImpl::ChaCha(c) => c.decrypt(nonce.into(), ciphertext),
            AeadImpl::XChaCha(c) => c.decrypt(nonce.into(), ciphertext),
        };
        opened.map_err(|_| CipherError::Open)
    }
}

/// Wraps raw streams into encrypted streams for one method and secret.
///
/// Cheap to clone; the master key is shared.
#[derive(Clone)]
pub struct CipherStreamFactory {
    kind: CipherKind,
    key: Arc<[u8]>,
}

impl CipherStreamFactory {
    /// Resolve `cipher` and derive the master key from `secret`.
    pub fn new(cipher: &str, secret: &str) -> Result<Self, CipherError> {
        let kind = CipherKind::from_name(cipher)?;
        let key = evp_bytes_to_key(secret.as_bytes(), kind.key_len());
        Ok(Self {
            kind,
            key: key.into(),
        })
    }

    /// The resolved cipher.
    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    /// Wrap `stream` so writes are sealed and reads are opened.
    pub fn wrap<S>(&self, stream: S) -> EncryptedStream<S> {
        EncryptedStream::new(stream, self.kind, Arc::clone(&self.key))
    }
}

impl fmt::Debug for CipherStreamFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherStreamFactory")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn test_registry_aliases() {
        let cases = [
            ("aes-128-gcm", CipherKind::Aes128Gcm),
            ("AEAD_AES_128_GCM", CipherKind::Aes128Gcm),
            ("aes-256-gcm", CipherKind::Aes256Gcm),
            ("aead_aes_256_gcm", CipherKind::Aes256Gcm),
            ("chacha20-ietf-poly1305", CipherKind::ChaCha20IetfPoly1305),
            ("aead_chacha20_poly1305", CipherKind::ChaCha20IetfPoly1305),
            ("ChaCha20-Poly1305", CipherKind::ChaCha20IetfPoly1305),
            ("xchacha20-ietf-poly1305", CipherKind::XChaCha20IetfPoly1305),
            ("aead_xchacha20_poly1305", CipherKind::XChaCha20IetfPoly1305),
            ("dummy", CipherKind::Dummy),
            ("NONE", CipherKind::Dummy),
            ("plain", CipherKind::Dummy),
        ];
        for (name, expected) in cases {
            assert_eq!(CipherKind::from_name(name).unwrap(), expected, "{name}");
        }
    }

    #[test]
    fn test_unsupported_cipher() {
        for name in ["rc4-md5", "aes-256-cfb", "2022-blake3-aes-256-gcm", ""] {
            let err = CipherKind::from_name(name).unwrap_err();
            assert!(matches!(err, CipherError::Unsupported(n) if n == name));
        }
    }

    #[test]
    fn test_key_salt_nonce_lengths() {
        assert_eq!(CipherKind::Aes128Gcm.key_len(), 16);
        assert_eq!(CipherKind::Aes128Gcm.salt_len(), 16);
        assert_eq!(CipherKind::Aes256Gcm.key_len(), 32);
        assert_eq!(CipherKind::ChaCha20IetfPoly1305.nonce_len(), 12);
        assert_eq!(CipherKind::XChaCha20IetfPoly1305.nonce_len(), 24);
        assert!(!CipherKind::Dummy.is_aead());
    }

    #[test]
    fn test_evp_bytes_to_key() {
        let key = evp_bytes_to_key(b"barfoo!", 32);
        assert_eq!(
            hex(&key),
            "b3adc47839e047eb228870526dc8fc30b347287ffca3045dcea06b3fdf090acb"
        );
        assert_eq!(evp_bytes_to_key(b"barfoo!", 16), key[..16]);
    }

    #[test]
    fn test_derive_subkey() {
        let master = evp_bytes_to_key(b"barfoo!", 32);
        let salt: Vec<u8> = (0u8..32).collect();
        let subkey = derive_subkey(&master, &salt).unwrap();
        assert_eq!(
            hex(&subkey),
            "6e62f41174d7879ffea269ebf7805b730f62002e2b461f4dcb2a21dfb6f6423e"
        );
    }

    #[test]
    fn test_seal_known_answer() {
        let master = evp_bytes_to_key(b"barfoo!", 32);
        let salt: Vec<u8> = (0u8..32).collect();
        let mut cipher = SessionCipher::new(CipherKind::Aes256Gcm, &master, &salt).unwrap();

        // nonce 0: length prefix, nonce 1: payload
        let len = cipher.seal(&[0x00, 0x05]).unwrap();
        assert_eq!(hex(&len), "fe32afeb1b6b5afee4953444c734467514fd");
        let payload = cipher.seal(b"hello").unwrap();
        assert_eq!(hex(&payload), "b6f5cc0f033f510973cd30785b476c59f5b47847c9");
    }

    #[test]
    fn test_seal_open_every_cipher() {
        for kind in [
            CipherKind::Aes128Gcm,
            CipherKind::Aes256Gcm,
            CipherKind::ChaCha20IetfPoly1305,
            CipherKind::XChaCha20IetfPoly1305,
        ] {
            let master = evp_bytes_to_key(b"secret", kind.key_len());
            let salt = vec![7u8; kind.salt_len()];
            let mut writer = SessionCipher::new(kind, &master, &salt).unwrap();
            let mut reader = SessionCipher::new(kind, &master, &salt).unwrap();

            for msg in [&b"first"[..], b"", b"third message"] {
                let sealed = writer.seal(msg).unwrap();
                assert_eq!(sealed.len(), msg.len() + TAG_LEN);
                assert_eq!(reader.open(&sealed).unwrap(), msg, "{kind}");
            }
        }
    }

    #[test]
    fn test_open_rejects_out_of_order_nonce() {
        let master = evp_bytes_to_key(b"secret", 32);
        let salt = [1u8; 32];
        let mut writer = SessionCipher::new(CipherKind::ChaCha20IetfPoly1305, &master, &salt).unwrap();
        let mut reader = SessionCipher::new(CipherKind::ChaCha20IetfPoly1305, &master, &salt).unwrap();

        let _first = writer.seal(b"one").unwrap();
        let second = writer.seal(b"two").unwrap();
        assert!(matches!(reader.open(&second), Err(CipherError::Open)));
    }

    #[test]
    fn test_open_rejects_wrong_secret() {
        let salt = [3u8; 16];
        let mut writer =
            SessionCipher::new(CipherKind::Aes128Gcm, &evp_bytes_to_key(b"a", 16), &salt).unwrap();
        let mut reader =
            SessionCipher::new(CipherKind::Aes128Gcm, &evp_bytes_to_key(b"b", 16), &salt).unwrap();
        let sealed = writer.seal(b"data").unwrap();
        assert!(reader.open(&sealed).is_err());
    }

    #[test]
    fn test_factory_rejects_unknown_cipher() {
        let err = CipherStreamFactory::new("rc4-md5", "pw").unwrap_err();
        assert_eq!(err.to_string(), "Unsupported cipher: rc4-md5");
    }

    #[test]
    fn test_factory_debug_hides_key() {
        let factory = CipherStreamFactory::new("aes-256-gcm", "pw").unwrap();
        let debug = format!("{factory:?}");
        assert!(debug.contains("Aes256Gcm"));
        assert!(!debug.contains("key"));
    }
}
