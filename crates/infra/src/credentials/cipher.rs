//! Decryption of stored credential blobs.
//!
//! Blobs are `base64(iv || ciphertext)` encrypted with AES-256 in full-block
//! CFB mode. Anything that does not fit that shape is returned unchanged:
//! rows written before encryption was enabled still load, and a missing or
//! malformed key degrades to passthrough instead of taking tenants offline.

use aes::Aes256;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cfb_mode::Decryptor;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use secrecy::{ExposeSecret, SecretBox, SecretString};
use tracing::warn;

/// Required AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

const IV_LEN: usize = 16;

pub struct CredentialCipher {
    key: Option<SecretBox<[u8; KEY_LEN]>>,
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("enabled", &self.key.is_some())
            .finish()
    }
}

impl CredentialCipher {
    pub fn new(key: &SecretString) -> Self {
        let bytes = key.expose_secret().as_bytes();
        if bytes.len() != KEY_LEN {
            warn!(
                key_len = bytes.len(),
                "credential encryption key is not {KEY_LEN} bytes; treating stored credentials as plaintext"
            );
            return Self::passthrough();
        }

        let mut material = Box::new([0u8; KEY_LEN]);
        material.copy_from_slice(bytes);
        Self {
            key: Some(SecretBox::new(material)),
        }
    }

    /// Cipher that returns every blob unchanged.
    pub fn passthrough() -> Self {
        Self { key: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.key.is_some()
    }

    /// Decrypt `blob`, or hand it back unchanged when it is not ciphertext.
    pub fn decrypt(&self, blob: &str) -> SecretString {
        match self.try_decrypt(blob) {
            Some(plain) => SecretString::from(plain),
            None => SecretString::from(blob.to_string()),
        }
    }

    fn try_decrypt(&self, blob: &str) -> Option<String> {
        let key = self.key.as_ref()?;
        let blob = blob.trim();
        if looks_like_plaintext(blob) {
            return None;
        }

        let mut iv = STANDARD.decode(blob).ok()?;
        if iv.len() < IV_LEN {
            return None;
        }
        let mut payload = iv.split_off(IV_LEN);

        Decryptor::<Aes256>::new_from_slices(key.expose_secret().as_slice(), &iv)
            .ok()?
            .decrypt(&mut payload);
        String::from_utf8(payload).ok()
    }
}

/// PEM armour never needs decrypting. Bare DER-in-base64 is left to the
/// decode and UTF-8 checks, since ciphertext can start with `MII` too.
fn looks_like_plaintext(blob: &str) -> bool {
    blob.starts_with("-----BEGIN")
}
