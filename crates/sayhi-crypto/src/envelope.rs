use aes_gcm::{
    AesGcm, Key, KeyInit, Nonce,
    aead::{Aead, OsRng, consts::U16, rand_core::RngCore},
    aes::Aes256,
};
use anyhow::{Result, anyhow};

use crate::keys::normalize_secret;

/// AES-256-GCM with a 128-bit nonce, matching envelopes already in storage.
type EnvelopeCipher = AesGcm<Aes256, U16>;

const NONCE_LEN: usize = 16;
const TAG_LEN: usize = 16;

/// Result of opening a stored value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opened<'a> {
    Decrypted(String),
    /// Not an envelope, or not one this key can open. Carries the input.
    Unchanged(&'a str),
}

impl Opened<'_> {
    /// Best available text for display.
    pub fn into_text(self) -> String {
        match self {
            Opened::Decrypted(text) => text,
            Opened::Unchanged(raw) => raw.to_string(),
        }
    }
}

/// Symmetric codec for message text at rest.
#[derive(Clone)]
pub struct Codec {
    cipher: EnvelopeCipher,
}

impl Codec {
    pub fn new(secret: &str) -> Self {
        let key = normalize_secret(secret);
        Self {
            cipher: EnvelopeCipher::new(Key::<EnvelopeCipher>::from_slice(&key)),
        }
    }

    /// Seal `plaintext` into a `nonce:ciphertext:tag` envelope with a fresh
    /// random nonce. Empty input yields `None`.
    pub fn encrypt(&self, plaintext: &str) -> Result<Option<String>> {
        if plaintext.is_empty() {
            return Ok(None);
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::<U16>::from_slice(&nonce_bytes);

        let mut sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        // aes-gcm appends the tag to the ciphertext
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(Some(format!(
            "{}:{}:{}",
            hex::encode(nonce_bytes),
            hex::encode(sealed),
            hex::encode(tag)
        )))
    }

    /// Open a stored value. Never fails: anything that is not a three-part
    /// envelope, or that does not authenticate, is returned unchanged.
    pub fn open<'a>(&self, payload: &'a str) -> Opened<'a> {
        let parts: Vec<&str> = payload.split(':').collect();
        let [nonce_hex, ciphertext_hex, tag_hex] = parts.as_slice() else {
            return Opened::Unchanged(payload);
        };

        match self.open_parts(nonce_hex, ciphertext_hex, tag_hex) {
            Some(text) => Opened::Decrypted(text),
            None => Opened::Unchanged(payload),
        }
    }

    /// [`Codec::open`] collapsed to the best available text.
    pub fn decrypt(&self, payload: &str) -> String {
        self.open(payload).into_text()
    }

    fn open_parts(&self, nonce_hex: &str, ciphertext_hex: &str, tag_hex: &str) -> Option<String> {
        let nonce_bytes = hex::decode(nonce_hex).ok()?;
        let tag = hex::decode(tag_hex).ok()?;
        if nonce_bytes.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return None;
        }

        let mut sealed = hex::decode(ciphertext_hex).ok()?;
        sealed.extend_from_slice(&tag);

        let plaintext = self
            .cipher
            .decrypt(Nonce::<U16>::from_slice(&nonce_bytes), sealed.as_slice())
            .ok()?;

        String::from_utf8(plaintext).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> Codec {
        Codec::new("unit-test-secret")
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let codec = codec();
        for text in ["hi", "Hello from SayHi!", "emoji ❤️ and ünïcödé", "a:b:c"] {
            let envelope = codec.encrypt(text).unwrap().unwrap();
            assert_ne!(envelope, text);
            assert_eq!(codec.open(&envelope), Opened::Decrypted(text.to_string()));
        }
    }

    #[test]
    fn envelope_has_three_hex_fields() {
        let envelope = codec().encrypt("hi").unwrap().unwrap();
        let parts: Vec<&str> = envelope.split(':').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].len(), NONCE_LEN * 2);
        assert_eq!(parts[1].len(), 4);
        assert_eq!(parts[2].len(), TAG_LEN * 2);
        assert!(parts.iter().all(|p| p.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[test]
    fn empty_text_encrypts_to_none() {
        assert_eq!(codec().encrypt("").unwrap(), None);
    }

    #[test]
    fn fresh_nonce_per_call() {
        let codec = codec();
        let a = codec.encrypt("same text").unwrap().unwrap();
        let b = codec.encrypt("same text").unwrap().unwrap();
        assert_ne!(a, b);
        assert_eq!(codec.decrypt(&a), "same text");
        assert_eq!(codec.decrypt(&b), "same text");
    }

    #[test]
    fn plaintext_passes_through() {
        let codec = codec();
        assert_eq!(codec.open("just a legacy message"), Opened::Unchanged("just a legacy message"));
        assert_eq!(codec.decrypt("one:two"), "one:two");
        assert_eq!(codec.decrypt("a:b:c:d"), "a:b:c:d");
        assert_eq!(codec.decrypt(""), "");
    }

    #[test]
    fn malformed_hex_is_unchanged() {
        let codec = codec();
        let bad = "zz:zz:zz";
        assert_eq!(codec.open(bad), Opened::Unchanged(bad));

        let short_nonce = format!("abcd:00:{}", "00".repeat(TAG_LEN));
        assert_eq!(codec.decrypt(&short_nonce), short_nonce);
    }

    #[test]
    fn tampered_tag_is_unchanged() {
        let codec = codec();
        let envelope = codec.encrypt("secret").unwrap().unwrap();
        let mut chars: Vec<char> = envelope.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '0' { '1' } else { '0' };
        let tampered: String = chars.into_iter().collect();

        assert_eq!(codec.open(&tampered), Opened::Unchanged(tampered.as_str()));
    }

    #[test]
    fn wrong_key_is_unchanged() {
        let envelope = Codec::new("key-one").encrypt("Secret message").unwrap().unwrap();
        assert_eq!(Codec::new("key-two").decrypt(&envelope), envelope);
    }
}
