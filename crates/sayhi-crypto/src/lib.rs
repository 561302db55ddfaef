/// SayHi Crypto Library
///
/// Server-side encryption of message text at rest with a single configured
/// secret (AES-256-GCM). Stored envelopes are `nonce:ciphertext:tag`, all hex.
///
/// Decryption fails open: anything that is not a valid envelope for the
/// configured key comes back unchanged, so legacy plaintext rows keep working.

pub mod envelope;
pub mod keys;

pub use envelope::{Codec, Opened};
