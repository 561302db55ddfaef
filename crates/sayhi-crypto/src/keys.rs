/// Length in bytes of an AES-256 key.
pub const KEY_LEN: usize = 32;

/// Normalize a configured secret to exactly [`KEY_LEN`] bytes.
/// Shorter secrets are right-padded with ASCII `'0'`, longer ones truncated.
pub fn normalize_secret(secret: &str) -> [u8; KEY_LEN] {
    let mut key = [b'0'; KEY_LEN];
    let bytes = secret.as_bytes();
    let n = bytes.len().min(KEY_LEN);
    key[..n].copy_from_slice(&bytes[..n]);
    key
}
