//! Autokey XOR obfuscation used on port 9999.
//!
//! Every byte is XORed with the previous ciphertext byte, starting from a
//! fixed key. TCP frames are prefixed with their big-endian length; UDP
//! datagrams are not.

const INITIAL_KEY: u8 = 171;

#[must_use]
pub fn encrypt(plain: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    plain
        .iter()
        .map(|byte| {
            key ^= byte;
            key
        })
        .collect()
}

#[must_use]
pub fn decrypt(cipher: &[u8]) -> Vec<u8> {
    let mut key = INITIAL_KEY;
    cipher
        .iter()
        .map(|&byte| {
            let plain = key ^ byte;
            key = byte;
            plain
        })
        .collect()
}

/// Encrypt `plain` into one length-prefixed TCP frame.
#[must_use]
pub fn frame(plain: &[u8]) -> Vec<u8> {
    let body = encrypt(plain);
    let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
    let mut framed = Vec::with_capacity(body.len() + 4);
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(&body);
    framed
}
