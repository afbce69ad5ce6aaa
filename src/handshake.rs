/// Construction of the 512-byte opening frame sent to the relay, and the
/// key schedule it's encrypted under.
use rand::RngCore;

use crate::cipher::{derive_key_schedule, Cipher};

pub const FRAME_LEN: usize = 512;
const MAGIC_OFFSET: usize = 0;
const MAGIC_LEN: usize = 4;
const HOST_OFFSET: usize = 4;
const HOST_LEN: usize = 257;
const PORT_OFFSET: usize = 261;
const PORT_LEN: usize = 15;
const NONCE_OFFSET: usize = 276;
const NONCE_LEN: usize = 236;
const ENCRYPTED_LEN: usize = NONCE_OFFSET; // MAGIC || HOST || PORT

pub const MAGIC: [u8; MAGIC_LEN] = *b"Rona";

/// The 512-byte opening frame, already encrypted under the chosen relay's
/// key, plus the cipher the forwarding phase continues with.
pub struct Handshake {
    pub frame: [u8; FRAME_LEN],
    pub cipher: Cipher,
}

/// Lay out MAGIC, HOST, PORT and a fresh random nonce into a frame, then
/// encrypt the leading 276 bytes under the key schedule derived from that
/// nonce and `key`. The trailing 236 nonce bytes are left as plaintext --
/// the relay needs them to derive the same key schedule.
pub fn build(host: &str, port: &str, key: &[u8]) -> Handshake {
    let mut frame = [0u8; FRAME_LEN];

    frame[MAGIC_OFFSET..MAGIC_OFFSET + MAGIC_LEN].copy_from_slice(&MAGIC);
    write_nul_terminated(&mut frame[HOST_OFFSET..HOST_OFFSET + HOST_LEN], host);
    write_nul_terminated(&mut frame[PORT_OFFSET..PORT_OFFSET + PORT_LEN], port);

    let nonce_field = &mut frame[NONCE_OFFSET..NONCE_OFFSET + NONCE_LEN];
    rand::thread_rng().fill_bytes(nonce_field);
    let nonce = frame[NONCE_OFFSET..NONCE_OFFSET + NONCE_LEN].to_vec();

    let schedule = derive_key_schedule(&nonce, key);
    let mut cipher = Cipher::new(&schedule);
    cipher.encrypt(&mut frame[0..ENCRYPTED_LEN]);

    Handshake { frame, cipher }
}

fn write_nul_terminated(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let copy_len = bytes.len().min(field.len() - 1);
    field[..copy_len].copy_from_slice(&bytes[..copy_len]);
    // Remaining bytes (including the terminator) are already zeroed.
}

/// Decrypt the leading 276 bytes of a received frame with the key derived
/// from its own trailing 236-byte nonce and `key`. This is the relay's half
/// of the protocol; kept here (test-only) to exercise the wire format from
/// both ends.
#[cfg(test)]
pub fn decrypt_with(frame: &mut [u8; FRAME_LEN], key: &[u8]) {
    let nonce = frame[NONCE_OFFSET..NONCE_OFFSET + NONCE_LEN].to_vec();
    let schedule = derive_key_schedule(&nonce, key);
    let mut cipher = Cipher::new(&schedule);
    cipher.decrypt(&mut frame[0..ENCRYPTED_LEN]);
}
