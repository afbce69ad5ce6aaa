/// The stream cipher used over the wire: a from-scratch RC4 (the cipher
/// the relay side also implements), keyed by a 64-byte schedule chained
/// out of four rounds of MD5. Neither the relay's source nor this pack
/// carries an off-the-shelf crate for a variable-length-keyed RC4, so the
/// schedule (KSA) and keystream generator (PRGA) are implemented here
/// directly -- they're a couple dozen lines of well-known, unambiguous
/// algorithm, not a redesign of anything.
use md5::{Digest, Md5};

const SCHEDULE_LEN: usize = 64;

/// Four chained MD5 rounds: `k[0..16] = MD5(nonce || key)`, then each
/// subsequent 16 bytes is MD5 of everything produced so far.
pub fn derive_key_schedule(nonce: &[u8], key: &[u8]) -> [u8; SCHEDULE_LEN] {
    let mut schedule = [0u8; SCHEDULE_LEN];

    let mut md5 = Md5::new();
    md5.update(nonce);
    md5.update(key);
    schedule[0..16].copy_from_slice(&md5.finalize());

    for round in 1..4 {
        let mut md5 = Md5::new();
        md5.update(&schedule[0..round * 16]);
        let digest = md5.finalize();
        schedule[round * 16..(round + 1) * 16].copy_from_slice(&digest);
    }

    schedule
}

/// A single RC4 keystream generator. `encrypt` and `decrypt` are the same
/// operation (XOR with the next `n` keystream bytes); both names are kept
/// so call sites read as direction-of-travel rather than algorithm.
pub struct Cipher {
    state: [u8; 256],
    i: u8,
    j: u8,
}

impl Cipher {
    pub fn new(key: &[u8]) -> Cipher {
        assert!(!key.is_empty(), "RC4 key must not be empty");

        let mut state = [0u8; 256];
        for (idx, slot) in state.iter_mut().enumerate() {
            *slot = idx as u8;
        }

        let mut j: u8 = 0;
        for i in 0..256 {
            j = j
                .wrapping_add(state[i])
                .wrapping_add(key[i % key.len()]);
            state.swap(i, j as usize);
        }

        Cipher { state, i: 0, j: 0 }
    }

    fn apply_keystream(&mut self, buf: &mut [u8]) {
        for byte in buf.iter_mut() {
            self.i = self.i.wrapping_add(1);
            self.j = self.j.wrapping_add(self.state[self.i as usize]);
            self.state.swap(self.i as usize, self.j as usize);
            let k = self.state[(self.state[self.i as usize].wrapping_add(self.state[self.j as usize])) as usize];
            *byte ^= k;
        }
    }

    /// Encrypt `buf` in place, advancing the keystream position by `buf.len()`.
    pub fn encrypt(&mut self, buf: &mut [u8]) {
        self.apply_keystream(buf);
    }

    /// Decrypt `buf` in place, advancing the keystream position by `buf.len()`.
    /// Identical to `encrypt` -- RC4 is its own inverse.
    pub fn decrypt(&mut self, buf: &mut [u8]) {
        self.apply_keystream(buf);
    }
}
