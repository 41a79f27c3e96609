//! Seeded XOR keystream
//!
//! The keystream comes from a 48-bit linear congruential generator
//! (multiplier `0x5DEECE66D`, increment `0xB`). Keystream bytes are produced
//! in blocks of [`KEYSTREAM_BLOCK`] bytes; every 32-bit generator output is
//! emitted least-significant byte first. Peers that seed the same generator
//! with the same key produce the same keystream, which is what keeps the two
//! ends of a tunnel in step.

use std::fmt;

/// Number of keystream bytes generated per refill
pub const KEYSTREAM_BLOCK: usize = 256;

const MULTIPLIER: u64 = 0x5_DEEC_E66D;
const INCREMENT: u64 = 0xB;
const STATE_MASK: u64 = (1 << 48) - 1;

/// 48-bit linear congruential generator
#[derive(Clone)]
struct Lcg48 {
    state: u64,
}

impl Lcg48 {
    fn new(seed: u64) -> Self {
        Self {
            state: (seed ^ MULTIPLIER) & STATE_MASK,
        }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self
            .state
            .wrapping_mul(MULTIPLIER)
            .wrapping_add(INCREMENT)
            & STATE_MASK;
        (self.state >> 16) as u32
    }

    fn fill(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(4) {
            let word = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

/// Stateful XOR stream scrambler.
///
/// Scrambling is its own inverse: applying a freshly seeded scrambler to
/// scrambled bytes restores them, as long as both sides process the same
/// total number of bytes in the same order. Chunk boundaries do not matter.
#[derive(Clone)]
pub struct Scrambler {
    rng: Lcg48,
    block: [u8; KEYSTREAM_BLOCK],
    pos: usize,
}

impl Scrambler {
    /// Create a scrambler whose keystream is derived from `seed`
    pub fn new(seed: u64) -> Self {
        let mut scrambler = Self {
            rng: Lcg48::new(seed),
            block: [0u8; KEYSTREAM_BLOCK],
            pos: 0,
        };
        scrambler.refill();
        scrambler
    }

    fn refill(&mut self) {
        self.rng.fill(&mut self.block);
        self.pos = 0;
    }

    /// XOR `buf` in place with the next `buf.len()` keystream bytes
    pub fn apply(&mut self, buf: &mut [u8]) {
        for byte in buf {
            if self.pos == KEYSTREAM_BLOCK {
                self.refill();
            }
            *byte ^= self.block[self.pos];
            self.pos += 1;
        }
    }
}

impl fmt::Debug for Scrambler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scrambler")
            .field("pos", &self.pos)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keystream(seed: u64, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        Scrambler::new(seed).apply(&mut buf);
        buf
    }

    #[test]
    fn test_known_keystream() {
        let stream = keystream(0, 260);
        assert_eq!(&stream[..8], &[0x60, 0xb4, 0x20, 0xbb, 0x38, 0x51, 0xd9, 0xd4]);
        // First bytes of the second block
        assert_eq!(&stream[256..260], &[0xc1, 0x45, 0x0c, 0xb7]);

        assert_eq!(keystream(u64::MAX, 4), vec![0xb3, 0x6c, 0xd9, 0x44]);
        assert_eq!(
            keystream(0x1f, 8),
            vec![0x00, 0x0f, 0x3e, 0xbb, 0x18, 0xd7, 0x7c, 0x7c]
        );
    }

    #[test]
    fn test_self_inverse() {
        let plain: Vec<u8> = (0..1000u32).map(|i| (i * 7 + 3) as u8).collect();

        let mut data = plain.clone();
        Scrambler::new(0xdead_beef).apply(&mut data);
        assert_ne!(data, plain);

        Scrambler::new(0xdead_beef).apply(&mut data);
        assert_eq!(data, plain);
    }

    #[test]
    fn test_chunking_does_not_matter() {
        let whole = keystream(42, 700);

        // Straddle both refill boundaries with uneven chunks
        let mut scrambler = Scrambler::new(42);
        let mut pieced = vec![0u8; 700];
        let mut offset = 0;
        for len in [7, 250, 1, 0, 255, 187] {
            scrambler.apply(&mut pieced[offset..offset + len]);
            offset += len;
        }
        assert_eq!(offset, 700);
        assert_eq!(pieced, whole);
    }

    #[test]
    fn test_fresh_instances_agree() {
        assert_eq!(keystream(12345, 513), keystream(12345, 513));
    }

    #[test]
    fn test_complementary_seeds_differ() {
        let key = 0x0123_4567_89ab_cdef_u64;
        assert_ne!(keystream(key, 256), keystream(!key, 256));
    }

    #[test]
    fn test_empty_apply_keeps_position() {
        let mut scrambler = Scrambler::new(7);
        scrambler.apply(&mut []);
        let mut buf = [0u8; 4];
        scrambler.apply(&mut buf);
        assert_eq!(buf.to_vec(), keystream(7, 4));
    }
}
