use rand::{RngCore, SeedableRng};

const STATE_WORDS: usize = 16;

/// Reproducible source of construction seeds.
///
/// A xorshift1024* generator whose state is expanded from a single `u64` with
/// splitmix64. Every instance owns its state, so independent construction
/// attempts running on different threads never share a generator.
///
/// ```
/// use pphash::SeedGenerator;
///
/// let mut a = SeedGenerator::new(7);
/// let mut b = SeedGenerator::new(7);
/// assert_eq!(a.next_seed(), b.next_seed());
/// ```
#[derive(Debug, Clone)]
pub struct SeedGenerator {
    state: [u64; STATE_WORDS],
    position: usize,
}

impl SeedGenerator {
    /// Creates a generator from an explicit initial state.
    pub fn new(state: u64) -> Self {
        let mut expander = SplitMix64(state);
        let mut words = [0u64; STATE_WORDS];
        for word in words.iter_mut() {
            *word = expander.advance();
        }
        Self {
            state: words,
            position: 0,
        }
    }

    /// Draws the next seed and advances the internal state.
    pub fn next_seed(&mut self) -> u64 {
        let s0 = self.state[self.position];
        self.position = (self.position + 1) & (STATE_WORDS - 1);
        let mut s1 = self.state[self.position];
        s1 ^= s1 << 31;
        self.state[self.position] = s1 ^ s0 ^ (s1 >> 11) ^ (s0 >> 30);
        self.state[self.position].wrapping_mul(1181783497276652981)
    }
}

impl Default for SeedGenerator {
    /// Creates a generator seeded from the thread-local entropy source.
    fn default() -> Self {
        Self::new(rand::random())
    }
}

impl Iterator for SeedGenerator {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        Some(self.next_seed())
    }
}

impl RngCore for SeedGenerator {
    fn next_u32(&mut self) -> u32 {
        (self.next_seed() >> 32) as u32
    }

    fn next_u64(&mut self) -> u64 {
        self.next_seed()
    }

    fn fill_bytes(&mut self, dst: &mut [u8]) {
        rand::rand_core::impls::fill_bytes_via_next(self, dst)
    }
}

impl SeedableRng for SeedGenerator {
    type Seed = [u8; 8];

    fn from_seed(seed: Self::Seed) -> Self {
        Self::new(u64::from_be_bytes(seed))
    }

    fn seed_from_u64(state: u64) -> Self {
        Self::new(state)
    }
}

struct SplitMix64(u64);

impl SplitMix64 {
    fn advance(&mut self) -> u64 {
        self.0 = self.0.wrapping_add(0x9e3779b97f4a7c15);
        let mut z = self.0;
        z = (z ^ (z >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
        z = (z ^ (z >> 27)).wrapping_mul(0x94d049bb133111eb);
        z ^ (z >> 31)
    }
}
