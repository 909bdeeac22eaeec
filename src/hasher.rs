use std::fmt;
use std::hash::BuildHasher;
use std::str::FromStr;

use foldhash::fast::FixedState;
use serde::{Deserialize, Serialize};
use uuid::{Uuid, uuid};

/// Stable identifier naming one key function family.
///
/// Identifiers are persisted in every table so that a reader can recompute
/// the exact hashes used at construction time.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct KeyFunctionId(Uuid);

impl KeyFunctionId {
    /// Bernstein's xor-multiply string hash.
    pub const DJB: Self = Self(uuid!("BCC54D42-34F0-43FF-88EB-59C7B47EE210"));
    /// 64-bit FNV-1a.
    pub const FNV1A: Self = Self(uuid!("87333E59-7C1A-4613-9C6F-81F1BB1F6AED"));
    /// Jenkins' one-at-a-time hash.
    pub const OAT: Self = Self(uuid!("3AC2A805-6771-4189-8C62-5F41297126FE"));
    /// xxh3 64-bit.
    pub const XXH3: Self = Self(uuid!("6F1C2B0E-5A43-4E7D-9B8A-0C2D4E6F8A11"));
    /// foldhash fast hasher.
    pub const FOLDHASH: Self = Self(uuid!("0B9E7D3C-1F24-4A68-8C5E-7D3A2B1C0F99"));

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8; 16] {
        self.0.as_bytes()
    }
}

impl fmt::Display for KeyFunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

impl FromStr for KeyFunctionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Mixed hash words of one key, from which bucket and slot indices derive.
///
/// Construction hashes every key once into a `KeyHash` and then probes many
/// displacements against it; lookups go through the same derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyHash {
    primary: u64,
    secondary: u64,
}

impl KeyHash {
    const PRIMARY_SALT: u64 = 0x243f6a8885a308d3;
    const SECONDARY_SALT: u64 = 0x13198a2e03707344;
    const DISPLACEMENT_STEP: u64 = 0x9e3779b97f4a7c15;

    /// Derives the hash words from a family's raw 64-bit output.
    pub fn new(hash: u64, seed: u64) -> Self {
        let seed = mix64(seed);
        Self {
            primary: mix64(hash ^ seed ^ Self::PRIMARY_SALT),
            secondary: mix64(hash.wrapping_add(seed) ^ Self::SECONDARY_SALT),
        }
    }

    /// Bucket index in `[0, bucket_count)`. `bucket_count` must be non-zero.
    pub fn bucket(&self, bucket_count: u32) -> u32 {
        (self.primary % bucket_count as u64) as u32
    }

    /// Slot index in `[0, slot_count)` for the given displacement.
    /// `slot_count` must be non-zero.
    pub fn probe(&self, displacement: u32, slot_count: u32) -> u32 {
        let step = (displacement as u64).wrapping_mul(Self::DISPLACEMENT_STEP);
        (mix64(self.secondary.wrapping_add(step)) % slot_count as u64) as u32
    }
}

/// MurmurHash3 64-bit finalizer.
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 33;
    x = x.wrapping_mul(0xff51afd7ed558ccd);
    x ^= x >> 33;
    x = x.wrapping_mul(0xc4ceb9fe1a85ec53);
    x ^ (x >> 33)
}

/// A family of seeded hash functions usable for perfect hash construction.
///
/// Implementors provide a raw seeded 64-bit hash; bucket and probe indices are
/// derived from it by [`KeyFunctionExt`]. Implementations must be
/// deterministic across processes and platforms, since the identifier and seed
/// are all a reader gets to reproduce the layout.
pub trait KeyFunction: Send + Sync + fmt::Debug {
    /// Human readable family name.
    fn name(&self) -> &str;

    /// Hashes `key` under `seed`.
    fn hash(&self, key: &[u8], seed: u64) -> u64;

    /// Hashes `key` into the words used for placement.
    fn key_hash(&self, key: &[u8], seed: u64) -> KeyHash {
        KeyHash::new(self.hash(key, seed), seed)
    }
}

/// Placement operations available on every [`KeyFunction`].
pub trait KeyFunctionExt {
    /// Primary placement: the bucket `key` belongs to.
    fn bucket_index(&self, key: &[u8], seed: u64, bucket_count: u32) -> u32;

    /// Secondary placement: the candidate slot of `key` under `displacement`.
    fn probe_index(&self, key: &[u8], seed: u64, displacement: u32, slot_count: u32) -> u32;
}

impl<T: KeyFunction + ?Sized> KeyFunctionExt for T {
    fn bucket_index(&self, key: &[u8], seed: u64, bucket_count: u32) -> u32 {
        self.key_hash(key, seed).bucket(bucket_count)
    }

    fn probe_index(&self, key: &[u8], seed: u64, displacement: u32, slot_count: u32) -> u32 {
        self.key_hash(key, seed).probe(displacement, slot_count)
    }
}

/// Bernstein's `h * 33 ^ byte`, starting from the seed instead of 5381.
#[derive(Debug, Default, Clone, Copy)]
pub struct Djb;

impl KeyFunction for Djb {
    fn name(&self) -> &str {
        "djb"
    }

    fn hash(&self, key: &[u8], seed: u64) -> u64 {
        key.iter()
            .fold(seed, |h, &b| h.wrapping_mul(33) ^ b as u64)
    }
}

/// 64-bit FNV-1a with the seed XORed into the offset basis.
#[derive(Debug, Default, Clone, Copy)]
pub struct Fnv1a;

impl Fnv1a {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;
}

impl KeyFunction for Fnv1a {
    fn name(&self) -> &str {
        "fnv1a"
    }

    fn hash(&self, key: &[u8], seed: u64) -> u64 {
        key.iter().fold(Self::OFFSET_BASIS ^ seed, |h, &b| {
            (h ^ b as u64).wrapping_mul(Self::PRIME)
        })
    }
}

/// Jenkins one-at-a-time widened to 64 bits, with the seed as initial state.
#[derive(Debug, Default, Clone, Copy)]
pub struct OneAtATime;

impl KeyFunction for OneAtATime {
    fn name(&self) -> &str {
        "oat"
    }

    fn hash(&self, key: &[u8], seed: u64) -> u64 {
        let mut h = seed;
        for &b in key {
            h = h.wrapping_add(b as u64);
            h = h.wrapping_add(h << 10);
            h ^= h >> 6;
        }
        h = h.wrapping_add(h << 3);
        h ^= h >> 11;
        h.wrapping_add(h << 15)
    }
}

/// xxh3-64 with the construction seed as its native seed.
#[derive(Debug, Default, Clone, Copy)]
pub struct Xxh3;

impl KeyFunction for Xxh3 {
    fn name(&self) -> &str {
        "xxh3"
    }

    fn hash(&self, key: &[u8], seed: u64) -> u64 {
        xxhash_rust::xxh3::xxh3_64_with_seed(key, seed)
    }
}

/// foldhash keyed by the construction seed.
///
/// foldhash does not promise stable output across major versions, so tables
/// built with it should be rebuilt when the dependency is upgraded.
#[derive(Debug, Default, Clone, Copy)]
pub struct Foldhash;

impl KeyFunction for Foldhash {
    fn name(&self) -> &str {
        "foldhash"
    }

    fn hash(&self, key: &[u8], seed: u64) -> u64 {
        FixedState::with_seed(seed).hash_one(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn families() -> Vec<Box<dyn KeyFunction>> {
        vec![
            Box::new(Djb),
            Box::new(Fnv1a),
            Box::new(OneAtATime),
            Box::new(Xxh3),
            Box::new(Foldhash),
        ]
    }

    #[test]
    fn test_identifier_text_form() {
        assert_eq!(
            KeyFunctionId::DJB.to_string(),
            "BCC54D42-34F0-43FF-88EB-59C7B47EE210"
        );
        let parsed: KeyFunctionId = "87333e59-7c1a-4613-9c6f-81f1bb1f6aed".parse().unwrap();
        assert_eq!(parsed, KeyFunctionId::FNV1A);
        "not-a-uuid".parse::<KeyFunctionId>().unwrap_err();

        let json = serde_json::to_string(&KeyFunctionId::OAT).unwrap();
        assert_eq!(json, "\"3ac2a805-6771-4189-8c62-5f41297126fe\"");
        let back: KeyFunctionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, KeyFunctionId::OAT);
        assert_eq!(KeyFunctionId::from_bytes(*back.as_bytes()), back);
    }

    #[test]
    fn test_reference_values() {
        assert_eq!(Fnv1a.hash(b"", 0), 0xcbf29ce484222325);
        assert_eq!(Fnv1a.hash(b"a", 0), 0xaf63dc4c8601ec8c);
        assert_eq!(Djb.hash(b"", 17), 17);
        assert_eq!(Djb.hash(b"a", 0), 97);
        assert_eq!(
            Xxh3.hash(b"keyword", 3),
            xxhash_rust::xxh3::xxh3_64_with_seed(b"keyword", 3)
        );
    }

    #[test]
    fn test_indices_in_range() {
        for family in families() {
            for i in 0..1000u32 {
                let key = format!("key-{i}");
                let bucket = family.bucket_index(key.as_bytes(), 7, 13);
                assert!(bucket < 13, "{} bucket {bucket}", family.name());
                for d in 0..5 {
                    let slot = family.probe_index(key.as_bytes(), 7, d, 101);
                    assert!(slot < 101, "{} slot {slot}", family.name());
                }
            }
        }
    }

    #[test]
    fn test_probe_sequence_spreads() {
        for family in families() {
            let hash = family.key_hash(b"SELECT", 99);
            let slots: HashSet<u32> = (0..256).map(|d| hash.probe(d, 1 << 20)).collect();
            assert!(slots.len() > 250, "{} only {} slots", family.name(), slots.len());
        }
    }

    #[test]
    fn test_seed_changes_placement() {
        for family in families() {
            let a = family.key_hash(b"WHERE", 1);
            let b = family.key_hash(b"WHERE", 2);
            assert_ne!(a, b, "{}", family.name());
            assert_eq!(a, family.key_hash(b"WHERE", 1));
        }
    }

    #[test]
    fn test_buckets_are_balanced() {
        for family in families() {
            let mut counts = [0u32; 16];
            for i in 0..16_000u32 {
                let key = format!("{i:08}");
                counts[family.bucket_index(key.as_bytes(), 5, 16) as usize] += 1;
            }
            for &count in &counts {
                assert!((700..1300).contains(&count), "{} {counts:?}", family.name());
            }
        }
    }
}
