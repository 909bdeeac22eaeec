use serde::{Deserialize, Serialize};

use crate::{Error, KeyFunctionId, MAGIC_NUMBER, Result, error::corrupt};

/// Construction parameters of a perfect hash table.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PerfectHashConfig {
    /// Key function family used for bucket and slot placement.
    pub key_function: KeyFunctionId,
    /// Seed scoping every hash of one construction attempt.
    pub seed: u64,
    /// Ratio of slots to keys, at least `1.0`.
    pub load_factor: f64,
    /// Expected number of keys per bucket.
    pub bucket_size: f64,
    /// Largest displacement searched per bucket; defaults to the slot count,
    /// but never less than [`MIN_DEFAULT_DISPLACEMENT`](Self::MIN_DEFAULT_DISPLACEMENT).
    pub max_displacement: Option<u32>,
}

impl Default for PerfectHashConfig {
    fn default() -> Self {
        Self {
            key_function: KeyFunctionId::DJB,
            seed: 0,
            load_factor: Self::DEFAULT_LOAD_FACTOR,
            bucket_size: Self::DEFAULT_BUCKET_SIZE,
            max_displacement: None,
        }
    }
}

impl PerfectHashConfig {
    pub const DEFAULT_LOAD_FACTOR: f64 = 1.25;
    pub const DEFAULT_BUCKET_SIZE: f64 = 4.0;
    /// Floor of the default displacement bound. Small tables get this many
    /// probes per bucket, and displacements still fit in one byte.
    pub const MIN_DEFAULT_DISPLACEMENT: u32 = u8::MAX as u32;

    /// Derives the table dimensions for `key_count` keys.
    pub(crate) fn dimensions(&self, key_count: usize) -> Result<TableDimensions> {
        if !self.load_factor.is_finite() || self.load_factor < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "load factor must be a finite value >= 1.0, got {}",
                self.load_factor
            )));
        }
        if !self.bucket_size.is_finite() || self.bucket_size <= 0.0 {
            return Err(Error::InvalidConfig(format!(
                "bucket size must be a finite positive value, got {}",
                self.bucket_size
            )));
        }

        let key_count = u32::try_from(key_count).map_err(|_| {
            Error::InvalidConfig(format!("{key_count} keys exceed the table limit"))
        })?;
        let slots = (key_count as f64 * self.load_factor).ceil();
        if slots > u32::MAX as f64 {
            return Err(Error::InvalidConfig(format!(
                "{key_count} keys at load factor {} exceed the slot limit",
                self.load_factor
            )));
        }
        let slot_count = (slots as u32).max(key_count).max(1);

        let buckets = (key_count as f64 / self.bucket_size).ceil();
        if buckets > u32::MAX as f64 {
            return Err(Error::InvalidConfig(format!(
                "bucket size {} yields too many buckets",
                self.bucket_size
            )));
        }
        let bucket_count = (buckets as u32).max(1);

        Ok(TableDimensions {
            bucket_count,
            slot_count,
            max_displacement: self
                .max_displacement
                .unwrap_or(slot_count.max(Self::MIN_DEFAULT_DISPLACEMENT)),
        })
    }
}

/// Sizes fixed before construction starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TableDimensions {
    pub bucket_count: u32,
    pub slot_count: u32,
    pub max_displacement: u32,
}

/// Fixed-size header at offset zero of every persisted table.
///
/// The header is written after the body, so an interrupted save never leaves
/// a record whose header vouches for a partial body.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PerfectHashHeader {
    /// Length in bytes of the body following the header.
    pub body_length: u64,
    /// xxh3-64 checksum of the body.
    pub body_checksum: u64,
}

impl PerfectHashHeader {
    pub const SIZE: usize = 24;

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        data[..8].copy_from_slice(&MAGIC_NUMBER.to_be_bytes());
        data[8..16].copy_from_slice(&self.body_length.to_be_bytes());
        data[16..].copy_from_slice(&self.body_checksum.to_be_bytes());
        data
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let data: &[u8; Self::SIZE] = data
            .try_into()
            .map_err(|_| corrupt(format!("header must be {} bytes", Self::SIZE)))?;
        let word = |i: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&data[i * 8..(i + 1) * 8]);
            u64::from_be_bytes(bytes)
        };

        let magic_number = word(0);
        if magic_number != MAGIC_NUMBER {
            return Err(corrupt(format!("invalid magic number: {magic_number:#018x}")));
        }
        Ok(Self {
            body_length: word(1),
            body_checksum: word(2),
        })
    }
}

/// Summary of a built or loaded table.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct PerfectHashInfo {
    /// Identifier of the key function family.
    pub key_function: KeyFunctionId,
    /// Name of the key function family.
    pub key_function_name: String,
    /// Construction seed.
    pub seed: u64,
    /// Number of entries stored.
    pub entry_count: u32,
    /// Number of buckets in the displacement array.
    pub bucket_count: u32,
    /// Number of buckets holding at least one key.
    pub occupied_bucket_count: u32,
    /// Number of slots, occupied or empty.
    pub slot_count: u32,
    /// Ratio of slots to entries.
    pub load_factor: f64,
    /// Largest displacement recorded for any bucket.
    pub max_displacement: u32,
    /// Bytes per persisted displacement.
    pub displacement_width: u8,
    /// Size in bytes of the persisted record, header included.
    pub file_length: u64,
}
