use std::cmp::Reverse;
use std::collections::BTreeMap;

use rand::RngCore;

use crate::meta::TableDimensions;
use crate::table::Entry;
use crate::{
    Error, KeyFunction, KeyFunctionId, KeyFunctionRegistry, KeyHash, PerfectHashConfig,
    PerfectHashInfo, PerfectHashTable, PerfectHashWriter, Result,
};

/// Lifecycle stage of a [`PerfectHashBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderState {
    /// Accepting entries; construction has not run.
    Loading,
    /// Construction succeeded and the table can be saved.
    Built,
    /// Construction exhausted its search. The builder cannot be reused.
    Failed,
}

#[derive(Debug)]
enum Stage {
    Loading(BTreeMap<Vec<u8>, Vec<u8>>),
    Built(PerfectHashTable),
    Failed,
}

/// Builder for perfect hash tables over a closed key set.
///
/// Entries are collected with [`set`](Self::set), then a single deterministic
/// construction attempt runs in [`initialize`](Self::initialize) using the
/// configured key function and seed. An attempt may fail: the caller is
/// expected to retry on a fresh builder with another seed, or let
/// [`build_with_retries`](Self::build_with_retries) do so.
///
/// # Examples
///
/// ```
/// use pphash::{KeyFunctionId, PerfectHashBuilder};
///
/// # fn main() -> pphash::Result<()> {
/// let mut builder = PerfectHashBuilder::default()
///     .with_key_function(KeyFunctionId::FNV1A)
///     .with_seed(42)
///     .with_load_factor(1.5);
/// for word in ["SELECT", "FROM", "WHERE"] {
///     builder.set(word, word)?;
/// }
/// assert!(builder.initialize()?);
/// assert_eq!(builder.table().unwrap().get("FROM"), Some(&b"FROM"[..]));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct PerfectHashBuilder {
    config: PerfectHashConfig,
    registry: KeyFunctionRegistry,
    stage: Stage,
}

impl Default for PerfectHashBuilder {
    fn default() -> Self {
        Self {
            config: PerfectHashConfig::default(),
            registry: KeyFunctionRegistry::global().clone(),
            stage: Stage::Loading(BTreeMap::new()),
        }
    }
}

impl PerfectHashBuilder {
    /// Replaces the entire construction configuration.
    pub fn with_config(mut self, config: PerfectHashConfig) -> Self {
        self.config = config;
        self
    }

    /// Selects the key function family. It must be present in the registry
    /// by the time [`initialize`](Self::initialize) runs.
    pub fn with_key_function(mut self, id: KeyFunctionId) -> Self {
        self.config.key_function = id;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.config.seed = seed;
        self
    }

    /// Sets the ratio of slots to keys.
    ///
    /// Higher values waste space but make each displacement search cheaper
    /// and failures rarer. Values below `1.0` are rejected at initialization.
    pub fn with_load_factor(mut self, load_factor: f64) -> Self {
        self.config.load_factor = load_factor;
        self
    }

    /// Sets the expected number of keys per bucket.
    pub fn with_bucket_size(mut self, bucket_size: f64) -> Self {
        self.config.bucket_size = bucket_size;
        self
    }

    /// Bounds the displacement search of each bucket.
    pub fn with_max_displacement(mut self, max_displacement: u32) -> Self {
        self.config.max_displacement = Some(max_displacement);
        self
    }

    /// Resolves key functions in `registry` instead of the global one.
    pub fn with_registry(mut self, registry: KeyFunctionRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn config(&self) -> &PerfectHashConfig {
        &self.config
    }

    pub fn state(&self) -> BuilderState {
        match self.stage {
            Stage::Loading(_) => BuilderState::Loading,
            Stage::Built(_) => BuilderState::Built,
            Stage::Failed => BuilderState::Failed,
        }
    }

    /// Number of distinct keys set or stored.
    pub fn len(&self) -> usize {
        match &self.stage {
            Stage::Loading(entries) => entries.len(),
            Stage::Built(table) => table.len(),
            Stage::Failed => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts an entry, replacing the value of an existing key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyInitialized`] once construction has run, and
    /// [`Error::InvalidConfig`] for keys or values longer than `u32::MAX`.
    pub fn set(&mut self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let Stage::Loading(entries) = &mut self.stage else {
            return Err(Error::AlreadyInitialized);
        };
        let (key, value) = (key.as_ref(), value.as_ref());
        if u32::try_from(key.len()).is_err() || u32::try_from(value.len()).is_err() {
            return Err(Error::InvalidConfig(
                "keys and values are limited to u32::MAX bytes".to_string(),
            ));
        }
        entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    /// Removes an entry, returning its value if the key was set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyInitialized`] once construction has run.
    pub fn remove(&mut self, key: impl AsRef<[u8]>) -> Result<Option<Vec<u8>>> {
        let Stage::Loading(entries) = &mut self.stage else {
            return Err(Error::AlreadyInitialized);
        };
        Ok(entries.remove(key.as_ref()))
    }

    /// Runs one construction attempt over the entries set so far.
    ///
    /// Returns `Ok(true)` when every key was placed, and `Ok(false)` when some
    /// bucket found no free displacement. Exhaustion is an expected outcome at
    /// tight load factors, not an error; the builder then stays
    /// [`BuilderState::Failed`].
    ///
    /// # Errors
    ///
    /// Fails without consuming the entries on an empty key set, an unknown
    /// key function or an invalid configuration, and with
    /// [`Error::AlreadyInitialized`] if construction already ran.
    pub fn initialize(&mut self) -> Result<bool> {
        let Stage::Loading(entries) = &mut self.stage else {
            return Err(Error::AlreadyInitialized);
        };
        if entries.is_empty() {
            return Err(Error::EmptyKeySet);
        }
        let key_function = self.registry.get(&self.config.key_function)?;
        let dimensions = self.config.dimensions(entries.len())?;
        let entries = std::mem::take(entries);

        log::debug!(
            "constructing perfect hash: {} keys, {} buckets, {} slots, key function {} seed {:#018x}",
            entries.len(),
            dimensions.bucket_count,
            dimensions.slot_count,
            key_function.name(),
            self.config.seed
        );

        let placement =
            Construction::new(key_function.as_ref(), self.config.seed, dimensions, entries).run();
        match placement {
            Some((displacements, slots)) => {
                self.stage = Stage::Built(PerfectHashTable::from_parts(
                    self.config.key_function,
                    key_function,
                    self.config.seed,
                    dimensions.max_displacement,
                    displacements,
                    slots,
                ));
                Ok(true)
            }
            None => {
                self.stage = Stage::Failed;
                Ok(false)
            }
        }
    }

    /// The built table, if construction succeeded.
    pub fn table(&self) -> Option<&PerfectHashTable> {
        match &self.stage {
            Stage::Built(table) => Some(table),
            _ => None,
        }
    }

    pub fn into_table(self) -> Result<PerfectHashTable> {
        match self.stage {
            Stage::Built(table) => Ok(table),
            _ => Err(Error::NotBuilt),
        }
    }

    /// Persists the built table to `writer`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotBuilt`] without writing anything unless
    /// [`initialize`](Self::initialize) succeeded.
    pub fn save<W: PerfectHashWriter>(&self, writer: &W) -> Result<PerfectHashInfo> {
        self.table().ok_or(Error::NotBuilt)?.save(writer)
    }

    /// Builds a table from this builder's entries, retrying failed attempts.
    ///
    /// For each key function of `policy`, up to `policy.max_tries` fresh
    /// builders are initialized, each with a new seed drawn from `seeds`. The
    /// first built builder is returned; this builder serves as a template for
    /// the configuration and is consumed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConstructionFailed`] once every attempt is exhausted,
    /// and propagates misuse errors such as [`Error::UnknownIdentifier`]
    /// immediately.
    pub fn build_with_retries<R: RngCore + ?Sized>(
        self,
        seeds: &mut R,
        policy: &RetryPolicy,
    ) -> Result<PerfectHashBuilder> {
        let Stage::Loading(entries) = self.stage else {
            return Err(Error::AlreadyInitialized);
        };
        if entries.is_empty() {
            return Err(Error::EmptyKeySet);
        }

        let key_functions = if policy.key_functions.is_empty() {
            self.registry.identifiers().collect::<Vec<_>>()
        } else {
            policy.key_functions.clone()
        };

        let mut attempts = 0;
        for key_function in key_functions {
            for _ in 0..policy.max_tries {
                let seed = seeds.next_u64();
                let mut attempt = PerfectHashBuilder {
                    config: PerfectHashConfig {
                        key_function,
                        seed,
                        ..self.config.clone()
                    },
                    registry: self.registry.clone(),
                    stage: Stage::Loading(entries.clone()),
                };
                attempts += 1;
                if attempt.initialize()? {
                    log::debug!(
                        "attempt {attempts} built a table with key function {key_function} seed {seed:#018x}"
                    );
                    return Ok(attempt);
                }
                log::debug!(
                    "attempt {attempts} with key function {key_function} seed {seed:#018x} exhausted"
                );
            }
            log::warn!(
                "key function {key_function} failed {} construction attempts",
                policy.max_tries
            );
        }

        Err(Error::ConstructionFailed { attempts })
    }
}

/// Bounds of the caller-level retry loop run by
/// [`PerfectHashBuilder::build_with_retries`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Seeds tried per key function.
    pub max_tries: usize,
    /// Key functions tried in order; empty means every registered family.
    pub key_functions: Vec<KeyFunctionId>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_tries: 3,
            key_functions: Vec::new(),
        }
    }
}

impl RetryPolicy {
    pub fn with_max_tries(mut self, max_tries: usize) -> Self {
        self.max_tries = max_tries;
        self
    }

    pub fn with_key_functions(mut self, ids: impl IntoIterator<Item = KeyFunctionId>) -> Self {
        self.key_functions = ids.into_iter().collect();
        self
    }
}

/// Scratch state of one construction attempt.
///
/// Everything here is dropped when the attempt ends; only the displacement
/// array and the slot table survive a success.
struct Construction {
    dimensions: TableDimensions,
    entries: Vec<Entry>,
    hashes: Vec<KeyHash>,
}

impl Construction {
    fn new(
        key_function: &dyn KeyFunction,
        seed: u64,
        dimensions: TableDimensions,
        entries: BTreeMap<Vec<u8>, Vec<u8>>,
    ) -> Self {
        let entries = entries
            .into_iter()
            .map(|(key, value)| Entry { key, value })
            .collect::<Vec<_>>();
        let hashes = entries
            .iter()
            .map(|entry| key_function.key_hash(&entry.key, seed))
            .collect();
        Self {
            dimensions,
            entries,
            hashes,
        }
    }

    /// Places buckets largest first, returning the displacement array and
    /// slot table, or `None` if some bucket cannot be placed.
    fn run(self) -> Option<(Vec<u32>, Vec<Option<Entry>>)> {
        let TableDimensions {
            bucket_count,
            slot_count,
            max_displacement,
        } = self.dimensions;

        let mut buckets: Vec<Vec<u32>> = vec![Vec::new(); bucket_count as usize];
        for (index, hash) in self.hashes.iter().enumerate() {
            buckets[hash.bucket(bucket_count) as usize].push(index as u32);
        }

        let mut order = (0..bucket_count)
            .filter(|&bucket| !buckets[bucket as usize].is_empty())
            .collect::<Vec<_>>();
        order.sort_by_key(|&bucket| (Reverse(buckets[bucket as usize].len()), bucket));

        let mut owners: Vec<Option<u32>> = vec![None; slot_count as usize];
        let mut displacements = vec![0u32; bucket_count as usize];
        let mut candidate = Vec::new();
        let mut largest_displacement = 0;

        for &bucket in &order {
            let members = &buckets[bucket as usize];
            let found = (0..=max_displacement)
                .find(|&displacement| self.fits(members, displacement, &owners, &mut candidate));
            let Some(displacement) = found else {
                log::warn!(
                    "bucket {bucket} of {} keys has no free displacement up to {max_displacement}",
                    members.len()
                );
                return None;
            };

            log::trace!(
                "bucket {bucket} of {} keys placed at displacement {displacement}",
                members.len()
            );
            displacements[bucket as usize] = displacement;
            largest_displacement = largest_displacement.max(displacement);
            for (&member, &slot) in members.iter().zip(&candidate) {
                owners[slot as usize] = Some(member);
            }
        }

        log::debug!(
            "placed {} keys in {} buckets, largest displacement {largest_displacement}",
            self.entries.len(),
            order.len()
        );

        let mut entries = self.entries.into_iter().map(Some).collect::<Vec<_>>();
        let slots = owners
            .into_iter()
            .map(|owner| owner.and_then(|index| entries[index as usize].take()))
            .collect();
        Some((displacements, slots))
    }

    /// Checks whether `displacement` sends every member of a bucket to a
    /// distinct free slot, leaving those slots in `candidate`.
    fn fits(
        &self,
        members: &[u32],
        displacement: u32,
        owners: &[Option<u32>],
        candidate: &mut Vec<u32>,
    ) -> bool {
        candidate.clear();
        for &member in members {
            let slot = self.hashes[member as usize].probe(displacement, self.dimensions.slot_count);
            if owners[slot as usize].is_some() || candidate.contains(&slot) {
                return false;
            }
            candidate.push(slot);
        }
        true
    }
}
