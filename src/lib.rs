//! Static perfect hash tables over closed key sets.
//!
//! The `pphash` crate builds lookup tables in which every key of a fixed set
//! resolves to its own slot with exactly two hash evaluations and no probing.
//! Construction follows the hash-and-displace scheme: keys are grouped into
//! small buckets, and each bucket searches for a displacement that sends all
//! of its keys to free slots. A table is built once, persisted to a compact
//! checksummed record and loaded back through positional IO traits.
//!
//! Construction is a single seeded attempt that may fail at tight load
//! factors. Callers retry with fresh seeds from a [`SeedGenerator`], either by
//! hand or through [`PerfectHashBuilder::build_with_retries`].
//!
//! ```
//! use pphash::{MemoryBuffer, PerfectHashBuilder, PerfectHashTable, RetryPolicy, SeedGenerator};
//!
//! # fn main() -> pphash::Result<()> {
//! let mut builder = PerfectHashBuilder::default().with_load_factor(1.23);
//! for (i, keyword) in ["SELECT", "INSERT", "UPDATE", "DELETE"].iter().enumerate() {
//!     builder.set(keyword, i.to_string())?;
//! }
//! let builder =
//!     builder.build_with_retries(&mut SeedGenerator::default(), &RetryPolicy::default())?;
//!
//! let buffer = MemoryBuffer::new();
//! builder.save(&buffer)?;
//!
//! let table = PerfectHashTable::load(&buffer)?;
//! assert_eq!(table.get("UPDATE"), Some(&b"2"[..]));
//! assert_eq!(table.get("MERGE"), None);
//! # Ok(())
//! # }
//! ```
const MAGIC_NUMBER: u64 = u64::from_be_bytes(*b"PPHTABLE");

mod error;
pub use error::{Error, Result};

mod hasher;
pub use hasher::{
    Djb, Fnv1a, Foldhash, KeyFunction, KeyFunctionExt, KeyFunctionId, KeyHash, OneAtATime, Xxh3,
};

mod registry;
pub use registry::KeyFunctionRegistry;

mod random;
pub use random::SeedGenerator;

mod meta;
pub use meta::{PerfectHashConfig, PerfectHashHeader, PerfectHashInfo};

mod reader;
pub use reader::PerfectHashReader;

mod writer;
pub use writer::PerfectHashWriter;

mod buffer;
pub use buffer::MemoryBuffer;

mod table;
pub use table::{PerfectHashIter, PerfectHashTable};

mod builder;
pub use builder::{BuilderState, PerfectHashBuilder, RetryPolicy};
