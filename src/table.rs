use std::io::{Cursor, ErrorKind, Read};
use std::sync::Arc;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::corrupt;
use crate::{
    Error, KeyFunction, KeyFunctionId, KeyFunctionRegistry, PerfectHashHeader, PerfectHashInfo,
    PerfectHashReader, PerfectHashWriter, Result,
};

const FORMAT_VERSION: u32 = 1;

const SLOT_EMPTY: u8 = 0;
const SLOT_OCCUPIED: u8 = 1;

/// Bytes of the fixed body fields preceding the displacement array.
const FIXED_BODY_LENGTH: usize = 4 + 16 + 8 + 4 + 4 + 4 + 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Entry {
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

/// Immutable perfect hash table.
///
/// A table is produced either by a successful
/// [`PerfectHashBuilder::initialize`](crate::PerfectHashBuilder::initialize)
/// or by [`load`](Self::load) from a persisted record. Every stored key sits in
/// the slot named by its bucket displacement, so a lookup costs one hash, one
/// displacement read and one key comparison.
///
/// ```
/// use pphash::{MemoryBuffer, PerfectHashBuilder, PerfectHashTable};
///
/// # fn main() -> pphash::Result<()> {
/// let mut builder = PerfectHashBuilder::default().with_seed(7);
/// builder.set("apple", "red")?;
/// builder.set("banana", "yellow")?;
/// assert!(builder.initialize()?);
///
/// let buffer = MemoryBuffer::new();
/// builder.save(&buffer)?;
///
/// let table = PerfectHashTable::load(&buffer)?;
/// assert_eq!(table.get("banana"), Some(&b"yellow"[..]));
/// assert_eq!(table.get("cherry"), None);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct PerfectHashTable {
    key_function_id: KeyFunctionId,
    key_function: Arc<dyn KeyFunction>,
    seed: u64,
    displacement_width: u8,
    displacements: Vec<u32>,
    slots: Vec<Option<Entry>>,
    entry_count: u32,
}

impl PerfectHashTable {
    pub(crate) fn from_parts(
        key_function_id: KeyFunctionId,
        key_function: Arc<dyn KeyFunction>,
        seed: u64,
        max_displacement: u32,
        displacements: Vec<u32>,
        slots: Vec<Option<Entry>>,
    ) -> Self {
        let entry_count = slots.iter().filter(|slot| slot.is_some()).count() as u32;
        Self {
            key_function_id,
            key_function,
            seed,
            displacement_width: displacement_width(max_displacement),
            displacements,
            slots,
            entry_count,
        }
    }

    /// Loads a table persisted by [`save`](Self::save), resolving its key
    /// function in the global registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptData`] when the record is truncated, fails its
    /// checksum or is structurally invalid, and [`Error::UnknownIdentifier`]
    /// when the key function is not registered.
    pub fn load<R: PerfectHashReader>(reader: &R) -> Result<Self> {
        Self::load_with_registry(reader, KeyFunctionRegistry::global())
    }

    /// Like [`load`](Self::load), resolving the key function in `registry`.
    pub fn load_with_registry<R: PerfectHashReader>(
        reader: &R,
        registry: &KeyFunctionRegistry,
    ) -> Result<Self> {
        const HEADER_SIZE: u64 = PerfectHashHeader::SIZE as u64;

        let header = reader
            .read_exact_at(0, HEADER_SIZE, PerfectHashHeader::deserialize)
            .map_err(read_error)??;
        if header.body_length < FIXED_BODY_LENGTH as u64 {
            return Err(corrupt(format!(
                "body length {} is shorter than the fixed fields",
                header.body_length
            )));
        }
        let end = HEADER_SIZE
            .checked_add(header.body_length)
            .ok_or_else(|| corrupt("body length overflows"))?;
        // probe the last byte before allocating the whole body
        reader.read_exact_at(end - 1, 1, |_| ()).map_err(read_error)?;

        reader
            .read_exact_at(HEADER_SIZE, header.body_length, |data| {
                let checksum = xxhash_rust::xxh3::xxh3_64(data);
                if checksum != header.body_checksum {
                    return Err(corrupt(format!(
                        "checksum mismatch: stored {:#018x}, computed {checksum:#018x}",
                        header.body_checksum
                    )));
                }
                Self::decode_body(data, registry)
            })
            .map_err(read_error)?
    }

    /// Persists the table to `writer`.
    ///
    /// The body is written first and the header last, so a failed save leaves
    /// no record that [`load`](Self::load) would accept.
    pub fn save<W: PerfectHashWriter>(&self, writer: &W) -> Result<PerfectHashInfo> {
        let body = self.encode_body()?;
        let header = PerfectHashHeader {
            body_length: body.len() as u64,
            body_checksum: xxhash_rust::xxh3::xxh3_64(&body),
        };
        writer.write_at(&body, PerfectHashHeader::SIZE as u64)?;
        writer.write_at(&header.serialize(), 0)?;

        log::debug!(
            "saved perfect hash table: {} entries, {} bytes",
            self.entry_count,
            PerfectHashHeader::SIZE + body.len()
        );
        Ok(self.info())
    }

    /// The complete persisted record, header included.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = self.encode_body()?;
        let header = PerfectHashHeader {
            body_length: body.len() as u64,
            body_checksum: xxhash_rust::xxh3::xxh3_64(&body),
        };
        let mut data = Vec::with_capacity(PerfectHashHeader::SIZE + body.len());
        data.extend_from_slice(&header.serialize());
        data.extend_from_slice(&body);
        Ok(data)
    }

    /// Returns the value stored for `key`, or `None` if the key is absent.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Option<&[u8]> {
        self.find(key.as_ref()).map(|(_, entry)| entry.value.as_slice())
    }

    pub fn contains(&self, key: impl AsRef<[u8]>) -> bool {
        self.find(key.as_ref()).is_some()
    }

    /// Slot index of `key`: the perfect hash value of a stored key.
    pub fn slot_of(&self, key: impl AsRef<[u8]>) -> Option<u32> {
        self.find(key.as_ref()).map(|(slot, _)| slot)
    }

    /// Number of entries stored.
    pub fn len(&self) -> usize {
        self.entry_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.entry_count == 0
    }

    pub fn key_function(&self) -> KeyFunctionId {
        self.key_function_id
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn bucket_count(&self) -> u32 {
        self.displacements.len() as u32
    }

    pub fn slot_count(&self) -> u32 {
        self.slots.len() as u32
    }

    /// Displacement of every bucket, indexed by bucket.
    pub fn displacements(&self) -> &[u32] {
        &self.displacements
    }

    /// Iterates over stored entries in slot order.
    pub fn iter(&self) -> PerfectHashIter<'_> {
        PerfectHashIter {
            slots: self.slots.iter(),
        }
    }

    /// Summarizes the table layout.
    pub fn info(&self) -> PerfectHashInfo {
        let occupied_bucket_count = {
            let mut occupied = vec![false; self.displacements.len()];
            for entry in self.slots.iter().flatten() {
                occupied[self.key_hash(&entry.key).bucket(self.bucket_count()) as usize] = true;
            }
            occupied.into_iter().filter(|&b| b).count() as u32
        };

        PerfectHashInfo {
            key_function: self.key_function_id,
            key_function_name: self.key_function.name().to_string(),
            seed: self.seed,
            entry_count: self.entry_count,
            bucket_count: self.bucket_count(),
            occupied_bucket_count,
            slot_count: self.slot_count(),
            load_factor: match self.entry_count {
                0 => 0.0,
                n => self.slot_count() as f64 / n as f64,
            },
            max_displacement: self.displacements.iter().copied().max().unwrap_or(0),
            displacement_width: self.displacement_width,
            file_length: (PerfectHashHeader::SIZE + self.body_length()) as u64,
        }
    }

    fn key_hash(&self, key: &[u8]) -> crate::KeyHash {
        self.key_function.key_hash(key, self.seed)
    }

    /// Slot a key would occupy, whether or not it is stored.
    fn locate(&self, key: &[u8]) -> u32 {
        let hash = self.key_hash(key);
        let displacement = self.displacements[hash.bucket(self.bucket_count()) as usize];
        hash.probe(displacement, self.slot_count())
    }

    fn find(&self, key: &[u8]) -> Option<(u32, &Entry)> {
        let slot = self.locate(key);
        match &self.slots[slot as usize] {
            Some(entry) if entry.key == key => Some((slot, entry)),
            _ => None,
        }
    }

    fn body_length(&self) -> usize {
        let slots: usize = self
            .slots
            .iter()
            .map(|slot| match slot {
                Some(entry) => 1 + 4 + entry.key.len() + 4 + entry.value.len(),
                None => 1,
            })
            .sum();
        FIXED_BODY_LENGTH + self.displacements.len() * self.displacement_width as usize + slots
    }

    fn encode_body(&self) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.body_length());
        out.write_u32::<BigEndian>(FORMAT_VERSION)?;
        out.extend_from_slice(self.key_function_id.as_bytes());
        out.write_u64::<BigEndian>(self.seed)?;
        out.write_u32::<BigEndian>(self.entry_count)?;
        out.write_u32::<BigEndian>(self.bucket_count())?;
        out.write_u32::<BigEndian>(self.slot_count())?;
        out.write_u8(self.displacement_width)?;

        for &displacement in &self.displacements {
            match self.displacement_width {
                1 => out.write_u8(displacement as u8)?,
                2 => out.write_u16::<BigEndian>(displacement as u16)?,
                _ => out.write_u32::<BigEndian>(displacement)?,
            }
        }

        for slot in &self.slots {
            match slot {
                None => out.write_u8(SLOT_EMPTY)?,
                Some(entry) => {
                    out.write_u8(SLOT_OCCUPIED)?;
                    out.write_u32::<BigEndian>(entry.key.len() as u32)?;
                    out.extend_from_slice(&entry.key);
                    out.write_u32::<BigEndian>(entry.value.len() as u32)?;
                    out.extend_from_slice(&entry.value);
                }
            }
        }
        Ok(out)
    }

    fn decode_body(data: &[u8], registry: &KeyFunctionRegistry) -> Result<Self> {
        let mut cursor = Cursor::new(data);

        let version = cursor.read_u32::<BigEndian>().map_err(truncated)?;
        if version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {version}")));
        }
        let mut id = [0u8; 16];
        cursor.read_exact(&mut id).map_err(truncated)?;
        let key_function_id = KeyFunctionId::from_bytes(id);
        let key_function = registry.get(&key_function_id)?;

        let seed = cursor.read_u64::<BigEndian>().map_err(truncated)?;
        let entry_count = cursor.read_u32::<BigEndian>().map_err(truncated)?;
        let bucket_count = cursor.read_u32::<BigEndian>().map_err(truncated)?;
        let slot_count = cursor.read_u32::<BigEndian>().map_err(truncated)?;
        let displacement_width = cursor.read_u8().map_err(truncated)?;

        if bucket_count == 0 || slot_count == 0 {
            return Err(corrupt("bucket and slot counts must be non-zero"));
        }
        if entry_count > slot_count {
            return Err(corrupt(format!(
                "{entry_count} entries cannot fit in {slot_count} slots"
            )));
        }
        if !matches!(displacement_width, 1 | 2 | 4) {
            return Err(corrupt(format!(
                "invalid displacement width {displacement_width}"
            )));
        }
        let minimum = bucket_count as u64 * displacement_width as u64 + slot_count as u64;
        if minimum > remaining(&cursor) as u64 {
            return Err(corrupt("body too short for its bucket and slot counts"));
        }

        let mut displacements = Vec::with_capacity(bucket_count as usize);
        for _ in 0..bucket_count {
            let displacement = match displacement_width {
                1 => cursor.read_u8().map(u32::from),
                2 => cursor.read_u16::<BigEndian>().map(u32::from),
                _ => cursor.read_u32::<BigEndian>(),
            };
            displacements.push(displacement.map_err(truncated)?);
        }

        let mut slots = Vec::with_capacity(slot_count as usize);
        for index in 0..slot_count {
            match cursor.read_u8().map_err(truncated)? {
                SLOT_EMPTY => slots.push(None),
                SLOT_OCCUPIED => {
                    let key = read_bytes(&mut cursor)?;
                    let value = read_bytes(&mut cursor)?;
                    slots.push(Some(Entry { key, value }));
                }
                flag => {
                    return Err(corrupt(format!("invalid flag {flag} in slot {index}")));
                }
            }
        }

        if remaining(&cursor) != 0 {
            return Err(corrupt(format!(
                "{} trailing bytes after slot table",
                remaining(&cursor)
            )));
        }

        let table = Self {
            key_function_id,
            key_function,
            seed,
            displacement_width,
            displacements,
            slots,
            entry_count,
        };

        let occupied = table.slots.iter().filter(|slot| slot.is_some()).count();
        if occupied != entry_count as usize {
            return Err(corrupt(format!(
                "entry count {entry_count} does not match {occupied} occupied slots"
            )));
        }
        for (index, slot) in table.slots.iter().enumerate() {
            if let Some(entry) = slot {
                if table.locate(&entry.key) as usize != index {
                    return Err(corrupt(format!("key in slot {index} is misplaced")));
                }
            }
        }

        Ok(table)
    }
}

impl<'a> IntoIterator for &'a PerfectHashTable {
    type Item = (&'a [u8], &'a [u8]);
    type IntoIter = PerfectHashIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the entries of a [`PerfectHashTable`] in slot order.
pub struct PerfectHashIter<'a> {
    slots: std::slice::Iter<'a, Option<Entry>>,
}

impl<'a> Iterator for PerfectHashIter<'a> {
    type Item = (&'a [u8], &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        self.slots
            .find_map(Option::as_ref)
            .map(|entry| (entry.key.as_slice(), entry.value.as_slice()))
    }
}

/// Smallest persisted width holding every displacement up to `max`.
fn displacement_width(max: u32) -> u8 {
    if max <= u8::MAX as u32 {
        1
    } else if max <= u16::MAX as u32 {
        2
    } else {
        4
    }
}

fn remaining(cursor: &Cursor<&[u8]>) -> usize {
    cursor.get_ref().len().saturating_sub(cursor.position() as usize)
}

fn read_bytes(cursor: &mut Cursor<&[u8]>) -> Result<Vec<u8>> {
    let length = cursor.read_u32::<BigEndian>().map_err(truncated)? as usize;
    if length > remaining(cursor) {
        return Err(corrupt(format!(
            "byte string of {length} bytes runs past the end of the body"
        )));
    }
    let mut bytes = vec![0u8; length];
    cursor.read_exact(&mut bytes).map_err(truncated)?;
    Ok(bytes)
}

fn truncated(_: std::io::Error) -> Error {
    corrupt("unexpected end of table body")
}

fn read_error(e: std::io::Error) -> Error {
    if e.kind() == ErrorKind::UnexpectedEof {
        corrupt(format!("truncated table: {e}"))
    } else {
        Error::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::fs::FileExt;

    use crate::*;
    use test_log::test;

    fn build(entries: &[(&str, &str)], seed: u64) -> PerfectHashTable {
        let mut builder = PerfectHashBuilder::default()
            .with_key_function(KeyFunctionId::XXH3)
            .with_seed(seed);
        for (key, value) in entries {
            builder.set(key, value).unwrap();
        }
        assert!(builder.initialize().unwrap(), "construction failed at seed {seed}");
        builder.into_table().unwrap()
    }

    const FRUITS: [(&str, &str); 5] = [
        ("apple", "1"),
        ("banana", "2"),
        ("cherry", "3"),
        ("date", "4"),
        ("elderberry", "5"),
    ];

    #[test]
    fn test_basic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fruits.pph");

        let table = build(&FRUITS, 42);
        let writer = std::fs::File::create(&path).unwrap();
        let info = table.save(&writer).unwrap();
        assert_eq!(info.entry_count, 5);
        assert_eq!(info.key_function_name, "xxh3");

        let file = std::fs::File::open(&path).unwrap();
        assert_eq!(info.file_length, file.metadata().unwrap().len());

        let table = PerfectHashTable::load(&file).unwrap();
        assert_eq!(table.len(), 5);
        assert_eq!(table.seed(), 42);
        assert_eq!(table.key_function(), KeyFunctionId::XXH3);
        assert_eq!(table.info(), info);
        assert_eq!(table.get("apple"), Some(&b"1"[..]));
        assert_eq!(table.get(b"elderberry"), Some(&b"5"[..]));
        assert_eq!(table.get("steins"), None);
        assert!(table.contains(String::from("date")));
        assert!(!table.contains("gate"));
    }

    #[test]
    fn test_small_table_any_seed() {
        for seed in 0..500 {
            let table = build(&FRUITS, seed);
            assert_eq!(table.slot_count(), 7);
            assert_eq!(table.info().displacement_width, 1);
            for (key, value) in FRUITS {
                assert_eq!(table.get(key), Some(value.as_bytes()), "seed {seed}");
            }
        }
    }

    #[test]
    fn test_slots_are_unique() {
        let keys = (0..2000).map(|i| format!("key-{i}")).collect::<Vec<_>>();
        let mut builder = PerfectHashBuilder::default().with_seed(3);
        for key in &keys {
            builder.set(key, key).unwrap();
        }
        assert!(builder.initialize().unwrap());
        let table = builder.table().unwrap();

        let mut seen = std::collections::HashSet::new();
        for key in &keys {
            let slot = table.slot_of(key).unwrap();
            assert!(slot < table.slot_count());
            assert!(seen.insert(slot), "slot {slot} assigned twice");
        }
        assert_eq!(table.iter().count(), keys.len());
        assert!(table.slot_count() >= keys.len() as u32);
    }

    #[test]
    fn test_iterator_slot_order() {
        let table = build(&FRUITS, 1);
        let collected = table.iter().collect::<Vec<_>>();
        assert_eq!(collected.len(), 5);

        let slots = collected
            .iter()
            .map(|(key, _)| table.slot_of(key).unwrap())
            .collect::<Vec<_>>();
        assert!(slots.windows(2).all(|w| w[0] < w[1]));

        let mut pairs = (&table)
            .into_iter()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect::<Vec<_>>();
        pairs.sort();
        let mut expected = FRUITS
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect::<Vec<_>>();
        expected.sort();
        assert_eq!(pairs, expected);
    }

    #[test]
    fn test_record_layout() {
        let table = build(&[("k", "vv")], 9);
        let data = table.to_bytes().unwrap();

        assert_eq!(&data[..8], b"PPHTABLE");
        let body = &data[PerfectHashHeader::SIZE..];
        assert_eq!(&body[..4], &1u32.to_be_bytes());
        assert_eq!(&body[4..20], KeyFunctionId::XXH3.as_bytes());
        assert_eq!(&body[20..28], &9u64.to_be_bytes());
        assert_eq!(&body[28..32], &1u32.to_be_bytes()); // entries
        assert_eq!(&body[32..36], &1u32.to_be_bytes()); // buckets
        assert_eq!(&body[36..40], &2u32.to_be_bytes()); // slots
        assert_eq!(body[40], 1); // displacement width
        assert_eq!(data.len() as u64, table.info().file_length);

        // one displacement byte, one empty slot, one occupied slot
        assert_eq!(body.len(), 41 + 1 + 1 + (1 + 4 + 1 + 4 + 2));
    }

    #[test]
    fn test_wide_displacements() {
        for (bound, width) in [(200, 1u8), (1_000, 2), (70_000, 4)] {
            let mut builder = PerfectHashBuilder::default()
                .with_seed(5)
                .with_max_displacement(bound);
            for (key, value) in FRUITS {
                builder.set(key, value).unwrap();
            }
            assert!(builder.initialize().unwrap());
            let table = builder.into_table().unwrap();
            assert_eq!(table.info().displacement_width, width);

            // displacement array follows the fixed fields, big-endian at the chosen width
            let data = table.to_bytes().unwrap();
            let body = &data[PerfectHashHeader::SIZE..];
            assert_eq!(body[40], width);
            let width = width as usize;
            let encoded = body[41..41 + table.displacements().len() * width]
                .chunks(width)
                .map(|chunk| chunk.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
                .collect::<Vec<_>>();
            assert_eq!(encoded, table.displacements());

            let buffer = MemoryBuffer::new();
            table.save(&buffer).unwrap();
            let loaded = PerfectHashTable::load(&buffer).unwrap();
            assert_eq!(loaded.displacements(), table.displacements());
            assert_eq!(loaded.info(), table.info());
            for (key, value) in FRUITS {
                assert_eq!(loaded.get(key), Some(value.as_bytes()));
            }
        }
    }

    #[test]
    fn test_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("invalid.pph");
        let table = build(&FRUITS, 11);
        let info = table.save(&std::fs::File::create(&path).unwrap()).unwrap();

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .unwrap();

        {
            // body corruption is caught by the checksum
            file.write_all_at(b"invalid data", 40).unwrap();
            let file = std::fs::File::open(&path).unwrap();
            assert!(matches!(
                PerfectHashTable::load(&file),
                Err(Error::CorruptData(_))
            ));
        }

        {
            file.set_len(info.file_length - 8).unwrap();
            let file = std::fs::File::open(&path).unwrap();
            assert!(matches!(
                PerfectHashTable::load(&file),
                Err(Error::CorruptData(_))
            ));
        }

        {
            file.write_all_at(b"invalid data", 0).unwrap();
            let file = std::fs::File::open(&path).unwrap();
            assert!(matches!(
                PerfectHashTable::load(&file),
                Err(Error::CorruptData(_))
            ));
        }

        {
            let file = std::fs::File::create(&path).unwrap();
            assert!(matches!(
                PerfectHashTable::load(&file),
                Err(Error::CorruptData(_))
            ));
        }
    }

    #[test]
    fn test_structural_validation() {
        let table = build(&FRUITS, 12);
        let data = table.to_bytes().unwrap();

        // re-seal an altered body so only structural checks can reject it
        let reseal = |mutate: &dyn Fn(&mut Vec<u8>)| {
            let mut body = data[PerfectHashHeader::SIZE..].to_vec();
            mutate(&mut body);
            let header = PerfectHashHeader {
                body_length: body.len() as u64,
                body_checksum: xxhash_rust::xxh3::xxh3_64(&body),
            };
            let mut record = header.serialize().to_vec();
            record.extend_from_slice(&body);
            PerfectHashTable::load(&MemoryBuffer::from(record))
        };

        assert!(reseal(&|_| {}).is_ok());
        assert!(matches!(
            reseal(&|body| body[3] = 2),
            Err(Error::CorruptData(_))
        ));
        assert!(matches!(
            reseal(&|body| body[40] = 3),
            Err(Error::CorruptData(_))
        ));
        assert!(matches!(
            reseal(&|body| body.push(0)),
            Err(Error::CorruptData(_))
        ));
        assert!(matches!(
            reseal(&|body| body[20..28].copy_from_slice(&13u64.to_be_bytes())),
            Err(Error::CorruptData(_))
        ));
        assert!(matches!(
            reseal(&|body| body[28..32].copy_from_slice(&4u32.to_be_bytes())),
            Err(Error::CorruptData(_))
        ));
        assert!(matches!(
            reseal(&|body| body[4..20].copy_from_slice(&[0u8; 16])),
            Err(Error::UnknownIdentifier(_))
        ));
    }
}
