//! On-disk k-mer index (§6 "K-mer index file") and in-memory search (§4.3).

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use deterministic_default_hasher::DeterministicDefaultHasher;

use crate::base::Base;
use crate::error::KmerIndexError;
use crate::kmer;

const MAGIC: &[u8; 8] = b"SINAKIDX";
const VERSION: u16 = 0;

/// Writes a base-128 little-endian varint (high bit set on all but the last
/// byte), per §6.
pub fn write_varint(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Reads one base-128 varint starting at `*offset`, advancing it past the value.
pub fn read_varint(bytes: &[u8], offset: &mut usize) -> Result<u64, KmerIndexError> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let byte = *bytes.get(*offset).ok_or(KmerIndexError::Truncated {
            reason: "varint cut off before a terminating byte",
        })?;
        *offset += 1;
        value |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 35 {
            return Err(KmerIndexError::Truncated {
                reason: "varint exceeds 5 bytes for a 32-bit value",
            });
        }
    }
    Ok(value)
}

/// A compact set of reference ids, encoded as delta-varints (mirrors the
/// original implementation's `vlimap`). Ids must be pushed in increasing order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdSet {
    bytes: Vec<u8>,
    last: i64,
    len: usize,
}

impl IdSet {
    pub fn new() -> IdSet {
        IdSet::default()
    }

    pub fn push(&mut self, id: u32) {
        let delta = id as i64 - self.last;
        self.last = id as i64;
        write_varint(delta as u64, &mut self.bytes);
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> IdSetIter<'_> {
        IdSetIter {
            bytes: &self.bytes,
            offset: 0,
            last: 0,
        }
    }

    pub fn to_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }

    pub fn from_sorted_ids(ids: impl IntoIterator<Item = u32>) -> IdSet {
        let mut set = IdSet::new();
        for id in ids {
            set.push(id);
        }
        set
    }

    fn encoded_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn from_encoded(bytes: Vec<u8>, len: usize) -> IdSet {
        IdSet { bytes, last: 0, len }
    }
}

pub struct IdSetIter<'a> {
    bytes: &'a [u8],
    offset: usize,
    last: i64,
}

impl<'a> Iterator for IdSetIter<'a> {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.offset >= self.bytes.len() {
            return None;
        }
        let delta = read_varint(self.bytes, &mut self.offset).ok()? as i64;
        self.last += delta;
        Some(self.last as u32)
    }
}

/// Orientation selected by [`KmerIndex::turn_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Original,
    Reversed,
    Complemented,
    ReverseComplemented,
}

impl Orientation {
    pub fn as_index(self) -> u8 {
        match self {
            Orientation::Original => 0,
            Orientation::Reversed => 1,
            Orientation::Complemented => 2,
            Orientation::ReverseComplemented => 3,
        }
    }

    fn apply(self, bases: &[Base]) -> Vec<Base> {
        match self {
            Orientation::Original => bases.to_vec(),
            Orientation::Reversed => bases.iter().rev().copied().collect(),
            Orientation::Complemented => bases.iter().map(|b| b.complement()).collect(),
            Orientation::ReverseComplemented => {
                bases.iter().rev().map(|b| b.complement()).collect()
            }
        }
    }
}

const ALL_ORIENTATIONS: [Orientation; 4] = [
    Orientation::Original,
    Orientation::Reversed,
    Orientation::Complemented,
    Orientation::ReverseComplemented,
];

/// A built, queryable k-mer index over a fixed reference set.
#[derive(Debug, Clone)]
pub struct KmerIndex {
    k: u32,
    prefix_code: Option<u32>,
    names: Vec<String>,
    /// kmer code -> (stored posting list, whether it is the complement of the
    /// true set of matching reference ids).
    buckets: HashMap<u32, (IdSet, bool), DeterministicDefaultHasher>,
}

impl KmerIndex {
    pub fn k(&self) -> u32 {
        self.k
    }

    pub fn size(&self) -> usize {
        self.names.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Builds an index from `(name, bases)` pairs. When `prefix_code` is
    /// `Some`, only k-mers with that leading 2-bit code are indexed (the
    /// "fast" subset, e.g. `Some(0)` restricts to k-mers starting with `A`).
    pub fn build(entries: &[(String, Vec<Base>)], k: u32, prefix_code: Option<u32>) -> KmerIndex {
        let mut partial: HashMap<u32, Vec<u32>, DeterministicDefaultHasher> = HashMap::default();
        for (id, (_, bases)) in entries.iter().enumerate() {
            let kmers = match prefix_code {
                Some(code) => kmer::unique_prefix_kmers(bases, k, code),
                None => kmer::unique_kmers(bases, k),
            };
            for code in kmers {
                partial.entry(code).or_default().push(id as u32);
            }
        }
        let names = entries.iter().map(|(name, _)| name.clone()).collect();
        Self::from_partial(names, k, prefix_code, partial)
    }

    /// Reduce step combining per-worker partial postings into one index;
    /// exposed so a future parallel builder can call it, per SPEC_FULL.md §4.3.
    pub fn merge_partial(
        names: Vec<String>,
        k: u32,
        prefix_code: Option<u32>,
        partials: Vec<HashMap<u32, Vec<u32>, DeterministicDefaultHasher>>,
    ) -> KmerIndex {
        let mut merged: HashMap<u32, Vec<u32>, DeterministicDefaultHasher> = HashMap::default();
        for partial in partials {
            for (code, ids) in partial {
                merged.entry(code).or_default().extend(ids);
            }
        }
        for ids in merged.values_mut() {
            ids.sort_unstable();
            ids.dedup();
        }
        Self::from_partial(names, k, prefix_code, merged)
    }

    fn from_partial(
        names: Vec<String>,
        k: u32,
        prefix_code: Option<u32>,
        partial: HashMap<u32, Vec<u32>, DeterministicDefaultHasher>,
    ) -> KmerIndex {
        let n = names.len();
        let mut buckets = HashMap::default();
        for (code, mut ids) in partial {
            ids.sort_unstable();
            ids.dedup();
            let inverted = ids.len() * 2 > n;
            let stored = if inverted {
                let present: std::collections::HashSet<u32> = ids.iter().copied().collect();
                (0..n as u32).filter(|id| !present.contains(id)).collect::<Vec<_>>()
            } else {
                ids
            };
            buckets.insert(code, (IdSet::from_sorted_ids(stored), inverted));
        }
        KmerIndex {
            k,
            prefix_code,
            names,
            buckets,
        }
    }

    fn posting_list(&self, code: u32) -> Vec<u32> {
        match self.buckets.get(&code) {
            None => Vec::new(),
            Some((ids, false)) => ids.to_vec(),
            Some((ids, true)) => {
                let present: std::collections::HashSet<u32> = ids.iter().collect();
                (0..self.names.len() as u32)
                    .filter(|id| !present.contains(id))
                    .collect()
            }
        }
    }

    /// Counts k-mer hits per reference id for `query`, then returns the `want`
    /// references with the highest log-normalized score, ties broken by id.
    ///
    /// `fast` restricts the query's own k-mer stream to the `A`-prefix subset;
    /// when `fast` is false the raw hit count is multiplied by 4 so fast/exact
    /// scores stay comparable, per §4.3.
    pub fn find(&self, query: &[Base], want: usize, fast: bool) -> Vec<(usize, f32)> {
        let mut hits: HashMap<u32, u32, DeterministicDefaultHasher> = HashMap::default();
        let query_kmers = if fast {
            kmer::unique_prefix_kmers(query, self.k, 0)
        } else {
            kmer::unique_kmers(query, self.k)
        };
        for code in &query_kmers {
            for id in self.posting_list(*code) {
                *hits.entry(id).or_insert(0) += 1;
            }
        }
        let multiplier = if fast { 1.0 } else { 4.0 };
        let l = query.len() as f32 + 1.0;
        let mut scored: Vec<(usize, f32)> = hits
            .into_iter()
            .map(|(id, count)| {
                let raw = count as f32 * multiplier;
                let score = 1.0 - (raw / self.k as f32 + 1.0 / l).ln() / (1.0 / l).ln();
                (id as usize, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap().then(a.0.cmp(&b.0)));
        scored.truncate(want);
        scored
    }

    /// Runs [`KmerIndex::find`] once per orientation and returns the
    /// orientation whose top-1 score is highest, along with that orientation's
    /// results.
    pub fn turn_check(&self, query: &[Base], want: usize, fast: bool) -> (Orientation, Vec<(usize, f32)>) {
        let mut best: Option<(Orientation, Vec<(usize, f32)>)> = None;
        for orientation in ALL_ORIENTATIONS {
            let oriented = orientation.apply(query);
            let result = self.find(&oriented, want, fast);
            let top = result.first().map(|(_, s)| *s).unwrap_or(f32::MIN);
            let better = match &best {
                None => true,
                Some((_, best_result)) => {
                    top > best_result.first().map(|(_, s)| *s).unwrap_or(f32::MIN)
                }
            };
            if better {
                best = Some((orientation, result));
            }
        }
        best.expect("ALL_ORIENTATIONS is non-empty")
    }

    pub fn write(&self, mut out: impl Write) -> std::io::Result<()> {
        out.write_all(MAGIC)?;
        out.write_all(&VERSION.to_le_bytes())?;
        out.write_all(&(self.k as u16).to_le_bytes())?;
        out.write_all(&(self.names.len() as u32).to_le_bytes())?;
        for name in &self.names {
            out.write_all(name.as_bytes())?;
            out.write_all(b"\n")?;
        }

        let mut non_empty: Vec<u32> = self.buckets.keys().copied().collect();
        non_empty.sort_unstable();
        let mut bitmap_bytes = Vec::new();
        write_varint(non_empty.len() as u64, &mut bitmap_bytes);
        let mut last = 0i64;
        for &code in &non_empty {
            write_varint((code as i64 - last) as u64, &mut bitmap_bytes);
            last = code as i64;
        }
        out.write_all(&bitmap_bytes)?;

        for code in non_empty {
            let (ids, inverted) = &self.buckets[&code];
            let mut header = Vec::new();
            write_varint(((ids.len() as u64) << 1) | (*inverted as u64), &mut header);
            out.write_all(&header)?;
            out.write_all(ids.encoded_bytes())?;
        }
        Ok(())
    }

    pub fn read(mut input: impl Read) -> Result<KmerIndex, KmerIndexError> {
        let mut all = Vec::new();
        input
            .read_to_end(&mut all)
            .map_err(|source| KmerIndexError::Io {
                path: Path::new("<index>").to_path_buf(),
                source,
            })?;
        Self::parse(&all)
    }

    pub fn parse(bytes: &[u8]) -> Result<KmerIndex, KmerIndexError> {
        if bytes.len() < 16 || &bytes[0..8] != MAGIC {
            return Err(KmerIndexError::BadMagic);
        }
        let version = u16::from_le_bytes([bytes[8], bytes[9]]);
        if version != VERSION {
            return Err(KmerIndexError::UnsupportedVersion {
                found: version,
                expected: VERSION,
            });
        }
        let k = u16::from_le_bytes([bytes[10], bytes[11]]) as u32;
        let n = u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]) as usize;

        let mut offset = 16usize;
        let mut names = Vec::with_capacity(n);
        for _ in 0..n {
            let newline = bytes[offset..]
                .iter()
                .position(|&b| b == b'\n')
                .ok_or(KmerIndexError::Truncated {
                    reason: "name list truncated before newline",
                })?;
            let name = String::from_utf8_lossy(&bytes[offset..offset + newline]).into_owned();
            names.push(name);
            offset += newline + 1;
        }

        let bucket_count = read_varint(bytes, &mut offset)? as usize;
        let mut codes = Vec::with_capacity(bucket_count);
        let mut last = 0i64;
        for _ in 0..bucket_count {
            let delta = read_varint(bytes, &mut offset)? as i64;
            last += delta;
            codes.push(last as u32);
        }

        let mut buckets = HashMap::default();
        for code in codes {
            let header = read_varint(bytes, &mut offset)?;
            let inverted = header & 1 != 0;
            let count = (header >> 1) as usize;
            let start = offset;
            let mut cursor = offset;
            for _ in 0..count {
                read_varint(bytes, &mut cursor)?;
            }
            let encoded = bytes[start..cursor].to_vec();
            offset = cursor;
            let set = IdSet::from_encoded(encoded, count);
            buckets.insert(code, (set, inverted));
        }

        Ok(KmerIndex {
            k,
            prefix_code: None,
            names,
            buckets,
        })
    }

    /// Writes `self` to `path` and returns whether it should be considered
    /// fresh relative to `reference_mtime` (§3's "index's modification time
    /// must be >= the reference's").
    pub fn save_to_file(&self, path: &Path) -> Result<(), KmerIndexError> {
        let file = std::fs::File::create(path).map_err(|source| KmerIndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = std::io::BufWriter::new(file);
        self.write(&mut writer).map_err(|source| KmerIndexError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Loads an index from `path` iff it is structurally valid, its `k`
    /// matches `expected_k`, and its mtime is at least `reference_mtime`.
    pub fn load_if_fresh(
        path: &Path,
        expected_k: u32,
        reference_mtime: std::time::SystemTime,
    ) -> Result<Option<KmerIndex>, KmerIndexError> {
        if !path.exists() {
            return Ok(None);
        }
        let metadata = std::fs::metadata(path).map_err(|source| KmerIndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mtime = metadata.modified().map_err(|source| KmerIndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if mtime < reference_mtime {
            return Ok(None);
        }
        let file = std::fs::File::open(path).map_err(|source| KmerIndexError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let index = KmerIndex::read(std::io::BufReader::new(file))?;
        if index.k != expected_k {
            return Ok(None);
        }
        Ok(Some(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bases(s: &[u8]) -> Vec<Base> {
        s.iter().map(|&b| Base::from_byte(b, 0).unwrap().unwrap()).collect()
    }

    #[test]
    fn id_set_round_trips_monotonic_ids() {
        let ids = [2u32, 5, 5, 9, 100];
        let set = IdSet::from_sorted_ids(ids.iter().copied());
        assert_eq!(set.to_vec(), ids.to_vec());
    }

    #[test]
    fn varint_round_trips() {
        for value in [0u64, 1, 127, 128, 300, u32::MAX as u64] {
            let mut buf = Vec::new();
            write_varint(value, &mut buf);
            let mut offset = 0;
            assert_eq!(read_varint(&buf, &mut offset).unwrap(), value);
            assert_eq!(offset, buf.len());
        }
    }

    #[test]
    fn index_round_trips_through_bytes() {
        let entries = vec![
            ("ref1".to_string(), bases(b"AGCTAGCTAGCT")),
            ("ref2".to_string(), bases(b"AGCTAGCTAGGG")),
            ("ref3".to_string(), bases(b"TTTTTTTTTTTT")),
        ];
        let index = KmerIndex::build(&entries, 4, None);
        let mut bytes = Vec::new();
        index.write(&mut bytes).unwrap();
        let loaded = KmerIndex::parse(&bytes).unwrap();
        assert_eq!(loaded.k(), index.k());
        assert_eq!(loaded.names(), index.names());

        let query = bases(b"AGCTAGCTAGCT");
        let before = index.find(&query, 3, false);
        let after = loaded.find(&query, 3, false);
        assert_eq!(before, after);
    }

    #[test]
    fn find_ranks_own_reference_highest() {
        let entries: Vec<(String, Vec<Base>)> = (0..20)
            .map(|i| (format!("ref{i}"), bases(b"ACGTACGTACGTACGTACGTACGT")))
            .collect();
        let mut entries = entries;
        entries.push(("target".to_string(), bases(b"AGCTTTAGCTTTAGCTTTAGCTTT")));
        let index = KmerIndex::build(&entries, 6, None);
        let query = bases(b"AGCTTTAGCTTTAGCTTTAGCTTT");
        let results = index.find(&query, 5, false);
        assert_eq!(results[0].0, entries.len() - 1);
    }

    #[test]
    fn turn_check_picks_expected_orientation() {
        let reference = bases(b"AGCTAGCTAGCTAGCTAGCT");
        let entries = vec![("ref".to_string(), reference.clone())];
        let index = KmerIndex::build(&entries, 6, None);

        let reversed: Vec<Base> = reference.iter().rev().copied().collect();
        let (orientation, _) = index.turn_check(&reversed, 1, false);
        assert_eq!(orientation, Orientation::Reversed);
    }
}
