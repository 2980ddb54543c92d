//! Compressed sequence representation (C2, §3 and §4.1).

pub mod compress;

use std::collections::HashMap;

use deterministic_default_hasher::DeterministicDefaultHasher;

use crate::base::Base;
use crate::config::InsertionPolicy;
use crate::error::SequenceError;

/// One placed base: a column index, the IUPAC code occupying it, and a weight
/// (defaults to 1, overridden by e.g. column-weighted scoring).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignedBase {
    pub column: u32,
    pub base: Base,
    pub weight: f32,
}

/// A typed attribute attached to a [`CSeq`] (accession, taxonomy fields, ...).
#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

type AttributeMap = HashMap<String, Attribute, DeterministicDefaultHasher>;

/// An aligned sequence: a sparse, column-sorted list of bases plus width and
/// attributes. See module docs for the contract.
#[derive(Debug, Clone)]
pub struct CSeq {
    name: String,
    entries: Vec<AlignedBase>,
    width: u32,
    /// True once two entries have shared a column; cleared by
    /// [`CSeq::fix_duplicate_positions`].
    has_duplicates: bool,
    attributes: AttributeMap,
}

impl CSeq {
    pub fn new(name: impl Into<String>) -> CSeq {
        CSeq {
            name: name.into(),
            entries: Vec::new(),
            width: 0,
            has_duplicates: false,
            attributes: AttributeMap::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn entries(&self) -> &[AlignedBase] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn attribute(&self, key: &str) -> Option<&Attribute> {
        self.attributes.get(key)
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: Attribute) {
        self.attributes.insert(key.into(), value);
    }

    /// Appends one base at the next implicit column (current width). A `None`
    /// base (gap) just advances the column cursor without creating an entry.
    pub fn append(&mut self, base: Option<Base>, weight: f32) {
        let column = self.width;
        if let Some(base) = base {
            self.entries.push(AlignedBase { column, base, weight });
        }
        self.width += 1;
    }

    /// Parses and appends a run of raw input bytes (IUPAC letters or gaps).
    pub fn append_str(&mut self, input: &[u8]) -> Result<(), SequenceError> {
        for (offset, &byte) in input.iter().enumerate() {
            let base = Base::from_byte(byte, offset)?;
            self.append(base, 1.0);
        }
        Ok(())
    }

    /// Appends one base at an explicit column. Columns must be non-decreasing;
    /// a column equal to the previous entry's is permitted but marks the
    /// sequence as needing [`CSeq::fix_duplicate_positions`].
    pub fn append_aligned(&mut self, column: u32, base: Base, weight: f32) -> Result<(), SequenceError> {
        if let Some(last) = self.entries.last() {
            if column < last.column {
                return Err(SequenceError::NonMonotonicAppend {
                    previous: last.column,
                    column,
                });
            }
            if column == last.column {
                self.has_duplicates = true;
            }
        }
        self.width = self.width.max(column + 1);
        self.entries.push(AlignedBase { column, base, weight });
        Ok(())
    }

    /// Extends or shrinks the trailing gap region. Succeeds iff `new_width` is
    /// at least the number of stored bases; shifts the minimal trailing run of
    /// entries leftward only when shrinking past their current columns.
    pub fn set_width(&mut self, new_width: u32) -> Result<(), SequenceError> {
        let occupied = self.entries.len() as u32;
        if new_width < occupied {
            return Err(SequenceError::WidthBelowOccupancy {
                requested: new_width,
                occupied,
            });
        }
        if new_width >= self.width {
            self.width = new_width;
            return Ok(());
        }

        // Shrinking: find the smallest trailing run whose entries can all fit
        // inside [0, new_width) once repacked contiguously at the end.
        let mut k = 0usize;
        while k < self.entries.len() {
            let run_start = self.entries.len() - k - 1;
            if self.entries[run_start].column < new_width - k as u32 {
                break;
            }
            k += 1;
        }
        let run_start = self.entries.len() - k;
        for (i, entry) in self.entries[run_start..].iter_mut().enumerate() {
            entry.column = new_width - k as u32 + i as u32;
        }
        self.width = new_width;
        Ok(())
    }

    /// Resolves runs of entries sharing a column by moving all but one into
    /// the nearest free column, searching outward from the run symmetrically
    /// and preferring the lower (left) column on ties. `lowercase_shifted`
    /// controls whether bases that get moved are marked lowercase.
    pub fn fix_duplicate_positions(
        &mut self,
        policy: InsertionPolicy,
        lowercase_shifted: bool,
    ) -> Result<(), SequenceError> {
        if !self.has_duplicates {
            return Ok(());
        }

        loop {
            let Some(run_start) = self
                .entries
                .windows(2)
                .position(|w| w[0].column == w[1].column)
            else {
                break;
            };
            let run_column = self.entries[run_start].column;
            let run_end = self.entries[run_start..]
                .iter()
                .position(|e| e.column != run_column)
                .map(|offset| run_start + offset)
                .unwrap_or(self.entries.len());

            match policy {
                InsertionPolicy::Remove => {
                    // Keep the first entry of the run, drop the rest.
                    self.entries.drain(run_start + 1..run_end);
                }
                InsertionPolicy::Shift | InsertionPolicy::Forbid => {
                    let mut occupied: std::collections::HashSet<u32> =
                        self.entries.iter().map(|e| e.column).collect();
                    // The run's first member keeps its column. Once a run
                    // has a third member, its last member is also a real,
                    // already-bounded entry and stays put; only the ones
                    // strictly between the two are redistributed.
                    let movable_end = if run_end - run_start > 2 { run_end - 1 } else { run_end };
                    for idx in (run_start + 1)..movable_end {
                        let slot = nearest_free_column(&occupied, run_column, self.width)
                            .ok_or(SequenceError::NoFreeSlot { column: run_column })?;
                        occupied.insert(slot);
                        self.entries[idx].column = slot;
                        if lowercase_shifted {
                            self.entries[idx].base = self.entries[idx].base.set_lowercase(true);
                        }
                    }
                    self.entries.sort_by_key(|e| e.column);
                }
            }
        }
        self.has_duplicates = false;
        Ok(())
    }

    /// Reverses the column order of entries in place (column `i` -> `W-1-i`).
    pub fn reverse(&mut self) {
        let width = self.width;
        for entry in &mut self.entries {
            entry.column = width - 1 - entry.column;
        }
        self.entries.reverse();
    }

    /// Complements every base in place (columns untouched).
    pub fn complement(&mut self) {
        for entry in &mut self.entries {
            entry.base = entry.base.complement();
        }
    }

    pub fn upper_case_all(&mut self) {
        for entry in &mut self.entries {
            entry.base = entry.base.to_uppercase();
        }
    }

    /// Packs the entry list into the persisted blob format (§6).
    pub fn compress(&self) -> Vec<u8> {
        let pairs: Vec<(Base, u32)> = self.entries.iter().map(|e| (e.base, e.column)).collect();
        compress::compress(&pairs)
    }

    /// Restores entries (and width, if it grew) from a compressed blob.
    pub fn assign_from_compressed(&mut self, blob: &[u8]) -> Result<(), SequenceError> {
        let pairs = compress::decompress(blob)?;
        self.entries = pairs
            .into_iter()
            .map(|(base, column)| AlignedBase { column, base, weight: 1.0 })
            .collect();
        self.has_duplicates = false;
        if let Some(last) = self.entries.last() {
            self.width = self.width.max(last.column + 1);
        }
        Ok(())
    }

    /// Column ranges in which `self` and `other` disagree (different base or
    /// different gap structure), padded by `context` columns on each side and
    /// merged where they overlap.
    pub fn find_differing_parts(&self, other: &CSeq, context: u32) -> Vec<(u32, u32)> {
        let width = self.width.max(other.width);
        let mine: HashMap<u32, Base, DeterministicDefaultHasher> =
            self.entries.iter().map(|e| (e.column, e.base)).collect();
        let theirs: HashMap<u32, Base, DeterministicDefaultHasher> =
            other.entries.iter().map(|e| (e.column, e.base)).collect();

        let mut raw_ranges = Vec::new();
        let mut column = 0u32;
        while column < width {
            if mine.get(&column) != theirs.get(&column) {
                let start = column.saturating_sub(context);
                let mut end = column + 1;
                while end < width && mine.get(&end) != theirs.get(&end) {
                    end += 1;
                }
                let end = (end + context).min(width);
                raw_ranges.push((start, end));
                column = end;
            } else {
                column += 1;
            }
        }

        merge_ranges(raw_ranges)
    }

    /// Sums a symmetric pair-value table over helix-paired columns that are
    /// both occupied (non-gap) in this sequence.
    pub fn calc_pair_score(&self, helix_pairs: &[u32], pair_value: impl Fn(Base, Base) -> f32) -> f32 {
        let at: HashMap<u32, Base, DeterministicDefaultHasher> =
            self.entries.iter().map(|e| (e.column, e.base)).collect();
        let mut score = 0.0;
        for (i, &partner) in helix_pairs.iter().enumerate() {
            if partner == 0 || (i as u32) >= partner {
                continue;
            }
            if let (Some(&a), Some(&b)) = (at.get(&(i as u32)), at.get(&partner)) {
                score += pair_value(a, b);
            }
        }
        score
    }
}

fn nearest_free_column(
    occupied: &std::collections::HashSet<u32>,
    around: u32,
    width: u32,
) -> Option<u32> {
    for distance in 1..width.max(1) {
        if around >= distance {
            let left = around - distance;
            if !occupied.contains(&left) {
                return Some(left);
            }
        }
        let right = around + distance;
        if right < width && !occupied.contains(&right) {
            return Some(right);
        }
    }
    None
}

fn merge_ranges(mut ranges: Vec<(u32, u32)>) -> Vec<(u32, u32)> {
    ranges.sort_unstable();
    let mut merged: Vec<(u32, u32)> = Vec::new();
    for range in ranges {
        if let Some(last) = merged.last_mut() {
            if range.0 <= last.1 {
                last.1 = last.1.max(range.1);
                continue;
            }
        }
        merged.push(range);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq_from(bases: &[u8]) -> CSeq {
        let mut seq = CSeq::new("q");
        seq.append_str(bases).unwrap();
        seq
    }

    #[test]
    fn compress_decompress_round_trips() {
        let seq = seq_from(b"AG--CT");
        let blob = seq.compress();
        let mut restored = CSeq::new("q");
        restored.assign_from_compressed(&blob).unwrap();
        let original: Vec<(Base, u32)> = seq.entries().iter().map(|e| (e.base, e.column)).collect();
        let got: Vec<(Base, u32)> = restored.entries().iter().map(|e| (e.base, e.column)).collect();
        assert_eq!(original, got);
    }

    #[test]
    fn reverse_is_involutive() {
        let mut seq = seq_from(b"AG--CT");
        let original = seq.entries().to_vec();
        seq.reverse();
        seq.reverse();
        assert_eq!(seq.entries(), &original[..]);
    }

    #[test]
    fn complement_is_involutive_and_preserves_case() {
        let mut seq = seq_from(b"AGct");
        let original = seq.entries().to_vec();
        seq.complement();
        seq.complement();
        assert_eq!(seq.entries(), &original[..]);
    }

    #[test]
    fn width_and_occupancy_invariant() {
        let seq = seq_from(b"AG--CT");
        assert_eq!(seq.width(), 6);
        assert_eq!(seq.len(), 4);
        for e in seq.entries() {
            assert!(e.column < seq.width());
        }
    }

    #[test]
    fn set_width_rejects_shrink_below_occupancy() {
        let mut seq = seq_from(b"AGCT");
        let err = seq.set_width(2).unwrap_err();
        assert!(matches!(err, SequenceError::WidthBelowOccupancy { .. }));
    }

    #[test]
    fn set_width_shifts_trailing_entries_leftward() {
        let mut seq = seq_from(b"AG--CT");
        seq.set_width(5).unwrap();
        assert_eq!(seq.width(), 5);
        for e in seq.entries() {
            assert!(e.column < 5);
        }
        // strictly increasing positions preserved
        let columns: Vec<u32> = seq.entries().iter().map(|e| e.column).collect();
        assert!(columns.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn fix_duplicate_positions_yields_strictly_increasing() {
        let mut seq = CSeq::new("q");
        seq.append_aligned(0, Base::A, 1.0).unwrap();
        seq.append_aligned(50, Base::G, 1.0).unwrap();
        seq.append_aligned(50, Base::C, 1.0).unwrap();
        seq.set_width(60).unwrap();
        seq.fix_duplicate_positions(InsertionPolicy::Shift, true).unwrap();
        let columns: Vec<u32> = seq.entries().iter().map(|e| e.column).collect();
        assert!(columns.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn fix_duplicate_positions_spreads_a_run_without_recolliding() {
        let mut seq = CSeq::new("q");
        seq.append_aligned(0, Base::A, 1.0).unwrap();
        seq.append_aligned(50, Base::G, 1.0).unwrap();
        seq.append_aligned(50, Base::C, 1.0).unwrap();
        seq.append_aligned(50, Base::T, 1.0).unwrap();
        seq.append_aligned(50, Base::A, 1.0).unwrap();
        seq.set_width(60).unwrap();
        seq.fix_duplicate_positions(InsertionPolicy::Shift, true).unwrap();
        let columns: Vec<u32> = seq.entries().iter().map(|e| e.column).collect();
        assert!(columns.windows(2).all(|w| w[0] < w[1]), "columns collided: {columns:?}");
        assert_eq!(columns.len(), 5);
        // run's first and last members keep their original column.
        assert!(columns.contains(&50));
    }

    #[test]
    fn fix_duplicate_positions_remove_drops_extra_entry() {
        let mut seq = CSeq::new("q");
        seq.append_aligned(0, Base::A, 1.0).unwrap();
        seq.append_aligned(50, Base::G, 1.0).unwrap();
        seq.append_aligned(50, Base::C, 1.0).unwrap();
        seq.set_width(60).unwrap();
        seq.fix_duplicate_positions(InsertionPolicy::Remove, false).unwrap();
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn find_differing_parts_reports_disagreement_with_context() {
        let a = seq_from(b"AGCTAGCT");
        let b = seq_from(b"AGTTAGCT");
        let diffs = a.find_differing_parts(&b, 1);
        assert_eq!(diffs, vec![(1, 4)]);
    }
}
