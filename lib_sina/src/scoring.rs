//! Scoring schemes (C7, §4.6): four variants sharing one trait.
//!
//! Costs are minimized; `match` returns a *negative* value on a true match so
//! that shorter total cost is better, matching the sign convention in §4.6.

use crate::base::{Base, IupacRule};

/// Per-column positional weight and base-frequency profile, threaded through
/// the `weighted`, `profile` and `matrix` schemes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ColumnContext {
    pub weight: f32,
    /// Base frequencies (A, G, C, T) at this column, summing to ~1.0.
    pub frequencies: [f32; 4],
    pub gap_open_rate: f32,
    pub gap_extend_rate: f32,
}

/// Shared contract for the four scoring schemes named in §4.6.
pub trait ScoringScheme {
    fn insertion(&self, query_column: u32) -> f32;
    fn insertion_ext(&self, query_column: u32) -> f32;
    fn deletion(&self, graph_column: u32) -> f32;
    fn deletion_ext(&self, graph_column: u32) -> f32;
    /// `weight` is the reference node's own per-base/family weight (§4.2,
    /// §4.6), not a column-positional weight — `WeightedScheme`/`ProfileScheme`
    /// apply those on top of this.
    fn r#match(&self, reference: Base, query: Base, graph_column: u32, weight: f32) -> f32;
}

fn base_frequency_index(base: Base) -> [f32; 4] {
    let bits = base.to_bits() & 0b1111;
    let order = bits.count_ones().max(1) as f32;
    let mut freqs = [0.0; 4];
    for (slot, mask) in [(0, 0b0001u8), (1, 0b0010), (2, 0b0100), (3, 0b1000)] {
        if bits & mask != 0 {
            freqs[slot] = 1.0 / order;
        }
    }
    freqs
}

/// Constant match/mismatch/gap costs, IUPAC-compatible equality under the
/// optimistic rule.
#[derive(Debug, Clone, Copy)]
pub struct SimpleScheme {
    pub match_score: f32,
    pub mismatch_score: f32,
    pub gap_open: f32,
    pub gap_extend: f32,
    pub rule: IupacRule,
}

impl ScoringScheme for SimpleScheme {
    fn insertion(&self, _query_column: u32) -> f32 {
        self.gap_open
    }

    fn insertion_ext(&self, _query_column: u32) -> f32 {
        self.gap_extend
    }

    fn deletion(&self, _graph_column: u32) -> f32 {
        self.gap_open
    }

    fn deletion_ext(&self, _graph_column: u32) -> f32 {
        self.gap_extend
    }

    fn r#match(&self, reference: Base, query: Base, _graph_column: u32, weight: f32) -> f32 {
        if reference.matches(query, self.rule) {
            -self.match_score * weight
        } else {
            self.mismatch_score * weight
        }
    }
}

/// Like [`SimpleScheme`], but every operation is multiplied by the column's
/// positional weight.
#[derive(Debug, Clone)]
pub struct WeightedScheme {
    pub inner: SimpleScheme,
    /// Column weight lookup, indexed by graph column.
    pub column_weights: Vec<f32>,
}

impl WeightedScheme {
    fn weight_at(&self, column: u32) -> f32 {
        self.column_weights.get(column as usize).copied().unwrap_or(1.0)
    }
}

impl ScoringScheme for WeightedScheme {
    fn insertion(&self, query_column: u32) -> f32 {
        self.inner.insertion(query_column) * self.weight_at(query_column)
    }

    fn insertion_ext(&self, query_column: u32) -> f32 {
        self.inner.insertion_ext(query_column) * self.weight_at(query_column)
    }

    fn deletion(&self, graph_column: u32) -> f32 {
        self.inner.deletion(graph_column) * self.weight_at(graph_column)
    }

    fn deletion_ext(&self, graph_column: u32) -> f32 {
        self.inner.deletion_ext(graph_column) * self.weight_at(graph_column)
    }

    fn r#match(&self, reference: Base, query: Base, graph_column: u32, weight: f32) -> f32 {
        self.inner.r#match(reference, query, graph_column, weight) * self.weight_at(graph_column)
    }
}

/// Match sums match/mismatch over the outer product of two base
/// distributions; gaps weighted by the profile's own gap rates.
#[derive(Debug, Clone)]
pub struct ProfileScheme {
    pub match_score: f32,
    pub mismatch_score: f32,
    pub gap_open: f32,
    pub gap_extend: f32,
    /// Column profile lookup, indexed by graph column.
    pub columns: Vec<ColumnContext>,
}

impl ProfileScheme {
    fn context(&self, column: u32) -> ColumnContext {
        self.columns.get(column as usize).copied().unwrap_or_default()
    }
}

impl ScoringScheme for ProfileScheme {
    fn insertion(&self, query_column: u32) -> f32 {
        self.gap_open * (1.0 + self.context(query_column).gap_open_rate)
    }

    fn insertion_ext(&self, query_column: u32) -> f32 {
        self.gap_extend * (1.0 + self.context(query_column).gap_extend_rate)
    }

    fn deletion(&self, graph_column: u32) -> f32 {
        self.gap_open * (1.0 + self.context(graph_column).gap_open_rate)
    }

    fn deletion_ext(&self, graph_column: u32) -> f32 {
        self.gap_extend * (1.0 + self.context(graph_column).gap_extend_rate)
    }

    fn r#match(&self, _reference: Base, query: Base, graph_column: u32, weight: f32) -> f32 {
        let profile = self.context(graph_column).frequencies;
        let query_freqs = base_frequency_index(query);
        let mut expected = 0.0;
        for (p, q) in profile.iter().zip(query_freqs.iter()) {
            expected += p * q * self.match_score + p * (1.0 - q) * self.mismatch_score;
        }
        -expected * weight
    }
}

/// Matches consult a 4x4 substitution matrix derived from target identity and
/// reference base frequencies (log-odds); gaps weighted as in [`SimpleScheme`].
/// `deletion`/`deletion_ext` delegate to `insertion`/`insertion_ext`, matching
/// the original implementation's matrix scheme.
#[derive(Debug, Clone)]
pub struct MatrixScheme {
    /// log-odds substitution matrix, indexed [reference_slot][query_slot].
    pub matrix: [[f32; 4]; 4],
    pub gap_open: f32,
    pub gap_extend: f32,
}

impl MatrixScheme {
    fn lookup(&self, reference: Base, query: Base) -> f32 {
        let mut total = 0.0;
        let mut weight = 0.0;
        let ref_freqs = base_frequency_index(reference);
        let query_freqs = base_frequency_index(query);
        for (i, &rf) in ref_freqs.iter().enumerate() {
            if rf == 0.0 {
                continue;
            }
            for (j, &qf) in query_freqs.iter().enumerate() {
                if qf == 0.0 {
                    continue;
                }
                total += rf * qf * self.matrix[i][j];
                weight += rf * qf;
            }
        }
        if weight > 0.0 {
            total / weight
        } else {
            0.0
        }
    }
}

impl ScoringScheme for MatrixScheme {
    fn insertion(&self, _query_column: u32) -> f32 {
        self.gap_open
    }

    fn insertion_ext(&self, _query_column: u32) -> f32 {
        self.gap_extend
    }

    fn deletion(&self, graph_column: u32) -> f32 {
        self.insertion(graph_column)
    }

    fn deletion_ext(&self, graph_column: u32) -> f32 {
        self.insertion_ext(graph_column)
    }

    fn r#match(&self, reference: Base, query: Base, _graph_column: u32, weight: f32) -> f32 {
        -self.lookup(reference, query) * weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheme() -> SimpleScheme {
        SimpleScheme {
            match_score: 1.0,
            mismatch_score: 1.0,
            gap_open: 5.0,
            gap_extend: 2.0,
            rule: IupacRule::Optimistic,
        }
    }

    #[test]
    fn match_is_negative_on_agreement() {
        let s = scheme();
        assert!(s.r#match(Base::A, Base::A, 0, 1.0) < 0.0);
    }

    #[test]
    fn mismatch_is_positive() {
        let s = scheme();
        assert!(s.r#match(Base::A, Base::G, 0, 1.0) > 0.0);
    }

    #[test]
    fn match_scales_with_node_weight() {
        let s = scheme();
        assert_eq!(s.r#match(Base::A, Base::A, 0, 2.0), s.r#match(Base::A, Base::A, 0, 1.0) * 2.0);
    }

    #[test]
    fn weighted_scales_by_column_weight() {
        let inner = scheme();
        let weighted = WeightedScheme {
            inner,
            column_weights: vec![10.0],
        };
        assert_eq!(weighted.insertion(0), inner.insertion(0) * 10.0);
    }

    #[test]
    fn matrix_scheme_deletion_delegates_to_insertion() {
        let matrix = MatrixScheme {
            matrix: [[1.0; 4]; 4],
            gap_open: 3.0,
            gap_extend: 1.0,
        };
        assert_eq!(matrix.deletion(7), matrix.insertion(7));
        assert_eq!(matrix.deletion_ext(7), matrix.insertion_ext(7));
    }
}
