//! Backtrack / projection (C9, §4.8): walks the filled mesh from its best
//! terminal cell back to the start, emitting the aligned query.

use crate::base::Base;
use crate::config::{InsertionPolicy, LowercasePolicy, OverhangPolicy};
use crate::cseq::CSeq;
use crate::graph::Template;
use crate::mesh::{Mesh, Pred};

/// Alignment-quality and bookkeeping attributes computed during backtrack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlignmentStats {
    pub quality: f32,
    pub head_overhang: u32,
    pub tail_overhang: u32,
    pub start_column: u32,
    pub stop_column: u32,
}

enum Step {
    /// A graph/query match at `column`, carrying the query base consumed.
    Match { column: u32, base: Base, node_weight: f32, is_identity: bool },
    /// A query base consumed with no graph column (insertion / overhang).
    /// `near_column` is the nearest real graph column, used for placement.
    Insertion { base: Base, near_column: u32, leading: bool },
}

/// Finds the best terminal cell (minimum value among the graph's terminal
/// nodes at the final query row) and walks predecessors back to the start,
/// then projects the walk into an aligned [`CSeq`] under the given policies.
pub fn backtrack<T: Template>(
    mesh: &Mesh<T>,
    template: &T,
    query_name: &str,
    overhang: OverhangPolicy,
    lowercase: LowercasePolicy,
    insertion_policy: InsertionPolicy,
) -> (CSeq, AlignmentStats) {
    let query_len = mesh.query_len();
    let node_row_of = |node: T::NodeId| -> usize {
        (0..mesh.node_count()).find(|&r| mesh.node_at(r) == node).expect("node must be in mesh")
    };

    let mut best_row = node_row_of(template.terminals()[0]);
    let mut best_value = mesh.cell(best_row, query_len).value;
    for &terminal in template.terminals() {
        let row = node_row_of(terminal);
        let value = mesh.cell(row, query_len).value;
        if value < best_value {
            best_value = value;
            best_row = row;
        }
    }

    let mut steps = Vec::new();
    let mut row = best_row;
    let mut q = query_len;
    let source_row = node_row_of(template.source());

    loop {
        let cell = mesh.cell(row, q);
        match cell.pred {
            Pred::Start => break,
            Pred::Match { prev_m } => {
                let node = mesh.node_at(row);
                steps.push(Step::Match {
                    column: template.column(node),
                    base: query_base_at(mesh, q),
                    node_weight: template.node_weight(node),
                    is_identity: template.base(node).matches(query_base_at(mesh, q), crate::base::IupacRule::Optimistic),
                });
                row = prev_m;
                q -= 1;
            }
            Pred::Deletion { prev_m } => {
                row = prev_m;
            }
            Pred::Insertion => {
                let leading = row == source_row;
                let near_column = if leading {
                    0
                } else {
                    template.column(mesh.node_at(row))
                };
                steps.push(Step::Insertion {
                    base: query_base_at(mesh, q),
                    near_column,
                    leading,
                });
                q -= 1;
            }
        }
    }
    steps.reverse();

    // Leading run: contiguous Insertion steps at the very start.
    let leading_len = steps.iter().take_while(|s| matches!(s, Step::Insertion { leading: true, .. })).count();
    let trailing_len = steps
        .iter()
        .rev()
        .take_while(|s| matches!(s, Step::Insertion { leading: false, .. }) )
        .count();
    // Only treat the trailing run as overhang if it runs to the very end and
    // the mesh never matched again afterward (true by construction, since the
    // walk is already in final order).
    let start_column = steps
        .iter()
        .find_map(|s| match s {
            Step::Match { column, .. } => Some(*column),
            _ => None,
        })
        .unwrap_or(0);
    let stop_column = steps
        .iter()
        .rev()
        .find_map(|s| match s {
            Step::Match { column, .. } => Some(*column),
            _ => None,
        })
        .unwrap_or(start_column);

    let mut raw = 0.0f32;
    let mut weight_sum = 0.0f32;
    let mut placed: Vec<(u32, Base)> = Vec::new();

    for (i, step) in steps.iter().enumerate() {
        match step {
            Step::Match { column, base, node_weight, is_identity } => {
                raw += if *is_identity { *node_weight } else { 0.0 };
                weight_sum += node_weight;
                placed.push((*column, *base));
            }
            Step::Insertion { base, near_column, leading } => {
                let is_overhang = (*leading && i < leading_len) || (!*leading && i >= steps.len() - trailing_len);
                if !is_overhang {
                    placed.push((*near_column, *base));
                    continue;
                }
                let anchor = if *leading { start_column } else { stop_column };
                match overhang {
                    OverhangPolicy::Remove => continue,
                    OverhangPolicy::Attach => {
                        // Place next to the anchor column, not on top of it,
                        // so the real matched base there is never displaced.
                        let column = if *leading {
                            anchor.saturating_sub(leading_len as u32 - i as u32)
                        } else {
                            let local = (i - (steps.len() - trailing_len)) as u32;
                            anchor + local + 1
                        };
                        placed.push((column, apply_lowercase(*base, lowercase, true)));
                    }
                    OverhangPolicy::Edge => {
                        let offset_column = edge_column(anchor, *leading, &placed);
                        placed.push((offset_column, apply_lowercase(*base, lowercase, true)));
                    }
                }
            }
        }
    }

    let width = placed.iter().map(|(c, _)| *c + 1).max().unwrap_or(0).max(stop_column + 1);
    let mut cseq = CSeq::new(query_name);
    placed.sort_by_key(|(c, _)| *c);
    for (column, base) in &placed {
        // append_aligned enforces monotonic non-decreasing columns; equal
        // columns (attach policy, several overhang bases sharing a slot) are
        // flagged and resolved below.
        let _ = cseq.append_aligned(*column, *base, 1.0);
    }
    let _ = cseq.set_width(width);
    let lowercase_shifted = matches!(lowercase, LowercasePolicy::Unaligned);
    let _ = cseq.fix_duplicate_positions(insertion_policy, lowercase_shifted);

    let quality = if weight_sum > 0.0 { raw / weight_sum } else { 0.0 };
    let stats = AlignmentStats {
        quality,
        head_overhang: leading_len as u32,
        tail_overhang: trailing_len as u32,
        start_column,
        stop_column,
    };
    (cseq, stats)
}

fn query_base_at<T: Template>(mesh: &Mesh<T>, q: usize) -> Base {
    // q is 1-indexed into the query when reached via Match/Insertion (the
    // base consumed to reach row `q`), so the base itself is `query[q - 1]`.
    mesh.query_base(q - 1)
}

fn apply_lowercase(base: Base, policy: LowercasePolicy, unaligned: bool) -> Base {
    match policy {
        LowercasePolicy::None => base.to_uppercase(),
        LowercasePolicy::Original => base,
        LowercasePolicy::Unaligned => base.set_lowercase(unaligned),
    }
}

/// Columns are unsigned, so leading overhang can't be placed *before* zero;
/// it is packed into `0, 1, 2, ...` instead and the true aligned region keeps
/// its own column numbers unshifted. Trailing overhang counts up past `anchor`.
fn edge_column(anchor: u32, leading: bool, placed: &[(u32, Base)]) -> u32 {
    if leading {
        placed.len() as u32
    } else {
        anchor + placed.len() as u32 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::IupacRule;
    use crate::cseq::CSeq as CSeqAlias;
    use crate::graph::ReferenceGraph;
    use crate::mesh::Mesh;
    use crate::scoring::SimpleScheme;

    fn seq_from(bases: &[u8]) -> CSeqAlias {
        let mut c = CSeqAlias::new("r");
        c.append_str(bases).unwrap();
        c
    }

    fn bases(s: &[u8]) -> Vec<Base> {
        s.iter().map(|&b| Base::from_byte(b, 0).unwrap().unwrap()).collect()
    }

    #[test]
    fn identity_alignment_has_quality_near_one() {
        let refs = vec![seq_from(b"AGCTAGCT")];
        let graph = ReferenceGraph::build(&refs, 8, 1.0);
        let scheme = SimpleScheme {
            match_score: 1.0,
            mismatch_score: 1.0,
            gap_open: 5.0,
            gap_extend: 2.0,
            rule: IupacRule::Optimistic,
        };
        let query = bases(b"AGCTAGCT");
        let mesh = Mesh::align(&graph, query, &scheme, InsertionPolicy::Shift, 8);
        let (aligned, stats) = backtrack(
            &mesh,
            &graph,
            "q",
            OverhangPolicy::Attach,
            LowercasePolicy::Unaligned,
            InsertionPolicy::Shift,
        );
        assert!(stats.quality > 0.9, "quality = {}", stats.quality);
        assert_eq!(aligned.len(), 8);
        assert_eq!(stats.head_overhang, 0);
        assert_eq!(stats.tail_overhang, 0);
    }
}
