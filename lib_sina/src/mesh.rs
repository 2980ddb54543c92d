//! Alignment mesh and dynamic program (C8, §4.7).
//!
//! Generic over [`Template`] so the same fill code drives both the
//! partial-order [`crate::graph::ReferenceGraph`] and the linear
//! [`crate::graph::Profile`], per the "polymorphism over sequence templates"
//! design note.

use ndarray::Array2;

use crate::config::InsertionPolicy;
use crate::graph::Template;
use crate::scoring::ScoringScheme;

/// How a cell's best value was reached; used by backtrack to walk the mesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pred {
    /// The (source, 0) origin cell.
    Start,
    /// Reached via the match branch from node index `prev_m` at query row `q - 1`.
    Match { prev_m: usize },
    /// Reached via the deletion branch (graph advances) from node index `prev_m`, same row.
    Deletion { prev_m: usize },
    /// Reached via the insertion branch (query advances), same node, previous row.
    Insertion,
}

#[derive(Debug, Clone, Copy)]
pub struct Cell {
    pub value: f32,
    pub pred: Pred,
    /// Best value ending in an open deletion gap at this cell, for extension.
    del_ext_val: f32,
    /// Best value ending in an open insertion gap at this cell, for extension.
    ins_ext_val: f32,
    /// Remaining free insertion slots under the insertion-limited policy.
    remaining_inserts: u32,
}

const SENTINEL_EDGE_COST: f32 = 1.0;

impl Cell {
    fn infinite() -> Cell {
        Cell {
            value: f32::INFINITY,
            pred: Pred::Start,
            del_ext_val: f32::INFINITY,
            ins_ext_val: f32::INFINITY,
            remaining_inserts: 0,
        }
    }
}

/// The 2-D DP table over (template node, query base), filled in topological
/// order, row by row over the query.
pub struct Mesh<'t, T: Template> {
    template: &'t T,
    query: Vec<crate::base::Base>,
    node_index: std::collections::HashMap<T::NodeId, usize>,
    nodes: Vec<T::NodeId>,
    cells: Array2<Cell>,
    max_consecutive_insertions: u32,
}

impl<'t, T: Template> Mesh<'t, T> {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn query_len(&self) -> usize {
        self.query.len()
    }

    pub fn cell(&self, node_row: usize, query_row: usize) -> &Cell {
        &self.cells[(node_row, query_row)]
    }

    pub fn node_at(&self, row: usize) -> T::NodeId {
        self.nodes[row]
    }

    pub fn query_base(&self, index: usize) -> crate::base::Base {
        self.query[index]
    }

    /// Allocates and fills the mesh. `insertion_policy` selects whether the
    /// insertion branch is bounded by a per-cell counter (`Forbid`) or left
    /// unconstrained (backtrack/shift handle duplicates afterward).
    pub fn align(
        template: &'t T,
        query: Vec<crate::base::Base>,
        scheme: &dyn ScoringScheme,
        insertion_policy: InsertionPolicy,
        max_consecutive_insertions: u32,
    ) -> Mesh<'t, T> {
        let nodes: Vec<T::NodeId> = template.nodes_topological().to_vec();
        let node_index: std::collections::HashMap<T::NodeId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, &n)| (n, i))
            .collect();
        let rows = nodes.len();
        let cols = query.len() + 1;
        let cells = Array2::from_elem((rows, cols), Cell::infinite());

        let mut mesh = Mesh {
            template,
            query,
            node_index,
            nodes,
            cells,
            max_consecutive_insertions,
        };
        mesh.fill(scheme, insertion_policy);
        mesh
    }

    fn fill(&mut self, scheme: &dyn ScoringScheme, insertion_policy: InsertionPolicy) {
        let source_row = self.node_index[&self.template.source()];
        self.cells[(source_row, 0)] = Cell {
            value: 0.0,
            pred: Pred::Start,
            del_ext_val: 0.0,
            ins_ext_val: 0.0,
            remaining_inserts: self.max_consecutive_insertions,
        };

        for row in 0..self.nodes.len() {
            let node = self.nodes[row];
            let column = self.template.column(node);
            let pred_rows: Vec<usize> = self
                .template
                .predecessors(node)
                .iter()
                .map(|p| self.node_index[p])
                .collect();

            for q in 0..=self.query.len() {
                if row == source_row && q == 0 {
                    continue; // already seeded above
                }

                let mut best = Cell::infinite();

                // Deletion branch: graph advances, query stays (q unchanged).
                for &prev_row in &pred_rows {
                    let prev = self.cells[(prev_row, q)];
                    let opened = prev.value + scheme.deletion(column);
                    let extended = prev.del_ext_val + scheme.deletion_ext(column);
                    let (value, used_ext) = if extended < opened {
                        (extended, true)
                    } else {
                        (opened, false)
                    };
                    if value < best.value {
                        best = Cell {
                            value,
                            pred: Pred::Deletion { prev_m: prev_row },
                            del_ext_val: value,
                            ins_ext_val: f32::INFINITY,
                            remaining_inserts: self.max_consecutive_insertions,
                        };
                        let _ = used_ext;
                    }
                }

                // Source row / q == 0 boundary: cheap sentinel traversal so
                // overhang handling stays affordable regardless of scheme.
                if row != source_row && q == 0 {
                    for &prev_row in &pred_rows {
                        let prev = self.cells[(prev_row, 0)];
                        let value = prev.value + SENTINEL_EDGE_COST;
                        if value < best.value {
                            best = Cell {
                                value,
                                pred: Pred::Deletion { prev_m: prev_row },
                                del_ext_val: value,
                                ins_ext_val: f32::INFINITY,
                                remaining_inserts: self.max_consecutive_insertions,
                            };
                        }
                    }
                }

                // Insertion branch: query advances, graph stays at this node.
                if q > 0 {
                    let prev = self.cells[(row, q - 1)];
                    let insertion_allowed = !matches!(insertion_policy, InsertionPolicy::Forbid)
                        || prev.remaining_inserts > 0;
                    if insertion_allowed {
                        let at_boundary = row == source_row;
                        let (opened, extended) = if at_boundary {
                            (
                                prev.value + SENTINEL_EDGE_COST,
                                prev.ins_ext_val + SENTINEL_EDGE_COST,
                            )
                        } else {
                            (
                                prev.value + scheme.insertion(q as u32 - 1),
                                prev.ins_ext_val + scheme.insertion_ext(q as u32 - 1),
                            )
                        };
                        let value = opened.min(extended);
                        if value < best.value {
                            let remaining = if matches!(insertion_policy, InsertionPolicy::Forbid) {
                                prev.remaining_inserts.saturating_sub(1)
                            } else {
                                self.max_consecutive_insertions
                            };
                            best = Cell {
                                value,
                                pred: Pred::Insertion,
                                del_ext_val: f32::INFINITY,
                                ins_ext_val: value,
                                remaining_inserts: remaining,
                            };
                        }
                    }
                }

                // Match branch: both graph and query advance. Does not apply
                // to the virtual source itself, which carries no real base.
                if q > 0 && row != source_row {
                    let query_base = self.query[q - 1];
                    let match_cost =
                        scheme.r#match(self.template.base(node), query_base, column, self.template.node_weight(node));
                    for &prev_row in &pred_rows {
                        let prev = self.cells[(prev_row, q - 1)];
                        let value = prev.value + match_cost;
                        if value < best.value {
                            best = Cell {
                                value,
                                pred: Pred::Match { prev_m: prev_row },
                                del_ext_val: f32::INFINITY,
                                ins_ext_val: f32::INFINITY,
                                remaining_inserts: self.max_consecutive_insertions,
                            };
                        }
                    }
                }

                self.cells[(row, q)] = best;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{Base, IupacRule};
    use crate::cseq::CSeq;
    use crate::graph::ReferenceGraph;
    use crate::scoring::SimpleScheme;

    fn seq_from(bases: &[u8]) -> CSeq {
        let mut c = CSeq::new("r");
        c.append_str(bases).unwrap();
        c
    }

    fn bases(s: &[u8]) -> Vec<Base> {
        s.iter().map(|&b| Base::from_byte(b, 0).unwrap().unwrap()).collect()
    }

    #[test]
    fn identical_query_aligns_with_minimum_cost_along_matches() {
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

        let best_terminal = graph
            .terminals()
            .iter()
            .map(|&t| mesh.cell(mesh_row(&mesh, t), mesh.query_len()).value)
            .fold(f32::INFINITY, f32::min);
        // All eight bases should match, so total cost should be close to -8
        // (one match_score per base) plus sentinel boundary costs near zero.
        assert!(best_terminal < -7.0, "best_terminal = {best_terminal}");
    }

    fn mesh_row<T: Template>(mesh: &Mesh<T>, node: T::NodeId) -> usize {
        (0..mesh.node_count()).find(|&r| mesh.node_at(r) == node).unwrap()
    }
}
