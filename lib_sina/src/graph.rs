//! Reference graph / MSeq (C6, §4.5) and the "template" abstraction the DP
//! (C8) is generic over, per the Design Note "Polymorphism over sequence
//! templates".

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::base::Base;
use crate::cseq::CSeq;
use crate::scoring::ColumnContext;

/// The capability set the alignment mesh needs from a template, whether that
/// template is a partial-order graph, a profile, or a single sequence.
pub trait Template {
    type NodeId: Copy + Eq + std::hash::Hash + std::fmt::Debug;

    /// All nodes in an order where every predecessor precedes its successors.
    fn nodes_topological(&self) -> &[Self::NodeId];
    fn predecessors(&self, node: Self::NodeId) -> &[Self::NodeId];
    fn column(&self, node: Self::NodeId) -> u32;
    /// Node weight (§4.5's family-observation weight); 1.0 for profile/linear
    /// templates where every column is a single node.
    fn node_weight(&self, node: Self::NodeId) -> f32;
    fn source(&self) -> Self::NodeId;
    fn terminals(&self) -> &[Self::NodeId];
    /// The base occupying this node, for graph/linear templates; profile
    /// templates answer via [`Template::column_context`] instead and may
    /// return an arbitrary representative base here.
    fn base(&self, node: Self::NodeId) -> Base;
    fn column_context(&self, node: Self::NodeId) -> ColumnContext;
}

/// One (base, case) node in the partial-order reference graph.
#[derive(Debug, Clone, Copy)]
pub struct GraphNode {
    pub column: u32,
    pub base: Base,
    pub weight: f32,
}

/// The partial-order DAG built from a family of same-width aligned references
/// (§4.5).
pub struct ReferenceGraph {
    graph: DiGraph<GraphNode, ()>,
    source: NodeIndex,
    terminals: Vec<NodeIndex>,
    topological: Vec<NodeIndex>,
    predecessors: std::collections::HashMap<NodeIndex, Vec<NodeIndex>>,
    width: u32,
}

impl ReferenceGraph {
    /// Builds the graph from `references`, which must all share `width`.
    /// `family_weight` is the configurable weighting parameter `w` in
    /// `weight = w*(observed/F) + 1/(w+1)`.
    pub fn build(references: &[CSeq], width: u32, family_weight: f32) -> ReferenceGraph {
        let mut graph = DiGraph::new();
        let source = graph.add_node(GraphNode {
            column: 0,
            base: Base::A,
            weight: 0.0,
        });

        let f = references.len().max(1) as f32;
        let mut cursors = vec![0usize; references.len()];
        let mut last_node = vec![source; references.len()];
        let mut topological = vec![source];

        for column in 0..width {
            let mut by_code: std::collections::HashMap<u8, Vec<usize>> =
                std::collections::HashMap::new();
            for (ridx, cseq) in references.iter().enumerate() {
                let entries = cseq.entries();
                if cursors[ridx] < entries.len() && entries[cursors[ridx]].column == column {
                    let code = entries[cursors[ridx]].base.to_bits();
                    by_code.entry(code).or_default().push(ridx);
                    cursors[ridx] += 1;
                }
            }

            let mut codes: Vec<u8> = by_code.keys().copied().collect();
            codes.sort_unstable();
            for code in codes {
                let refs = &by_code[&code];
                let observed = refs.len() as f32;
                let weight = family_weight * (observed / f) + 1.0 / (family_weight + 1.0);
                let node = graph.add_node(GraphNode {
                    column,
                    base: Base::from_bits(code),
                    weight,
                });
                topological.push(node);
                for &ridx in refs {
                    graph.update_edge(last_node[ridx], node, ());
                    last_node[ridx] = node;
                }
            }
        }

        let mut terminals = last_node;
        terminals.sort_unstable();
        terminals.dedup();

        let mut predecessors = std::collections::HashMap::new();
        for &node in &topological {
            let preds: Vec<NodeIndex> = graph.neighbors_directed(node, Direction::Incoming).collect();
            predecessors.insert(node, preds);
        }

        ReferenceGraph {
            graph,
            source,
            terminals,
            topological,
            predecessors,
            width,
        }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn width(&self) -> u32 {
        self.width
    }
}

impl Template for ReferenceGraph {
    type NodeId = NodeIndex;

    fn nodes_topological(&self) -> &[NodeIndex] {
        &self.topological
    }

    fn predecessors(&self, node: NodeIndex) -> &[NodeIndex] {
        self.predecessors.get(&node).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn column(&self, node: NodeIndex) -> u32 {
        self.graph[node].column
    }

    fn node_weight(&self, node: NodeIndex) -> f32 {
        self.graph[node].weight
    }

    fn source(&self) -> NodeIndex {
        self.source
    }

    fn terminals(&self) -> &[NodeIndex] {
        &self.terminals
    }

    fn base(&self, node: NodeIndex) -> Base {
        self.graph[node].base
    }

    fn column_context(&self, node: NodeIndex) -> ColumnContext {
        ColumnContext {
            weight: self.graph[node].weight,
            frequencies: [0.0; 4],
            gap_open_rate: 0.0,
            gap_extend_rate: 0.0,
        }
    }
}

/// Per-column summary used by the "profile" construction alternative to
/// [`ReferenceGraph`]: a linear chain where each column collapses the family
/// into a base-frequency vector plus gap rates (§4.5).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileColumn {
    pub frequencies: [f32; 4],
    pub gap_open_rate: f32,
    pub gap_extend_rate: f32,
}

/// A linear template over profile columns. Node `0` is the virtual source;
/// node `c + 1` is column `c`.
pub struct Profile {
    columns: Vec<ProfileColumn>,
    topological: Vec<u32>,
    predecessors: Vec<Vec<u32>>,
}

impl Profile {
    /// Builds a profile from `references`, all sharing `width`. An ambiguous
    /// base contributes `1 / ambig_order` to each base it could represent,
    /// per §4.5's IUPAC-split convention.
    pub fn build(references: &[CSeq], width: u32) -> Profile {
        let mut columns = vec![ProfileColumn::default(); width as usize];
        let f = references.len().max(1) as f32;
        for cseq in references {
            for entry in cseq.entries() {
                let column = entry.column as usize;
                if column >= columns.len() {
                    continue;
                }
                let bits = entry.base.to_bits() & 0b1111;
                let order = bits.count_ones().max(1) as f32;
                for (slot, mask) in [(0, 0b0001u8), (1, 0b0010), (2, 0b0100), (3, 0b1000)] {
                    if bits & mask != 0 {
                        columns[column].frequencies[slot] += 1.0 / order / f;
                    }
                }
            }
        }
        // Any mass not accounted for by a base observation at this column is
        // gap mass; approximate gap-open/extend rates from total occupancy.
        let occupancy: Vec<f32> = {
            let mut counts = vec![0u32; width as usize];
            for cseq in references {
                for entry in cseq.entries() {
                    let column = entry.column as usize;
                    if column < counts.len() {
                        counts[column] += 1;
                    }
                }
            }
            counts.iter().map(|&c| c as f32 / f).collect()
        };
        for (column, occ) in columns.iter_mut().zip(occupancy.iter()) {
            column.gap_open_rate = (1.0 - occ).max(0.0);
            column.gap_extend_rate = column.gap_open_rate;
        }

        let topological: Vec<u32> = (0..=width).collect();
        let mut predecessors = vec![Vec::new(); (width + 1) as usize];
        for node in 1..=width {
            predecessors[node as usize] = vec![node - 1];
        }

        Profile {
            columns,
            topological,
            predecessors,
        }
    }

    pub fn width(&self) -> u32 {
        self.columns.len() as u32
    }
}

impl Template for Profile {
    type NodeId = u32;

    fn nodes_topological(&self) -> &[u32] {
        &self.topological
    }

    fn predecessors(&self, node: u32) -> &[u32] {
        self.predecessors.get(node as usize).map(|v| v.as_slice()).unwrap_or(&[])
    }

    fn column(&self, node: u32) -> u32 {
        node.saturating_sub(1)
    }

    fn node_weight(&self, _node: u32) -> f32 {
        1.0
    }

    fn source(&self) -> u32 {
        0
    }

    fn terminals(&self) -> &[u32] {
        std::slice::from_ref(self.topological.last().expect("profile has at least the source node"))
    }

    fn base(&self, node: u32) -> Base {
        if node == 0 {
            return Base::A;
        }
        let context = self.columns[(node - 1) as usize];
        let mut bits = 0u8;
        for (slot, mask) in [(0, 0b0001u8), (1, 0b0010), (2, 0b0100), (3, 0b1000)] {
            if context.frequencies[slot] > 0.0 {
                bits |= mask;
            }
        }
        Base::from_bits(bits)
    }

    fn column_context(&self, node: u32) -> ColumnContext {
        if node == 0 {
            return ColumnContext::default();
        }
        let c = self.columns[(node - 1) as usize];
        ColumnContext {
            weight: 1.0,
            frequencies: c.frequencies,
            gap_open_rate: c.gap_open_rate,
            gap_extend_rate: c.gap_extend_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq_from(bases: &[u8]) -> CSeq {
        let mut c = CSeq::new("r");
        c.append_str(bases).unwrap();
        c
    }

    #[test]
    fn graph_topological_order_matches_column_order() {
        let refs = vec![seq_from(b"AGCT"), seq_from(b"AGCT")];
        let graph = ReferenceGraph::build(&refs, 4, 1.0);
        let columns: Vec<u32> = graph
            .nodes_topological()
            .iter()
            .map(|&n| graph.column(n))
            .collect();
        assert!(columns.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn graph_collapses_identical_columns_into_one_node() {
        let refs = vec![seq_from(b"AGCT"), seq_from(b"AGCT"), seq_from(b"AGCT")];
        let graph = ReferenceGraph::build(&refs, 4, 1.0);
        // 1 source + 4 distinct columns, each with a single base => 5 nodes
        assert_eq!(graph.node_count(), 5);
    }

    #[test]
    fn profile_predecessor_chain_is_linear() {
        let refs = vec![seq_from(b"AGCT"), seq_from(b"AGGT")];
        let profile = Profile::build(&refs, 4);
        for node in 1..=profile.width() {
            assert_eq!(profile.predecessors(node), &[node - 1]);
        }
    }
}
