use rustc_hash::FxHashMap;

use crate::error::Result;
use crate::graph::{Edge, Graph, NodeId, NodeKind, Opcode, Shape, Usage};
use crate::opt::graph::{GraphRewriter, Rewrite};

/// Common subexpression elimination.
///
/// Nodes are offered lowest first, so the first node seen with a given
/// structure survives and later equivalents are replaced by it.
#[derive(Debug, Default)]
pub struct DedupRule {
    constants: FxHashMap<(Shape, Vec<u64>), NodeId>,
    functors: FxHashMap<FunctorKey, Vec<NodeId>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FunctorKey {
    opcode: Opcode,
    shape: Shape,
    children: Vec<NodeId>,
}

enum Seen {
    Constant(Shape, Vec<u64>),
    Functor(Opcode, Shape, Vec<Edge>),
    Other,
}

impl GraphRewriter for DedupRule {
    fn name(&self) -> &'static str {
        "dedup"
    }

    fn reset(&mut self) {
        self.constants.clear();
        self.functors.clear();
    }

    fn rewrite(&mut self, graph: &Graph, node: NodeId) -> Result<Rewrite> {
        let seen = graph.with_node(node, |n| match &n.kind {
            NodeKind::Leaf(leaf) => match (&leaf.data, leaf.usage, leaf.bound) {
                (Some(data), Usage::Immutable, None) => {
                    Seen::Constant(n.shape, data.iter().map(|&v| constant_bits(v)).collect())
                }
                _ => Seen::Other,
            },
            NodeKind::Functor(f) => Seen::Functor(f.opcode, n.shape, f.edges.clone()),
        })?;

        match seen {
            Seen::Other => Ok(Rewrite::Unchanged),
            Seen::Constant(shape, bits) => {
                let survivor = *self.constants.entry((shape, bits)).or_insert(node);
                Ok(replacement(graph, node, survivor))
            }
            Seen::Functor(opcode, shape, edges) => {
                let mut children: Vec<NodeId> = edges.iter().map(Edge::child).collect();
                if opcode.is_commutative() {
                    children.sort();
                }
                let bucket = self
                    .functors
                    .entry(FunctorKey {
                        opcode,
                        shape,
                        children,
                    })
                    .or_default();
                for &candidate in bucket.iter() {
                    if candidate == node || !graph.contains(candidate) {
                        continue;
                    }
                    let other = graph.edges(candidate)?;
                    if same_args(opcode, &edges, &other) {
                        return Ok(Rewrite::Replace(candidate));
                    }
                }
                bucket.push(node);
                Ok(Rewrite::Unchanged)
            }
        }
    }
}

fn replacement(graph: &Graph, node: NodeId, survivor: NodeId) -> Rewrite {
    if survivor == node || !graph.contains(survivor) {
        Rewrite::Unchanged
    } else {
        Rewrite::Replace(survivor)
    }
}

/// Argument lists are equal; commutative opcodes ignore argument order.
fn same_args(opcode: Opcode, lhs: &[Edge], rhs: &[Edge]) -> bool {
    if lhs.len() != rhs.len() {
        return false;
    }
    if !opcode.is_commutative() {
        return lhs.iter().zip(rhs).all(|(a, b)| a.same_as(b));
    }
    let mut used = vec![false; rhs.len()];
    lhs.iter().all(|a| {
        let found = rhs
            .iter()
            .enumerate()
            .position(|(i, b)| !used[i] && a.same_as(b));
        match found {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

/// Bit pattern constants are keyed on; `-0.0` and `0.0` share one.
fn constant_bits(v: f64) -> u64 {
    if v == 0.0 { 0f64.to_bits() } else { v.to_bits() }
}
