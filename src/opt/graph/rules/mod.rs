//! Rewrite rules.

mod algebraic;
mod dedup;
mod degenerate;

pub use algebraic::AlgebraicRule;
pub use dedup::DedupRule;
pub use degenerate::DegenerateRule;

use super::GraphRewriter;
use crate::error::Result;
use crate::graph::{Graph, NodeId, NodeKind, Usage};

/// Algebraic pruning, degenerate-transform elision, then deduplication.
pub fn default_rules() -> Vec<Box<dyn GraphRewriter>> {
    vec![
        Box::new(AlgebraicRule),
        Box::new(DegenerateRule),
        Box::new(DedupRule::default()),
    ]
}

/// Value of an immutable leaf whose elements are all equal.
pub(crate) fn uniform_value(graph: &Graph, id: NodeId) -> Result<Option<f64>> {
    graph.with_node(id, |n| match &n.kind {
        NodeKind::Leaf(leaf) if leaf.usage == Usage::Immutable => {
            let data = leaf.data.as_deref()?;
            let first = *data.first()?;
            data.iter().all(|&v| v == first).then_some(first)
        }
        _ => None,
    })
}
