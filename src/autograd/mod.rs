//! Symbolic reverse-mode differentiation.
//!
//! Gradients are built as ordinary graph nodes, so they can be evaluated,
//! rewritten and even tracked by a session like any other expression.

mod backward;
mod chain;
mod grad_fn;

pub use backward::{derive, find_paths};
pub use chain::chain_rule;
pub use grad_fn::local_derivative;

use crate::error::Result;
use crate::graph::{Graph, NodeId};

impl Graph {
    /// Node computing the derivative of `root` with respect to `target`.
    pub fn gradient(&self, root: NodeId, target: NodeId) -> Result<NodeId> {
        derive(self, Some(root), Some(target))
    }
}
