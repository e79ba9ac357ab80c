//! Bottom-up rewriting of functor graphs.
//!
//! A [`GraphRewriter`] looks at one node at a time and either leaves it alone
//! or names a node that should take its place. [`GraphOptimizer`] drives a
//! list of rewriters over the graph until none of them changes anything.

pub mod optimizer;
pub mod rules;

pub use optimizer::{GraphOptimizer, optimize};
pub use rules::{AlgebraicRule, DedupRule, DegenerateRule, default_rules};

use crate::error::Result;
use crate::graph::{Graph, NodeId};

/// Outcome of offering one node to a rewriter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewrite {
    Unchanged,
    /// Retarget every parent of the node to this one and discard the node.
    Replace(NodeId),
}

pub trait GraphRewriter {
    fn name(&self) -> &'static str;

    /// Called before every sweep over the graph.
    fn reset(&mut self) {}

    /// Nodes are offered children first. A replacement must have the same
    /// shape as the node it replaces.
    fn rewrite(&mut self, graph: &Graph, node: NodeId) -> Result<Rewrite>;
}

/// Limits of the fixed-point driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptimizationConfig {
    /// Upper bound on full passes over the rule list.
    pub max_iterations: usize,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self { max_iterations: 16 }
    }
}

impl OptimizationConfig {
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }
}
