//! Graph optimization.

pub mod graph;

pub use graph::{GraphOptimizer, GraphRewriter, OptimizationConfig, Rewrite, optimize};
