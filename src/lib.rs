//! Teqgraph: tensor expression graphs
//!
//! Teqgraph builds graphs of tensor operations, differentiates them
//! symbolically, simplifies them with rewrite passes and evaluates them
//! incrementally.
//!
//! # Architecture
//!
//! - **graph**: shapes, coordinate maps, the node arena and its builders
//! - **kernel**: the numeric boundary that computes a functor's buffer
//! - **autograd**: reverse-mode gradients built as ordinary graph nodes
//! - **opt**: algebraic pruning, deduplication and transform elision
//! - **session**: incremental recomputation of tracked roots
//!
//! # Configuration
//!
//! [`Graph::new`] reads `TEQGRAPH_EVAL=lazy|eager` to choose whether functors
//! are computed as soon as they are built (see
//! [`graph::GraphConfig::from_env`]). [`Graph::with_config`] ignores the
//! environment.

// ============================================================================
// Core Modules
// ============================================================================

pub mod autograd;
pub mod error;
pub mod graph;
pub mod kernel;
pub mod opt;
pub mod session;

// ============================================================================
// Re-exports
// ============================================================================

pub use autograd::derive;
pub use error::{GraphError, Result};
pub use graph::{Edge, Graph, GraphConfig, NodeId, Opcode, Shape};
pub use kernel::{CpuKernel, Kernel};
pub use opt::{GraphOptimizer, OptimizationConfig, optimize};
pub use session::Session;

// ============================================================================
// Prelude
// ============================================================================

/// Prelude module with commonly used types and traits
pub mod prelude {
    pub use crate::autograd::derive;
    pub use crate::error::{GraphError, Result};
    pub use crate::graph::shape::{CoordMap, Transform};
    pub use crate::graph::{CacheState, Edge, Graph, GraphConfig, NodeId, Opcode, Shape, Usage};
    pub use crate::kernel::{CpuKernel, Kernel, KernelArg};
    pub use crate::opt::{GraphOptimizer, GraphRewriter, OptimizationConfig, Rewrite, optimize};
    pub use crate::session::Session;
}
