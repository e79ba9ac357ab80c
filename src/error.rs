//! Error type shared by every graph operation.

use thiserror::Error;

use crate::graph::op::Opcode;
use crate::graph::shape::Shape;
use crate::graph::NodeId;

pub type Result<T> = std::result::Result<T, GraphError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GraphError {
    // Construction
    #[error("{0} requires at least one argument")]
    ZeroArgs(Opcode),

    #[error("{opcode} expects {expected} arguments, got {actual}")]
    Arity {
        opcode: Opcode,
        expected: usize,
        actual: usize,
    },

    #[error("{opcode}: incompatible argument shapes {lhs} and {rhs}")]
    IncompatibleShapes {
        opcode: Opcode,
        lhs: Shape,
        rhs: Shape,
    },

    #[error("expected shape {expected}, got {actual}")]
    ShapeMismatch { expected: Shape, actual: Shape },

    #[error("rank {0} exceeds the rank cap")]
    RankOverflow(usize),

    #[error("shape {0} has unknown dimensions where a concrete shape is required")]
    IncompleteShape(Shape),

    #[error("data length {actual} does not match shape {shape} ({expected} elements)")]
    DataLength {
        shape: Shape,
        expected: usize,
        actual: usize,
    },

    #[error("invalid transform: {0}")]
    InvalidTransform(String),

    #[error("{0} only accepts identity edges")]
    UnsupportedEdge(Opcode),

    #[error("node {0} does not exist or was discarded")]
    NodeNotFound(NodeId),

    // Leaf usage
    #[error("node {0} is not a functor")]
    NotFunctor(NodeId),

    #[error("node {0} is not a variable and cannot be assigned")]
    NotAssignable(NodeId),

    #[error("node {0} is not a placeholder")]
    NotPlaceholder(NodeId),

    #[error("placeholder {0} is not bound")]
    UnboundPlaceholder(NodeId),

    #[error("binding {placeholder} to {target} would create a cycle")]
    BindingCycle { placeholder: NodeId, target: NodeId },

    // Algorithm invariants
    #[error("cannot derive through {0}")]
    NotDifferentiable(Opcode),

    #[error("transform is not bijective")]
    NotBijective,

    #[error("transform is singular and has no reverse")]
    SingularTransform,

    #[error("functor {0} reads a child that has never been computed")]
    Uncomputed(NodeId),

    // Numerically undefined rewrites
    #[error("division by a zero constant at node {0}")]
    DivisionByZero(NodeId),

    #[error("logarithm of a zero constant at node {0}")]
    LogOfZero(NodeId),

    #[error("kernel failure: {0}")]
    Kernel(String),
}
