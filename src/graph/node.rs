use std::fmt;
use std::rc::Rc;

use crate::graph::edge::Edge;
use crate::graph::op::Opcode;
use crate::graph::shape::Shape;

/// Stable handle of a node inside a `Graph`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a leaf's data may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Usage {
    /// Fixed content; equal immutable leaves may be merged.
    Immutable,
    /// Reassignable from outside the graph.
    Variable,
    /// No data of its own until bound to another node.
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct Leaf {
    pub usage: Usage,
    pub data: Option<Rc<Vec<f64>>>,
    pub bound: Option<NodeId>,
}

/// Value computed for a functor, stamped with the generations of its
/// children at compute time.
#[derive(Debug, Clone)]
pub struct Cache {
    pub data: Rc<Vec<f64>>,
    pub inputs: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct Functor {
    pub opcode: Opcode,
    pub edges: Vec<Edge>,
    pub cache: Option<Cache>,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Leaf(Leaf),
    Functor(Functor),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub label: String,
    pub shape: Shape,
    pub kind: NodeKind,
    /// Bumped whenever the value this node produces may have changed.
    pub generation: u64,
}

impl Node {
    pub fn is_functor(&self) -> bool {
        matches!(self.kind, NodeKind::Functor(_))
    }

    pub fn opcode(&self) -> Option<Opcode> {
        match &self.kind {
            NodeKind::Functor(f) => Some(f.opcode),
            NodeKind::Leaf(_) => None,
        }
    }

    pub fn usage(&self) -> Option<Usage> {
        match &self.kind {
            NodeKind::Leaf(l) => Some(l.usage),
            NodeKind::Functor(_) => None,
        }
    }

    /// Children in argument order; a bound placeholder reports its target.
    pub fn children(&self) -> Vec<NodeId> {
        match &self.kind {
            NodeKind::Functor(f) => f.edges.iter().map(Edge::child).collect(),
            NodeKind::Leaf(l) => l.bound.into_iter().collect(),
        }
    }
}

/// Freshness of a functor's cached value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Never computed.
    Cold,
    /// Valid for the current data of every dependency.
    Cached,
    /// A dependency changed since the value was computed.
    Stale,
}
