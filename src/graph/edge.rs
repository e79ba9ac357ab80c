use std::rc::Rc;

use crate::graph::NodeId;
use crate::graph::shape::{CoordMap, Shape, Transform};

/// Binding of a child node to one argument slot of a functor.
#[derive(Debug, Clone)]
pub struct Edge {
    child: NodeId,
    shaper: Rc<CoordMap>,
    coorder: Option<Rc<CoordMap>>,
    map_io: bool,
    shape: Shape,
}

impl Edge {
    /// Edge that passes the child through unchanged.
    pub fn identity(child: NodeId, child_shape: Shape) -> Self {
        Self {
            child,
            shaper: Rc::new(CoordMap::identity()),
            coorder: None,
            map_io: false,
            shape: child_shape,
        }
    }

    pub fn new(child: NodeId, child_shape: Shape, transform: Transform) -> Self {
        let shape = transform.shaper.convert(&child_shape);
        Self {
            child,
            map_io: child_shape.n_elems() > shape.n_elems(),
            shaper: transform.shaper,
            coorder: transform.coorder,
            shape,
        }
    }

    pub fn child(&self) -> NodeId {
        self.child
    }

    pub fn shaper(&self) -> &Rc<CoordMap> {
        &self.shaper
    }

    pub fn coorder(&self) -> Option<&Rc<CoordMap>> {
        self.coorder.as_ref()
    }

    /// True when the child has more elements than this argument.
    pub fn map_io(&self) -> bool {
        self.map_io
    }

    /// Shape this argument contributes, i.e. the shaper applied to the
    /// child's shape.
    pub fn shape(&self) -> Shape {
        self.shape
    }

    pub fn is_identity(&self) -> bool {
        self.shaper.is_identity() && self.coorder.as_ref().is_none_or(|c| c.is_identity())
    }

    /// Same child and same transforms.
    pub fn same_as(&self, other: &Edge) -> bool {
        self.child == other.child && self.same_transform(other)
    }

    pub fn same_transform(&self, other: &Edge) -> bool {
        let coorders_match = match (&self.coorder, &other.coorder) {
            (None, None) => true,
            (Some(a), Some(b)) => Rc::ptr_eq(a, b) || **a == **b,
            (Some(c), None) | (None, Some(c)) => c.is_identity(),
        };
        (Rc::ptr_eq(&self.shaper, &other.shaper) || *self.shaper == *other.shaper)
            && coorders_match
    }

    pub(crate) fn retarget(&mut self, child: NodeId) {
        self.child = child;
    }
}
