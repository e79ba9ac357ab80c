//! Arena of leaves and functors.
//!
//! Nodes live in a single `Vec` and reference their children by [`NodeId`].
//! Nothing points upward: parent relations are rebuilt per traversal (see
//! [`traversal`]) and cache freshness is tracked with per-node generation
//! stamps instead of subscriptions. Stamps come from one clock per graph, so
//! a node's generation only ever moves to a value no node has held before.
//!
//! Walks over the arena are iterative; chains of any depth are fine.

pub mod builder;
pub mod edge;
pub mod node;
pub mod op;
pub mod shape;
pub mod traversal;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::{debug, trace};
use rustc_hash::FxHashMap;

pub use edge::Edge;
pub use node::{Cache, CacheState, Functor, Leaf, Node, NodeId, NodeKind, Usage};
pub use op::{OpKind, Opcode};
pub use shape::{CoordMap, RANK_CAP, Shape, Transform};

use crate::error::{GraphError, Result};
use crate::kernel::{CpuKernel, Kernel, KernelArg};

/// Environment variable selecting the evaluation policy (`eager` or `lazy`).
pub const EVAL_ENV: &str = "TEQGRAPH_EVAL";

/// Construction-time policy of a [`Graph`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Compute a functor as soon as it is built when all of its children
    /// already hold data.
    pub eager: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self { eager: true }
    }
}

impl GraphConfig {
    /// Default configuration overridden by [`EVAL_ENV`].
    pub fn from_env() -> Self {
        Self::parse(std::env::var(EVAL_ENV).ok().as_deref())
    }

    /// Configuration for an [`EVAL_ENV`] value; unknown values keep the
    /// default.
    pub fn parse(value: Option<&str>) -> Self {
        let mut config = Self::default();
        if let Some(value) = value {
            match value.trim().to_ascii_lowercase().as_str() {
                "lazy" => config.eager = false,
                "eager" => config.eager = true,
                other => log::warn!("ignoring unknown {}={}", EVAL_ENV, other),
            }
        }
        config
    }

    pub fn with_eager(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }
}

pub struct Graph {
    nodes: RefCell<Vec<Option<Node>>>,
    /// Last generation handed out.
    clock: Cell<u64>,
    kernel: Rc<dyn Kernel>,
    config: GraphConfig,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("nodes", &self.node_count())
            .field("kernel", &self.kernel.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Graph {
    /// Graph on the CPU kernel, configured from the environment (see
    /// [`GraphConfig::from_env`]).
    pub fn new() -> Self {
        Self::with_config(GraphConfig::from_env())
    }

    pub fn with_config(config: GraphConfig) -> Self {
        Self::with_kernel(Rc::new(CpuKernel), config)
    }

    pub fn with_kernel(kernel: Rc<dyn Kernel>, config: GraphConfig) -> Self {
        Self {
            nodes: RefCell::new(Vec::new()),
            clock: Cell::new(0),
            kernel,
            config,
        }
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    fn tick(&self) -> u64 {
        let next = self.clock.get() + 1;
        self.clock.set(next);
        next
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.borrow().iter().flatten().count()
    }

    /// Ids of every live node, in creation order.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes
            .borrow()
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_some())
            .map(|(i, _)| NodeId(i))
            .collect()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        matches!(self.nodes.borrow().get(id.0), Some(Some(_)))
    }

    pub(crate) fn with_node<R>(&self, id: NodeId, f: impl FnOnce(&Node) -> R) -> Result<R> {
        let nodes = self.nodes.borrow();
        match nodes.get(id.0) {
            Some(Some(node)) => Ok(f(node)),
            _ => Err(GraphError::NodeNotFound(id)),
        }
    }

    fn with_node_mut<R>(&self, id: NodeId, f: impl FnOnce(&mut Node) -> R) -> Result<R> {
        let mut nodes = self.nodes.borrow_mut();
        match nodes.get_mut(id.0) {
            Some(Some(node)) => Ok(f(node)),
            _ => Err(GraphError::NodeNotFound(id)),
        }
    }

    fn push(&self, node: Node) -> NodeId {
        let mut nodes = self.nodes.borrow_mut();
        let id = NodeId(nodes.len());
        trace!("node {} = {} {}", id, node.label, node.shape);
        nodes.push(Some(node));
        id
    }

    /// Clone of the node stored at `id`.
    pub fn node(&self, id: NodeId) -> Result<Node> {
        self.with_node(id, Node::clone)
    }

    pub fn shape(&self, id: NodeId) -> Result<Shape> {
        self.with_node(id, |n| n.shape)
    }

    pub fn label(&self, id: NodeId) -> Result<String> {
        self.with_node(id, |n| n.label.clone())
    }

    pub fn opcode(&self, id: NodeId) -> Result<Option<Opcode>> {
        self.with_node(id, Node::opcode)
    }

    pub fn usage(&self, id: NodeId) -> Result<Option<Usage>> {
        self.with_node(id, Node::usage)
    }

    pub fn is_functor(&self, id: NodeId) -> Result<bool> {
        self.with_node(id, Node::is_functor)
    }

    /// Argument edges of a functor; leaves have none.
    pub fn edges(&self, id: NodeId) -> Result<Vec<Edge>> {
        self.with_node(id, |n| match &n.kind {
            NodeKind::Functor(f) => f.edges.clone(),
            NodeKind::Leaf(_) => Vec::new(),
        })
    }

    /// Nodes this one reads from, including a placeholder's binding.
    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>> {
        self.with_node(id, Node::children)
    }

    /// Short human readable description, e.g. `MUL[3, 2]`.
    pub fn describe(&self, id: NodeId) -> String {
        self.with_node(id, |n| format!("{}{}", n.label, n.shape))
            .unwrap_or_else(|_| format!("<discarded {}>", id))
    }

    // Leaves

    fn leaf(&self, usage: Usage, data: Option<Vec<f64>>, shape: Shape, label: &str) -> Result<NodeId> {
        if !shape.is_complete() {
            return Err(GraphError::IncompleteShape(shape));
        }
        if let Some(data) = &data {
            check_len(shape, data.len())?;
        }
        Ok(self.push(Node {
            label: label.to_string(),
            shape,
            kind: NodeKind::Leaf(Leaf {
                usage,
                data: data.map(Rc::new),
                bound: None,
            }),
            generation: 0,
        }))
    }

    /// Immutable leaf holding `data`.
    pub fn constant(&self, data: Vec<f64>, shape: Shape) -> Result<NodeId> {
        let label = match data.first() {
            Some(first) if data.iter().all(|v| v == first) => format!("{}", first),
            _ => "const".to_string(),
        };
        self.leaf(Usage::Immutable, Some(data), shape, &label)
    }

    /// Immutable leaf with every element equal to `value`.
    pub fn scalar_constant(&self, value: f64, shape: Shape) -> Result<NodeId> {
        self.constant(vec![value; shape.n_elems()], shape)
    }

    pub fn zeros(&self, shape: Shape) -> Result<NodeId> {
        self.scalar_constant(0.0, shape)
    }

    pub fn ones(&self, shape: Shape) -> Result<NodeId> {
        self.scalar_constant(1.0, shape)
    }

    pub fn variable(&self, data: Vec<f64>, shape: Shape, label: &str) -> Result<NodeId> {
        self.leaf(Usage::Variable, Some(data), shape, label)
    }

    pub fn placeholder(&self, shape: Shape, label: &str) -> Result<NodeId> {
        self.leaf(Usage::Placeholder, None, shape, label)
    }

    /// Replace the data of a variable leaf.
    pub fn assign(&self, id: NodeId, data: Vec<f64>) -> Result<()> {
        let shape = self.shape(id)?;
        check_len(shape, data.len())?;
        let generation = self.tick();
        self.with_node_mut(id, |n| match &mut n.kind {
            NodeKind::Leaf(leaf) if leaf.usage == Usage::Variable => {
                leaf.data = Some(Rc::new(data));
                n.generation = generation;
                Ok(())
            }
            _ => Err(GraphError::NotAssignable(id)),
        })?
    }

    /// Route a placeholder to `target`.
    pub fn bind(&self, placeholder: NodeId, target: NodeId) -> Result<()> {
        if self.usage(placeholder)? != Some(Usage::Placeholder) {
            return Err(GraphError::NotPlaceholder(placeholder));
        }
        let (expected, actual) = (self.shape(placeholder)?, self.shape(target)?);
        if expected != actual {
            return Err(GraphError::ShapeMismatch { expected, actual });
        }
        if traversal::reaches(self, target, placeholder)? {
            return Err(GraphError::BindingCycle {
                placeholder,
                target,
            });
        }
        let generation = self.tick();
        self.with_node_mut(placeholder, |n| {
            if let NodeKind::Leaf(leaf) = &mut n.kind {
                leaf.bound = Some(target);
            }
            n.generation = generation;
        })
    }

    // Functors

    /// Validate `edges` against `opcode`, infer the output shape and append
    /// the functor.
    pub fn make_functor(&self, opcode: Opcode, edges: Vec<Edge>) -> Result<NodeId> {
        opcode.check_arity(edges.len())?;
        for edge in &edges {
            let child_shape = self.shape(edge.child())?;
            if edge.shaper().convert(&child_shape) != edge.shape() {
                return Err(GraphError::InvalidTransform(format!(
                    "edge to {} was built for another shape",
                    edge.child()
                )));
            }
            if opcode == Opcode::Reshape && child_shape.n_elems() != edge.shape().n_elems() {
                return Err(GraphError::InvalidTransform(format!(
                    "cannot reshape {} into {}",
                    child_shape,
                    edge.shape()
                )));
            }
            let plain = matches!(opcode.kind(), OpKind::Elementwise | OpKind::Matmul);
            if plain && !edge.is_identity() {
                return Err(GraphError::UnsupportedEdge(opcode));
            }
        }
        let arg_shapes: Vec<Shape> = edges.iter().map(Edge::shape).collect();
        let shape = opcode.infer_shape(&arg_shapes)?;
        let id = self.push(Node {
            label: opcode.name().to_string(),
            shape,
            kind: NodeKind::Functor(Functor {
                opcode,
                edges,
                cache: None,
            }),
            generation: 0,
        });
        if self.config.eager && self.has_data_for_children(id)? {
            if let Err(err) = self.recompute(id) {
                self.discard(id);
                return Err(err);
            }
        }
        Ok(id)
    }

    fn has_data_for_children(&self, id: NodeId) -> Result<bool> {
        for child in self.children(id)? {
            if !self.has_data(child)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Whether reading `id` without evaluation would succeed.
    pub fn has_data(&self, id: NodeId) -> Result<bool> {
        let mut current = id;
        loop {
            let found = self.with_node(current, |n| match &n.kind {
                NodeKind::Leaf(leaf) => match leaf.bound {
                    Some(target) => Err(target),
                    None => Ok(leaf.data.is_some()),
                },
                NodeKind::Functor(f) => Ok(f.cache.is_some()),
            })?;
            match found {
                Ok(has) => return Ok(has),
                Err(target) => current = target,
            }
        }
    }

    // Generations and caches

    /// Generation a dependent compares against.
    ///
    /// A placeholder reports the newest stamp along its binding chain, so
    /// rebinding it and changing whatever it is bound to both move the value
    /// forward.
    pub fn generation(&self, id: NodeId) -> Result<u64> {
        let mut current = id;
        let mut newest = 0;
        loop {
            let (own, bound) = self.with_node(current, |n| {
                let bound = match &n.kind {
                    NodeKind::Leaf(leaf) => leaf.bound,
                    NodeKind::Functor(_) => None,
                };
                (n.generation, bound)
            })?;
            newest = newest.max(own);
            match bound {
                Some(target) => current = target,
                None => return Ok(newest),
            }
        }
    }

    fn child_generations(&self, id: NodeId) -> Result<Vec<u64>> {
        self.children(id)?
            .into_iter()
            .map(|c| self.generation(c))
            .collect()
    }

    /// Freshness of a functor, looking through every dependency. Leaves are
    /// always `Cached`.
    pub fn cache_state(&self, id: NodeId) -> Result<CacheState> {
        self.state_of(id, &mut FxHashMap::default())
    }

    /// States of `id` and everything below it not already in `memo`.
    fn state_of(&self, id: NodeId, memo: &mut FxHashMap<NodeId, CacheState>) -> Result<CacheState> {
        if let Some(state) = memo.get(&id) {
            return Ok(*state);
        }
        let order = traversal::post_order(&[id], |n| {
            if memo.contains_key(&n) {
                Ok(Vec::new())
            } else {
                self.children(n)
            }
        })?;
        for n in order {
            if !memo.contains_key(&n) {
                let state = self.local_state(n, memo)?;
                memo.insert(n, state);
            }
        }
        memo.get(&id).copied().ok_or(GraphError::NodeNotFound(id))
    }

    /// State of `id` given the states of its children in `memo`.
    fn local_state(&self, id: NodeId, memo: &FxHashMap<NodeId, CacheState>) -> Result<CacheState> {
        let stamp = self.with_node(id, |n| match &n.kind {
            NodeKind::Functor(f) => Some(f.cache.as_ref().map(|c| c.inputs.clone())),
            NodeKind::Leaf(_) => None,
        })?;
        let children = self.children(id)?;
        let child_state = |c: &NodeId| memo.get(c).copied().unwrap_or(CacheState::Cached);
        Ok(match stamp {
            // a bound placeholder is as fresh as its target
            None => children.first().map_or(CacheState::Cached, child_state),
            Some(None) => CacheState::Cold,
            Some(Some(inputs)) => {
                let fresh = inputs == self.child_generations(id)?
                    && children.iter().all(|c| child_state(c) == CacheState::Cached);
                if fresh {
                    CacheState::Cached
                } else {
                    CacheState::Stale
                }
            }
        })
    }

    /// Data a node currently holds, without evaluating anything.
    fn stored_data(&self, id: NodeId) -> Result<Rc<Vec<f64>>> {
        let mut current = id;
        loop {
            let found = self.with_node(current, |n| match &n.kind {
                NodeKind::Leaf(leaf) => match (leaf.usage, leaf.bound, &leaf.data) {
                    (Usage::Placeholder, Some(target), _) => Err(Some(target)),
                    (Usage::Placeholder, None, _) => Err(None),
                    (_, _, Some(data)) => Ok(Some(Rc::clone(data))),
                    (_, _, None) => Ok(None),
                },
                NodeKind::Functor(f) => Ok(f.cache.as_ref().map(|c| Rc::clone(&c.data))),
            })?;
            match found {
                Ok(Some(data)) => return Ok(data),
                Ok(None) => return Err(GraphError::Uncomputed(current)),
                Err(Some(target)) => current = target,
                Err(None) => return Err(GraphError::UnboundPlaceholder(current)),
            }
        }
    }

    /// Recompute a functor from the data its children currently hold.
    ///
    /// Children are not refreshed first; callers order recomputation so that
    /// they already are.
    pub fn recompute(&self, id: NodeId) -> Result<()> {
        let (opcode, edges, shape) = self.with_node(id, |n| match &n.kind {
            NodeKind::Functor(f) => Some((f.opcode, f.edges.clone(), n.shape)),
            NodeKind::Leaf(_) => None,
        })?
        .ok_or(GraphError::NotFunctor(id))?;

        let mut inputs = Vec::with_capacity(edges.len());
        for edge in &edges {
            let child = edge.child();
            let data = match self.stored_data(child) {
                Err(GraphError::Uncomputed(_)) => return Err(GraphError::Uncomputed(child)),
                other => other?,
            };
            inputs.push((data, self.shape(child)?));
        }
        let args: Vec<KernelArg<'_>> = edges
            .iter()
            .zip(inputs.iter())
            .map(|(edge, (data, child_shape))| KernelArg {
                data: data.as_slice(),
                shape: *child_shape,
                arg_shape: edge.shape(),
                coorder: edge.coorder().map(|c| c.as_ref()),
                map_io: edge.map_io(),
            })
            .collect();
        let out = self.kernel.compute(opcode, &shape, &args)?;
        check_len(shape, out.len())?;
        let stamp = self.child_generations(id)?;
        let generation = self.tick();
        trace!("recomputed {} {}", id, opcode);
        self.with_node_mut(id, |n| {
            if let NodeKind::Functor(f) = &mut n.kind {
                f.cache = Some(Cache {
                    data: Rc::new(out),
                    inputs: stamp,
                });
            }
            n.generation = generation;
        })
    }

    /// Current value of a node, evaluating cold or stale functors on the way.
    pub fn data(&self, id: NodeId) -> Result<Rc<Vec<f64>>> {
        self.refresh(id, &mut FxHashMap::default())?;
        self.stored_data(id)
    }

    /// Recompute every functor under `id` that is not `Cached`, children
    /// first.
    fn refresh(&self, id: NodeId, memo: &mut FxHashMap<NodeId, CacheState>) -> Result<()> {
        if self.state_of(id, memo)? == CacheState::Cached {
            return Ok(());
        }
        let order = traversal::post_order(&[id], |n| {
            if memo.get(&n) == Some(&CacheState::Cached) {
                Ok(Vec::new())
            } else {
                self.children(n)
            }
        })?;
        for n in order {
            if memo.get(&n) == Some(&CacheState::Cached) {
                continue;
            }
            if self.is_functor(n)? {
                self.recompute(n)?;
            }
            memo.insert(n, CacheState::Cached);
        }
        Ok(())
    }

    // Structural mutation used by rewrites

    /// Point every edge of `parent` that reads `old` at `new` and drop the
    /// parent's cache.
    pub(crate) fn retarget(&self, parent: NodeId, old: NodeId, new: NodeId) -> Result<()> {
        let new_shape = self.shape(new)?;
        let old_shape = self.shape(old)?;
        if new_shape != old_shape {
            return Err(GraphError::ShapeMismatch {
                expected: old_shape,
                actual: new_shape,
            });
        }
        let generation = self.tick();
        self.with_node_mut(parent, |n| {
            match &mut n.kind {
                NodeKind::Functor(f) => {
                    for edge in f.edges.iter_mut().filter(|e| e.child() == old) {
                        edge.retarget(new);
                    }
                    f.cache = None;
                }
                NodeKind::Leaf(leaf) => {
                    if leaf.bound == Some(old) {
                        leaf.bound = Some(new);
                    }
                }
            }
            n.generation = generation;
        })
    }

    /// Remove a node from the arena. Its id is never reused.
    pub(crate) fn discard(&self, id: NodeId) {
        debug!("discarding {}", self.describe(id));
        if let Some(slot) = self.nodes.borrow_mut().get_mut(id.0) {
            *slot = None;
        }
    }
}

fn check_len(shape: Shape, len: usize) -> Result<()> {
    if shape.n_elems() != len {
        return Err(GraphError::DataLength {
            shape,
            expected: shape.n_elems(),
            actual: len,
        });
    }
    Ok(())
}
