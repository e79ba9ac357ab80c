//! Incremental evaluation of tracked roots.
//!
//! A [`Session`] remembers a set of roots and the functors below them, ordered
//! by height. Each update walks down from the roots (or from a chosen set of
//! targets), stops at ignored nodes, and recomputes every functor it reached
//! children first.
//!
//! Rewrites may discard tracked nodes. Roots the graph no longer holds are
//! dropped on the next `track` or `update`; [`Session::retarget`] swaps a
//! replaced root for its replacement.

use log::{debug, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{GraphError, Result};
use crate::graph::{Graph, NodeId, traversal};

#[derive(Debug, Default)]
pub struct Session {
    roots: Vec<NodeId>,
    /// Operable functors, ascending by (height, id).
    tracked: Vec<NodeId>,
    heights: FxHashMap<NodeId, usize>,
    parents: FxHashMap<NodeId, FxHashSet<NodeId>>,
    input_counts: FxHashMap<NodeId, usize>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `roots` to the tracked set and rebuild the schedule.
    pub fn track(&mut self, graph: &Graph, roots: &[NodeId]) -> Result<()> {
        if let Some(&missing) = roots.iter().find(|r| !graph.contains(**r)) {
            return Err(GraphError::NodeNotFound(missing));
        }
        self.drop_discarded(graph);
        for &root in roots {
            if !self.roots.contains(&root) {
                self.roots.push(root);
            }
        }
        self.rebuild(graph)
    }

    /// Track `new` in place of `old`, typically the root a rewrite returned
    /// for it.
    pub fn retarget(&mut self, graph: &Graph, old: NodeId, new: NodeId) -> Result<()> {
        if !graph.contains(new) {
            return Err(GraphError::NodeNotFound(new));
        }
        let present = self.roots.contains(&new);
        match self.roots.iter().position(|&r| r == old) {
            Some(i) if !present => self.roots[i] = new,
            Some(i) => {
                self.roots.remove(i);
            }
            None if !present => self.roots.push(new),
            None => {}
        }
        self.drop_discarded(graph);
        self.rebuild(graph)
    }

    fn drop_discarded(&mut self, graph: &Graph) {
        let before = self.roots.len();
        self.roots.retain(|r| graph.contains(*r));
        if self.roots.len() != before {
            debug!("dropped {} discarded roots", before - self.roots.len());
        }
    }

    /// Recompute heights, order and bookkeeping for the current roots.
    fn rebuild(&mut self, graph: &Graph) -> Result<()> {
        self.heights = traversal::heights(graph, &self.roots)?;
        let mut tracked = Vec::new();
        for (&id, _) in self.heights.iter() {
            if graph.is_functor(id)? {
                tracked.push(id);
            }
        }
        tracked.sort_by_key(|id| (self.heights[id], *id));

        self.parents.clear();
        self.input_counts.clear();
        for &id in &tracked {
            let children = graph.children(id)?;
            let mut operable = 0;
            for child in children {
                self.parents.entry(child).or_default().insert(id);
                if graph.is_functor(child)? {
                    operable += 1;
                }
            }
            self.input_counts.insert(id, operable);
        }
        self.tracked = tracked;
        debug!(
            "tracking {} roots, {} operable functors",
            self.roots.len(),
            self.tracked.len()
        );
        Ok(())
    }

    /// Recompute every tracked functor reachable from the roots without
    /// passing through `ignored`. Returns the recomputed functors in order.
    pub fn update(&mut self, graph: &Graph, ignored: &[NodeId]) -> Result<Vec<NodeId>> {
        self.refresh_schedule(graph)?;
        self.run(graph, &self.roots, ignored)
    }

    /// Like [`Session::update`], walking from `targets` instead of the roots.
    pub fn update_target(
        &mut self,
        graph: &Graph,
        targets: &[NodeId],
        ignored: &[NodeId],
    ) -> Result<Vec<NodeId>> {
        self.refresh_schedule(graph)?;
        self.run(graph, targets, ignored)
    }

    /// Rebuild if a rewrite discarded anything the schedule refers to.
    fn refresh_schedule(&mut self, graph: &Graph) -> Result<()> {
        let live = |id: &NodeId| graph.contains(*id);
        if self.roots.iter().all(live) && self.tracked.iter().all(live) {
            return Ok(());
        }
        self.drop_discarded(graph);
        self.rebuild(graph)
    }

    pub fn clear(&mut self) {
        self.roots.clear();
        self.tracked.clear();
        self.heights.clear();
        self.parents.clear();
        self.input_counts.clear();
    }

    pub fn get_tracked(&self) -> &[NodeId] {
        &self.roots
    }

    /// Tracked functors in recomputation order.
    pub fn schedule(&self) -> &[NodeId] {
        &self.tracked
    }

    pub fn height(&self, id: NodeId) -> Option<usize> {
        self.heights.get(&id).copied()
    }

    /// Tracked functors reading `id` directly.
    pub fn parents_of(&self, id: NodeId) -> Option<&FxHashSet<NodeId>> {
        self.parents.get(&id)
    }

    /// Number of functor children of a tracked functor.
    pub fn input_count(&self, id: NodeId) -> Option<usize> {
        self.input_counts.get(&id).copied()
    }

    fn run(&self, graph: &Graph, starts: &[NodeId], ignored: &[NodeId]) -> Result<Vec<NodeId>> {
        let ignored: FxHashSet<NodeId> = ignored.iter().copied().collect();
        let reached = reachable(graph, starts, &ignored)?;
        let mut updated = Vec::new();
        for &id in self.tracked.iter().filter(|id| reached.contains(id)) {
            trace!("updating {}", graph.describe(id));
            graph.recompute(id)?;
            updated.push(id);
        }
        debug!(
            "session update: {} of {} functors recomputed",
            updated.len(),
            self.tracked.len()
        );
        Ok(updated)
    }
}

/// Nodes reachable from `starts` without entering any node in `ignored`.
fn reachable(
    graph: &Graph,
    starts: &[NodeId],
    ignored: &FxHashSet<NodeId>,
) -> Result<FxHashSet<NodeId>> {
    let mut reached = FxHashSet::default();
    let mut stack: Vec<NodeId> = starts.to_vec();
    while let Some(id) = stack.pop() {
        if ignored.contains(&id) || !reached.insert(id) {
            continue;
        }
        stack.extend(graph.children(id)?);
    }
    Ok(reached)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::graph::{GraphConfig, Opcode, Shape};
    use crate::kernel::{CpuKernel, Kernel, KernelArg};

    /// Records the opcode of every computation before delegating.
    struct Recording {
        calls: Rc<RefCell<Vec<Opcode>>>,
    }

    impl Kernel for Recording {
        fn compute(
            &self,
            opcode: Opcode,
            out_shape: &Shape,
            args: &[KernelArg<'_>],
        ) -> Result<Vec<f64>> {
            self.calls.borrow_mut().push(opcode);
            CpuKernel.compute(opcode, out_shape, args)
        }
    }

    fn recording_graph() -> (Graph, Rc<RefCell<Vec<Opcode>>>) {
        let _ = env_logger::builder().is_test(true).try_init();
        let calls = Rc::new(RefCell::new(Vec::new()));
        let kernel = Recording {
            calls: Rc::clone(&calls),
        };
        let graph = Graph::with_kernel(Rc::new(kernel), GraphConfig::default().with_eager(false));
        (graph, calls)
    }

    /// leaf -> F1 (neg) -> F2 (exp) -> F3 (sin)
    fn chain(graph: &Graph) -> (NodeId, NodeId, NodeId, NodeId) {
        let s = Shape::new(&[2]).unwrap();
        let leaf = graph.variable(vec![0.5, 1.0], s, "x").unwrap();
        let f1 = graph.neg(leaf).unwrap();
        let f2 = graph.exp(f1).unwrap();
        let f3 = graph.sin(f2).unwrap();
        (leaf, f1, f2, f3)
    }

    #[test]
    fn test_update_children_first() {
        let (graph, calls) = recording_graph();
        let (_, f1, f2, f3) = chain(&graph);
        let mut session = Session::new();
        session.track(&graph, &[f3]).unwrap();
        assert_eq!(session.schedule(), &[f1, f2, f3]);

        let updated = session.update(&graph, &[]).unwrap();
        assert_eq!(updated, vec![f1, f2, f3]);
        assert_eq!(*calls.borrow(), vec![Opcode::Neg, Opcode::Exp, Opcode::Sin]);
        let expected = (-0.5f64).exp().sin();
        approx::assert_relative_eq!(graph.data(f3).unwrap()[0], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_ignored_prunes_branch() {
        let (graph, calls) = recording_graph();
        let (_, f1, f2, f3) = chain(&graph);
        let mut session = Session::new();
        session.track(&graph, &[f3]).unwrap();
        session.update(&graph, &[]).unwrap();
        calls.borrow_mut().clear();

        let updated = session.update(&graph, &[f2]).unwrap();
        assert_eq!(updated, vec![f3]);
        assert_eq!(*calls.borrow(), vec![Opcode::Sin]);
        assert!(!updated.contains(&f1));
    }

    #[test]
    fn test_ignored_child_of_shared_descendant() {
        let (graph, _) = recording_graph();
        let s = Shape::new(&[2]).unwrap();
        let x = graph.variable(vec![1.0, 2.0], s, "x").unwrap();
        let shared = graph.square(x).unwrap();
        let left = graph.neg(shared).unwrap();
        let right = graph.exp(shared).unwrap();
        let root = graph.add(left, right).unwrap();
        let mut session = Session::new();
        session.track(&graph, &[root]).unwrap();
        session.update(&graph, &[]).unwrap();

        // `shared` is still reachable through `right`
        let updated = session.update(&graph, &[left]).unwrap();
        assert_eq!(updated, vec![shared, right, root]);
    }

    #[test]
    fn test_update_target_skips_unrelated_roots() {
        let (graph, _) = recording_graph();
        let (leaf, f1, f2, f3) = chain(&graph);
        let other = graph.cos(leaf).unwrap();
        let mut session = Session::new();
        session.track(&graph, &[f3]).unwrap();
        session.track(&graph, &[other]).unwrap();
        assert_eq!(session.get_tracked(), &[f3, other]);
        session.update(&graph, &[]).unwrap();

        let updated = session.update_target(&graph, &[f2], &[]).unwrap();
        assert_eq!(updated, vec![f1, f2]);
    }

    #[test]
    fn test_repeat_update_recomputes_again() {
        let (graph, calls) = recording_graph();
        let (leaf, _, _, f3) = chain(&graph);
        let mut session = Session::new();
        session.track(&graph, &[f3]).unwrap();
        let first = session.update(&graph, &[]).unwrap();
        let value = graph.data(f3).unwrap();
        let second = session.update(&graph, &[]).unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.borrow().len(), 6);
        assert_eq!(graph.data(f3).unwrap(), value);

        graph.assign(leaf, vec![0.0, 0.0]).unwrap();
        session.update(&graph, &[]).unwrap();
        approx::assert_relative_eq!(graph.data(f3).unwrap()[0], 1f64.sin(), epsilon = 1e-12);
    }

    #[test]
    fn test_bookkeeping_and_clear() {
        let (graph, _) = recording_graph();
        let (leaf, f1, f2, f3) = chain(&graph);
        let mut session = Session::new();
        session.track(&graph, &[f3]).unwrap();
        assert_eq!(session.height(f3), Some(3));
        assert_eq!(session.input_count(f1), Some(0));
        assert_eq!(session.input_count(f2), Some(1));
        assert!(session.parents_of(leaf).unwrap().contains(&f1));

        session.clear();
        assert!(session.get_tracked().is_empty());
        assert!(session.update(&graph, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_uncomputed_child_is_an_error() {
        let (graph, _) = recording_graph();
        let (_, _, f2, f3) = chain(&graph);
        let mut session = Session::new();
        session.track(&graph, &[f3]).unwrap();
        let err = session.update(&graph, &[f2]).unwrap_err();
        assert_eq!(err, GraphError::Uncomputed(f2));
    }

    /// x -> exp -> mul by one, which the optimizer collapses to the exp.
    fn collapsible(graph: &Graph) -> (NodeId, NodeId, NodeId) {
        let s = Shape::new(&[2]).unwrap();
        let x = graph.variable(vec![0.0, 1.0], s, "x").unwrap();
        let e = graph.exp(x).unwrap();
        let one = graph.ones(s).unwrap();
        let root = graph.mul(e, one).unwrap();
        (x, e, root)
    }

    #[test]
    fn test_retarget_after_optimize() {
        let (graph, calls) = recording_graph();
        let (x, e, root) = collapsible(&graph);
        let mut session = Session::new();
        session.track(&graph, &[root]).unwrap();

        let optimized = crate::opt::optimize(&graph, &[root]).unwrap();
        assert_eq!(optimized, vec![e]);
        assert!(!graph.contains(root));

        session.retarget(&graph, root, optimized[0]).unwrap();
        assert_eq!(session.get_tracked(), &[e]);
        let updated = session.update(&graph, &[]).unwrap();
        assert_eq!(updated, vec![e]);
        assert_eq!(*calls.borrow(), vec![Opcode::Exp]);
        assert_eq!(session.parents_of(x).map(|p| p.len()), Some(1));
        approx::assert_relative_eq!(graph.data(e).unwrap()[1], 1f64.exp(), epsilon = 1e-12);
    }

    #[test]
    fn test_discarded_roots_are_dropped() {
        let (graph, _) = recording_graph();
        let (x, _, root) = collapsible(&graph);
        let other = graph.neg(x).unwrap();
        let mut session = Session::new();
        session.track(&graph, &[root]).unwrap();
        crate::opt::optimize(&graph, &[root]).unwrap();

        session.track(&graph, &[other]).unwrap();
        assert_eq!(session.get_tracked(), &[other]);
        assert_eq!(session.update(&graph, &[]).unwrap(), vec![other]);
    }

    #[test]
    fn test_update_after_optimize_without_track() {
        let (graph, _) = recording_graph();
        let (_, _, root) = collapsible(&graph);
        let mut session = Session::new();
        session.track(&graph, &[root]).unwrap();
        crate::opt::optimize(&graph, &[root]).unwrap();

        assert!(session.update(&graph, &[]).unwrap().is_empty());
        assert!(session.get_tracked().is_empty());
        assert!(session.schedule().is_empty());
    }

    #[test]
    fn test_track_missing_node() {
        let (graph, _) = recording_graph();
        let mut session = Session::new();
        assert!(session.track(&graph, &[NodeId(42)]).is_err());
    }
}
