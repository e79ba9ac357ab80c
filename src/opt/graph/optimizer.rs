use log::{debug, info, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use super::{GraphRewriter, OptimizationConfig, Rewrite, default_rules};
use crate::error::Result;
use crate::graph::{Graph, NodeId, traversal};

/// Runs rewriters to a fixed point over the subgraph under a set of roots.
pub struct GraphOptimizer {
    rules: Vec<Box<dyn GraphRewriter>>,
    config: OptimizationConfig,
}

impl Default for GraphOptimizer {
    fn default() -> Self {
        Self::new(OptimizationConfig::default())
    }
}

impl GraphOptimizer {
    /// Optimizer with [`default_rules`].
    pub fn new(config: OptimizationConfig) -> Self {
        Self::with_rules(default_rules(), config)
    }

    pub fn with_rules(rules: Vec<Box<dyn GraphRewriter>>, config: OptimizationConfig) -> Self {
        Self { rules, config }
    }

    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }

    /// Rewrite the graph under `roots` and return the roots after
    /// replacement, in the same order.
    ///
    /// Replaced nodes are removed from the graph; every live node that read
    /// one is retargeted, whether or not it lies under `roots`.
    pub fn optimize(&mut self, graph: &Graph, roots: &[NodeId]) -> Result<Vec<NodeId>> {
        let mut roots = roots.to_vec();
        let before = traversal::count_nodes(graph, &roots)?;
        for iteration in 0..self.config.max_iterations {
            let mut rewrites = 0;
            for rule in self.rules.iter_mut() {
                rewrites += sweep(graph, rule.as_mut(), &mut roots)?;
            }
            debug!("rewrite iteration {}: {} replacements", iteration, rewrites);
            if rewrites == 0 {
                break;
            }
        }
        info!(
            "optimized graph from {} to {} nodes",
            before,
            traversal::count_nodes(graph, &roots)?
        );
        Ok(roots)
    }
}

/// Optimize with the default rules and configuration.
pub fn optimize(graph: &Graph, roots: &[NodeId]) -> Result<Vec<NodeId>> {
    GraphOptimizer::default().optimize(graph, roots)
}

/// Offer every node under `roots` to `rule` once, children first.
fn sweep(graph: &Graph, rule: &mut dyn GraphRewriter, roots: &mut [NodeId]) -> Result<usize> {
    rule.reset();
    let heights = traversal::heights(graph, roots)?;
    let mut order: Vec<NodeId> = heights.keys().copied().collect();
    order.sort_by_key(|id| (heights[id], *id));
    let mut parents = traversal::parents(graph, &graph.node_ids())?;

    let mut rewrites = 0;
    for id in order {
        if !graph.contains(id) {
            continue;
        }
        let Rewrite::Replace(new) = rule.rewrite(graph, id)? else {
            continue;
        };
        if new == id {
            continue;
        }
        trace!(
            "{}: {} -> {}",
            rule.name(),
            graph.describe(id),
            graph.describe(new)
        );
        replace(graph, &mut parents, roots, id, new)?;
        rewrites += 1;
    }
    Ok(rewrites)
}

fn replace(
    graph: &Graph,
    parents: &mut FxHashMap<NodeId, FxHashSet<NodeId>>,
    roots: &mut [NodeId],
    old: NodeId,
    new: NodeId,
) -> Result<()> {
    for child in graph.children(new)? {
        parents.entry(child).or_default().insert(new);
    }
    let old_parents = parents.remove(&old).unwrap_or_default();
    for &parent in &old_parents {
        if graph.contains(parent) {
            graph.retarget(parent, old, new)?;
        }
    }
    parents.entry(new).or_default().extend(old_parents);
    for root in roots.iter_mut().filter(|r| **r == old) {
        *root = new;
    }
    graph.discard(old);
    Ok(())
}
