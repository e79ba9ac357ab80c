use log::debug;
use rustc_hash::{FxHashMap, FxHashSet};

use super::chain::chain_rule;
use super::grad_fn::local_derivative;
use crate::error::Result;
use crate::graph::{Edge, Graph, NodeId, NodeKind, Shape, traversal};

/// For every functor under `root` through which `target` is reachable, the
/// argument indices leading to it.
///
/// Placeholders are treated as leaves: gradients do not flow through
/// bindings.
pub fn find_paths(
    graph: &Graph,
    root: NodeId,
    target: NodeId,
) -> Result<FxHashMap<NodeId, Vec<usize>>> {
    let order = traversal::post_order(&[root], |id| {
        if id == target {
            Ok(Vec::new())
        } else {
            edge_children(graph, id)
        }
    })?;

    let mut reaching = FxHashSet::default();
    let mut paths = FxHashMap::default();
    for id in order {
        if id == target {
            reaching.insert(id);
            continue;
        }
        let indices: Vec<usize> = edge_children(graph, id)?
            .iter()
            .enumerate()
            .filter(|(_, child)| reaching.contains(*child))
            .map(|(i, _)| i)
            .collect();
        if !indices.is_empty() {
            reaching.insert(id);
            paths.insert(id, indices);
        }
    }
    Ok(paths)
}

/// Children along functor edges only; leaves, bound placeholders included,
/// have none.
fn edge_children(graph: &Graph, id: NodeId) -> Result<Vec<NodeId>> {
    graph.with_node(id, |n| match &n.kind {
        NodeKind::Functor(f) => f.edges.iter().map(Edge::child).collect(),
        NodeKind::Leaf(_) => Vec::new(),
    })
}

/// Build ∂root/∂target as a new node.
///
/// A missing target yields a scalar zero, a missing root a zero shaped like
/// the target, and `root == target` a one shaped like the target.
pub fn derive(graph: &Graph, root: Option<NodeId>, target: Option<NodeId>) -> Result<NodeId> {
    let Some(target) = target else {
        return graph.zeros(Shape::scalar());
    };
    let target_shape = graph.shape(target)?;
    let Some(root) = root else {
        return graph.zeros(target_shape);
    };
    if root == target {
        return graph.ones(target_shape);
    }

    let paths = find_paths(graph, root, target)?;
    if paths.is_empty() {
        debug!("{} does not depend on {}", root, target);
        return graph.zeros(target_shape);
    }

    let heights = traversal::heights(graph, &[root])?;
    let mut order: Vec<NodeId> = paths.keys().copied().collect();
    order.sort_by(|a, b| {
        let (ha, hb) = (heights.get(a), heights.get(b));
        hb.cmp(&ha).then(b.cmp(a))
    });
    debug!(
        "deriving {} wrt {} through {} functors",
        graph.describe(root),
        graph.describe(target),
        order.len()
    );

    let mut grads: FxHashMap<NodeId, Vec<NodeId>> = FxHashMap::default();
    grads.insert(root, vec![graph.ones(graph.shape(root)?)?]);

    for op in order {
        let Some(contributions) = grads.remove(&op) else {
            continue;
        };
        let supgrad = sum_pairwise(graph, contributions)?;
        let args: Vec<NodeId> = graph.edges(op)?.iter().map(Edge::child).collect();
        for &idx in &paths[&op] {
            let local = local_derivative(graph, op, idx)?;
            let step = chain_rule(graph, op, local, supgrad, idx)?;
            grads.entry(args[idx]).or_default().push(step);
        }
    }

    match grads.remove(&target) {
        Some(contributions) if !contributions.is_empty() => sum_pairwise(graph, contributions),
        _ => graph.zeros(target_shape),
    }
}

/// Sum nodes by adding neighbours until one remains.
fn sum_pairwise(graph: &Graph, mut nodes: Vec<NodeId>) -> Result<NodeId> {
    while nodes.len() > 1 {
        let mut next = Vec::with_capacity(nodes.len().div_ceil(2));
        for pair in nodes.chunks(2) {
            match pair {
                [a, b] => next.push(graph.add(*a, *b)?),
                [a] => next.push(*a),
                _ => {}
            }
        }
        nodes = next;
    }
    nodes
        .pop()
        .map_or_else(|| graph.zeros(Shape::scalar()), Ok)
}
