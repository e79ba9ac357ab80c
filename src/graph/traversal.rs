//! Graph traversal utilities.
//!
//! Parent relations are never stored on nodes; functions here rebuild them
//! (and heights) for whatever set of roots a caller is working from. Every
//! walk keeps its own stack, so graph depth is bounded by memory only.

use rustc_hash::{FxHashMap, FxHashSet};

use super::{Graph, NodeId, NodeKind, Usage};
use crate::error::{GraphError, Result};

/// Depth-first post-order over `children`, starting from `roots` in order.
///
/// Each node appears once, after everything `children` returned for it.
pub(crate) fn post_order<F>(roots: &[NodeId], mut children: F) -> Result<Vec<NodeId>>
where
    F: FnMut(NodeId) -> Result<Vec<NodeId>>,
{
    let mut visited = FxHashSet::default();
    let mut order = Vec::new();
    // (node, children already pushed)
    let mut stack: Vec<(NodeId, bool)> = roots.iter().rev().map(|&r| (r, false)).collect();
    while let Some((id, expanded)) = stack.pop() {
        if expanded {
            order.push(id);
            continue;
        }
        if !visited.insert(id) {
            continue;
        }
        stack.push((id, true));
        for child in children(id)?.into_iter().rev() {
            if !visited.contains(&child) {
                stack.push((child, false));
            }
        }
    }
    Ok(order)
}

/// Every node reachable from `roots`, children before parents.
pub fn topological_sort(graph: &Graph, roots: &[NodeId]) -> Result<Vec<NodeId>> {
    post_order(roots, |id| graph.children(id))
}

/// Longest distance from each reachable node to a leaf.
pub fn heights(graph: &Graph, roots: &[NodeId]) -> Result<FxHashMap<NodeId, usize>> {
    let mut heights = FxHashMap::default();
    for id in topological_sort(graph, roots)? {
        let height = graph
            .children(id)?
            .iter()
            .map(|c| heights.get(c).copied().unwrap_or(0) + 1)
            .max()
            .unwrap_or(0);
        heights.insert(id, height);
    }
    Ok(heights)
}

/// Immediate parents of every node reachable from `roots`.
pub fn parents(graph: &Graph, roots: &[NodeId]) -> Result<FxHashMap<NodeId, FxHashSet<NodeId>>> {
    let mut parents: FxHashMap<NodeId, FxHashSet<NodeId>> = FxHashMap::default();
    for id in topological_sort(graph, roots)? {
        parents.entry(id).or_default();
        for child in graph.children(id)? {
            parents.entry(child).or_default().insert(id);
        }
    }
    Ok(parents)
}

/// Whether `to` is `from` or lies in its subgraph.
pub fn reaches(graph: &Graph, from: NodeId, to: NodeId) -> Result<bool> {
    let mut stack = vec![from];
    let mut visited = FxHashSet::default();
    while let Some(id) = stack.pop() {
        if id == to {
            return Ok(true);
        }
        if visited.insert(id) {
            stack.extend(graph.children(id)?);
        }
    }
    Ok(false)
}

pub fn count_nodes(graph: &Graph, roots: &[NodeId]) -> Result<usize> {
    Ok(topological_sort(graph, roots)?.len())
}

/// Structural description of the subgraph under `id`.
///
/// Two subgraphs print the same when they would compute the same thing:
/// immutable leaves print by content, other leaves by label, and the
/// arguments of commutative opcodes are sorted.
pub fn canonical_form(graph: &Graph, id: NodeId) -> Result<String> {
    let mut memo: FxHashMap<NodeId, String> = FxHashMap::default();
    for n in topological_sort(graph, &[id])? {
        let rendered = render(graph, n, &memo)?;
        memo.insert(n, rendered);
    }
    memo.remove(&id).ok_or(GraphError::NodeNotFound(id))
}

/// One node's form, given the forms of its children in `memo`.
fn render(graph: &Graph, id: NodeId, memo: &FxHashMap<NodeId, String>) -> Result<String> {
    let lookup = |child: NodeId| {
        memo.get(&child)
            .cloned()
            .ok_or(GraphError::NodeNotFound(child))
    };
    let node = graph.node(id)?;
    Ok(match &node.kind {
        NodeKind::Leaf(leaf) => match (leaf.usage, leaf.bound) {
            (_, Some(target)) => lookup(target)?,
            (Usage::Immutable, None) => {
                let data = leaf.data.as_deref().map_or(&[][..], |d| d.as_slice());
                match data.first() {
                    Some(first) if data.iter().all(|v| v == first) => {
                        format!("{}{}", first, node.shape)
                    }
                    _ => format!("const{}{:?}", node.shape, data),
                }
            }
            (_, None) => format!("{}{}", node.label, node.shape),
        },
        NodeKind::Functor(f) => {
            let mut args = Vec::with_capacity(f.edges.len());
            for edge in &f.edges {
                let mut arg = lookup(edge.child())?;
                if !edge.is_identity() {
                    arg = format!("{}->{}", arg, edge.shape());
                    if let Some(coorder) = edge.coorder() {
                        arg.push_str(&format!("{:?}", coorder.matrix()));
                    }
                }
                args.push(arg);
            }
            if f.opcode.is_commutative() {
                args.sort();
            }
            format!("{}({})", f.opcode, args.join(","))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Shape;

    fn diamond(graph: &Graph) -> (NodeId, NodeId, NodeId, NodeId) {
        let s = Shape::new(&[2]).unwrap();
        let x = graph.variable(vec![1.0, 2.0], s, "x").unwrap();
        let a = graph.neg(x).unwrap();
        let b = graph.exp(x).unwrap();
        let root = graph.add(a, b).unwrap();
        (x, a, b, root)
    }

    #[test]
    fn test_topological_children_first() {
        let graph = Graph::new();
        let (x, a, b, root) = diamond(&graph);
        let order = topological_sort(&graph, &[root]).unwrap();
        assert_eq!(order.len(), 4);
        let pos = |id| order.iter().position(|&o| o == id).unwrap();
        assert!(pos(x) < pos(a));
        assert!(pos(x) < pos(b));
        assert_eq!(order.last(), Some(&root));
    }

    #[test]
    fn test_heights_and_parents() {
        let graph = Graph::new();
        let (x, a, b, root) = diamond(&graph);
        let h = heights(&graph, &[root]).unwrap();
        assert_eq!(h[&x], 0);
        assert_eq!(h[&a], 1);
        assert_eq!(h[&root], 2);

        let p = parents(&graph, &[root]).unwrap();
        assert_eq!(p[&x].len(), 2);
        assert!(p[&a].contains(&root));
        assert!(p[&b].contains(&root));
        assert!(p[&root].is_empty());
    }

    #[test]
    fn test_reaches() {
        let graph = Graph::new();
        let (x, a, _, root) = diamond(&graph);
        assert!(reaches(&graph, root, x).unwrap());
        assert!(!reaches(&graph, a, root).unwrap());
        assert_eq!(count_nodes(&graph, &[root]).unwrap(), 4);
    }

    #[test]
    fn test_long_chain_walks() {
        let graph = Graph::with_config(crate::graph::GraphConfig::default().with_eager(false));
        let x = graph.variable(vec![1.0], Shape::new(&[1]).unwrap(), "x").unwrap();
        let mut y = x;
        for _ in 0..20_000 {
            y = graph.exp(y).unwrap();
        }
        let order = topological_sort(&graph, &[y]).unwrap();
        assert_eq!(order.len(), 20_001);
        assert_eq!(order.first(), Some(&x));
        assert_eq!(heights(&graph, &[y]).unwrap()[&y], 20_000);
        assert_eq!(parents(&graph, &[y]).unwrap()[&x].len(), 1);
    }

    #[test]
    fn test_canonical_form_of_long_chain() {
        let graph = Graph::new();
        let x = graph.variable(vec![1.0], Shape::new(&[1]).unwrap(), "x").unwrap();
        let mut y = x;
        for _ in 0..3_000 {
            y = graph.neg(y).unwrap();
        }
        let form = canonical_form(&graph, y).unwrap();
        assert!(form.starts_with("NEG(NEG("));
        assert_eq!(form.matches("NEG(").count(), 3_000);
    }

    #[test]
    fn test_canonical_form_ignores_commutative_order() {
        let graph = Graph::new();
        let s = Shape::new(&[2]).unwrap();
        let x = graph.variable(vec![1.0, 2.0], s, "x").unwrap();
        let y = graph.variable(vec![3.0, 4.0], s, "y").unwrap();
        let xy = graph.add(x, y).unwrap();
        let yx = graph.add(y, x).unwrap();
        assert_eq!(
            canonical_form(&graph, xy).unwrap(),
            canonical_form(&graph, yx).unwrap()
        );
        let d1 = graph.sub(x, y).unwrap();
        let d2 = graph.sub(y, x).unwrap();
        assert_ne!(
            canonical_form(&graph, d1).unwrap(),
            canonical_form(&graph, d2).unwrap()
        );
    }
}
