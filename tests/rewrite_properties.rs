mod common;

use common::{setup_logger, shape, vec_approx_eq};
use proptest::prelude::*;
use proptest::sample::Index;
use teqgraph::graph::traversal::canonical_form;
use teqgraph::opt::graph::{AlgebraicRule, DedupRule, DegenerateRule};
use teqgraph::prelude::*;

#[derive(Debug, Clone, Copy)]
enum Step {
    Add,
    Mul,
    Sub,
    Neg,
    Sum,
}

/// One step of a random expression: an operation over two earlier nodes.
type Recipe = Vec<(Step, Index, Index)>;

fn recipe() -> impl Strategy<Value = Recipe> {
    let step = prop_oneof![
        Just(Step::Add),
        Just(Step::Mul),
        Just(Step::Sub),
        Just(Step::Neg),
        Just(Step::Sum),
    ];
    prop::collection::vec((step, any::<Index>(), any::<Index>()), 1..10)
}

/// Build the expression described by `recipe` and return its root.
fn build(graph: &Graph, recipe: &Recipe) -> NodeId {
    let s = shape(&[2, 1]);
    let mut pool = vec![
        graph.variable(vec![0.5, -1.5], s, "a").unwrap(),
        graph.variable(vec![2.0, 3.0], s, "b").unwrap(),
        graph.zeros(s).unwrap(),
        graph.ones(s).unwrap(),
        graph.scalar_constant(2.0, s).unwrap(),
    ];
    for (step, lhs, rhs) in recipe {
        let x = pool[lhs.index(pool.len())];
        let y = pool[rhs.index(pool.len())];
        let node = match step {
            Step::Add => graph.add(x, y),
            Step::Mul => graph.mul(x, y),
            Step::Sub => graph.sub(x, y),
            Step::Neg => graph.neg(x),
            // sums over the unit dimension keep the shape
            Step::Sum => graph.reduce_sum(x, &[1]),
        };
        pool.push(node.unwrap());
    }
    pool[pool.len() - 1]
}

fn rules(order: &[usize]) -> Vec<Box<dyn GraphRewriter>> {
    order
        .iter()
        .map(|&i| -> Box<dyn GraphRewriter> {
            match i {
                0 => Box::new(AlgebraicRule),
                1 => Box::new(DegenerateRule),
                _ => Box::new(DedupRule::default()),
            }
        })
        .collect()
}

fn optimized_form(recipe: &Recipe, order: &[usize]) -> String {
    let graph = Graph::new();
    let root = build(&graph, recipe);
    let mut optimizer = GraphOptimizer::with_rules(rules(order), OptimizationConfig::default());
    let roots = optimizer.optimize(&graph, &[root]).unwrap();
    canonical_form(&graph, roots[0]).unwrap()
}

const ORDERS: [[usize; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

proptest! {
    #[test]
    fn prop_rule_order_is_irrelevant(recipe in recipe()) {
        setup_logger();
        let reference = optimized_form(&recipe, &ORDERS[0]);
        for order in &ORDERS[1..] {
            prop_assert_eq!(&optimized_form(&recipe, order), &reference);
        }
    }

    #[test]
    fn prop_optimization_is_idempotent(recipe in recipe()) {
        setup_logger();
        let graph = Graph::new();
        let root = build(&graph, &recipe);
        let once = optimize(&graph, &[root]).unwrap();
        let form = canonical_form(&graph, once[0]).unwrap();
        let count = teqgraph::graph::traversal::count_nodes(&graph, &once).unwrap();

        let twice = optimize(&graph, &once).unwrap();
        prop_assert_eq!(&twice, &once);
        prop_assert_eq!(canonical_form(&graph, twice[0]).unwrap(), form);
        prop_assert_eq!(
            teqgraph::graph::traversal::count_nodes(&graph, &twice).unwrap(),
            count
        );
    }

    #[test]
    fn prop_optimization_preserves_values(recipe in recipe()) {
        setup_logger();
        let graph = Graph::new();
        let root = build(&graph, &recipe);
        let before = graph.data(root).unwrap().to_vec();
        let roots = optimize(&graph, &[root]).unwrap();
        let after = graph.data(roots[0]).unwrap().to_vec();
        prop_assert!(vec_approx_eq(&before, &after), "{:?} != {:?}", before, after);
    }
}

#[test]
fn test_pruning_reaches_leaf() {
    setup_logger();
    let graph = Graph::new();
    let s = shape(&[2, 1]);
    let a = graph.variable(vec![1.0, 2.0], s, "a").unwrap();
    let zero = graph.zeros(s).unwrap();
    let one = graph.ones(s).unwrap();
    let scaled = graph.mul(a, one).unwrap();
    let shifted = graph.add(scaled, zero).unwrap();
    let root = graph.sub(shifted, zero).unwrap();

    let roots = optimize(&graph, &[root]).unwrap();
    assert_eq!(roots, vec![a]);
    assert!(!graph.contains(root));
}
