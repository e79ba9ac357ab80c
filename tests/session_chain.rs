mod common;

use common::{setup_logger, shape, vec_approx_eq};
use teqgraph::prelude::*;

#[test]
fn test_session_refreshes_after_assignment() {
    setup_logger();
    let graph = Graph::with_config(GraphConfig::default().with_eager(false));
    let x = graph.variable(vec![1.0, 2.0, 3.0], shape(&[3]), "x").unwrap();
    let w = graph.variable(vec![0.5, 0.5, 0.5], shape(&[3]), "w").unwrap();
    let prod = graph.mul(x, w).unwrap();
    let loss = graph.reduce_sum(prod, &[0]).unwrap();
    let grad = graph.gradient(loss, w).unwrap();

    let mut session = Session::new();
    session.track(&graph, &[loss, grad]).unwrap();
    let first = session.update(&graph, &[]).unwrap();
    assert!(first.contains(&loss));
    assert_eq!(graph.cache_state(loss).unwrap(), CacheState::Cached);
    assert!(vec_approx_eq(&graph.data(loss).unwrap(), &[3.0]));
    assert!(vec_approx_eq(&graph.data(grad).unwrap(), &[1.0, 2.0, 3.0]));

    graph.assign(x, vec![2.0, 2.0, 2.0]).unwrap();
    assert_eq!(graph.cache_state(loss).unwrap(), CacheState::Stale);

    // only the loss term
    let partial = session.update_target(&graph, &[loss], &[]).unwrap();
    assert_eq!(partial.last(), Some(&loss));
    assert!(vec_approx_eq(&graph.data(loss).unwrap(), &[3.0]));
    assert_eq!(graph.cache_state(grad).unwrap(), CacheState::Stale);

    session.update(&graph, &[]).unwrap();
    assert_eq!(graph.cache_state(grad).unwrap(), CacheState::Cached);
    assert!(vec_approx_eq(&graph.data(grad).unwrap(), &[2.0, 2.0, 2.0]));
}

#[test]
fn test_session_over_placeholder() {
    setup_logger();
    let graph = Graph::new();
    let x = graph.variable(vec![1.0, 4.0], shape(&[2]), "x").unwrap();
    let inner = graph.sqrt(x).unwrap();
    let slot = graph.placeholder(shape(&[2]), "slot").unwrap();
    graph.bind(slot, inner).unwrap();
    let out = graph.neg(slot).unwrap();

    let mut session = Session::new();
    session.track(&graph, &[out]).unwrap();
    let updated = session.update(&graph, &[]).unwrap();
    assert_eq!(updated, vec![inner, out]);
    assert!(vec_approx_eq(&graph.data(out).unwrap(), &[-1.0, -2.0]));

    graph.assign(x, vec![9.0, 16.0]).unwrap();
    session.update(&graph, &[]).unwrap();
    assert!(vec_approx_eq(&graph.data(out).unwrap(), &[-3.0, -4.0]));
}
