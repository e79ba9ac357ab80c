//! Shared helpers for integration tests

#![allow(dead_code)]

use teqgraph::prelude::*;

pub const EPSILON: f64 = 1e-9;

pub fn setup_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn shape(dims: &[usize]) -> Shape {
    Shape::new(dims).unwrap()
}

pub fn vec_approx_eq(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| approx::relative_eq!(*x, *y, epsilon = EPSILON))
}
