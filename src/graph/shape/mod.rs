//! Shapes and affine coordinate transforms.
//!
//! A [`Shape`] is a fixed-rank dimension vector. A [`CoordMap`] is an affine
//! map over homogeneous coordinates; edges carry one as a *shaper* (how the
//! child's shape turns into the argument's shape) and optionally one as a
//! *coorder* (how element indices move between child and argument).

pub mod coord;
pub mod dims;

pub use coord::{
    CoordMap, MAT_DIM, Matrix, Transform, extend, flip, pad, permute, reduce, reduce_dims, reshape,
    slice,
};
pub use dims::{RANK_CAP, Shape};
