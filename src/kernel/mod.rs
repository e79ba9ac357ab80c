//! Boundary to the numeric library that evaluates functors.
//!
//! The graph calls [`Kernel::compute`] exactly once per functor
//! recomputation, handing over the child buffers together with the coorder
//! of each edge. [`CpuKernel`] is a straightforward reference
//! implementation.

pub mod cpu;

pub use cpu::CpuKernel;

use crate::error::Result;
use crate::graph::op::Opcode;
use crate::graph::shape::{CoordMap, Shape};

/// One argument as seen by a kernel.
#[derive(Debug, Clone, Copy)]
pub struct KernelArg<'a> {
    /// Child buffer, dimension 0 fastest.
    pub data: &'a [f64],
    /// Shape of the child.
    pub shape: Shape,
    /// Shape the edge contributes to the functor.
    pub arg_shape: Shape,
    /// Index map of the edge. Reductions map child coordinates to output
    /// coordinates; every other opcode maps output coordinates to the child
    /// coordinate they read.
    pub coorder: Option<&'a CoordMap>,
    pub map_io: bool,
}

pub trait Kernel {
    fn name(&self) -> &str {
        "kernel"
    }

    /// Produce the output buffer of `opcode` for `out_shape`.
    fn compute(&self, opcode: Opcode, out_shape: &Shape, args: &[KernelArg<'_>])
    -> Result<Vec<f64>>;
}
