//! Chain rule per opcode.
//!
//! Combines a local derivative with the upstream gradient `supgrad` (shaped
//! like the functor's output) and moves the result back into the shape of
//! argument `idx`.

use std::rc::Rc;

use log::trace;

use super::grad_fn::{expect_shape, first_edge, spread};
use crate::error::{GraphError, Result};
use crate::graph::{CoordMap, Graph, NodeId, Opcode, RANK_CAP, Transform};

pub fn chain_rule(
    graph: &Graph,
    op: NodeId,
    local: NodeId,
    supgrad: NodeId,
    idx: usize,
) -> Result<NodeId> {
    let opcode = graph.opcode(op)?.ok_or(GraphError::NotFunctor(op))?;
    trace!("chain {} arg {}: local {}", graph.describe(op), idx, graph.describe(local));
    let step = match opcode {
        Opcode::Abs
        | Opcode::Neg
        | Opcode::Sin
        | Opcode::Cos
        | Opcode::Tan
        | Opcode::Exp
        | Opcode::Log
        | Opcode::Sqrt
        | Opcode::Square
        | Opcode::Cube
        | Opcode::Round
        | Opcode::Sigmoid
        | Opcode::Tanh
        | Opcode::Sub
        | Opcode::Div
        | Opcode::Pow
        | Opcode::Eq
        | Opcode::Neq
        | Opcode::Gt
        | Opcode::Lt
        | Opcode::Select
        | Opcode::Add
        | Opcode::Mul
        | Opcode::Max
        | Opcode::Min => graph.mul(local, supgrad)?,
        Opcode::SigmoidGrad => return Err(GraphError::NotDifferentiable(opcode)),

        Opcode::ReduceSum | Opcode::ReduceProd | Opcode::ReduceMax | Opcode::ReduceMin => {
            let spread = spread(graph, op, supgrad)?;
            graph.mul(local, spread)?
        }
        Opcode::Argmax => return Err(GraphError::NotDifferentiable(opcode)),
        Opcode::Extend => {
            let edge = first_edge(graph, op)?;
            let transform = Transform {
                shaper: Rc::new(edge.shaper().reverse()?),
                coorder: edge.coorder().cloned(),
            };
            let summed = graph.apply_transform(Opcode::ReduceSum, supgrad, transform)?;
            graph.mul(local, summed)?
        }
        Opcode::Permute => {
            let edge = first_edge(graph, op)?;
            let shaper = edge.shaper();
            debug_assert!(shaper.is_bijective(), "permute shaper must be bijective");
            let transform = Transform {
                shaper: Rc::new(shaper.inverse()?),
                coorder: Some(Rc::clone(shaper)),
            };
            let back = graph.apply_transform(Opcode::Permute, supgrad, transform)?;
            graph.mul(local, back)?
        }
        Opcode::Slice => {
            let edge = first_edge(graph, op)?;
            let (child, out) = (graph.shape(edge.child())?, graph.shape(op)?);
            let offsets = offsets(edge.coorder().map(|c| c.as_ref()), 1.0);
            let amounts: Vec<(usize, usize)> = (0..RANK_CAP)
                .map(|d| (offsets[d], child.at(d) - offsets[d] - out.at(d)))
                .collect();
            let padded = graph.pad(supgrad, &amounts)?;
            graph.mul(local, padded)?
        }
        Opcode::Pad | Opcode::Concat => {
            let edge = graph
                .edges(op)?
                .into_iter()
                .nth(idx)
                .ok_or(GraphError::NotFunctor(op))?;
            let child = graph.shape(edge.child())?;
            let before = offsets(edge.coorder().map(|c| c.as_ref()), -1.0);
            let cropped = graph.slice(supgrad, &before, child.dims())?;
            graph.mul(local, cropped)?
        }
        Opcode::Flip => {
            let edge = first_edge(graph, op)?;
            let transform = Transform {
                shaper: Rc::new(CoordMap::identity()),
                coorder: edge.coorder().cloned(),
            };
            let back = graph.apply_transform(Opcode::Flip, supgrad, transform)?;
            graph.mul(local, back)?
        }
        Opcode::Reshape => {
            let child = graph.shape(first_edge(graph, op)?.child())?;
            let back = graph.reshape(supgrad, child)?;
            graph.mul(local, back)?
        }
        Opcode::Matmul => {
            let lhs = graph.edges(op)?[0].child();
            let common = graph.shape(lhs)?.at(0);
            let extended = graph.extend(supgrad, 2, &[common])?;
            let prod = graph.mul(local, extended)?;
            let order: &[usize] = if idx == 0 { &[2, 1, 0] } else { &[0, 2, 1] };
            let permuted = graph.permute(prod, order)?;
            graph.reduce_sum_from(permuted, 2)?
        }
    };
    let arg = graph
        .edges(op)?
        .get(idx)
        .map(|e| e.child())
        .ok_or(GraphError::NotFunctor(op))?;
    expect_shape(graph, step, arg)?;
    Ok(step)
}

/// Translation of a coorder per dimension, scaled by `sign`.
fn offsets(coorder: Option<&CoordMap>, sign: f64) -> Vec<usize> {
    (0..RANK_CAP)
        .map(|d| coorder.map_or(0.0, |c| sign * c.translation(d)).round().max(0.0) as usize)
        .collect()
}
