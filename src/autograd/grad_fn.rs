//! Local derivatives.
//!
//! `local_derivative(op, i)` is the symbolic ∂op/∂args[i], shaped like the
//! argument. It is built only from `op`, its arguments and fresh constants;
//! the upstream gradient is combined later by the chain rule.

use std::rc::Rc;

use crate::error::{GraphError, Result};
use crate::graph::{Edge, Graph, NodeId, Opcode, Transform};

pub fn local_derivative(graph: &Graph, op: NodeId, idx: usize) -> Result<NodeId> {
    let opcode = graph.opcode(op)?.ok_or(GraphError::NotFunctor(op))?;
    let args: Vec<NodeId> = graph.edges(op)?.iter().map(Edge::child).collect();
    let x = *args.get(idx).ok_or(GraphError::Arity {
        opcode,
        expected: idx + 1,
        actual: args.len(),
    })?;
    let shape = graph.shape(x)?;
    let constant = |value: f64| graph.scalar_constant(value, shape);

    match opcode {
        Opcode::Abs => graph.div(x, op),
        Opcode::Neg => constant(-1.0),
        Opcode::Sin => graph.cos(x),
        Opcode::Cos => {
            let sin = graph.sin(x)?;
            graph.neg(sin)
        }
        Opcode::Tan => {
            let cos = graph.cos(x)?;
            let sec2 = graph.square(cos)?;
            graph.div(constant(1.0)?, sec2)
        }
        Opcode::Exp => Ok(op),
        Opcode::Log => graph.div(constant(1.0)?, x),
        Opcode::Sqrt => {
            let twice = graph.mul(constant(2.0)?, op)?;
            graph.div(constant(1.0)?, twice)
        }
        Opcode::Square => graph.mul(constant(2.0)?, x),
        Opcode::Cube => {
            let sq = graph.square(x)?;
            graph.mul(constant(3.0)?, sq)
        }
        Opcode::Round => constant(1.0),
        Opcode::Sigmoid => graph.sigmoid_grad(x),
        Opcode::Tanh => {
            let sq = graph.square(op)?;
            graph.sub(constant(1.0)?, sq)
        }
        Opcode::SigmoidGrad => Err(GraphError::NotDifferentiable(opcode)),

        Opcode::Sub => constant(if idx == 0 { 1.0 } else { -1.0 }),
        Opcode::Div => {
            let (a, b) = (args[0], args[1]);
            if idx == 0 {
                graph.div(constant(1.0)?, b)
            } else {
                // -a / b / b
                let neg = graph.neg(a)?;
                let once = graph.div(neg, b)?;
                graph.div(once, b)
            }
        }
        Opcode::Pow => {
            let (a, b) = (args[0], args[1]);
            if idx == 0 {
                let reduced = graph.sub(b, constant(1.0)?)?;
                let power = graph.pow(a, reduced)?;
                graph.mul(b, power)
            } else {
                let ln = graph.log(a)?;
                graph.mul(ln, op)
            }
        }
        Opcode::Eq | Opcode::Neq | Opcode::Gt | Opcode::Lt => constant(0.0),
        Opcode::Select => match idx {
            0 => constant(0.0),
            1 => graph.select(args[0], constant(1.0)?, constant(0.0)?),
            _ => graph.select(args[0], constant(0.0)?, constant(1.0)?),
        },

        Opcode::Add => constant(1.0),
        Opcode::Mul => {
            let others: Vec<NodeId> = args
                .iter()
                .enumerate()
                .filter(|&(j, _)| j != idx)
                .map(|(_, &a)| a)
                .collect();
            graph.mul_n(&others)
        }
        Opcode::Max | Opcode::Min => graph.eq(op, x),

        Opcode::ReduceSum => constant(1.0),
        Opcode::ReduceProd => {
            let spread = spread_to_child(graph, op)?;
            graph.div(spread, x)
        }
        Opcode::ReduceMax | Opcode::ReduceMin => {
            let spread = spread_to_child(graph, op)?;
            graph.eq(spread, x)
        }
        Opcode::Argmax => Err(GraphError::NotDifferentiable(opcode)),

        Opcode::Extend
        | Opcode::Permute
        | Opcode::Slice
        | Opcode::Pad
        | Opcode::Flip
        | Opcode::Reshape
        | Opcode::Concat => constant(1.0),

        Opcode::Matmul => {
            let (a, b) = (args[0], args[1]);
            let (a_shape, b_shape) = (graph.shape(a)?, graph.shape(b)?);
            if idx == 0 {
                let ext = graph.extend(b, 2, &[a_shape.at(1)])?;
                graph.permute(ext, &[0, 2, 1])
            } else {
                let ext = graph.extend(a, 2, &[b_shape.at(0)])?;
                graph.permute(ext, &[2, 1, 0])
            }
        }
    }
}

/// Broadcast `node`, the output of a single-edge reduction, back to the shape
/// of the reduced child by reversing the reduction edge.
pub(crate) fn spread_to_child(graph: &Graph, reduction: NodeId) -> Result<NodeId> {
    spread(graph, reduction, reduction)
}

/// Broadcast `node`, shaped like `reduction`'s output, back to the shape of
/// its child.
pub(crate) fn spread(graph: &Graph, reduction: NodeId, node: NodeId) -> Result<NodeId> {
    let edge = first_edge(graph, reduction)?;
    let transform = Transform {
        shaper: Rc::new(edge.shaper().reverse()?),
        coorder: edge.coorder().cloned(),
    };
    let out = graph.apply_transform(Opcode::Extend, node, transform)?;
    expect_shape(graph, out, edge.child())?;
    Ok(out)
}

pub(crate) fn first_edge(graph: &Graph, op: NodeId) -> Result<Edge> {
    graph
        .edges(op)?
        .into_iter()
        .next()
        .ok_or(GraphError::NotFunctor(op))
}

pub(crate) fn expect_shape(graph: &Graph, node: NodeId, like: NodeId) -> Result<()> {
    let (expected, actual) = (graph.shape(like)?, graph.shape(node)?);
    if expected != actual {
        return Err(GraphError::ShapeMismatch { expected, actual });
    }
    Ok(())
}
