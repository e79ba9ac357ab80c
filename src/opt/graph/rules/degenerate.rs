use crate::error::Result;
use crate::graph::{Edge, Graph, NodeId, Opcode, RANK_CAP};
use crate::opt::graph::{GraphRewriter, Rewrite};

/// Removes reductions and transforms that leave their argument unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct DegenerateRule;

impl GraphRewriter for DegenerateRule {
    fn name(&self) -> &'static str {
        "degenerate"
    }

    fn rewrite(&mut self, graph: &Graph, node: NodeId) -> Result<Rewrite> {
        let Some(opcode) = graph.opcode(node)? else {
            return Ok(Rewrite::Unchanged);
        };
        let edges = graph.edges(node)?;
        let Some(edge) = edges.first() else {
            return Ok(Rewrite::Unchanged);
        };
        let arg_shape = graph.shape(edge.child())?;
        if arg_shape != graph.shape(node)? {
            return Ok(Rewrite::Unchanged);
        }

        let degenerate = match opcode {
            Opcode::ReduceSum
            | Opcode::ReduceProd
            | Opcode::ReduceMax
            | Opcode::ReduceMin
            | Opcode::Extend
            | Opcode::Slice
            | Opcode::Pad
            | Opcode::Reshape => true,
            Opcode::Permute => moves_only_units(edge, graph)?,
            Opcode::Flip => flips_only_units(edge, graph)?,
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
            | Opcode::SigmoidGrad
            | Opcode::Sub
            | Opcode::Div
            | Opcode::Pow
            | Opcode::Eq
            | Opcode::Neq
            | Opcode::Gt
            | Opcode::Lt
            | Opcode::Add
            | Opcode::Mul
            | Opcode::Max
            | Opcode::Min
            | Opcode::Select
            | Opcode::Matmul => false,
            // argmax over unit dimensions yields zeros, not its argument
            Opcode::Argmax | Opcode::Concat => false,
        };
        Ok(if degenerate {
            Rewrite::Replace(edge.child())
        } else {
            Rewrite::Unchanged
        })
    }
}

/// Every dimension the permutation moves has size 1.
fn moves_only_units(edge: &Edge, graph: &Graph) -> Result<bool> {
    let shape = graph.shape(edge.child())?;
    let Some(order) = edge.shaper().permutation() else {
        return Ok(false);
    };
    Ok(order
        .iter()
        .enumerate()
        .all(|(dst, &src)| src == dst || shape.at(src) == 1))
}

/// Every dimension the coorder mirrors has size 1.
fn flips_only_units(edge: &Edge, graph: &Graph) -> Result<bool> {
    let shape = graph.shape(edge.child())?;
    let Some(coorder) = edge.coorder() else {
        return Ok(true);
    };
    Ok((0..RANK_CAP).all(|d| coorder.at(d, d) >= 0.0 || shape.at(d) == 1))
}
