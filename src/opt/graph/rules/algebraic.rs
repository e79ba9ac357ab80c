use crate::error::{GraphError, Result};
use crate::graph::{Edge, Graph, NodeId, Opcode};
use crate::opt::graph::{GraphRewriter, Rewrite};

use super::uniform_value;

/// Prunes operations with a uniform `0` or `1` constant argument.
///
/// Division by a zero constant and the logarithm of a zero constant are
/// reported as errors instead of being folded into infinities.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlgebraicRule;

/// Role a constant argument plays in the tables below.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Special {
    Zero,
    One,
    Other,
}

fn classify(value: Option<f64>) -> Special {
    match value {
        Some(v) if v == 0.0 => Special::Zero,
        Some(v) if v == 1.0 => Special::One,
        _ => Special::Other,
    }
}

impl GraphRewriter for AlgebraicRule {
    fn name(&self) -> &'static str {
        "algebraic"
    }

    fn rewrite(&mut self, graph: &Graph, node: NodeId) -> Result<Rewrite> {
        let Some(opcode) = graph.opcode(node)? else {
            return Ok(Rewrite::Unchanged);
        };
        let args: Vec<NodeId> = graph.edges(node)?.iter().map(Edge::child).collect();
        let special = args
            .iter()
            .map(|&a| Ok(classify(uniform_value(graph, a)?)))
            .collect::<Result<Vec<_>>>()?;
        let shape = graph.shape(node)?;
        let zero = || graph.zeros(shape).map(Rewrite::Replace);
        let one = || graph.ones(shape).map(Rewrite::Replace);
        let keep = |arg: NodeId| -> Result<Rewrite> { Ok(Rewrite::Replace(arg)) };
        let unchanged = || -> Result<Rewrite> { Ok(Rewrite::Unchanged) };

        match opcode {
            Opcode::Add => {
                let rest: Vec<NodeId> = filter_args(&args, &special, Special::Zero);
                if rest.len() == args.len() {
                    return unchanged();
                }
                match rest.as_slice() {
                    [] => zero(),
                    [single] => keep(*single),
                    _ => graph.apply(Opcode::Add, &rest).map(Rewrite::Replace),
                }
            }
            Opcode::Mul => {
                if special.contains(&Special::Zero) {
                    return zero();
                }
                let rest: Vec<NodeId> = filter_args(&args, &special, Special::One);
                if rest.len() == args.len() {
                    return unchanged();
                }
                match rest.as_slice() {
                    [] => one(),
                    [single] => keep(*single),
                    _ => graph.apply(Opcode::Mul, &rest).map(Rewrite::Replace),
                }
            }
            Opcode::Sub => match (special[0], special[1]) {
                (_, Special::Zero) => keep(args[0]),
                (Special::Zero, _) => graph.neg(args[1]).map(Rewrite::Replace),
                _ => unchanged(),
            },
            Opcode::Div => match (special[0], special[1]) {
                (_, Special::Zero) => Err(GraphError::DivisionByZero(node)),
                (Special::Zero, _) => zero(),
                (_, Special::One) => keep(args[0]),
                _ => unchanged(),
            },
            Opcode::Pow => match (special[0], special[1]) {
                (_, Special::Zero) | (Special::One, _) => one(),
                (_, Special::One) => keep(args[0]),
                _ => unchanged(),
            },
            Opcode::Log => match special[0] {
                Special::Zero => Err(GraphError::LogOfZero(node)),
                Special::One => zero(),
                Special::Other => unchanged(),
            },
            Opcode::Neg
            | Opcode::Abs
            | Opcode::Sin
            | Opcode::Tan
            | Opcode::Sqrt
            | Opcode::Square
            | Opcode::Cube
            | Opcode::Round
            | Opcode::Tanh => match special[0] {
                Special::Zero => zero(),
                _ => unchanged(),
            },
            Opcode::Exp | Opcode::Cos => match special[0] {
                Special::Zero => one(),
                _ => unchanged(),
            },
            Opcode::ReduceSum
            | Opcode::ReduceProd
            | Opcode::ReduceMax
            | Opcode::ReduceMin
            | Opcode::Extend
            | Opcode::Permute
            | Opcode::Slice
            | Opcode::Pad
            | Opcode::Flip
            | Opcode::Reshape => match special[0] {
                Special::Zero => zero(),
                _ => unchanged(),
            },
            Opcode::Concat => {
                if special.iter().all(|&s| s == Special::Zero) {
                    zero()
                } else {
                    unchanged()
                }
            }
            // every position ties, so the first one wins
            Opcode::Argmax => match uniform_value(graph, args[0])? {
                Some(_) => zero(),
                None => unchanged(),
            },
            Opcode::Select => match uniform_value(graph, args[0])? {
                Some(cond) if cond != 0.0 => keep(args[1]),
                Some(_) => keep(args[2]),
                None if args[1] == args[2] => keep(args[1]),
                None => unchanged(),
            },
            Opcode::Matmul => {
                if special.contains(&Special::Zero) {
                    zero()
                } else {
                    unchanged()
                }
            }
            Opcode::Sigmoid
            | Opcode::SigmoidGrad
            | Opcode::Max
            | Opcode::Min
            | Opcode::Eq
            | Opcode::Neq
            | Opcode::Gt
            | Opcode::Lt => unchanged(),
        }
    }
}

fn filter_args(args: &[NodeId], special: &[Special], drop: Special) -> Vec<NodeId> {
    args.iter()
        .zip(special.iter())
        .filter(|&(_, s)| *s != drop)
        .map(|(&a, _)| a)
        .collect()
}
