use std::fmt;

use crate::error::{GraphError, Result};
use crate::graph::shape::{RANK_CAP, Shape};

/// Every operation a functor can perform.
///
/// The set is closed: shape inference, local derivatives, chain rules,
/// rewrite tables and the reference kernel all match on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    Abs,
    Neg,
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Sqrt,
    Square,
    Cube,
    Round,
    Sigmoid,
    Tanh,
    /// `s * (1 - s)` of `s = sigmoid(x)`; only emitted by the gradient builder.
    SigmoidGrad,

    Sub,
    Div,
    Pow,
    Eq,
    Neq,
    Gt,
    Lt,
    /// `cond != 0 ? then : otherwise`, elementwise.
    Select,

    Add,
    Mul,
    Max,
    Min,

    ReduceSum,
    ReduceProd,
    ReduceMax,
    ReduceMin,
    /// Index of the largest element along the reduced dimensions.
    Argmax,

    Extend,
    Permute,
    Slice,
    Pad,
    Flip,
    /// Same buffer under another shape with the same element count.
    Reshape,

    /// Arguments laid side by side along one dimension. Each edge pads its
    /// child into place, so the output is the sum of the edges.
    Concat,

    /// `[n, m] x [k, n] -> [k, m]`.
    Matmul,
}

/// Broad family an opcode belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpKind {
    /// Pointwise math over arguments of identical shape.
    Elementwise,
    /// Aggregates the child into a smaller output through a reducing edge.
    Reduction,
    /// Moves data through its single edge without arithmetic.
    Transform,
    /// Several edges that each place a child inside a shared output.
    Concat,
    Matmul,
}

/// Number of arguments an opcode accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exactly(usize),
    AtLeast(usize),
}

impl Opcode {
    pub fn name(&self) -> &'static str {
        match self {
            Opcode::Abs => "ABS",
            Opcode::Neg => "NEG",
            Opcode::Sin => "SIN",
            Opcode::Cos => "COS",
            Opcode::Tan => "TAN",
            Opcode::Exp => "EXP",
            Opcode::Log => "LOG",
            Opcode::Sqrt => "SQRT",
            Opcode::Square => "SQUARE",
            Opcode::Cube => "CUBE",
            Opcode::Round => "ROUND",
            Opcode::Sigmoid => "SIGMOID",
            Opcode::Tanh => "TANH",
            Opcode::SigmoidGrad => "SIGMOID_GRAD",
            Opcode::Sub => "SUB",
            Opcode::Div => "DIV",
            Opcode::Pow => "POW",
            Opcode::Eq => "EQ",
            Opcode::Neq => "NEQ",
            Opcode::Gt => "GT",
            Opcode::Lt => "LT",
            Opcode::Select => "SELECT",
            Opcode::Add => "ADD",
            Opcode::Mul => "MUL",
            Opcode::Max => "MAX",
            Opcode::Min => "MIN",
            Opcode::ReduceSum => "REDUCE_SUM",
            Opcode::ReduceProd => "REDUCE_PROD",
            Opcode::ReduceMax => "REDUCE_MAX",
            Opcode::ReduceMin => "REDUCE_MIN",
            Opcode::Argmax => "ARGMAX",
            Opcode::Extend => "EXTEND",
            Opcode::Permute => "PERMUTE",
            Opcode::Slice => "SLICE",
            Opcode::Pad => "PAD",
            Opcode::Flip => "FLIP",
            Opcode::Reshape => "RESHAPE",
            Opcode::Concat => "CONCAT",
            Opcode::Matmul => "MATMUL",
        }
    }

    pub fn kind(&self) -> OpKind {
        match self {
            Opcode::ReduceSum
            | Opcode::ReduceProd
            | Opcode::ReduceMax
            | Opcode::ReduceMin
            | Opcode::Argmax => OpKind::Reduction,
            Opcode::Extend
            | Opcode::Permute
            | Opcode::Slice
            | Opcode::Pad
            | Opcode::Flip
            | Opcode::Reshape => OpKind::Transform,
            Opcode::Concat => OpKind::Concat,
            Opcode::Matmul => OpKind::Matmul,
            _ => OpKind::Elementwise,
        }
    }

    pub fn arity(&self) -> Arity {
        match self {
            Opcode::Add | Opcode::Mul | Opcode::Max | Opcode::Min | Opcode::Concat => {
                Arity::AtLeast(2)
            }
            Opcode::Select => Arity::Exactly(3),
            Opcode::Sub
            | Opcode::Div
            | Opcode::Pow
            | Opcode::Eq
            | Opcode::Neq
            | Opcode::Gt
            | Opcode::Lt
            | Opcode::Matmul => Arity::Exactly(2),
            _ => Arity::Exactly(1),
        }
    }

    /// Argument order does not affect the result.
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            Opcode::Add | Opcode::Mul | Opcode::Max | Opcode::Min | Opcode::Eq | Opcode::Neq
        )
    }

    /// Opcodes that only exist as the derivative of another opcode.
    pub fn is_derivative_only(&self) -> bool {
        matches!(self, Opcode::SigmoidGrad)
    }

    pub fn is_elementwise(&self) -> bool {
        self.kind() == OpKind::Elementwise
    }

    pub(crate) fn check_arity(&self, n_args: usize) -> Result<()> {
        if n_args == 0 {
            return Err(GraphError::ZeroArgs(*self));
        }
        let ok = match self.arity() {
            Arity::Exactly(n) => n_args == n,
            Arity::AtLeast(n) => n_args >= n,
        };
        if !ok {
            let expected = match self.arity() {
                Arity::Exactly(n) | Arity::AtLeast(n) => n,
            };
            return Err(GraphError::Arity {
                opcode: *self,
                expected,
                actual: n_args,
            });
        }
        Ok(())
    }

    /// Output shape given the shapes each edge produces.
    pub fn infer_shape(&self, args: &[Shape]) -> Result<Shape> {
        self.check_arity(args.len())?;
        match self.kind() {
            OpKind::Elementwise => {
                let mut out = args[0];
                for shape in &args[1..] {
                    if !out.compatible_after(shape, 0) {
                        return Err(GraphError::IncompatibleShapes {
                            opcode: *self,
                            lhs: out,
                            rhs: *shape,
                        });
                    }
                    out = out.merge(shape);
                }
                Ok(out)
            }
            OpKind::Reduction | OpKind::Transform => Ok(args[0]),
            OpKind::Concat => {
                if let Some(other) = args[1..].iter().find(|s| **s != args[0]) {
                    return Err(GraphError::IncompatibleShapes {
                        opcode: *self,
                        lhs: args[0],
                        rhs: *other,
                    });
                }
                Ok(args[0])
            }
            OpKind::Matmul => {
                let (a, b) = (args[0], args[1]);
                let incompatible = || GraphError::IncompatibleShapes {
                    opcode: *self,
                    lhs: a,
                    rhs: b,
                };
                let common_ok = a.at(0) == b.at(1) || a.at(0) == 0 || b.at(1) == 0;
                let batch_ok = (2..RANK_CAP).all(|i| a.at(i) == 1 && b.at(i) == 1);
                if !common_ok || !batch_ok {
                    return Err(incompatible());
                }
                Shape::new(&[b.at(0), a.at(1)])
            }
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn shape(dims: &[usize]) -> Shape {
        Shape::new(dims).unwrap()
    }

    #[test]
    fn test_matmul_shape() {
        let out = Opcode::Matmul
            .infer_shape(&[shape(&[3, 2]), shape(&[4, 3])])
            .unwrap();
        assert_eq!(out, shape(&[4, 2]));
    }

    #[test]
    fn test_matmul_mismatch() {
        let err = Opcode::Matmul
            .infer_shape(&[shape(&[3, 2]), shape(&[4, 2])])
            .unwrap_err();
        assert!(matches!(err, GraphError::IncompatibleShapes { .. }));
    }

    #[test]
    fn test_elementwise_wildcard_merge() {
        let out = Opcode::Add
            .infer_shape(&[shape(&[0, 2]), shape(&[3, 2])])
            .unwrap();
        assert_eq!(out, shape(&[3, 2]));
    }

    #[rstest]
    #[case(Opcode::Add, 0, Err(GraphError::ZeroArgs(Opcode::Add)))]
    #[case(Opcode::Add, 1, Err(GraphError::Arity { opcode: Opcode::Add, expected: 2, actual: 1 }))]
    #[case(Opcode::Add, 3, Ok(()))]
    #[case(Opcode::Sub, 3, Err(GraphError::Arity { opcode: Opcode::Sub, expected: 2, actual: 3 }))]
    #[case(Opcode::Neg, 1, Ok(()))]
    fn test_arity(#[case] opcode: Opcode, #[case] n: usize, #[case] expected: Result<()>) {
        assert_eq!(opcode.check_arity(n), expected);
    }

    #[test]
    fn test_classification() {
        assert!(Opcode::Mul.is_commutative());
        assert!(!Opcode::Sub.is_commutative());
        assert!(Opcode::SigmoidGrad.is_derivative_only());
        assert_eq!(Opcode::ReduceMax.kind(), OpKind::Reduction);
        assert_eq!(Opcode::Flip.kind(), OpKind::Transform);
        assert_eq!(Opcode::Matmul.to_string(), "MATMUL");
        assert_eq!(Opcode::Argmax.kind(), OpKind::Reduction);
        assert_eq!(Opcode::Reshape.kind(), OpKind::Transform);
        assert_eq!(Opcode::Select.arity(), Arity::Exactly(3));
        assert!(!Opcode::Select.is_commutative());
    }

    #[test]
    fn test_concat_edges_must_agree() {
        let out = Opcode::Concat
            .infer_shape(&[shape(&[5, 2]), shape(&[5, 2])])
            .unwrap();
        assert_eq!(out, shape(&[5, 2]));
        let err = Opcode::Concat
            .infer_shape(&[shape(&[5, 2]), shape(&[4, 2])])
            .unwrap_err();
        assert!(matches!(err, GraphError::IncompatibleShapes { .. }));
    }
}
