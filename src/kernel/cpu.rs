use log::trace;
use ndarray::Array2;

use super::{Kernel, KernelArg};
use crate::error::{GraphError, Result};
use crate::graph::op::{Arity, OpKind, Opcode};
use crate::graph::shape::{RANK_CAP, Shape};

/// Single-threaded reference kernel over `f64` buffers.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuKernel;

impl Kernel for CpuKernel {
    fn name(&self) -> &str {
        "cpu"
    }

    fn compute(
        &self,
        opcode: Opcode,
        out_shape: &Shape,
        args: &[KernelArg<'_>],
    ) -> Result<Vec<f64>> {
        trace!("cpu kernel: {} -> {}", opcode, out_shape);
        for arg in args {
            if arg.data.len() != arg.shape.n_elems() {
                return Err(GraphError::Kernel(format!(
                    "{}: buffer of {} elements for shape {}",
                    opcode,
                    arg.data.len(),
                    arg.shape
                )));
            }
        }
        match (opcode, opcode.kind()) {
            (Opcode::Reshape, _) => Ok(single(opcode, args)?.data.to_vec()),
            (Opcode::Argmax, _) => Ok(argmax(out_shape, single(opcode, args)?)),
            (_, OpKind::Elementwise) => elementwise(opcode, out_shape, args),
            (_, OpKind::Reduction) => reduce(opcode, out_shape, single(opcode, args)?),
            (_, OpKind::Transform) => Ok(gather(out_shape, single(opcode, args)?)),
            (_, OpKind::Concat) => Ok(concat(out_shape, args)),
            (_, OpKind::Matmul) => matmul(out_shape, args),
        }
    }
}

fn single<'a, 'b>(opcode: Opcode, args: &'a [KernelArg<'b>]) -> Result<&'a KernelArg<'b>> {
    match args {
        [arg] => Ok(arg),
        _ => Err(GraphError::Arity {
            opcode,
            expected: 1,
            actual: args.len(),
        }),
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

fn indicator(cond: bool) -> f64 {
    if cond { 1.0 } else { 0.0 }
}

fn unary_fn(opcode: Opcode) -> Result<fn(f64) -> f64> {
    let f: fn(f64) -> f64 = match opcode {
        Opcode::Abs => f64::abs,
        Opcode::Neg => |x| -x,
        Opcode::Sin => f64::sin,
        Opcode::Cos => f64::cos,
        Opcode::Tan => f64::tan,
        Opcode::Exp => f64::exp,
        Opcode::Log => f64::ln,
        Opcode::Sqrt => f64::sqrt,
        Opcode::Square => |x| x * x,
        Opcode::Cube => |x| x * x * x,
        Opcode::Round => f64::round,
        Opcode::Sigmoid => sigmoid,
        Opcode::Tanh => f64::tanh,
        Opcode::SigmoidGrad => |x| {
            let s = sigmoid(x);
            s * (1.0 - s)
        },
        _ => {
            return Err(GraphError::Kernel(format!("{} is not unary", opcode)));
        }
    };
    Ok(f)
}

fn binary_fn(opcode: Opcode) -> Result<fn(f64, f64) -> f64> {
    let f: fn(f64, f64) -> f64 = match opcode {
        Opcode::Sub => |a, b| a - b,
        Opcode::Div => |a, b| a / b,
        Opcode::Pow => f64::powf,
        Opcode::Eq => |a, b| indicator(a == b),
        Opcode::Neq => |a, b| indicator(a != b),
        Opcode::Gt => |a, b| indicator(a > b),
        Opcode::Lt => |a, b| indicator(a < b),
        Opcode::Add => |a, b| a + b,
        Opcode::Mul => |a, b| a * b,
        Opcode::Max => f64::max,
        Opcode::Min => f64::min,
        _ => {
            return Err(GraphError::Kernel(format!("{} is not binary", opcode)));
        }
    };
    Ok(f)
}

fn elementwise(opcode: Opcode, out_shape: &Shape, args: &[KernelArg<'_>]) -> Result<Vec<f64>> {
    let n = out_shape.n_elems();
    if let Some(arg) = args.iter().find(|a| a.data.len() != n) {
        return Err(GraphError::Kernel(format!(
            "{}: argument of shape {} does not match output {}",
            opcode, arg.shape, out_shape
        )));
    }
    match opcode.arity() {
        Arity::Exactly(1) => {
            let f = unary_fn(opcode)?;
            Ok(args[0].data.iter().map(|&x| f(x)).collect())
        }
        Arity::Exactly(3) => {
            let [cond, then, otherwise] = args else {
                return Err(GraphError::Arity {
                    opcode,
                    expected: 3,
                    actual: args.len(),
                });
            };
            Ok(cond
                .data
                .iter()
                .zip(then.data.iter().zip(otherwise.data.iter()))
                .map(|(&c, (&t, &o))| if c != 0.0 { t } else { o })
                .collect())
        }
        _ => {
            let f = binary_fn(opcode)?;
            let mut out = args[0].data.to_vec();
            for arg in &args[1..] {
                for (o, &x) in out.iter_mut().zip(arg.data.iter()) {
                    *o = f(*o, x);
                }
            }
            Ok(out)
        }
    }
}

fn in_bounds(coord: &[i64; RANK_CAP], shape: &Shape) -> Option<[usize; RANK_CAP]> {
    let mut out = [0; RANK_CAP];
    for (i, (&c, o)) in coord.iter().zip(out.iter_mut()).enumerate() {
        if c < 0 || c as usize >= shape.at(i) {
            return None;
        }
        *o = c as usize;
    }
    Some(out)
}

fn as_signed(coord: [usize; RANK_CAP]) -> [i64; RANK_CAP] {
    coord.map(|c| c as i64)
}

/// Every output element reads the child element its coordinate maps to, or
/// zero when that falls outside the child.
fn gather(out_shape: &Shape, arg: &KernelArg<'_>) -> Vec<f64> {
    (0..out_shape.n_elems())
        .map(|i| {
            let coord = out_shape.coordinate(i);
            let src = match arg.coorder {
                Some(c) => c.forward_index(&coord),
                None => as_signed(coord),
            };
            in_bounds(&src, &arg.shape).map_or(0.0, |src| arg.data[arg.shape.flat_index(&src)])
        })
        .collect()
}

/// Every child element is folded into the output element its coordinate maps
/// to.
fn reduce(opcode: Opcode, out_shape: &Shape, arg: &KernelArg<'_>) -> Result<Vec<f64>> {
    let (init, combine): (f64, fn(f64, f64) -> f64) = match opcode {
        Opcode::ReduceSum => (0.0, |a, b| a + b),
        Opcode::ReduceProd => (1.0, |a, b| a * b),
        Opcode::ReduceMax => (f64::NEG_INFINITY, f64::max),
        Opcode::ReduceMin => (f64::INFINITY, f64::min),
        _ => {
            return Err(GraphError::Kernel(format!("{} is not a reduction", opcode)));
        }
    };
    let mut out = vec![init; out_shape.n_elems()];
    for (i, &x) in arg.data.iter().enumerate() {
        let coord = arg.shape.coordinate(i);
        let dst = match arg.coorder {
            Some(c) => c.forward_index(&coord),
            None => as_signed(coord),
        };
        if let Some(dst) = in_bounds(&dst, out_shape) {
            let slot = &mut out[out_shape.flat_index(&dst)];
            *slot = combine(*slot, x);
        }
    }
    Ok(out)
}

/// Like a reduction, but each output keeps the position of its largest
/// input, counted over the dimensions the coorder collapses.
fn argmax(out_shape: &Shape, arg: &KernelArg<'_>) -> Vec<f64> {
    let reduced: Vec<usize> = match arg.coorder {
        Some(c) => (0..RANK_CAP).filter(|&d| c.at(d, d) == 0.0).collect(),
        None => Vec::new(),
    };
    let mut best = vec![(f64::NEG_INFINITY, 0usize); out_shape.n_elems()];
    for (i, &x) in arg.data.iter().enumerate() {
        let coord = arg.shape.coordinate(i);
        let dst = match arg.coorder {
            Some(c) => c.forward_index(&coord),
            None => as_signed(coord),
        };
        let Some(dst) = in_bounds(&dst, out_shape) else {
            continue;
        };
        let mut position = 0;
        let mut stride = 1;
        for &d in &reduced {
            position += coord[d] * stride;
            stride *= arg.shape.at(d);
        }
        let slot = &mut best[out_shape.flat_index(&dst)];
        if x > slot.0 {
            *slot = (x, position);
        }
    }
    best.into_iter().map(|(_, position)| position as f64).collect()
}

/// Sum of every argument gathered into the output. Concat edges pad their
/// children into disjoint windows, so each element receives one value.
fn concat(out_shape: &Shape, args: &[KernelArg<'_>]) -> Vec<f64> {
    let mut out = vec![0.0; out_shape.n_elems()];
    for arg in args {
        for (o, x) in out.iter_mut().zip(gather(out_shape, arg)) {
            *o += x;
        }
    }
    out
}

fn matmul(out_shape: &Shape, args: &[KernelArg<'_>]) -> Result<Vec<f64>> {
    let [a, b] = args else {
        return Err(GraphError::Arity {
            opcode: Opcode::Matmul,
            expected: 2,
            actual: args.len(),
        });
    };
    let to_matrix = |arg: &KernelArg<'_>| {
        Array2::from_shape_vec((arg.shape.at(1), arg.shape.at(0)), arg.data.to_vec())
            .map_err(|e| GraphError::Kernel(e.to_string()))
    };
    let product = to_matrix(a)?.dot(&to_matrix(b)?);
    if product.len() != out_shape.n_elems() {
        return Err(GraphError::Kernel(format!(
            "matmul produced {} elements for {}",
            product.len(),
            out_shape
        )));
    }
    Ok(product.iter().copied().collect())
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::graph::shape::{extend, flip, pad, permute, reduce_dims, slice};

    fn shape(dims: &[usize]) -> Shape {
        Shape::new(dims).unwrap()
    }

    fn arg<'a>(data: &'a [f64], s: Shape, coorder: Option<&'a crate::graph::shape::CoordMap>) -> KernelArg<'a> {
        KernelArg {
            data,
            shape: s,
            arg_shape: s,
            coorder,
            map_io: false,
        }
    }

    #[test]
    fn test_matmul_literal() {
        // 2x3 times 3x2
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [7.0, 8.0, 9.0, 10.0, 11.0, 12.0];
        let out = CpuKernel
            .compute(
                Opcode::Matmul,
                &shape(&[2, 2]),
                &[arg(&a, shape(&[3, 2]), None), arg(&b, shape(&[2, 3]), None)],
            )
            .unwrap();
        assert_eq!(out, vec![58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_reduce_sum_rows() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let s = shape(&[3, 2]);
        let t = reduce_dims(&s, &[0]).unwrap();
        let coorder = t.coorder.unwrap();
        let out = CpuKernel
            .compute(
                Opcode::ReduceSum,
                &t.shaper.convert(&s),
                &[arg(&data, s, Some(&*coorder))],
            )
            .unwrap();
        assert_eq!(out, vec![6.0, 15.0]);
    }

    #[test]
    fn test_reduce_max() {
        let data = [1.0, 7.0, 3.0, 4.0, 5.0, 6.0];
        let s = shape(&[3, 2]);
        let t = reduce_dims(&s, &[1]).unwrap();
        let coorder = t.coorder.unwrap();
        let out = CpuKernel
            .compute(
                Opcode::ReduceMax,
                &t.shaper.convert(&s),
                &[arg(&data, s, Some(&*coorder))],
            )
            .unwrap();
        assert_eq!(out, vec![4.0, 7.0, 6.0]);
    }

    #[test]
    fn test_extend_broadcasts() {
        let data = [1.0, 2.0];
        let s = shape(&[2]);
        let t = extend(1, &[3]).unwrap();
        let coorder = t.coorder.unwrap();
        let out = CpuKernel
            .compute(Opcode::Extend, &shape(&[2, 3]), &[arg(&data, s, Some(&*coorder))])
            .unwrap();
        assert_eq!(out, vec![1.0, 2.0, 1.0, 2.0, 1.0, 2.0]);
    }

    #[test]
    fn test_permute_transposes() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let s = shape(&[3, 2]);
        let t = permute(&[1, 0]).unwrap();
        let coorder = t.coorder.unwrap();
        let out = CpuKernel
            .compute(Opcode::Permute, &shape(&[2, 3]), &[arg(&data, s, Some(&*coorder))])
            .unwrap();
        assert_eq!(out, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_slice_pad_flip() {
        let data = [1.0, 2.0, 3.0, 4.0];
        let s = shape(&[4]);

        let sl = slice(&s, &[1], &[2]).unwrap();
        let c = sl.coorder.unwrap();
        let out = CpuKernel
            .compute(Opcode::Slice, &shape(&[2]), &[arg(&data, s, Some(&*c))])
            .unwrap();
        assert_eq!(out, vec![2.0, 3.0]);

        let pd = pad(&[(1, 2)]).unwrap();
        let c = pd.coorder.unwrap();
        let out = CpuKernel
            .compute(Opcode::Pad, &shape(&[7]), &[arg(&data, s, Some(&*c))])
            .unwrap();
        assert_eq!(out, vec![0.0, 1.0, 2.0, 3.0, 4.0, 0.0, 0.0]);

        let fl = flip(&s, 0).unwrap();
        let c = fl.coorder.unwrap();
        let out = CpuKernel
            .compute(Opcode::Flip, &s, &[arg(&data, s, Some(&*c))])
            .unwrap();
        assert_eq!(out, vec![4.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_elementwise() {
        let a = [1.0, 4.0];
        let b = [2.0, 2.0];
        let s = shape(&[2]);
        let out = CpuKernel
            .compute(Opcode::Pow, &s, &[arg(&a, s, None), arg(&b, s, None)])
            .unwrap();
        assert_eq!(out, vec![1.0, 16.0]);

        let out = CpuKernel
            .compute(Opcode::SigmoidGrad, &s, &[arg(&[0.0, 0.0], s, None)])
            .unwrap();
        assert_relative_eq!(out[0], 0.25);

        let out = CpuKernel
            .compute(
                Opcode::Add,
                &s,
                &[arg(&a, s, None), arg(&b, s, None), arg(&b, s, None)],
            )
            .unwrap();
        assert_eq!(out, vec![5.0, 8.0]);
    }

    #[test]
    fn test_select() {
        let s = shape(&[3]);
        let out = CpuKernel
            .compute(
                Opcode::Select,
                &s,
                &[
                    arg(&[1.0, 0.0, -2.0], s, None),
                    arg(&[1.0, 2.0, 3.0], s, None),
                    arg(&[7.0, 8.0, 9.0], s, None),
                ],
            )
            .unwrap();
        assert_eq!(out, vec![1.0, 8.0, 3.0]);
    }

    #[test]
    fn test_argmax_along_rows() {
        // rows [1, 7, 3] and [9, 5, 9]
        let data = [1.0, 7.0, 3.0, 9.0, 5.0, 9.0];
        let s = shape(&[3, 2]);
        let t = reduce_dims(&s, &[0]).unwrap();
        let coorder = t.coorder.unwrap();
        let out = CpuKernel
            .compute(
                Opcode::Argmax,
                &t.shaper.convert(&s),
                &[arg(&data, s, Some(&*coorder))],
            )
            .unwrap();
        assert_eq!(out, vec![1.0, 0.0]);

        let t = reduce_dims(&s, &[1]).unwrap();
        let coorder = t.coorder.unwrap();
        let out = CpuKernel
            .compute(
                Opcode::Argmax,
                &t.shaper.convert(&s),
                &[arg(&data, s, Some(&*coorder))],
            )
            .unwrap();
        assert_eq!(out, vec![1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_reshape_keeps_order() {
        let data = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let out = CpuKernel
            .compute(
                Opcode::Reshape,
                &shape(&[2, 3]),
                &[arg(&data, shape(&[3, 2]), None)],
            )
            .unwrap();
        assert_eq!(out, data.to_vec());
    }

    #[test]
    fn test_concat_sums_padded_args() {
        let s = shape(&[2]);
        let (left, right) = (pad(&[(0, 1)]).unwrap(), pad(&[(2, 0)]).unwrap());
        let (lc, rc) = (left.coorder.unwrap(), right.coorder.unwrap());
        let out = CpuKernel
            .compute(
                Opcode::Concat,
                &shape(&[3]),
                &[
                    arg(&[1.0, 2.0], s, Some(&*lc)),
                    arg(&[3.0], shape(&[1]), Some(&*rc)),
                ],
            )
            .unwrap();
        assert_eq!(out, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_length_mismatch() {
        let s = shape(&[3]);
        let err = CpuKernel
            .compute(Opcode::Neg, &s, &[arg(&[1.0], s, None)])
            .unwrap_err();
        assert!(matches!(err, GraphError::Kernel(_)));
    }
}
