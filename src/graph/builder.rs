//! Convenience constructors for every opcode.

use super::shape::{self, RANK_CAP, Shape, Transform};
use super::{Edge, Graph, NodeId, Opcode};
use crate::error::{GraphError, Result};

impl Graph {
    /// Identity edge onto `child`.
    pub fn edge(&self, child: NodeId) -> Result<Edge> {
        Ok(Edge::identity(child, self.shape(child)?))
    }

    /// Elementwise or matmul functor over identity edges.
    pub fn apply(&self, opcode: Opcode, args: &[NodeId]) -> Result<NodeId> {
        let edges = args
            .iter()
            .map(|&a| self.edge(a))
            .collect::<Result<Vec<_>>>()?;
        self.make_functor(opcode, edges)
    }

    /// Single-edge functor moving `child` through `transform`.
    pub fn apply_transform(
        &self,
        opcode: Opcode,
        child: NodeId,
        transform: Transform,
    ) -> Result<NodeId> {
        let edge = Edge::new(child, self.shape(child)?, transform);
        self.make_functor(opcode, vec![edge])
    }

    pub fn abs(&self, x: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Abs, &[x])
    }

    pub fn neg(&self, x: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Neg, &[x])
    }

    pub fn sin(&self, x: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Sin, &[x])
    }

    pub fn cos(&self, x: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Cos, &[x])
    }

    pub fn tan(&self, x: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Tan, &[x])
    }

    pub fn exp(&self, x: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Exp, &[x])
    }

    pub fn log(&self, x: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Log, &[x])
    }

    pub fn sqrt(&self, x: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Sqrt, &[x])
    }

    pub fn square(&self, x: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Square, &[x])
    }

    pub fn cube(&self, x: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Cube, &[x])
    }

    pub fn round(&self, x: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Round, &[x])
    }

    pub fn sigmoid(&self, x: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Sigmoid, &[x])
    }

    pub fn sigmoid_grad(&self, x: NodeId) -> Result<NodeId> {
        self.apply(Opcode::SigmoidGrad, &[x])
    }

    pub fn tanh(&self, x: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Tanh, &[x])
    }

    pub fn add(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Add, &[a, b])
    }

    pub fn sub(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Sub, &[a, b])
    }

    pub fn mul(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Mul, &[a, b])
    }

    pub fn div(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Div, &[a, b])
    }

    pub fn pow(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Pow, &[a, b])
    }

    pub fn max(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Max, &[a, b])
    }

    pub fn min(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Min, &[a, b])
    }

    pub fn eq(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Eq, &[a, b])
    }

    pub fn neq(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Neq, &[a, b])
    }

    pub fn gt(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Gt, &[a, b])
    }

    pub fn lt(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Lt, &[a, b])
    }

    /// Elementwise choice: `then` where `cond` is nonzero, else `otherwise`.
    pub fn select(&self, cond: NodeId, then: NodeId, otherwise: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Select, &[cond, then, otherwise])
    }

    /// Sum of any number of nodes; a single node is returned as is.
    pub fn add_n(&self, args: &[NodeId]) -> Result<NodeId> {
        match args {
            [] => Err(GraphError::ZeroArgs(Opcode::Add)),
            [single] => Ok(*single),
            _ => self.apply(Opcode::Add, args),
        }
    }

    /// Product of any number of nodes; a single node is returned as is.
    pub fn mul_n(&self, args: &[NodeId]) -> Result<NodeId> {
        match args {
            [] => Err(GraphError::ZeroArgs(Opcode::Mul)),
            [single] => Ok(*single),
            _ => self.apply(Opcode::Mul, args),
        }
    }

    pub fn matmul(&self, a: NodeId, b: NodeId) -> Result<NodeId> {
        self.apply(Opcode::Matmul, &[a, b])
    }

    fn reduction(&self, opcode: Opcode, x: NodeId, dims: &[usize]) -> Result<NodeId> {
        let transform = shape::reduce_dims(&self.shape(x)?, dims)?;
        self.apply_transform(opcode, x, transform)
    }

    /// Sum over `dims`.
    pub fn reduce_sum(&self, x: NodeId, dims: &[usize]) -> Result<NodeId> {
        self.reduction(Opcode::ReduceSum, x, dims)
    }

    pub fn reduce_prod(&self, x: NodeId, dims: &[usize]) -> Result<NodeId> {
        self.reduction(Opcode::ReduceProd, x, dims)
    }

    pub fn reduce_max(&self, x: NodeId, dims: &[usize]) -> Result<NodeId> {
        self.reduction(Opcode::ReduceMax, x, dims)
    }

    pub fn reduce_min(&self, x: NodeId, dims: &[usize]) -> Result<NodeId> {
        self.reduction(Opcode::ReduceMin, x, dims)
    }

    /// Position of the maximum along `dim`; ties resolve to the first.
    pub fn argmax(&self, x: NodeId, dim: usize) -> Result<NodeId> {
        self.reduction(Opcode::Argmax, x, &[dim])
    }

    /// Sum over every dimension from `rank` on.
    pub fn reduce_sum_from(&self, x: NodeId, rank: usize) -> Result<NodeId> {
        let dims: Vec<usize> = (rank..RANK_CAP).collect();
        self.reduce_sum(x, &dims)
    }

    /// Broadcast unit dimensions `rank..rank + ext.len()` to `ext`.
    pub fn extend(&self, x: NodeId, rank: usize, ext: &[usize]) -> Result<NodeId> {
        let s = self.shape(x)?;
        if let Some(i) = (0..ext.len()).find(|&i| s.at(rank + i) != 1 && ext[i] != 1) {
            return Err(GraphError::InvalidTransform(format!(
                "cannot extend dimension {} of {}",
                rank + i,
                s
            )));
        }
        self.apply_transform(Opcode::Extend, x, shape::extend(rank, ext)?)
    }

    pub fn permute(&self, x: NodeId, order: &[usize]) -> Result<NodeId> {
        self.apply_transform(Opcode::Permute, x, shape::permute(order)?)
    }

    /// Swap the first two dimensions.
    pub fn transpose(&self, x: NodeId) -> Result<NodeId> {
        self.permute(x, &[1, 0])
    }

    pub fn slice(&self, x: NodeId, offsets: &[usize], extents: &[usize]) -> Result<NodeId> {
        let transform = shape::slice(&self.shape(x)?, offsets, extents)?;
        self.apply_transform(Opcode::Slice, x, transform)
    }

    pub fn pad(&self, x: NodeId, amounts: &[(usize, usize)]) -> Result<NodeId> {
        self.apply_transform(Opcode::Pad, x, shape::pad(amounts)?)
    }

    pub fn flip(&self, x: NodeId, dim: usize) -> Result<NodeId> {
        let transform = shape::flip(&self.shape(x)?, dim)?;
        self.apply_transform(Opcode::Flip, x, transform)
    }

    pub fn reshape(&self, x: NodeId, to: Shape) -> Result<NodeId> {
        let transform = shape::reshape(&self.shape(x)?, &to)?;
        self.apply_transform(Opcode::Reshape, x, transform)
    }

    /// Lay `args` end to end along `axis`. Every other dimension must agree.
    pub fn concat(&self, args: &[NodeId], axis: usize) -> Result<NodeId> {
        if axis >= RANK_CAP {
            return Err(GraphError::InvalidTransform(format!(
                "cannot concatenate along dimension {}",
                axis
            )));
        }
        let shapes = args
            .iter()
            .map(|&a| self.shape(a))
            .collect::<Result<Vec<_>>>()?;
        let Some(&first) = shapes.first() else {
            return Err(GraphError::ZeroArgs(Opcode::Concat));
        };
        if let Some(&other) = shapes
            .iter()
            .find(|s| (0..RANK_CAP).any(|d| d != axis && s.at(d) != first.at(d)))
        {
            return Err(GraphError::IncompatibleShapes {
                opcode: Opcode::Concat,
                lhs: first,
                rhs: other,
            });
        }

        let total: usize = shapes.iter().map(|s| s.at(axis)).sum();
        let mut before = 0;
        let mut edges = Vec::with_capacity(args.len());
        for (&arg, s) in args.iter().zip(&shapes) {
            let extent = s.at(axis);
            let mut amounts = vec![(0, 0); axis + 1];
            amounts[axis] = (before, total - before - extent);
            edges.push(Edge::new(arg, *s, shape::pad(&amounts)?));
            before += extent;
        }
        self.make_functor(Opcode::Concat, edges)
    }
}
