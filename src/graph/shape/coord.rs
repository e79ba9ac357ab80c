use std::fmt;
use std::rc::Rc;

use log::warn;

use super::dims::{RANK_CAP, Shape};
use crate::error::{GraphError, Result};

/// Side length of the homogeneous transform matrix.
pub const MAT_DIM: usize = RANK_CAP + 1;

pub type Matrix = [[f64; MAT_DIM]; MAT_DIM];

const EPSILON: f64 = 1e-9;

/// Affine map over homogeneous coordinates.
///
/// Row vectors `[c0, .., c7, 1]` are multiplied on the left, so row
/// `RANK_CAP` of the matrix holds the translation. `bijective` marks maps
/// whose inverse is exact at the index level (identity, permute, flip).
#[derive(Debug, Clone, PartialEq)]
pub struct CoordMap {
    fwd: Matrix,
    bijective: bool,
}

/// Shaper and optional coorder produced by a transform constructor.
#[derive(Debug, Clone)]
pub struct Transform {
    pub shaper: Rc<CoordMap>,
    pub coorder: Option<Rc<CoordMap>>,
}

impl Transform {
    pub fn identity() -> Self {
        Self {
            shaper: Rc::new(CoordMap::identity()),
            coorder: None,
        }
    }

    fn new(shaper: CoordMap, coorder: CoordMap) -> Self {
        Self {
            shaper: Rc::new(shaper),
            coorder: Some(Rc::new(coorder)),
        }
    }
}

fn identity_matrix() -> Matrix {
    let mut m = [[0.0; MAT_DIM]; MAT_DIM];
    for (i, row) in m.iter_mut().enumerate() {
        row[i] = 1.0;
    }
    m
}

impl CoordMap {
    pub fn identity() -> Self {
        Self {
            fwd: identity_matrix(),
            bijective: true,
        }
    }

    pub fn from_matrix(fwd: Matrix, bijective: bool) -> Self {
        Self { fwd, bijective }
    }

    pub fn matrix(&self) -> &Matrix {
        &self.fwd
    }

    pub fn at(&self, row: usize, col: usize) -> f64 {
        self.fwd[row][col]
    }

    pub fn is_bijective(&self) -> bool {
        self.bijective
    }

    pub fn is_identity(&self) -> bool {
        self.fwd == identity_matrix()
    }

    /// Translation applied to dimension `dim`.
    pub fn translation(&self, dim: usize) -> f64 {
        self.fwd[RANK_CAP][dim]
    }

    /// Map that applies `self` and then `next`.
    pub fn connect(&self, next: &CoordMap) -> CoordMap {
        if self.is_identity() {
            return next.clone();
        }
        if next.is_identity() {
            return self.clone();
        }
        let mut out = [[0.0; MAT_DIM]; MAT_DIM];
        for (i, row) in out.iter_mut().enumerate() {
            for (j, cell) in row.iter_mut().enumerate() {
                *cell = (0..MAT_DIM).map(|k| self.fwd[i][k] * next.fwd[k][j]).sum();
            }
        }
        CoordMap {
            fwd: out,
            bijective: self.bijective && next.bijective,
        }
    }

    /// Algebraic inverse of the matrix.
    ///
    /// For reduce and extend this is the shape-level adjoint (the reverse of a
    /// reduction is an extension and vice versa), not an index-level inverse.
    pub fn reverse(&self) -> Result<CoordMap> {
        if self.is_identity() {
            return Ok(self.clone());
        }
        let mut a = self.fwd;
        let mut inv = identity_matrix();
        for col in 0..MAT_DIM {
            let pivot = (col..MAT_DIM)
                .max_by(|&x, &y| a[x][col].abs().total_cmp(&a[y][col].abs()))
                .unwrap_or(col);
            if a[pivot][col].abs() < EPSILON {
                return Err(GraphError::SingularTransform);
            }
            a.swap(col, pivot);
            inv.swap(col, pivot);
            let p = a[col][col];
            for j in 0..MAT_DIM {
                a[col][j] /= p;
                inv[col][j] /= p;
            }
            for row in 0..MAT_DIM {
                if row == col {
                    continue;
                }
                let factor = a[row][col];
                if factor == 0.0 {
                    continue;
                }
                for j in 0..MAT_DIM {
                    a[row][j] -= factor * a[col][j];
                    inv[row][j] -= factor * inv[col][j];
                }
            }
        }
        Ok(CoordMap {
            fwd: inv,
            bijective: self.bijective,
        })
    }

    /// Exact inverse; only bijective maps have one.
    pub fn inverse(&self) -> Result<CoordMap> {
        if !self.bijective {
            return Err(GraphError::NotBijective);
        }
        self.reverse()
    }

    /// Apply the map to a real-valued coordinate.
    pub fn forward(&self, coord: &[f64; RANK_CAP]) -> [f64; RANK_CAP] {
        let mut input = [1.0; MAT_DIM];
        input[..RANK_CAP].copy_from_slice(coord);
        let mut out = [0.0; MAT_DIM];
        for (j, o) in out.iter_mut().enumerate() {
            *o = (0..MAT_DIM).map(|i| input[i] * self.fwd[i][j]).sum();
        }
        let w = if out[RANK_CAP].abs() < EPSILON {
            1.0
        } else {
            out[RANK_CAP]
        };
        let mut result = [0.0; RANK_CAP];
        for (r, o) in result.iter_mut().zip(out.iter()) {
            *r = o / w;
        }
        result
    }

    /// Apply the map to an element index. Results may fall outside any shape.
    pub fn forward_index(&self, coord: &[usize; RANK_CAP]) -> [i64; RANK_CAP] {
        let mut real = [0.0; RANK_CAP];
        for (r, &c) in real.iter_mut().zip(coord.iter()) {
            *r = c as f64;
        }
        let mapped = self.forward(&real);
        let mut out = [0; RANK_CAP];
        for (o, m) in out.iter_mut().zip(mapped.iter()) {
            *o = m.round() as i64;
        }
        out
    }

    /// Apply the map to a shape.
    pub fn convert(&self, shape: &Shape) -> Shape {
        if self.is_identity() {
            return *shape;
        }
        let mut real = [0.0; RANK_CAP];
        for (r, &d) in real.iter_mut().zip(shape.dims().iter()) {
            *r = d as f64;
        }
        let mapped = self.forward(&real);
        let mut dims = [1; RANK_CAP];
        for (d, &m) in dims.iter_mut().zip(mapped.iter()) {
            let m = if m < 0.0 { -m - 1.0 } else { m };
            let nearest = m.round();
            *d = if (m - nearest).abs() < 1e-6 {
                nearest as usize
            } else {
                m.ceil() as usize
            };
        }
        Shape::from_array(dims)
    }

    /// Source dimension of every output dimension, if the matrix is a pure
    /// permutation.
    pub fn permutation(&self) -> Option<[usize; RANK_CAP]> {
        let mut order = [0; RANK_CAP];
        for (j, slot) in order.iter_mut().enumerate() {
            let mut found = None;
            for i in 0..MAT_DIM {
                let v = self.fwd[i][j];
                if v == 1.0 && i < RANK_CAP && found.is_none() {
                    found = Some(i);
                } else if v != 0.0 {
                    return None;
                }
            }
            *slot = found?;
        }
        Some(order)
    }
}

impl Default for CoordMap {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Display for CoordMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.fwd {
            let cells: Vec<String> = row.iter().map(|v| format!("{}", v)).collect();
            writeln!(f, "[{}]", cells.join(","))?;
        }
        Ok(())
    }
}

fn check_span(rank: usize, len: usize) -> Result<()> {
    if rank + len > RANK_CAP {
        return Err(GraphError::InvalidTransform(format!(
            "dimensions {}..{} exceed the rank cap",
            rank,
            rank + len
        )));
    }
    Ok(())
}

fn scaling(scales: &[(usize, f64)]) -> Transform {
    let mut shaper = identity_matrix();
    let mut coorder = identity_matrix();
    for &(dim, scale) in scales {
        shaper[dim][dim] = scale;
        coorder[dim][dim] = 0.0;
    }
    Transform::new(
        CoordMap::from_matrix(shaper, false),
        CoordMap::from_matrix(coorder, false),
    )
}

/// Reduce dimensions `rank..rank + red.len()`, whose sizes are `red`.
pub fn reduce(rank: usize, red: &[usize]) -> Result<Transform> {
    check_span(rank, red.len())?;
    if red.contains(&0) {
        return Err(GraphError::InvalidTransform(
            "cannot reduce a zero dimension".to_string(),
        ));
    }
    if red.iter().all(|&d| d == 1) {
        warn!("reducing only unit dimensions at rank {}, using identity", rank);
        return Ok(Transform::identity());
    }
    let scales: Vec<(usize, f64)> = red
        .iter()
        .enumerate()
        .map(|(i, &d)| (rank + i, 1.0 / d as f64))
        .collect();
    Ok(scaling(&scales))
}

/// Reduce an arbitrary set of dimensions of `shape`.
pub fn reduce_dims(shape: &Shape, dims: &[usize]) -> Result<Transform> {
    let mut seen = [false; RANK_CAP];
    for &d in dims {
        if d >= RANK_CAP || seen[d] {
            return Err(GraphError::InvalidTransform(format!(
                "bad reduction dimensions {:?}",
                dims
            )));
        }
        seen[d] = true;
    }
    if dims.iter().all(|&d| shape.at(d) == 1) {
        warn!("reducing only unit dimensions {:?}, using identity", dims);
        return Ok(Transform::identity());
    }
    let scales: Vec<(usize, f64)> = dims
        .iter()
        .map(|&d| (d, 1.0 / shape.at(d) as f64))
        .collect();
    Ok(scaling(&scales))
}

/// Extend unit dimensions `rank..rank + ext.len()` to sizes `ext`.
pub fn extend(rank: usize, ext: &[usize]) -> Result<Transform> {
    check_span(rank, ext.len())?;
    if ext.contains(&0) {
        return Err(GraphError::InvalidTransform(
            "cannot extend by zero".to_string(),
        ));
    }
    if ext.iter().all(|&d| d == 1) {
        warn!("extending only by unit sizes at rank {}, using identity", rank);
        return Ok(Transform::identity());
    }
    let scales: Vec<(usize, f64)> = ext
        .iter()
        .enumerate()
        .map(|(i, &d)| (rank + i, d as f64))
        .collect();
    Ok(scaling(&scales))
}

/// Output dimension `j` becomes input dimension `order[j]`.
///
/// Dimensions not mentioned keep their relative order after the given ones.
pub fn permute(order: &[usize]) -> Result<Transform> {
    let full = complete_order(order)?;
    if full.iter().enumerate().all(|(i, &o)| i == o) {
        return Ok(Transform::identity());
    }
    let mut shaper = [[0.0; MAT_DIM]; MAT_DIM];
    for (j, &src) in full.iter().enumerate() {
        shaper[src][j] = 1.0;
    }
    shaper[RANK_CAP][RANK_CAP] = 1.0;
    let shaper = CoordMap::from_matrix(shaper, true);
    let coorder = shaper.reverse()?;
    Ok(Transform::new(shaper, coorder))
}

fn complete_order(order: &[usize]) -> Result<[usize; RANK_CAP]> {
    if order.len() > RANK_CAP {
        return Err(GraphError::RankOverflow(order.len()));
    }
    let mut seen = [false; RANK_CAP];
    for &o in order {
        if o >= RANK_CAP || seen[o] {
            return Err(GraphError::InvalidTransform(format!(
                "bad permutation {:?}",
                order
            )));
        }
        seen[o] = true;
    }
    let mut full = [0; RANK_CAP];
    full[..order.len()].copy_from_slice(order);
    let mut next = order.len();
    for (d, _) in seen.iter().enumerate().filter(|(_, s)| !**s) {
        full[next] = d;
        next += 1;
    }
    Ok(full)
}

/// Window of `extents` starting at `offsets`; unspecified dimensions keep
/// their full extent.
pub fn slice(shape: &Shape, offsets: &[usize], extents: &[usize]) -> Result<Transform> {
    if offsets.len() != extents.len() {
        return Err(GraphError::InvalidTransform(
            "slice offsets and extents differ in length".to_string(),
        ));
    }
    check_span(0, offsets.len())?;
    let mut shaper = identity_matrix();
    let mut coorder = identity_matrix();
    for d in 0..RANK_CAP {
        let dim = shape.at(d);
        let (offset, extent) = if d < offsets.len() {
            (offsets[d], extents[d])
        } else {
            (0, dim)
        };
        if extent == 0 || offset + extent > dim {
            return Err(GraphError::InvalidTransform(format!(
                "slice [{}, {}) out of bounds for dimension {} of size {}",
                offset,
                offset + extent,
                d,
                dim
            )));
        }
        shaper[d][d] = 0.0;
        shaper[RANK_CAP][d] = extent as f64;
        coorder[RANK_CAP][d] = offset as f64;
    }
    Ok(Transform::new(
        CoordMap::from_matrix(shaper, false),
        CoordMap::from_matrix(coorder, false),
    ))
}

/// Zero padding of `(before, after)` per dimension.
pub fn pad(amounts: &[(usize, usize)]) -> Result<Transform> {
    check_span(0, amounts.len())?;
    if amounts.iter().all(|&(b, a)| b == 0 && a == 0) {
        return Ok(Transform::identity());
    }
    let mut shaper = identity_matrix();
    let mut coorder = identity_matrix();
    for (d, &(before, after)) in amounts.iter().enumerate() {
        shaper[RANK_CAP][d] = (before + after) as f64;
        coorder[RANK_CAP][d] = -(before as f64);
    }
    Ok(Transform::new(
        CoordMap::from_matrix(shaper, false),
        CoordMap::from_matrix(coorder, false),
    ))
}

/// Read a buffer of shape `from` as shape `to`.
///
/// The shaper sends every shape to `to`. Element order is unchanged, so
/// there is no coorder.
pub fn reshape(from: &Shape, to: &Shape) -> Result<Transform> {
    if !to.is_complete() || from.n_elems() != to.n_elems() {
        return Err(GraphError::InvalidTransform(format!(
            "cannot reshape {} into {}",
            from, to
        )));
    }
    let mut shaper = identity_matrix();
    for d in 0..RANK_CAP {
        shaper[d][d] = 0.0;
        shaper[RANK_CAP][d] = to.at(d) as f64;
    }
    Ok(Transform {
        shaper: Rc::new(CoordMap::from_matrix(shaper, false)),
        coorder: None,
    })
}

/// Reverse the element order along `dim`.
pub fn flip(shape: &Shape, dim: usize) -> Result<Transform> {
    if dim >= RANK_CAP {
        return Err(GraphError::InvalidTransform(format!(
            "cannot flip dimension {}",
            dim
        )));
    }
    let mut coorder = identity_matrix();
    coorder[dim][dim] = -1.0;
    coorder[RANK_CAP][dim] = shape.at(dim) as f64 - 1.0;
    Ok(Transform {
        shaper: Rc::new(CoordMap::identity()),
        coorder: Some(Rc::new(CoordMap::from_matrix(coorder, true))),
    })
}
