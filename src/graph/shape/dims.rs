use std::fmt;

use crate::error::{GraphError, Result};

/// Maximum number of dimensions a shape can carry.
pub const RANK_CAP: usize = 8;

/// Fixed-rank dimension vector.
///
/// Dimension 0 is the fastest varying axis, so a matrix with `r` rows and `c`
/// columns has shape `[c, r]`. Dimensions past the declared rank are 1. A
/// dimension of 0 is a wildcard used while inferring partial shapes; leaves
/// never carry one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: [usize; RANK_CAP],
}

impl Shape {
    pub fn new(dims: &[usize]) -> Result<Self> {
        if dims.len() > RANK_CAP {
            return Err(GraphError::RankOverflow(dims.len()));
        }
        let mut padded = [1; RANK_CAP];
        padded[..dims.len()].copy_from_slice(dims);
        Ok(Self { dims: padded })
    }

    /// Shape with every dimension equal to 1.
    pub fn scalar() -> Self {
        Self {
            dims: [1; RANK_CAP],
        }
    }

    pub(crate) fn from_array(dims: [usize; RANK_CAP]) -> Self {
        Self { dims }
    }

    /// Dimension at `idx`; indices at or past the rank cap read as 1.
    pub fn at(&self, idx: usize) -> usize {
        self.dims.get(idx).copied().unwrap_or(1)
    }

    pub fn dims(&self) -> &[usize; RANK_CAP] {
        &self.dims
    }

    /// Index of the last non-unit dimension plus one.
    pub fn n_ranks(&self) -> usize {
        self.dims
            .iter()
            .rposition(|&d| d != 1)
            .map_or(0, |pos| pos + 1)
    }

    pub fn n_elems(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_complete(&self) -> bool {
        self.dims.iter().all(|&d| d != 0)
    }

    /// Dimensions with trailing ones trimmed.
    pub fn to_list(&self) -> Vec<usize> {
        self.dims[..self.n_ranks()].to_vec()
    }

    /// True when every dimension at index `>= rank` matches, treating 0 as a
    /// wildcard.
    pub fn compatible_after(&self, other: &Shape, rank: usize) -> bool {
        (rank.min(RANK_CAP)..RANK_CAP).all(|i| dim_matches(self.dims[i], other.dims[i]))
    }

    /// True when every dimension at index `< rank` matches, treating 0 as a
    /// wildcard.
    pub fn compatible_before(&self, other: &Shape, rank: usize) -> bool {
        (0..rank.min(RANK_CAP)).all(|i| dim_matches(self.dims[i], other.dims[i]))
    }

    /// Fill wildcard dimensions of `self` from `other`.
    ///
    /// Callers check compatibility first; conflicting concrete dimensions keep
    /// `self`'s value.
    pub fn merge(&self, other: &Shape) -> Shape {
        let mut dims = self.dims;
        for (d, &o) in dims.iter_mut().zip(other.dims.iter()) {
            if *d == 0 {
                *d = o;
            }
        }
        Shape { dims }
    }

    /// Strides of a dense buffer; dimension 0 is contiguous.
    pub fn strides(&self) -> [usize; RANK_CAP] {
        let mut strides = [1; RANK_CAP];
        for i in 1..RANK_CAP {
            strides[i] = strides[i - 1] * self.dims[i - 1];
        }
        strides
    }

    /// Flat buffer index of `coord`.
    pub fn flat_index(&self, coord: &[usize; RANK_CAP]) -> usize {
        let strides = self.strides();
        coord.iter().zip(strides.iter()).map(|(c, s)| c * s).sum()
    }

    /// Coordinate of the element at flat `index`.
    pub fn coordinate(&self, mut index: usize) -> [usize; RANK_CAP] {
        let mut coord = [0; RANK_CAP];
        for (c, &d) in coord.iter_mut().zip(self.dims.iter()) {
            if d > 0 {
                *c = index % d;
                index /= d;
            }
        }
        coord
    }
}

fn dim_matches(a: usize, b: usize) -> bool {
    a == b || a == 0 || b == 0
}

impl Default for Shape {
    fn default() -> Self {
        Self::scalar()
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = self.to_list();
        write!(f, "[")?;
        for (i, d) in list.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}
