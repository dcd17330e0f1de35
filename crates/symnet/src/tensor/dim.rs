//! Fixed-rank tensor dimension bookkeeping.

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Conventional axis indices for rank-4 layouts.
pub const DIM_ROW: usize = 0;
pub const DIM_COLUMN: usize = 1;
pub const DIM_DEPTH: usize = 2;
pub const DIM_DEPTH3: usize = 3;

/// Maximum number of axes a dimension can carry. Code in the compiler and the
/// parameter codec assumes exactly this value.
pub const MAX_DIMENSION_COUNT: usize = 4;

/// Ordered sequence of up to four axis extents.
///
/// A resolved dimension has every entry positive. Before resolution an entry
/// may be a placeholder: `0` copies the reference entry at the same axis and
/// `-k` copies the reference entry at axis `k` (see [`Dimension::like`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Dimension {
    shape: [i32; MAX_DIMENSION_COUNT],
    len: usize,
}

/// Creates a dimension from up to four entries, e.g. `dim([1, 28, 28])`.
pub fn dim<const N: usize>(shape: [i32; N]) -> Dimension {
    assert!(
        N <= MAX_DIMENSION_COUNT,
        "dimension rank {} exceeds {}",
        N,
        MAX_DIMENSION_COUNT
    );
    let mut d = Dimension::default();
    d.len = N;
    d.shape[..N].copy_from_slice(&shape);
    d
}

impl Dimension {
    /// Number of axes.
    pub fn rank(&self) -> usize {
        self.len
    }

    /// Borrow the populated entries.
    pub fn slice(&self) -> &[i32] {
        &self.shape[..self.len]
    }

    /// Entries as `usize`, for shape maps crossing the engine boundary.
    /// Placeholder entries must already be resolved.
    pub fn slice_usize(&self) -> Vec<usize> {
        self.slice().iter().map(|&v| v.max(0) as usize).collect()
    }

    /// Axis extent at `i`, or 0 outside the populated range.
    pub fn at(&self, i: usize) -> i32 {
        if i < self.len {
            self.shape[i]
        } else {
            0
        }
    }

    /// True when the dimension has no axes at all.
    pub fn empty(&self) -> bool {
        self.len == 0
    }

    /// True iff the rank is in `[1, 4]` and every entry is positive.
    pub fn good(&self) -> bool {
        if self.len == 0 || self.len > MAX_DIMENSION_COUNT {
            return false;
        }
        self.slice().iter().all(|&v| v > 0)
    }

    /// Total number of elements implied by the dimension.
    pub fn total(&self) -> usize {
        let t: i64 = self.slice().iter().map(|&v| v as i64).product();
        if t < 0 {
            0
        } else {
            t as usize
        }
    }

    /// Byte size of a dense array of `dtype` with this dimension.
    pub fn size_of(&self, dtype: crate::tensor::Dtype) -> usize {
        self.total() * dtype.size()
    }

    /// Drops the first `n` axes; an exhausted dimension becomes empty.
    pub fn skip(&self, n: usize) -> Dimension {
        if self.len <= n {
            return Dimension::default();
        }
        let mut d = Dimension::default();
        d.len = self.len - n;
        d.shape[..d.len].copy_from_slice(&self.shape[n..self.len]);
        d
    }

    /// Prepends one axis, e.g. a batch axis in front of a sample dimension.
    pub fn push_front(&self, extent: i32) -> Dimension {
        let mut d = Dimension::default();
        d.len = self.len + 1;
        d.shape[0] = extent;
        d.shape[1..=self.len].copy_from_slice(self.slice());
        d
    }

    /// Builds a dimension from an engine-side shape vector, rejecting ranks
    /// outside `[1, 4]`.
    pub fn from_shape(shape: &[usize]) -> Result<Dimension> {
        if shape.is_empty() || shape.len() > MAX_DIMENSION_COUNT {
            bail!("bad dimension rank {}", shape.len());
        }
        let mut d = Dimension::default();
        d.len = shape.len();
        for (i, &v) in shape.iter().enumerate() {
            d.shape[i] = i32::try_from(v).map_err(|_| anyhow::anyhow!("axis extent {v} overflows"))?;
        }
        Ok(d)
    }

    /// Resolves placeholder entries against a reference dimension: `0` copies
    /// the reference entry at the same axis, `-k` copies the entry at axis `k`.
    pub fn like(&self, reference: Dimension) -> Dimension {
        let mut d = *self;
        for i in 0..self.len {
            let v = self.shape[i];
            if v == 0 {
                d.shape[i] = reference.at(i);
            } else if v < 0 {
                d.shape[i] = reference.at((-v) as usize);
            }
        }
        d
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, v) in self.slice().iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, ")")
    }
}

impl FromStr for Dimension {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if !s.starts_with('(') || !s.ends_with(')') {
            bail!("invalid dimension string '{s}'");
        }
        let inner = &s[1..s.len() - 1];
        let mut d = Dimension::default();
        if inner.is_empty() {
            return Ok(d);
        }
        for (i, part) in inner.split(',').enumerate() {
            if i >= MAX_DIMENSION_COUNT {
                bail!("dimension string '{s}' has more than {MAX_DIMENSION_COUNT} axes");
            }
            let v: i32 = part
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("bad dimension value '{part}': {e}"))?;
            d.shape[i] = v;
            d.len = i + 1;
        }
        Ok(d)
    }
}

impl Serialize for Dimension {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Dimension {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_product_of_entries() {
        assert_eq!(dim([4]).total(), 4);
        assert_eq!(dim([2, 3]).total(), 6);
        assert_eq!(dim([2, 3, 4, 5]).total(), 120);
    }

    #[test]
    fn good_rejects_bad_ranks_and_entries() {
        assert!(!Dimension::default().good());
        assert!(!dim([0]).good());
        assert!(!dim([-1, 3]).good());
        assert!(dim([1]).good());
        assert!(dim([1, 3, 10, 100]).good());
    }

    #[test]
    fn like_resolves_placeholders() {
        let reference = dim([32, 1, 28, 28]);
        assert_eq!(dim([0, 10]).like(reference), dim([32, 10]));
        assert_eq!(dim([-2, 7]).like(reference), dim([28, 7]));
        assert_eq!(dim([5, 6]).like(reference), dim([5, 6]));
    }

    #[test]
    fn push_front_prepends_batch_axis() {
        assert_eq!(dim([1, 28, 28]).push_front(32), dim([32, 1, 28, 28]));
        assert_eq!(dim([4]).push_front(2), dim([2, 4]));
    }

    #[test]
    fn skip_drops_leading_axes() {
        assert_eq!(dim([2, 3, 4]).skip(1), dim([3, 4]));
        assert!(dim([2]).skip(1).empty());
    }

    #[test]
    fn display_and_parse_round_trip() {
        for d in [dim([100]), dim([100, 10]), dim([1, 2, 3, 4])] {
            let s = d.to_string();
            let parsed: Dimension = s.parse().unwrap();
            assert_eq!(parsed, d);
        }
        assert_eq!(dim([100, 10]).to_string(), "(100,10)");
        assert!("100,10".parse::<Dimension>().is_err());
        assert!("(1,2,3,4,5)".parse::<Dimension>().is_err());
    }
}
