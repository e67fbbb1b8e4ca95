//! Distance spaces for graph construction and search.
//!
//! Three spaces are supported: squared Euclidean, inner product and cosine.
//! Cosine is computed as an inner product over vectors that were normalized when
//! they entered the index, so no kernel ever renormalizes.

use crate::error::{IndexError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance space of an index.
///
/// All spaces return a distance where **lower is closer**.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Space {
    /// Squared Euclidean distance (L2²). Range: \[0, ∞).
    L2,
    /// Negative inner product: `-dot(a, b)`.
    #[serde(rename = "ip")]
    InnerProduct,
    /// `1 - dot(a, b)` over L2-normalized vectors. Range: \[0, 2\].
    Cosine,
}

impl Space {
    /// Distance between two vectors of equal length.
    #[inline]
    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        debug_assert_eq!(a.len(), b.len());
        match self {
            Space::L2 => euclidean_sq(a, b),
            Space::InnerProduct => -dot_product(a, b),
            Space::Cosine => 1.0 - dot_product(a, b),
        }
    }

    /// Whether vectors must be normalized on entry for this space.
    pub fn requires_normalization(&self) -> bool {
        matches!(self, Space::Cosine)
    }

    /// Stable one-byte code used in the on-disk header.
    pub fn code(&self) -> u8 {
        match self {
            Space::L2 => 0,
            Space::InnerProduct => 1,
            Space::Cosine => 2,
        }
    }

    /// Inverse of [`Space::code`].
    pub fn from_code(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Space::L2),
            1 => Ok(Space::InnerProduct),
            2 => Ok(Space::Cosine),
            other => Err(IndexError::InvalidConfiguration(format!(
                "unknown space type code {other}"
            ))),
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Space::L2 => "l2",
            Space::InnerProduct => "ip",
            Space::Cosine => "cosine",
        };
        f.write_str(name)
    }
}

impl FromStr for Space {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "l2" | "euclidean" => Ok(Space::L2),
            "ip" | "inner_product" | "dot" => Ok(Space::InnerProduct),
            "cosine" => Ok(Space::Cosine),
            other => Err(IndexError::InvalidConfiguration(format!(
                "unknown space type '{other}'"
            ))),
        }
    }
}

/// Scale `v` to unit L2 norm in place. Zero vectors are left unchanged.
pub fn normalize_in_place(v: &mut [f32]) {
    let norm_sq = dot_product(v, v);
    if norm_sq > 0.0 {
        let inv = 1.0 / norm_sq.sqrt();
        for x in v.iter_mut() {
            *x *= inv;
        }
    }
}

// Eight independent accumulators let the compiler vectorize these loops
// without target-specific intrinsics.
const LANES: usize = 8;

#[inline]
fn euclidean_sq(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; LANES];
    let chunks = a.len() / LANES;
    for c in 0..chunks {
        let base = c * LANES;
        for l in 0..LANES {
            let d = a[base + l] - b[base + l];
            acc[l] += d * d;
        }
    }
    let mut sum: f32 = acc.iter().sum();
    for i in chunks * LANES..a.len() {
        let d = a[i] - b[i];
        sum += d * d;
    }
    sum
}

#[inline]
fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    let mut acc = [0.0f32; LANES];
    let chunks = a.len() / LANES;
    for c in 0..chunks {
        let base = c * LANES;
        for l in 0..LANES {
            acc[l] += a[base + l] * b[base + l];
        }
    }
    let mut sum: f32 = acc.iter().sum();
    for i in chunks * LANES..a.len() {
        sum += a[i] * b[i];
    }
    sum
}
