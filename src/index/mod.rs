//! Vector indexes over `(chunk id, embedding)` pairs.
//!
//! Two implementations share the [`VectorIndex`] contract:
//!
//! - [`ExhaustiveIndex`] scans every vector and is exact for every metric.
//! - [`SpatialTreeIndex`] is a balanced k-d tree; exact for
//!   [`Metric::Euclidean`], approximate for the other metrics.
//!
//! An index is built wholesale from a snapshot and never patched in place.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    id::ChunkId,
};

pub mod exhaustive;
pub mod spatial;

pub use exhaustive::ExhaustiveIndex;
pub use spatial::SpatialTreeIndex;

/// One indexed vector.
pub type Entry = (ChunkId, Vec<f32>);

/// Similarity metric used to score a query against indexed vectors.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    #[default]
    Cosine,
    Euclidean,
    DotProduct,
}

impl Metric {
    pub const ALL: [Metric; 3] =
        [Metric::Cosine, Metric::Euclidean, Metric::DotProduct];

    /// Score `b` against `a`, returning `(distance, similarity)`.
    ///
    /// Lower distance always means a better match. Cosine treats a zero
    /// vector as having similarity 0 with everything.
    pub fn score(self, a: &[f32], b: &[f32]) -> (f32, f32) {
        match self {
            Metric::Cosine => {
                let norms = norm(a) * norm(b);
                let similarity =
                    if norms == 0.0 { 0.0 } else { dot(a, b) / norms };
                (1.0 - similarity, similarity)
            }
            Metric::Euclidean => {
                let distance = euclidean(a, b);
                (distance, 1.0 / (1.0 + distance))
            }
            Metric::DotProduct => {
                let similarity = dot(a, b);
                (-similarity, similarity)
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::DotProduct => "dot_product",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" => Ok(Metric::Euclidean),
            "dot_product" | "dot" => Ok(Metric::DotProduct),
            other => Err(Error::UnknownMetric(other.to_string())),
        }
    }
}

/// Which index implementation to build for a library.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    #[default]
    Exhaustive,
    SpatialTree,
}

impl IndexKind {
    pub fn as_str(self) -> &'static str {
        match self {
            IndexKind::Exhaustive => "exhaustive",
            IndexKind::SpatialTree => "spatial_tree",
        }
    }

    /// A fresh, empty index of this kind.
    pub fn create(self, rerank_factor: usize) -> Box<dyn VectorIndex> {
        match self {
            IndexKind::Exhaustive => Box::new(ExhaustiveIndex::new()),
            IndexKind::SpatialTree => {
                Box::new(SpatialTreeIndex::with_rerank_factor(rerank_factor))
            }
        }
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exhaustive" | "brute_force" => Ok(IndexKind::Exhaustive),
            "spatial_tree" | "kdtree" | "kd_tree" => Ok(IndexKind::SpatialTree),
            other => Err(Error::UnknownIndexKind(other.to_string())),
        }
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Neighbor {
    pub id: ChunkId,
    pub distance: f32,
    pub similarity: f32,
}

/// Contract shared by every index implementation.
pub trait VectorIndex: Send + Sync {
    fn kind(&self) -> IndexKind;

    /// Replace all indexed content with `entries`.
    ///
    /// Zero entries is valid and yields an empty index. Fails with
    /// [`Error::DimensionMismatch`] if the entries disagree on length.
    fn build(&mut self, entries: Vec<Entry>) -> Result<()>;

    /// The `k` best matches for `query`, best first, ties by ascending id.
    ///
    /// An empty (or never built) index returns no results.
    fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: Metric,
    ) -> Result<Vec<Neighbor>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dimension(&self) -> Option<usize>;
}

pub(crate) fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

pub(crate) fn norm(a: &[f32]) -> f32 {
    dot(a, a).sqrt()
}

pub(crate) fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Ranking order: ascending distance, then ascending id.
pub(crate) fn rank_order(a: &Neighbor, b: &Neighbor) -> Ordering {
    a.distance
        .total_cmp(&b.distance)
        .then_with(|| a.id.cmp(&b.id))
}

/// Check that every entry has the same length, returning it.
pub(crate) fn common_dimension(entries: &[Entry]) -> Result<Option<usize>> {
    let Some((_, first)) = entries.first() else {
        return Ok(None);
    };
    let expected = first.len();
    if expected == 0 {
        return Err(Error::EmptyEmbedding);
    }
    if let Some((_, bad)) = entries.iter().find(|(_, v)| v.len() != expected) {
        return Err(Error::DimensionMismatch {
            expected,
            actual: bad.len(),
        });
    }
    Ok(Some(expected))
}

pub(crate) fn check_query(
    query: &[f32],
    k: usize,
    dimension: Option<usize>,
) -> Result<()> {
    if k == 0 {
        return Err(Error::InvalidK);
    }
    match dimension {
        Some(expected) if expected != query.len() => {
            Err(Error::DimensionMismatch {
                expected,
                actual: query.len(),
            })
        }
        _ => Ok(()),
    }
}
