//! Balanced k-d tree index.
//!
//! Construction splits on `axis = depth % dimension` at the median of that
//! axis (found with `select_nth_unstable`, not a full sort). Each node holds
//! one point; every point in its left subtree has a coordinate `<=` the
//! split value on the node's axis and every point on the right `>`. Points
//! tying the median all go left, so heavy duplication skews the tree.
//!
//! Search is branch-and-bound over Euclidean distance with a bounded
//! max-heap of the best candidates seen so far. The far side of a splitting
//! plane is only visited when the plane is no farther than the current
//! worst candidate.
//!
//! # Accuracy
//!
//! The partition and the pruning bound are Euclidean. For
//! [`Metric::Euclidean`] results are exact and identical to
//! [`ExhaustiveIndex`](super::ExhaustiveIndex), including tie order. For
//! [`Metric::Cosine`] and [`Metric::DotProduct`] the tree gathers the
//! `k * rerank_factor` Euclidean-nearest points and re-ranks only those
//! with the requested metric, so the true best match under those metrics
//! can be missed. On unit-normalised data Euclidean and cosine rankings
//! coincide and the re-rank recovers the exact answer.

use std::{cmp::Ordering, collections::BinaryHeap};

use super::{
    Entry,
    IndexKind,
    Metric,
    Neighbor,
    VectorIndex,
    check_query,
    common_dimension,
    euclidean,
    rank_order,
};
use crate::{error::Result, id::ChunkId};

pub const DEFAULT_RERANK_FACTOR: usize = 4;

#[derive(Debug)]
struct Node {
    /// Position of this node's point in `SpatialTreeIndex::points`.
    point: usize,
    axis: usize,
    split: f32,
    left: Option<usize>,
    right: Option<usize>,
}

#[derive(Debug)]
pub struct SpatialTreeIndex {
    points: Vec<Entry>,
    nodes: Vec<Node>,
    root: Option<usize>,
    dimension: Option<usize>,
    rerank_factor: usize,
}

impl Default for SpatialTreeIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SpatialTreeIndex {
    pub fn new() -> Self {
        Self::with_rerank_factor(DEFAULT_RERANK_FACTOR)
    }

    /// Candidate pool multiplier used when re-ranking non-Euclidean queries.
    pub fn with_rerank_factor(rerank_factor: usize) -> Self {
        Self {
            points: Vec::new(),
            nodes: Vec::new(),
            root: None,
            dimension: None,
            rerank_factor: rerank_factor.max(1),
        }
    }

    /// Number of levels from the root to the deepest leaf.
    #[cfg(test)]
    fn height(&self) -> usize {
        fn walk(nodes: &[Node], node: Option<usize>) -> usize {
            node.map_or(0, |n| {
                1 + walk(nodes, nodes[n].left).max(walk(nodes, nodes[n].right))
            })
        }
        walk(&self.nodes, self.root)
    }

    fn build_subtree(
        &mut self,
        order: &mut [usize],
        depth: usize,
        dimension: usize,
    ) -> Option<usize> {
        if order.is_empty() {
            return None;
        }

        let axis = depth % dimension;
        let points = &self.points;
        let median = order.len() / 2;
        order.select_nth_unstable_by(median, |&a, &b| {
            points[a].1[axis].total_cmp(&points[b].1[axis])
        });
        let split = points[order[median]].1[axis];

        // Pull ties from the upper half next to the median and make the last
        // of them the node, leaving only strictly greater points on the right.
        let mut mid = median;
        for i in median + 1..order.len() {
            if points[order[i]].1[axis].total_cmp(&split) == Ordering::Equal {
                mid += 1;
                order.swap(mid, i);
            }
        }
        order.swap(median, mid);
        let point = order[mid];

        let (left, rest) = order.split_at_mut(mid);
        let left = self.build_subtree(left, depth + 1, dimension);
        let right = self.build_subtree(&mut rest[1..], depth + 1, dimension);

        self.nodes.push(Node {
            point,
            axis,
            split,
            left,
            right,
        });
        Some(self.nodes.len() - 1)
    }

    /// The `pool` Euclidean-nearest points, plus how many nodes were visited.
    fn nearest(&self, query: &[f32], pool: usize) -> (Vec<Candidate>, usize) {
        let mut heap = BinaryHeap::with_capacity(pool + 1);
        let mut visited = 0;
        self.descend(self.root, query, pool, &mut heap, &mut visited);
        (heap.into_sorted_vec(), visited)
    }

    fn descend(
        &self,
        node: Option<usize>,
        query: &[f32],
        pool: usize,
        heap: &mut BinaryHeap<Candidate>,
        visited: &mut usize,
    ) {
        let Some(index) = node else {
            return;
        };
        let node = &self.nodes[index];
        *visited += 1;

        let (id, vector) = &self.points[node.point];
        let candidate = Candidate {
            distance: euclidean(query, vector),
            id: *id,
            point: node.point,
        };
        if heap.len() < pool {
            heap.push(candidate);
        } else if heap.peek().is_some_and(|worst| candidate < *worst) {
            heap.pop();
            heap.push(candidate);
        }

        let diff = query[node.axis] - node.split;
        let (near, far) = if diff <= 0.0 {
            (node.left, node.right)
        } else {
            (node.right, node.left)
        };

        self.descend(near, query, pool, heap, visited);

        // Equal distances must still be explored so ties resolve by id; the
        // epsilon absorbs rounding between the plane and point distances.
        let plane = diff.abs();
        let must_visit = heap.len() < pool
            || heap.peek().is_some_and(|worst| {
                plane <= worst.distance + worst.distance * f32::EPSILON * 4.0
            });
        if must_visit {
            self.descend(far, query, pool, heap, visited);
        }
    }
}

impl VectorIndex for SpatialTreeIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::SpatialTree
    }

    fn build(&mut self, entries: Vec<Entry>) -> Result<()> {
        let dimension = common_dimension(&entries)?;
        self.points = entries;
        self.nodes = Vec::with_capacity(self.points.len());
        self.dimension = dimension;
        self.root = match dimension {
            Some(dimension) => {
                let mut order: Vec<usize> = (0..self.points.len()).collect();
                self.build_subtree(&mut order, 0, dimension)
            }
            None => None,
        };
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: Metric,
    ) -> Result<Vec<Neighbor>> {
        check_query(query, k, self.dimension)?;
        if self.points.is_empty() {
            return Ok(Vec::new());
        }

        let pool = match metric {
            Metric::Euclidean => k,
            _ => k.saturating_mul(self.rerank_factor),
        }
        .min(self.points.len());

        let (candidates, _) = self.nearest(query, pool);
        let mut hits: Vec<Neighbor> = candidates
            .into_iter()
            .map(|c| {
                let (distance, similarity) =
                    metric.score(query, &self.points[c.point].1);
                Neighbor {
                    id: c.id,
                    distance,
                    similarity,
                }
            })
            .collect();
        hits.sort_unstable_by(rank_order);
        hits.truncate(k);
        Ok(hits)
    }

    fn len(&self) -> usize {
        self.points.len()
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}

/// Heap entry ordered by Euclidean distance, then id; the heap top is the
/// worst candidate kept so far.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f32,
    id: ChunkId,
    point: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.id.cmp(&other.id))
    }
}
