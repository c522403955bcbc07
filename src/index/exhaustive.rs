use rayon::prelude::*;

use super::{
    Entry,
    IndexKind,
    Metric,
    Neighbor,
    VectorIndex,
    check_query,
    common_dimension,
    rank_order,
};
use crate::error::Result;

/// Linear-scan index. Exact for every metric.
///
/// Build copies the entries in; search scores every vector in parallel and
/// keeps the best `k` by partial selection.
#[derive(Debug, Default)]
pub struct ExhaustiveIndex {
    entries: Vec<Entry>,
    dimension: Option<usize>,
}

impl ExhaustiveIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorIndex for ExhaustiveIndex {
    fn kind(&self) -> IndexKind {
        IndexKind::Exhaustive
    }

    fn build(&mut self, entries: Vec<Entry>) -> Result<()> {
        self.dimension = common_dimension(&entries)?;
        self.entries = entries;
        Ok(())
    }

    fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: Metric,
    ) -> Result<Vec<Neighbor>> {
        check_query(query, k, self.dimension)?;
        if self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Neighbor> = self
            .entries
            .par_iter()
            .map(|(id, vector)| {
                let (distance, similarity) = metric.score(query, vector);
                Neighbor {
                    id: *id,
                    distance,
                    similarity,
                }
            })
            .collect();

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, rank_order);
            scored.truncate(k);
        }
        scored.sort_unstable_by(rank_order);

        Ok(scored)
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn dimension(&self) -> Option<usize> {
        self.dimension
    }
}
