//! Search orchestration: index lifecycle per library plus filtered k-NN.
//!
//! Each `(library, index kind)` pair owns a slot holding the last built
//! index. A slot is `Unbuilt` until its first build, `Built` while the
//! library's change generation matches the one the index was built from,
//! and `Stale` after any chunk mutation. Searching a slot that is not
//! `Built` rebuilds it first.
//!
//! Builds copy a snapshot out of the repository and construct the index
//! without holding the repository lock. The finished index is published
//! with a single atomic pointer swap, so concurrent searches see either the
//! previous index or the new one.

use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    time::Instant,
};

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    config::StoreConfig,
    error::{Error, Result},
    filter::Filter,
    id::{ChunkId, LibraryId},
    index::{IndexKind, Metric, Neighbor, VectorIndex, check_query},
    model::Chunk,
    repository::Repository,
};

/// A k-NN query against one library.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub library: LibraryId,
    pub query: Vec<f32>,
    pub k: usize,
    pub metric: Metric,
    pub filter: Option<Filter>,
    /// Overrides the library's preferred index kind for this query.
    pub index_kind: Option<IndexKind>,
}

impl SearchRequest {
    pub fn new(library: LibraryId, query: Vec<f32>, k: usize) -> Self {
        Self {
            library,
            query,
            k,
            metric: Metric::default(),
            filter: None,
            index_kind: None,
        }
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_index_kind(mut self, kind: IndexKind) -> Self {
        self.index_kind = Some(kind);
        self
    }
}

/// One ranked result, carrying a copy of the matching chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub distance: f32,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Unbuilt,
    Built,
    Stale,
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IndexState::Unbuilt => "unbuilt",
            IndexState::Built => "built",
            IndexState::Stale => "stale",
        })
    }
}

/// Summary of a completed index build.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexStats {
    pub library: LibraryId,
    pub kind: IndexKind,
    pub entries: usize,
    pub dimension: Option<usize>,
    pub generation: u64,
    pub built_at: DateTime<Utc>,
}

struct BuiltIndex {
    index: Box<dyn VectorIndex>,
    generation: u64,
    /// Library dimensionality at snapshot time; set even when no chunk
    /// carries a vector any more.
    dimension: Option<usize>,
    built_at: DateTime<Utc>,
}

impl BuiltIndex {
    fn stats(&self, library: LibraryId) -> IndexStats {
        IndexStats {
            library,
            kind: self.index.kind(),
            entries: self.index.len(),
            dimension: self.dimension,
            generation: self.generation,
            built_at: self.built_at,
        }
    }
}

struct Slot {
    current: ArcSwapOption<BuiltIndex>,
    // Serializes builds of one slot; searches never take it when fresh.
    build: Mutex<()>,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            current: ArcSwapOption::empty(),
            build: Mutex::new(()),
        }
    }
}

type SlotKey = (LibraryId, IndexKind);

pub struct SearchEngine {
    repo: Arc<Repository>,
    config: StoreConfig,
    slots: RwLock<HashMap<SlotKey, Arc<Slot>>>,
    kinds: RwLock<HashMap<LibraryId, IndexKind>>,
}

impl SearchEngine {
    pub fn new(repo: Arc<Repository>, config: StoreConfig) -> Self {
        Self {
            repo,
            config,
            slots: RwLock::new(HashMap::new()),
            kinds: RwLock::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &Arc<Repository> {
        &self.repo
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Index kind used when a query does not name one.
    pub fn index_kind(&self, library: LibraryId) -> IndexKind {
        self.kinds
            .read()
            .get(&library)
            .copied()
            .unwrap_or(self.config.default_index)
    }

    pub fn set_index_kind(
        &self,
        library: LibraryId,
        kind: IndexKind,
    ) -> Result<()> {
        if !self.repo.library_exists(library) {
            return Err(Error::not_found("library", library));
        }
        self.kinds.write().insert(library, kind);
        debug!(library = %library, kind = %kind, "set preferred index kind");
        Ok(())
    }

    pub fn index_state(
        &self,
        library: LibraryId,
        kind: IndexKind,
    ) -> Result<IndexState> {
        let generation = self.repo.generation(library)?;
        let built = self
            .slots
            .read()
            .get(&(library, kind))
            .and_then(|slot| slot.current.load_full());

        Ok(match built {
            None => IndexState::Unbuilt,
            Some(built) if built.generation == generation => IndexState::Built,
            Some(_) => IndexState::Stale,
        })
    }

    /// Rebuild an index from the library's current content, whatever its
    /// state.
    pub fn build_index(
        &self,
        library: LibraryId,
        kind: IndexKind,
    ) -> Result<IndexStats> {
        let slot = self.slot(library, kind);
        let _guard = slot.build.lock();
        let built = self.rebuild(&slot, library, kind)?;
        Ok(built.stats(library))
    }

    /// Drop every index held for a library.
    pub fn forget_library(&self, library: LibraryId) {
        let mut slots = self.slots.write();
        let before = slots.len();
        slots.retain(|(id, _), _| *id != library);
        self.kinds.write().remove(&library);
        debug!(
            library = %library,
            dropped = before - slots.len(),
            "dropped library indexes"
        );
    }

    /// Run a k-NN query, rebuilding the index first if it is missing or
    /// stale.
    ///
    /// With a filter, candidates are over-fetched by the configured
    /// expansion factor and the fetch doubles until `k` chunks pass or the
    /// whole index has been examined. Fewer than `k` hits is a valid
    /// result.
    pub fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        if request.k == 0 {
            return Err(Error::InvalidK);
        }
        let kind = request
            .index_kind
            .unwrap_or_else(|| self.index_kind(request.library));
        let built = self.ensure_built(request.library, kind)?;
        check_query(&request.query, request.k, built.dimension)?;

        let population = built.index.len();
        if population == 0 {
            return Ok(Vec::new());
        }

        let filter = request.filter.as_ref().filter(|f| !f.is_empty());
        let Some(filter) = filter else {
            let neighbors =
                built.index.search(&request.query, request.k, request.metric)?;
            return Ok(self.resolve(neighbors, None, request.k));
        };

        let mut fetch = request
            .k
            .saturating_mul(self.config.expansion_factor)
            .min(population);
        loop {
            let neighbors =
                built.index.search(&request.query, fetch, request.metric)?;
            let hits = self.resolve(neighbors, Some(filter), request.k);
            debug!(
                library = %request.library,
                fetch,
                matched = hits.len(),
                k = request.k,
                "filtered search round"
            );
            if hits.len() >= request.k || fetch >= population {
                return Ok(hits);
            }
            fetch = fetch.saturating_mul(2).min(population);
        }
    }

    fn slot(&self, library: LibraryId, kind: IndexKind) -> Arc<Slot> {
        if let Some(slot) = self.slots.read().get(&(library, kind)) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().entry((library, kind)).or_default())
    }

    fn ensure_built(
        &self,
        library: LibraryId,
        kind: IndexKind,
    ) -> Result<Arc<BuiltIndex>> {
        let slot = self.slot(library, kind);
        if let Some(built) = self.fresh(&slot, library)? {
            return Ok(built);
        }

        let _guard = slot.build.lock();
        // Another caller may have rebuilt while we waited.
        if let Some(built) = self.fresh(&slot, library)? {
            return Ok(built);
        }
        self.rebuild(&slot, library, kind)
    }

    fn fresh(
        &self,
        slot: &Slot,
        library: LibraryId,
    ) -> Result<Option<Arc<BuiltIndex>>> {
        let generation = self.repo.generation(library)?;
        Ok(slot
            .current
            .load_full()
            .filter(|built| built.generation == generation))
    }

    /// Caller must hold `slot.build`.
    fn rebuild(
        &self,
        slot: &Slot,
        library: LibraryId,
        kind: IndexKind,
    ) -> Result<Arc<BuiltIndex>> {
        let started = Instant::now();
        let snapshot = self.repo.snapshot(library)?;
        let mut index = kind.create(self.config.rerank_factor);
        index.build(snapshot.entries)?;

        let built = Arc::new(BuiltIndex {
            index,
            generation: snapshot.generation,
            dimension: snapshot.dimension,
            built_at: Utc::now(),
        });
        slot.current.store(Some(Arc::clone(&built)));

        info!(
            library = %library,
            kind = %kind,
            entries = built.index.len(),
            dimension = ?built.dimension,
            generation = built.generation,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "built index"
        );
        Ok(built)
    }

    /// Attach chunk copies to neighbors in rank order, dropping chunks
    /// deleted since the snapshot and those failing `filter`.
    fn resolve(
        &self,
        neighbors: Vec<Neighbor>,
        filter: Option<&Filter>,
        k: usize,
    ) -> Vec<SearchHit> {
        let ids: Vec<ChunkId> = neighbors.iter().map(|n| n.id).collect();
        let mut chunks = self.repo.get_chunks(&ids);

        neighbors
            .into_iter()
            .filter_map(|n| {
                let chunk = chunks.remove(&n.id)?;
                if filter.is_some_and(|f| !f.matches(&chunk.metadata)) {
                    return None;
                }
                Some(SearchHit {
                    chunk,
                    distance: n.distance,
                    similarity: n.similarity,
                })
            })
            .take(k)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        id::DocumentId,
        metadata,
        model::{ChunkUpdate, NewChunk, NewDocument, NewLibrary},
    };

    struct Fixture {
        engine: SearchEngine,
        library: LibraryId,
        document: DocumentId,
    }

    impl Fixture {
        fn new() -> Self {
            let repo = Arc::new(Repository::new());
            let library = repo.create_library(NewLibrary::named("lib")).id;
            let document = repo
                .create_document(library, NewDocument::titled("doc"))
                .unwrap()
                .id;
            Self {
                engine: SearchEngine::new(repo, StoreConfig::default()),
                library,
                document,
            }
        }

        fn add(&self, vector: Vec<f32>, meta: serde_json::Value) -> ChunkId {
            self.engine
                .repository()
                .create_chunk(
                    self.document,
                    NewChunk::new("text")
                        .with_embedding(vector)
                        .with_metadata(metadata::from_json(meta).unwrap()),
                )
                .unwrap()
                .id
        }
    }

    fn filter(expr: serde_json::Value) -> Filter {
        Filter::from_json(expr).unwrap()
    }

    #[test]
    fn state_moves_through_lifecycle() {
        let fx = Fixture::new();
        let kind = IndexKind::Exhaustive;
        assert_eq!(
            fx.engine.index_state(fx.library, kind).unwrap(),
            IndexState::Unbuilt
        );

        fx.add(vec![1.0, 0.0], json!({}));
        let stats = fx.engine.build_index(fx.library, kind).unwrap();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.dimension, Some(2));
        assert_eq!(
            fx.engine.index_state(fx.library, kind).unwrap(),
            IndexState::Built
        );

        fx.add(vec![0.0, 1.0], json!({}));
        assert_eq!(
            fx.engine.index_state(fx.library, kind).unwrap(),
            IndexState::Stale
        );
        // Other kinds are tracked independently.
        assert_eq!(
            fx.engine
                .index_state(fx.library, IndexKind::SpatialTree)
                .unwrap(),
            IndexState::Unbuilt
        );
    }

    #[test]
    fn search_rebuilds_stale_index() {
        let fx = Fixture::new();
        let first = fx.add(vec![1.0, 0.0], json!({}));
        fx.engine.build_index(fx.library, IndexKind::Exhaustive).unwrap();

        let second = fx.add(vec![0.0, 1.0], json!({}));
        let request = SearchRequest::new(fx.library, vec![0.0, 1.0], 2);
        let hits = fx.engine.search(&request).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.id, second);
        assert_eq!(hits[1].chunk.id, first);
        assert_eq!(
            fx.engine
                .index_state(fx.library, IndexKind::Exhaustive)
                .unwrap(),
            IndexState::Built
        );
    }

    #[test]
    fn updates_and_deletes_are_visible_to_search() {
        let fx = Fixture::new();
        let a = fx.add(vec![1.0, 0.0], json!({}));
        let b = fx.add(vec![0.0, 1.0], json!({}));
        let request = SearchRequest::new(fx.library, vec![1.0, 0.0], 1);
        assert_eq!(fx.engine.search(&request).unwrap()[0].chunk.id, a);

        fx.engine
            .repository()
            .update_chunk(
                b,
                ChunkUpdate {
                    embedding: Some(vec![1.0, 0.01]),
                    ..Default::default()
                },
            )
            .unwrap();
        fx.engine.repository().delete_chunk(a).unwrap();

        let hits = fx.engine.search(&request).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.id, b);
    }

    #[test]
    fn filtered_search_compensates_for_rejections() {
        let fx = Fixture::new();
        let mut wanted = Vec::new();
        for i in 0..10 {
            let keep = i == 3 || i == 8;
            let id = fx.add(vec![i as f32, 1.0], json!({ "keep": keep }));
            if keep {
                wanted.push(id);
            }
        }

        let request = SearchRequest::new(fx.library, vec![0.0, 1.0], 5)
            .with_metric(Metric::Euclidean)
            .with_filter(filter(json!({ "keep": true })));
        let hits = fx.engine.search(&request).unwrap();
        let ids: Vec<ChunkId> = hits.iter().map(|h| h.chunk.id).collect();
        assert_eq!(ids, wanted);
    }

    #[test]
    fn filtered_search_stops_at_k() {
        let fx = Fixture::new();
        for i in 0..20 {
            fx.add(vec![i as f32], json!({ "n": i }));
        }
        let request = SearchRequest::new(fx.library, vec![0.0], 3)
            .with_metric(Metric::Euclidean)
            .with_filter(filter(json!({ "n": { "$gte": 10 } })));
        let hits = fx.engine.search(&request).unwrap();
        let distances: Vec<f32> = hits.iter().map(|h| h.distance).collect();
        assert_eq!(distances, vec![10.0, 11.0, 12.0]);
    }

    #[test]
    fn spatial_tree_answers_like_exhaustive_for_euclidean() {
        let fx = Fixture::new();
        for i in 0..30 {
            let x = (i * 7 % 11) as f32;
            let y = (i * 5 % 13) as f32;
            fx.add(vec![x, y], json!({}));
        }
        let base = SearchRequest::new(fx.library, vec![4.5, 6.0], 6)
            .with_metric(Metric::Euclidean);
        let flat = fx
            .engine
            .search(&base.clone().with_index_kind(IndexKind::Exhaustive))
            .unwrap();

        fx.engine
            .set_index_kind(fx.library, IndexKind::SpatialTree)
            .unwrap();
        let tree = fx.engine.search(&base).unwrap();
        assert_eq!(tree, flat);
        assert_eq!(
            fx.engine
                .index_state(fx.library, IndexKind::SpatialTree)
                .unwrap(),
            IndexState::Built
        );
    }

    #[test]
    fn rejects_invalid_requests() {
        let fx = Fixture::new();
        fx.add(vec![1.0, 2.0, 3.0], json!({}));

        let zero_k = SearchRequest::new(fx.library, vec![1.0, 2.0, 3.0], 0);
        assert!(matches!(fx.engine.search(&zero_k), Err(Error::InvalidK)));

        let short = SearchRequest::new(fx.library, vec![1.0], 1);
        assert!(matches!(
            fx.engine.search(&short),
            Err(Error::DimensionMismatch {
                expected: 3,
                actual: 1
            })
        ));

        let unknown = SearchRequest::new(LibraryId::new(), vec![1.0], 1);
        assert!(matches!(
            fx.engine.search(&unknown),
            Err(Error::NotFound { kind: "library", .. })
        ));
        assert!(
            fx.engine
                .set_index_kind(LibraryId::new(), IndexKind::SpatialTree)
                .is_err()
        );
    }

    #[test]
    fn library_without_vectors_returns_nothing() {
        let fx = Fixture::new();
        fx.engine
            .repository()
            .create_chunk(fx.document, NewChunk::new("no vector"))
            .unwrap();
        let request = SearchRequest::new(fx.library, vec![1.0, 0.0], 3);
        assert!(fx.engine.search(&request).unwrap().is_empty());
    }

    #[test]
    fn dimension_outlives_deleted_vectors() {
        let fx = Fixture::new();
        let id = fx.add(vec![1.0, 0.0, 0.0], json!({}));
        fx.engine.repository().delete_chunk(id).unwrap();
        let request = SearchRequest::new(fx.library, vec![1.0], 1);
        assert!(matches!(
            fx.engine.search(&request),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn forget_library_drops_indexes_and_preference() {
        let fx = Fixture::new();
        fx.add(vec![1.0], json!({}));
        fx.engine
            .set_index_kind(fx.library, IndexKind::SpatialTree)
            .unwrap();
        fx.engine
            .build_index(fx.library, IndexKind::SpatialTree)
            .unwrap();

        fx.engine.forget_library(fx.library);
        assert_eq!(fx.engine.index_kind(fx.library), IndexKind::Exhaustive);
        assert_eq!(
            fx.engine
                .index_state(fx.library, IndexKind::SpatialTree)
                .unwrap(),
            IndexState::Unbuilt
        );
    }

    #[test]
    fn concurrent_searches_share_one_build() {
        let fx = Fixture::new();
        for i in 0..50 {
            fx.add(vec![i as f32, 1.0], json!({}));
        }
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    let request =
                        SearchRequest::new(fx.library, vec![0.0, 1.0], 3);
                    assert_eq!(fx.engine.search(&request).unwrap().len(), 3);
                });
            }
        });
        let stats = fx
            .engine
            .build_index(fx.library, IndexKind::Exhaustive)
            .unwrap();
        assert_eq!(stats.entries, 50);
        assert_eq!(stats.generation, 50);
    }
}
