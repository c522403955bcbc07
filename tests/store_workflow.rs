use std::sync::Arc;

use serde_json::json;
use vecstore::{
    ChunkUpdate,
    Error,
    Filter,
    HashingEmbedder,
    IndexKind,
    IndexState,
    LibraryId,
    Metric,
    NewChunk,
    NewDocument,
    NewLibrary,
    SearchRequest,
    StoreConfig,
    VectorStore,
    metadata,
};

fn store() -> VectorStore {
    VectorStore::new(StoreConfig::default())
}

fn chunk(vector: Vec<f32>, meta: serde_json::Value) -> NewChunk {
    NewChunk::new("chunk")
        .with_embedding(vector)
        .with_metadata(metadata::from_json(meta).unwrap())
}

#[test]
fn deleting_a_library_cascades() {
    let store = store();
    let library = store.create_library(NewLibrary::named("doomed"));
    let keep = store.create_library(NewLibrary::named("kept"));

    let mut documents = Vec::new();
    let mut chunks = Vec::new();
    for d in 0..3 {
        let doc = store
            .create_document(library.id, NewDocument::titled(format!("d{d}")))
            .unwrap();
        for c in 0..4 {
            let created = store
                .create_chunk(doc.id, chunk(vec![d as f32, c as f32], json!({})), false)
                .unwrap();
            chunks.push(created.id);
        }
        documents.push(doc.id);
    }
    let kept_doc = store
        .create_document(keep.id, NewDocument::titled("survivor"))
        .unwrap();

    store.delete_library(library.id).unwrap();

    assert!(matches!(
        store.get_library(library.id),
        Err(Error::NotFound { kind: "library", .. })
    ));
    for id in documents {
        assert!(matches!(
            store.get_document(id),
            Err(Error::NotFound { kind: "document", .. })
        ));
    }
    for id in chunks {
        assert!(matches!(
            store.get_chunk(id),
            Err(Error::NotFound { kind: "chunk", .. })
        ));
    }
    assert!(store.get_document(kept_doc.id).is_ok());
    let stats = store.stats();
    assert_eq!((stats.libraries, stats.documents, stats.chunks), (1, 1, 0));
}

#[test]
fn filtered_search_returns_only_matches_without_padding() {
    let store = store();
    let library = store.create_library(NewLibrary::named("lib"));
    let doc = store
        .create_document(library.id, NewDocument::titled("doc"))
        .unwrap();

    let mut expected = Vec::new();
    for i in 0..10 {
        let tag = if i % 5 == 0 { "rare" } else { "common" };
        let created = store
            .create_chunk(
                doc.id,
                chunk(vec![1.0, i as f32 * 0.1], json!({ "tag": tag })),
                false,
            )
            .unwrap();
        if tag == "rare" {
            expected.push(created.id);
        }
    }

    for kind in [IndexKind::Exhaustive, IndexKind::SpatialTree] {
        let request = SearchRequest::new(library.id, vec![1.0, 0.0], 5)
            .with_metric(Metric::Euclidean)
            .with_index_kind(kind)
            .with_filter(Filter::from_json(json!({ "tag": "rare" })).unwrap());
        let hits = store.search(&request).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.chunk.id).collect();
        assert_eq!(ids, expected, "{kind}");
    }
}

#[test]
fn filter_engine_examples() {
    let filter = Filter::from_json(json!({ "a.b": { "$gte": 5 } })).unwrap();
    let meta = |v: serde_json::Value| metadata::from_json(v).unwrap();

    assert!(filter.matches(&meta(json!({ "a": { "b": 7 } }))));
    assert!(!filter.matches(&meta(json!({ "a": { "b": 3 } }))));
    assert!(!filter.matches(&meta(json!({}))));

    let absent = Filter::from_json(json!({ "a.b": { "$exists": false } })).unwrap();
    assert!(absent.matches(&meta(json!({}))));

    assert!(matches!(
        Filter::from_json(json!({ "a": { "$near": 1 } })),
        Err(Error::InvalidFilterOperator(op)) if op == "$near"
    ));
}

#[test]
fn mutations_mark_indexes_stale_and_search_catches_up() {
    let store = store();
    let library = store.create_library(NewLibrary::named("lib"));
    let doc = store
        .create_document(library.id, NewDocument::titled("doc"))
        .unwrap();
    let a = store
        .create_chunk(doc.id, chunk(vec![1.0, 0.0], json!({})), false)
        .unwrap();

    let stats = store.build_index(library.id).unwrap();
    assert_eq!(stats.entries, 1);
    let state = |kind| store.index_state(library.id, kind).unwrap();
    assert_eq!(state(IndexKind::Exhaustive), IndexState::Built);

    store
        .update_chunk(
            a.id,
            ChunkUpdate {
                embedding: Some(vec![0.0, 1.0]),
                ..Default::default()
            },
            false,
        )
        .unwrap();
    assert_eq!(state(IndexKind::Exhaustive), IndexState::Stale);

    let hits = store
        .search(&SearchRequest::new(library.id, vec![0.0, 1.0], 1))
        .unwrap();
    assert!(hits[0].similarity > 0.999);
    assert_eq!(state(IndexKind::Exhaustive), IndexState::Built);

    // Mismatched vectors are rejected and leave the index untouched.
    assert!(matches!(
        store.create_chunk(doc.id, chunk(vec![1.0, 2.0, 3.0], json!({})), false),
        Err(Error::DimensionMismatch {
            expected: 2,
            actual: 3
        })
    ));
    assert_eq!(state(IndexKind::Exhaustive), IndexState::Built);
}

#[test]
fn unknown_library_and_bad_k() {
    let store = store();
    let missing = LibraryId::new();
    assert!(matches!(
        store.search(&SearchRequest::new(missing, vec![1.0], 1)),
        Err(Error::NotFound { .. })
    ));
    let library = store.create_library(NewLibrary::named("lib"));
    assert!(matches!(
        store.search(&SearchRequest::new(library.id, vec![1.0], 0)),
        Err(Error::InvalidK)
    ));
    assert!(
        store
            .search(&SearchRequest::new(library.id, vec![1.0], 4))
            .unwrap()
            .is_empty()
    );
}

#[test]
fn concurrent_writers_and_searchers() {
    let store = Arc::new(VectorStore::with_embedder(
        StoreConfig::default().with_default_index(IndexKind::SpatialTree),
        Arc::new(HashingEmbedder::new(64)),
    ));
    let library = store.create_library(NewLibrary::named("busy"));
    let doc = store
        .create_document(library.id, NewDocument::titled("doc"))
        .unwrap();

    std::thread::scope(|scope| {
        for w in 0..4 {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                for i in 0..25 {
                    store
                        .create_chunk(
                            doc.id,
                            NewChunk::new(format!("writer {w} item {i}")),
                            true,
                        )
                        .unwrap();
                }
            });
        }
        for _ in 0..4 {
            let store = Arc::clone(&store);
            scope.spawn(move || {
                for _ in 0..25 {
                    let hits = store
                        .search_text(library.id, "writer item", 5, Metric::Cosine, None)
                        .unwrap();
                    assert!(hits.len() <= 5);
                }
            });
        }
    });

    assert_eq!(store.list_chunks(doc.id).unwrap().len(), 100);
    let hits = store
        .search_text(library.id, "writer 3 item 3", 1, Metric::Cosine, None)
        .unwrap();
    assert_eq!(hits[0].chunk.text, "writer 3 item 3");
    assert_eq!(
        store.index_state(library.id, IndexKind::SpatialTree).unwrap(),
        IndexState::Built
    );
}
