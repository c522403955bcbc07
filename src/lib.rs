//! vecstore - an in-memory vector store with metadata filtering.
//!
//! Libraries own documents, documents own chunks, and chunks carry text, an
//! optional embedding and free-form metadata. Each library can be searched
//! by k-nearest-neighbour over an exhaustive index or a balanced k-d tree,
//! with cosine, Euclidean or dot-product scoring and an optional metadata
//! filter.
//!
//! # Quick start
//!
//! ```
//! use vecstore::{
//!     Filter, NewChunk, NewDocument, NewLibrary, SearchRequest, StoreConfig,
//!     VectorStore, index::Metric, metadata,
//! };
//!
//! let store = VectorStore::new(StoreConfig::default());
//! let library = store.create_library(NewLibrary::named("notes"));
//! let doc = store
//!     .create_document(library.id, NewDocument::titled("intro"))
//!     .unwrap();
//!
//! for (i, v) in [[1.0, 0.0], [0.0, 1.0], [0.7, 0.7]].into_iter().enumerate() {
//!     let meta = metadata::from_json(serde_json::json!({ "n": i })).unwrap();
//!     let chunk = NewChunk::new(format!("chunk {i}"))
//!         .with_embedding(v.to_vec())
//!         .with_metadata(meta);
//!     store.create_chunk(doc.id, chunk, false).unwrap();
//! }
//!
//! let filter = Filter::from_json(serde_json::json!({ "n": { "$gte": 1 } }))
//!     .unwrap();
//! let request = SearchRequest::new(library.id, vec![1.0, 0.0], 1)
//!     .with_metric(Metric::Cosine)
//!     .with_filter(filter);
//! let hits = store.search(&request).unwrap();
//! assert_eq!(hits[0].chunk.text, "chunk 2");
//! ```

pub mod config;
pub mod dataset;
pub mod embedder;
pub mod error;
pub mod filter;
pub mod id;
pub mod index;
pub mod metadata;
pub mod model;
pub mod repository;
pub mod search;
pub mod store;

pub use config::StoreConfig;
pub use dataset::Dataset;
pub use embedder::{Embedder, HashingEmbedder, Unavailable};
pub use error::{Error, Result};
pub use filter::Filter;
pub use id::{ChunkId, DocumentId, LibraryId};
pub use index::{IndexKind, Metric};
pub use metadata::{Metadata, Value};
pub use model::{
    Chunk,
    ChunkUpdate,
    Document,
    DocumentUpdate,
    Library,
    LibraryUpdate,
    NewChunk,
    NewDocument,
    NewLibrary,
    RepositoryStats,
};
pub use repository::Repository;
pub use search::{IndexState, IndexStats, SearchEngine, SearchHit, SearchRequest};
pub use store::{Query, VectorStore};
