//! JSON datasets describing libraries, documents and chunks to load.
//!
//! ```json
//! {
//!   "libraries": [{
//!     "name": "notes",
//!     "index": "spatial_tree",
//!     "documents": [{
//!       "title": "intro",
//!       "chunks": [
//!         { "text": "hello", "embedding": [0.1, 0.2], "metadata": { "n": 1 } }
//!       ]
//!     }]
//!   }]
//! }
//! ```

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::{
    error::Result,
    index::IndexKind,
    metadata::Metadata,
    model::{Library, NewChunk, NewDocument, NewLibrary},
    store::VectorStore,
};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Dataset {
    #[serde(default)]
    pub libraries: Vec<LibraryEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LibraryEntry {
    pub name: String,
    #[serde(default)]
    pub metadata: Metadata,
    /// Preferred index kind for the library.
    #[serde(default)]
    pub index: Option<IndexKind>,
    #[serde(default)]
    pub documents: Vec<DocumentEntry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentEntry {
    pub title: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub chunks: Vec<NewChunk>,
}

impl Dataset {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Create every library, document and chunk in `store`.
    ///
    /// Chunks without an embedding are embedded when `auto_embed` is set.
    /// Returns the created libraries in dataset order.
    pub fn load_into(
        self,
        store: &VectorStore,
        auto_embed: bool,
    ) -> Result<Vec<Library>> {
        let mut created = Vec::with_capacity(self.libraries.len());
        for entry in self.libraries {
            let library = store.create_library(NewLibrary {
                name: entry.name,
                metadata: entry.metadata,
            });
            if let Some(kind) = entry.index {
                store.set_index_kind(library.id, kind)?;
            }

            let mut chunks = 0;
            for doc in entry.documents {
                let document = store.create_document(
                    library.id,
                    NewDocument {
                        title: doc.title,
                        metadata: doc.metadata,
                    },
                )?;
                for chunk in doc.chunks {
                    store.create_chunk(document.id, chunk, auto_embed)?;
                    chunks += 1;
                }
            }

            debug!(library = %library.id, name = %library.name, chunks, "loaded library");
            created.push(store.get_library(library.id)?);
        }
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::StoreConfig,
        embedder::HashingEmbedder,
        error::Error,
    };

    const SAMPLE: &str = r#"{
        "libraries": [
            {
                "name": "notes",
                "index": "spatial_tree",
                "metadata": { "owner": "ana" },
                "documents": [
                    {
                        "title": "intro",
                        "chunks": [
                            { "text": "a", "embedding": [1.0, 0.0] },
                            { "text": "b", "embedding": [0.0, 1.0], "metadata": { "n": 2 } }
                        ]
                    },
                    { "title": "empty" }
                ]
            },
            { "name": "bare" }
        ]
    }"#;

    #[test]
    fn loads_full_hierarchy() {
        let store = VectorStore::new(StoreConfig::default());
        let libraries = Dataset::from_json_str(SAMPLE)
            .unwrap()
            .load_into(&store, false)
            .unwrap();

        assert_eq!(libraries.len(), 2);
        let notes = &libraries[0];
        assert_eq!(notes.name, "notes");
        assert_eq!(notes.documents.len(), 2);
        assert_eq!(notes.dimension, Some(2));
        assert_eq!(store.index_kind(notes.id), IndexKind::SpatialTree);
        assert_eq!(store.index_kind(libraries[1].id), IndexKind::Exhaustive);

        let stats = store.stats();
        assert_eq!((stats.libraries, stats.documents, stats.chunks), (2, 2, 2));
    }

    #[test]
    fn auto_embeds_text_only_chunks() {
        let store = VectorStore::with_embedder(
            StoreConfig::default(),
            Arc::new(HashingEmbedder::new(16)),
        );
        let dataset = Dataset::from_json_str(
            r#"{"libraries":[{"name":"l","documents":[{"title":"d","chunks":[{"text":"hello world"}]}]}]}"#,
        )
        .unwrap();
        let libraries = dataset.load_into(&store, true).unwrap();
        assert_eq!(libraries[0].dimension, Some(16));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            Dataset::from_json_str("{\"libraries\": 3}"),
            Err(Error::Json(_))
        ));

        let mismatched = r#"{"libraries":[{"name":"l","documents":[{"title":"d","chunks":[
            {"text":"a","embedding":[1.0]},
            {"text":"b","embedding":[1.0,2.0]}
        ]}]}]}"#;
        let store = VectorStore::new(StoreConfig::default());
        let err = Dataset::from_json_str(mismatched)
            .unwrap()
            .load_into(&store, false)
            .unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn reads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.json");
        std::fs::write(&path, SAMPLE).unwrap();
        let dataset = Dataset::from_path(&path).unwrap();
        assert_eq!(dataset.libraries.len(), 2);

        assert!(matches!(
            Dataset::from_path(&dir.path().join("missing.json")),
            Err(Error::Io(_))
        ));
    }
}
