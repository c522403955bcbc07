//! Service facade tying the repository, search engine and embedder together.
//!
//! This is the surface a transport layer would call. It adds the behaviour
//! that needs more than one collaborator: embedding chunk text on the way
//! in, embedding query text, and dropping index state with its library.

use std::sync::Arc;

use tracing::warn;

use crate::{
    config::StoreConfig,
    embedder::{Embedder, Unavailable},
    error::{Error, Result},
    filter::Filter,
    id::{ChunkId, DocumentId, LibraryId},
    index::{IndexKind, Metric},
    model::{
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
    },
    repository::Repository,
    search::{IndexState, IndexStats, SearchEngine, SearchHit, SearchRequest},
};

/// What a caller is searching with.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Vector(Vec<f32>),
    /// Raw text, embedded with the store's embedder.
    Text(String),
}

pub struct VectorStore {
    repo: Arc<Repository>,
    engine: SearchEngine,
    embedder: Arc<dyn Embedder>,
}

impl VectorStore {
    /// A store without an embedder; every vector must be supplied.
    pub fn new(config: StoreConfig) -> Self {
        Self::with_embedder(config, Arc::new(Unavailable))
    }

    pub fn with_embedder(
        config: StoreConfig,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let repo = Arc::new(Repository::new());
        Self {
            engine: SearchEngine::new(Arc::clone(&repo), config),
            repo,
            embedder,
        }
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn engine(&self) -> &SearchEngine {
        &self.engine
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    pub fn stats(&self) -> RepositoryStats {
        self.repo.stats()
    }

    // -- Libraries --

    pub fn create_library(&self, new: NewLibrary) -> Library {
        self.repo.create_library(new)
    }

    pub fn get_library(&self, id: LibraryId) -> Result<Library> {
        self.repo.get_library(id)
    }

    pub fn list_libraries(&self) -> Vec<Library> {
        self.repo.list_libraries()
    }

    pub fn update_library(
        &self,
        id: LibraryId,
        update: LibraryUpdate,
    ) -> Result<Library> {
        self.repo.update_library(id, update)
    }

    /// Delete a library with its documents and chunks, and drop every
    /// index built for it.
    pub fn delete_library(&self, id: LibraryId) -> Result<()> {
        self.repo.delete_library(id)?;
        self.engine.forget_library(id);
        Ok(())
    }

    // -- Documents --

    pub fn create_document(
        &self,
        library_id: LibraryId,
        new: NewDocument,
    ) -> Result<Document> {
        self.repo.create_document(library_id, new)
    }

    pub fn get_document(&self, id: DocumentId) -> Result<Document> {
        self.repo.get_document(id)
    }

    pub fn list_documents(&self, library_id: LibraryId) -> Result<Vec<Document>> {
        self.repo.list_documents(library_id)
    }

    pub fn update_document(
        &self,
        id: DocumentId,
        update: DocumentUpdate,
    ) -> Result<Document> {
        self.repo.update_document(id, update)
    }

    pub fn delete_document(&self, id: DocumentId) -> Result<()> {
        self.repo.delete_document(id)
    }

    // -- Chunks --

    /// Create a chunk, embedding its text first when `auto_embed` is set
    /// and no vector was supplied.
    ///
    /// An unavailable or failing embedder does not fail the call; the chunk
    /// is stored without a vector.
    pub fn create_chunk(
        &self,
        document_id: DocumentId,
        mut new: NewChunk,
        auto_embed: bool,
    ) -> Result<Chunk> {
        if auto_embed && new.embedding.is_none() {
            let library = self.repo.library_of_document(document_id)?;
            new.embedding = self.try_embed(library, &new.text)?;
        }
        self.repo.create_chunk(document_id, new)
    }

    pub fn get_chunk(&self, id: ChunkId) -> Result<Chunk> {
        self.repo.get_chunk(id)
    }

    pub fn list_chunks(&self, document_id: DocumentId) -> Result<Vec<Chunk>> {
        self.repo.list_chunks(document_id)
    }

    pub fn list_library_chunks(
        &self,
        library_id: LibraryId,
    ) -> Result<Vec<Chunk>> {
        self.repo.list_library_chunks(library_id)
    }

    /// Update a chunk. With `auto_embed`, new text without a new vector is
    /// re-embedded; on embedder failure the old vector is kept.
    pub fn update_chunk(
        &self,
        id: ChunkId,
        mut update: ChunkUpdate,
        auto_embed: bool,
    ) -> Result<Chunk> {
        if auto_embed && update.embedding.is_none() {
            if let Some(text) = &update.text {
                let library = self.repo.library_of_chunk(id)?;
                update.embedding = self.try_embed(library, text)?;
            }
        }
        self.repo.update_chunk(id, update)
    }

    pub fn delete_chunk(&self, id: ChunkId) -> Result<()> {
        self.repo.delete_chunk(id)
    }

    // -- Indexing and search --

    pub fn index_kind(&self, library: LibraryId) -> IndexKind {
        self.engine.index_kind(library)
    }

    pub fn set_index_kind(
        &self,
        library: LibraryId,
        kind: IndexKind,
    ) -> Result<()> {
        self.engine.set_index_kind(library, kind)
    }

    /// Build the library's preferred index kind now.
    pub fn build_index(&self, library: LibraryId) -> Result<IndexStats> {
        let kind = self.engine.index_kind(library);
        self.engine.build_index(library, kind)
    }

    pub fn index_state(
        &self,
        library: LibraryId,
        kind: IndexKind,
    ) -> Result<IndexState> {
        self.engine.index_state(library, kind)
    }

    pub fn search(&self, request: &SearchRequest) -> Result<Vec<SearchHit>> {
        self.engine.search(request)
    }

    /// Turn a [`Query`] into a vector, embedding text when needed.
    pub fn query_vector(&self, query: Query) -> Result<Vec<f32>> {
        match query {
            Query::Vector(vector) => Ok(vector),
            Query::Text(text) => {
                if !self.embedder.is_available() {
                    return Err(Error::EmbedderUnavailable);
                }
                self.embedder.embed_query(&text)
            }
        }
    }

    pub fn search_text(
        &self,
        library: LibraryId,
        text: &str,
        k: usize,
        metric: Metric,
        filter: Option<Filter>,
    ) -> Result<Vec<SearchHit>> {
        let vector = self.query_vector(Query::Text(text.to_string()))?;
        let mut request =
            SearchRequest::new(library, vector, k).with_metric(metric);
        request.filter = filter;
        self.engine.search(&request)
    }

    /// Embed chunk text for `library`. Embedder trouble is logged and
    /// yields `None`; only a missing library is an error.
    fn try_embed(
        &self,
        library: LibraryId,
        text: &str,
    ) -> Result<Option<Vec<f32>>> {
        if !self.embedder.is_available() {
            warn!("embedder unavailable; storing chunk without a vector");
            return Ok(None);
        }
        let expected = self.repo.get_library(library)?.dimension;
        if let (Some(expected), Some(produced)) =
            (expected, self.embedder.dimension())
        {
            if expected != produced {
                warn!(
                    %library,
                    expected,
                    produced,
                    "embedder dimension differs from library; storing chunk without a vector"
                );
                return Ok(None);
            }
        }
        match self.embedder.embed(text) {
            Ok(vector) => Ok(Some(vector)),
            Err(e) => {
                warn!(error = %e, "embedding failed; storing chunk without a vector");
                Ok(None)
            }
        }
    }
}
