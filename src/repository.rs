//! Thread-safe in-memory storage for libraries, documents and chunks.
//!
//! All state lives behind a single [`parking_lot::Mutex`]. Every public
//! operation takes the lock once and keeps it for its whole duration, so
//! cascading deletes and multi-entity reads are atomic with respect to each
//! other. Cascades run through private helpers on the already locked state
//! instead of re-entering public methods.
//!
//! Every read hands out an owned clone; callers can never alias the stored
//! records.

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    error::{Error, Result},
    id::{ChunkId, DocumentId, LibraryId},
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
};

/// Point-in-time copy of a library's embedded chunks, used to build indexes.
#[derive(Debug, Clone, Default)]
pub struct VectorSnapshot {
    /// Library change generation at the moment the copy was taken.
    pub generation: u64,
    pub dimension: Option<usize>,
    pub entries: Vec<(ChunkId, Vec<f32>)>,
}

#[derive(Debug, Default)]
pub struct Repository {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    libraries: HashMap<LibraryId, Library>,
    documents: HashMap<DocumentId, Document>,
    chunks: HashMap<ChunkId, Chunk>,
    // Reverse relation kept alongside the forward id lists in the records.
    chunk_library: HashMap<ChunkId, LibraryId>,
    // Bumped on every chunk mutation inside a library.
    generations: HashMap<LibraryId, u64>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    // -- Libraries --

    pub fn create_library(&self, new: NewLibrary) -> Library {
        let library = Library {
            id: LibraryId::new(),
            name: new.name,
            metadata: new.metadata,
            created_at: Utc::now(),
            documents: Vec::new(),
            dimension: None,
        };

        let mut inner = self.inner.lock();
        inner.generations.insert(library.id, 0);
        inner.libraries.insert(library.id, library.clone());
        debug!(library = %library.id, name = %library.name, "created library");
        library
    }

    pub fn get_library(&self, id: LibraryId) -> Result<Library> {
        self.inner.lock().library(id).cloned()
    }

    /// All libraries, oldest first.
    pub fn list_libraries(&self) -> Vec<Library> {
        let inner = self.inner.lock();
        let mut libraries: Vec<Library> =
            inner.libraries.values().cloned().collect();
        libraries.sort_by(|a, b| {
            a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id))
        });
        libraries
    }

    pub fn update_library(
        &self,
        id: LibraryId,
        update: LibraryUpdate,
    ) -> Result<Library> {
        let mut inner = self.inner.lock();
        let library = inner.library_mut(id)?;
        if let Some(name) = update.name {
            library.name = name;
        }
        if let Some(metadata) = update.metadata {
            library.metadata = metadata;
        }
        Ok(library.clone())
    }

    /// Delete a library together with all of its documents and chunks.
    pub fn delete_library(&self, id: LibraryId) -> Result<()> {
        let mut inner = self.inner.lock();
        let library = inner
            .libraries
            .remove(&id)
            .ok_or_else(|| Error::not_found("library", id))?;

        let mut removed_chunks = 0;
        for doc_id in &library.documents {
            removed_chunks += inner.remove_document(*doc_id);
        }
        inner.generations.remove(&id);

        debug!(
            library = %id,
            documents = library.documents.len(),
            chunks = removed_chunks,
            "deleted library"
        );
        Ok(())
    }

    pub fn library_exists(&self, id: LibraryId) -> bool {
        self.inner.lock().libraries.contains_key(&id)
    }

    // -- Documents --

    pub fn create_document(
        &self,
        library_id: LibraryId,
        new: NewDocument,
    ) -> Result<Document> {
        let mut inner = self.inner.lock();
        let now = Utc::now();
        let document = Document {
            id: DocumentId::new(),
            library_id,
            title: new.title,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
            chunks: Vec::new(),
        };

        inner.library_mut(library_id)?.documents.push(document.id);
        inner.documents.insert(document.id, document.clone());
        debug!(
            library = %library_id,
            document = %document.id,
            "created document"
        );
        Ok(document)
    }

    pub fn get_document(&self, id: DocumentId) -> Result<Document> {
        self.inner.lock().document(id).cloned()
    }

    /// Documents of a library in insertion order.
    pub fn list_documents(&self, library_id: LibraryId) -> Result<Vec<Document>> {
        let inner = self.inner.lock();
        let library = inner.library(library_id)?;
        Ok(library
            .documents
            .iter()
            .filter_map(|id| inner.documents.get(id).cloned())
            .collect())
    }

    pub fn update_document(
        &self,
        id: DocumentId,
        update: DocumentUpdate,
    ) -> Result<Document> {
        let mut inner = self.inner.lock();
        let document = inner.document_mut(id)?;
        if let Some(title) = update.title {
            document.title = title;
        }
        if let Some(metadata) = update.metadata {
            document.metadata = metadata;
        }
        document.updated_at = Utc::now();
        Ok(document.clone())
    }

    /// Delete a document and all of its chunks.
    pub fn delete_document(&self, id: DocumentId) -> Result<()> {
        let mut inner = self.inner.lock();
        let library_id = inner.document(id)?.library_id;

        if let Some(library) = inner.libraries.get_mut(&library_id) {
            library.documents.retain(|d| *d != id);
        }
        let removed_chunks = inner.remove_document(id);
        inner.bump(library_id);

        debug!(document = %id, chunks = removed_chunks, "deleted document");
        Ok(())
    }

    pub fn library_of_document(&self, id: DocumentId) -> Result<LibraryId> {
        Ok(self.inner.lock().document(id)?.library_id)
    }

    // -- Chunks --

    /// Store a new chunk under `document_id`.
    ///
    /// Fails with [`Error::DimensionMismatch`] when the embedding length
    /// differs from the library's established dimensionality; the first
    /// embedded chunk of a library establishes it.
    pub fn create_chunk(
        &self,
        document_id: DocumentId,
        new: NewChunk,
    ) -> Result<Chunk> {
        let mut inner = self.inner.lock();
        let library_id = inner.document(document_id)?.library_id;
        if let Some(embedding) = &new.embedding {
            inner.establish_dimension(library_id, embedding.len())?;
        }

        let now = Utc::now();
        let chunk = Chunk {
            id: ChunkId::new(),
            document_id,
            text: new.text,
            embedding: new.embedding,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        };

        inner.document_mut(document_id)?.chunks.push(chunk.id);
        inner.chunk_library.insert(chunk.id, library_id);
        inner.chunks.insert(chunk.id, chunk.clone());
        inner.bump(library_id);

        debug!(
            document = %document_id,
            chunk = %chunk.id,
            embedded = chunk.embedding.is_some(),
            "created chunk"
        );
        Ok(chunk)
    }

    pub fn get_chunk(&self, id: ChunkId) -> Result<Chunk> {
        self.inner
            .lock()
            .chunks
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("chunk", id))
    }

    /// Fetch every chunk in `ids` that still exists, in one critical section.
    pub fn get_chunks(&self, ids: &[ChunkId]) -> HashMap<ChunkId, Chunk> {
        let inner = self.inner.lock();
        ids.iter()
            .filter_map(|id| inner.chunks.get(id).map(|c| (*id, c.clone())))
            .collect()
    }

    /// Chunks of a document in insertion order.
    pub fn list_chunks(&self, document_id: DocumentId) -> Result<Vec<Chunk>> {
        let inner = self.inner.lock();
        let document = inner.document(document_id)?;
        Ok(inner.collect_chunks(&document.chunks))
    }

    /// Every chunk of a library, joined through its documents.
    pub fn list_library_chunks(
        &self,
        library_id: LibraryId,
    ) -> Result<Vec<Chunk>> {
        let inner = self.inner.lock();
        let library = inner.library(library_id)?;
        Ok(library
            .documents
            .iter()
            .filter_map(|id| inner.documents.get(id))
            .flat_map(|doc| inner.collect_chunks(&doc.chunks))
            .collect())
    }

    pub fn update_chunk(&self, id: ChunkId, update: ChunkUpdate) -> Result<Chunk> {
        let mut inner = self.inner.lock();
        let library_id = *inner
            .chunk_library
            .get(&id)
            .ok_or_else(|| Error::not_found("chunk", id))?;
        if let Some(embedding) = &update.embedding {
            inner.establish_dimension(library_id, embedding.len())?;
        }

        let chunk = inner
            .chunks
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("chunk", id))?;
        if let Some(text) = update.text {
            chunk.text = text;
        }
        if let Some(embedding) = update.embedding {
            chunk.embedding = Some(embedding);
        }
        if let Some(metadata) = update.metadata {
            chunk.metadata = metadata;
        }
        chunk.updated_at = Utc::now();
        let chunk = chunk.clone();
        inner.bump(library_id);

        debug!(chunk = %id, "updated chunk");
        Ok(chunk)
    }

    pub fn delete_chunk(&self, id: ChunkId) -> Result<()> {
        let mut inner = self.inner.lock();
        let chunk = inner
            .chunks
            .remove(&id)
            .ok_or_else(|| Error::not_found("chunk", id))?;
        if let Some(document) = inner.documents.get_mut(&chunk.document_id) {
            document.chunks.retain(|c| *c != id);
        }
        if let Some(library_id) = inner.chunk_library.remove(&id) {
            inner.bump(library_id);
        }

        debug!(chunk = %id, "deleted chunk");
        Ok(())
    }

    pub fn document_of_chunk(&self, id: ChunkId) -> Result<DocumentId> {
        self.inner
            .lock()
            .chunks
            .get(&id)
            .map(|c| c.document_id)
            .ok_or_else(|| Error::not_found("chunk", id))
    }

    pub fn library_of_chunk(&self, id: ChunkId) -> Result<LibraryId> {
        self.inner
            .lock()
            .chunk_library
            .get(&id)
            .copied()
            .ok_or_else(|| Error::not_found("chunk", id))
    }

    // -- Index support --

    /// Current change generation of a library.
    pub fn generation(&self, library_id: LibraryId) -> Result<u64> {
        self.inner
            .lock()
            .generations
            .get(&library_id)
            .copied()
            .ok_or_else(|| Error::not_found("library", library_id))
    }

    /// Copy out every embedded chunk of a library.
    ///
    /// The lock is held only while copying; index construction happens on
    /// the returned snapshot.
    pub fn snapshot(&self, library_id: LibraryId) -> Result<VectorSnapshot> {
        let inner = self.inner.lock();
        let library = inner.library(library_id)?;
        let entries = library
            .documents
            .iter()
            .filter_map(|id| inner.documents.get(id))
            .flat_map(|doc| doc.chunks.iter())
            .filter_map(|id| inner.chunks.get(id))
            .filter_map(|c| c.embedding.as_ref().map(|e| (c.id, e.clone())))
            .collect();

        Ok(VectorSnapshot {
            generation: inner.generations.get(&library_id).copied().unwrap_or(0),
            dimension: library.dimension,
            entries,
        })
    }

    pub fn stats(&self) -> RepositoryStats {
        let inner = self.inner.lock();
        RepositoryStats {
            libraries: inner.libraries.len(),
            documents: inner.documents.len(),
            chunks: inner.chunks.len(),
        }
    }
}

impl Inner {
    fn library(&self, id: LibraryId) -> Result<&Library> {
        self.libraries
            .get(&id)
            .ok_or_else(|| Error::not_found("library", id))
    }

    fn library_mut(&mut self, id: LibraryId) -> Result<&mut Library> {
        self.libraries
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("library", id))
    }

    fn document(&self, id: DocumentId) -> Result<&Document> {
        self.documents
            .get(&id)
            .ok_or_else(|| Error::not_found("document", id))
    }

    fn document_mut(&mut self, id: DocumentId) -> Result<&mut Document> {
        self.documents
            .get_mut(&id)
            .ok_or_else(|| Error::not_found("document", id))
    }

    fn collect_chunks(&self, ids: &[ChunkId]) -> Vec<Chunk> {
        ids.iter()
            .filter_map(|id| self.chunks.get(id).cloned())
            .collect()
    }

    fn bump(&mut self, library_id: LibraryId) {
        if let Some(generation) = self.generations.get_mut(&library_id) {
            *generation += 1;
        }
    }

    fn establish_dimension(
        &mut self,
        library_id: LibraryId,
        len: usize,
    ) -> Result<()> {
        if len == 0 {
            return Err(Error::EmptyEmbedding);
        }
        let library = self.library_mut(library_id)?;
        match library.dimension {
            Some(expected) if expected != len => Err(Error::DimensionMismatch {
                expected,
                actual: len,
            }),
            Some(_) => Ok(()),
            None => {
                library.dimension = Some(len);
                Ok(())
            }
        }
    }

    /// Remove a document and its chunks, leaving the owning library's
    /// document list to the caller. Returns the number of chunks removed.
    fn remove_document(&mut self, id: DocumentId) -> usize {
        let Some(document) = self.documents.remove(&id) else {
            return 0;
        };
        for chunk_id in &document.chunks {
            self.chunks.remove(chunk_id);
            self.chunk_library.remove(chunk_id);
        }
        document.chunks.len()
    }
}
