//! Text-to-vector capability injected into the store.
//!
//! The core never calls an embedding service directly. It asks an
//! [`Embedder`] whether it is available and falls back to manually supplied
//! vectors when it is not.

use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
};

use crate::error::{Error, Result};

pub const DEFAULT_HASHING_DIMENSION: usize = 256;

pub trait Embedder: Send + Sync {
    /// Whether [`embed`](Self::embed) can currently succeed.
    fn is_available(&self) -> bool;

    /// Length of produced vectors, if known up front.
    fn dimension(&self) -> Option<usize>;

    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed search text. Defaults to [`embed`](Self::embed).
    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(text)
    }
}

/// The absent capability: every call fails with
/// [`Error::EmbedderUnavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Unavailable;

impl Embedder for Unavailable {
    fn is_available(&self) -> bool {
        false
    }

    fn dimension(&self) -> Option<usize> {
        None
    }

    fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::EmbedderUnavailable)
    }
}

/// Deterministic bag-of-words embedder using signed feature hashing.
///
/// Each lowercase alphanumeric token is hashed into one of `dimension`
/// buckets with a hash-derived sign, and the result is L2-normalised. Texts
/// sharing words land close together under cosine similarity. Text without
/// any token embeds to the zero vector.
#[derive(Debug, Clone, Copy)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASHING_DIMENSION)
    }
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let mut hasher = DefaultHasher::new();
        token.hash(&mut hasher);
        let hash = hasher.finish();
        let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
        ((hash % self.dimension as u64) as usize, sign)
    }
}

impl Embedder for HashingEmbedder {
    fn is_available(&self) -> bool {
        true
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokens(text) {
            let (bucket, sign) = self.bucket(&token);
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        Ok(vector)
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}
