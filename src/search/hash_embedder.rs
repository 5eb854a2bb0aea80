//! FNV-1a feature hashing embedder.
//!
//! Deterministic and dependency-free, so it is always available: tests, demos
//! and toy knowledge bases use it. It captures token overlap, not meaning.

use super::embedder::{EmbedOptions, Embedder, EmbedderError, EmbedderInfo, EmbedderResult};
use super::similarity::normalize_in_place;

pub const DEFAULT_DIMENSION: usize = 384;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone)]
pub struct HashEmbedder {
    id: String,
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> EmbedderResult<Self> {
        Self::with_id(format!("fnv1a-{dimension}"), dimension)
    }

    /// Report a custom id, e.g. to serve manifests built with this embedder
    /// under another name.
    pub fn with_id(id: impl Into<String>, dimension: usize) -> EmbedderResult<Self> {
        if dimension == 0 {
            return Err(EmbedderError::InvalidConfig(
                "dimension must be non-zero".to_string(),
            ));
        }
        Ok(Self {
            id: id.into(),
            dimension,
        })
    }

    pub fn default_dimension() -> Self {
        Self {
            id: format!("fnv1a-{DEFAULT_DIMENSION}"),
            dimension: DEFAULT_DIMENSION,
        }
    }

    fn embed_text(&self, text: &str, normalize: bool) -> Vec<f32> {
        let mut vector = vec![0.0_f32; self.dimension];
        for token in tokenize(text) {
            let hash = fnv1a(token.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            // High bit picks the sign so collisions partly cancel.
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        if normalize {
            normalize_in_place(&mut vector);
        }
        vector
    }
}

impl Embedder for HashEmbedder {
    fn info(&self) -> EmbedderInfo {
        EmbedderInfo {
            id: self.id.clone(),
            dimension: self.dimension,
            is_semantic: false,
        }
    }

    fn embed(&self, texts: &[&str], options: EmbedOptions) -> EmbedderResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| self.embed_text(text, options.normalize))
            .collect())
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
