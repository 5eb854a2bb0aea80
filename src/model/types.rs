//! Manifest-level structs shared by the loader and the vector store.

use serde::{Deserialize, Serialize};

/// Free-form entry metadata.
pub type Meta = serde_json::Map<String, serde_json::Value>;

/// Component precision declared on a model card.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Quantization {
    Fp32,
    Fp16,
    Int8,
}

/// The embedding space every vector of a knowledge base belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelCard {
    pub id: String,
    pub dim: usize,
    /// True when the stored vectors are already unit length.
    #[serde(default)]
    pub normalize: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<Quantization>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl ModelCard {
    pub fn new(id: impl Into<String>, dim: usize, normalize: bool) -> Self {
        Self {
            id: id.into(),
            dim,
            normalize,
            quantization: None,
            checksum: None,
        }
    }
}

/// One passage of the knowledge base.
///
/// Inline manifests carry the vector in exactly one of `embedding` (numbers)
/// or `embedding_b64` (base64 of little-endian f32 bytes). Manifests backed by
/// a blob leave both empty and pair entries with blob rows by position.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entry {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_b64: Option<String>,
}

impl Entry {
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            meta: None,
            embedding: None,
            embedding_b64: None,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn with_meta(mut self, meta: Meta) -> Self {
        self.meta = Some(meta);
        self
    }
}
