//! Embedder trait and the model contract between a manifest and a query
//! embedder.
//!
//! Cosine scores only mean something when the query vector lives in the same
//! embedding space as the stored vectors. Before a text query runs, the
//! embedder's reported id and dimension must equal the manifest's model card
//! exactly ([`check_model_contract`]).

use thiserror::Error;

use crate::model::types::ModelCard;

#[derive(Debug, Error)]
pub enum EmbedderError {
    #[error(
        "embedder {actual_id} ({actual_dim}d) does not match model card {expected_id} ({expected_dim}d)"
    )]
    ContractMismatch {
        expected_id: String,
        expected_dim: usize,
        actual_id: String,
        actual_dim: usize,
    },

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("invalid embedder configuration: {0}")]
    InvalidConfig(String),
}

pub type EmbedderResult<T> = Result<T, EmbedderError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbedderInfo {
    /// Must equal `model.id` of the manifests this embedder queries.
    pub id: String,
    pub dimension: usize,
    /// Whether this is a semantic (ML) embedder.
    pub is_semantic: bool,
}

/// What the text is for. Some models embed queries and passages differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedMode {
    #[default]
    Query,
    Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmbedOptions {
    pub mode: EmbedMode,
    /// Scale every output vector to unit length.
    pub normalize: bool,
}

impl Default for EmbedOptions {
    fn default() -> Self {
        Self {
            mode: EmbedMode::Query,
            normalize: true,
        }
    }
}

pub trait Embedder: Send + Sync {
    fn info(&self) -> EmbedderInfo;

    /// One vector of length `info().dimension` per input text, in order.
    fn embed(&self, texts: &[&str], options: EmbedOptions) -> EmbedderResult<Vec<Vec<f32>>>;

    fn embed_one(&self, text: &str, options: EmbedOptions) -> EmbedderResult<Vec<f32>> {
        self.embed(&[text], options)?
            .pop()
            .ok_or_else(|| EmbedderError::EmbeddingFailed("embedder returned no vector".into()))
    }
}

/// Exact id and dimension equality between a model card and an embedder.
pub fn check_model_contract(card: &ModelCard, info: &EmbedderInfo) -> EmbedderResult<()> {
    if card.id != info.id || card.dim != info.dimension {
        return Err(EmbedderError::ContractMismatch {
            expected_id: card.id.clone(),
            expected_dim: card.dim,
            actual_id: info.id.clone(),
            actual_dim: info.dimension,
        });
    }
    Ok(())
}
