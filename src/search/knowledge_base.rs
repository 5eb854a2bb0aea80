//! A manifest plus its loaded vector store, ready for queries.

use std::path::Path;
use std::time::Instant;

use thiserror::Error;

use crate::model::manifest::{Manifest, ManifestError};
use crate::search::embedder::{
    EmbedMode, EmbedOptions, Embedder, EmbedderError, check_model_contract,
};
use crate::search::similarity::normalize_in_place;
use crate::search::vector_store::{MetaFilter, SearchHit, StoreError, StoreOptions, VectorStore};
use crate::sources::fetch::{BlobFetcher, FetchConfig, FetchError};

#[derive(Debug, Error)]
pub enum KbError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embedder(#[from] EmbedderError),
}

#[derive(Debug)]
pub struct KnowledgeBase {
    manifest: Manifest,
    store: VectorStore,
}

impl KnowledgeBase {
    /// Validate `manifest` and build its store, fetching the external blob
    /// when `vectors_uri` is set.
    pub async fn open(
        manifest: Manifest,
        fetcher: &BlobFetcher,
        options: &StoreOptions,
    ) -> Result<Self, KbError> {
        manifest.validate()?;
        let start = Instant::now();

        let store = match manifest.vectors_uri.as_deref() {
            Some(uri) => {
                let bytes = fetcher.fetch(uri).await?;
                let fetched_ms = start.elapsed().as_millis();
                let store = VectorStore::from_blob(&manifest, &bytes, options)?;
                tracing::info!(
                    uri,
                    bytes = bytes.len(),
                    records = store.len(),
                    fetched_ms,
                    total_ms = start.elapsed().as_millis(),
                    "knowledge base loaded from vector blob"
                );
                store
            }
            None => {
                let store = VectorStore::from_inline(&manifest, options)?;
                tracing::info!(
                    records = store.len(),
                    total_ms = start.elapsed().as_millis(),
                    "knowledge base loaded from inline vectors"
                );
                store
            }
        };

        Ok(Self { manifest, store })
    }

    /// Load the manifest at `path`; relative `vectors_uri` paths resolve
    /// against its directory.
    pub async fn open_path(
        path: &Path,
        fetch_config: FetchConfig,
        options: &StoreOptions,
    ) -> Result<Self, KbError> {
        let manifest = Manifest::load(path)?;
        let base_dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf);
        let fetcher = BlobFetcher::new(FetchConfig {
            base_dir: fetch_config.base_dir.or(base_dir),
            ..fetch_config
        })?;
        Self::open(manifest, &fetcher, options).await
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Embed `text` with `embedder` and search. The embedder must match the
    /// manifest's model card exactly.
    pub fn query_text(
        &self,
        embedder: &dyn Embedder,
        text: &str,
        k: usize,
        filter: Option<&MetaFilter>,
    ) -> Result<Vec<SearchHit>, KbError> {
        check_model_contract(&self.manifest.model, &embedder.info())?;
        let query = embedder.embed_one(
            text,
            EmbedOptions {
                mode: EmbedMode::Query,
                normalize: true,
            },
        )?;
        self.query_vector(&query, k, filter)
    }

    /// Search with a raw query vector; a normalized copy is used.
    pub fn query_vector(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetaFilter>,
    ) -> Result<Vec<SearchHit>, KbError> {
        let start = Instant::now();
        let mut query = query.to_vec();
        normalize_in_place(&mut query);
        let hits = self.store.search(&query, k, filter)?;
        tracing::debug!(
            k,
            hits = hits.len(),
            filtered = filter.is_some(),
            elapsed_us = start.elapsed().as_micros(),
            "vector query"
        );
        Ok(hits)
    }
}
