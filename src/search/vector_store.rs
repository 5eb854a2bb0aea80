//! In-memory vector store with exact cosine top-k search.
//!
//! A store is built once, either from vectors inlined in the manifest
//! ([`VectorStore::from_inline`]) or from a fetched blob
//! ([`VectorStore::from_blob`]). Both paths end in the same record list and
//! share one search implementation. Stored vectors are unit length, so cosine
//! scoring is a dot product against a normalized query.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;

use base64::prelude::*;
use rayon::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::model::manifest::Manifest;
use crate::model::types::{Entry, Meta, ModelCard};
use crate::search::blob::{self, BlobError, BlobQuant, HeaderVersion};
use crate::search::checksum;
use crate::search::similarity::{cosine, is_unit, normalize_in_place};

/// Minimum record count before scoring fans out over rayon.
pub const PARALLEL_THRESHOLD: usize = 10_000;

/// Records per parallel work unit.
const PARALLEL_CHUNK_SIZE: usize = 1024;

/// Stored vectors are unit length to within this, or exactly zero.
pub const UNIT_TOLERANCE: f32 = 1e-4;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error("dimension mismatch for {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    #[error("vector count mismatch: manifest has {expected} entries, blob has {actual} vectors")]
    CountMismatch { expected: usize, actual: usize },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    #[error("invalid checksum {0:?}: expected 64 hex digits, optionally prefixed with sha256:")]
    InvalidChecksum(String),

    #[error("entry {id} has no usable embedding: {detail}")]
    MissingEmbedding { id: String, detail: &'static str },

    #[error("entry {id} has an invalid embedding: {reason}")]
    InvalidEmbedding { id: String, reason: String },

    #[error("no vectors to store")]
    EmptyStore,
}

/// Construction knobs shared by both paths.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Normalize every vector even when the model card says they already are.
    pub renormalize: bool,
    /// Record count at which search goes parallel; `None` keeps it sequential.
    pub parallel_threshold: Option<usize>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            renormalize: false,
            parallel_threshold: Some(PARALLEL_THRESHOLD),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub vector: Vec<f32>,
    pub id: String,
    pub text: String,
    pub meta: Option<Meta>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f32,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,
}

/// Predicate over entry metadata. Records without metadata see `None`.
pub struct MetaFilter {
    predicate: Box<dyn Fn(Option<&Meta>) -> bool + Send + Sync>,
}

impl MetaFilter {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(Option<&Meta>) -> bool + Send + Sync + 'static,
    {
        Self {
            predicate: Box::new(predicate),
        }
    }

    /// Matches records whose `meta[key]` equals `value`.
    pub fn field_eq(key: impl Into<String>, value: serde_json::Value) -> Self {
        let key = key.into();
        Self::new(move |meta| meta.and_then(|m| m.get(&key)) == Some(&value))
    }

    pub fn matches(&self, meta: Option<&Meta>) -> bool {
        (self.predicate)(meta)
    }
}

impl fmt::Debug for MetaFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaFilter").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct VectorStore {
    model: ModelCard,
    records: Vec<VectorRecord>,
    parallel_threshold: Option<usize>,
}

impl VectorStore {
    /// Build from vectors carried on the manifest entries.
    pub fn from_inline(manifest: &Manifest, options: &StoreOptions) -> Result<Self, StoreError> {
        let model = &manifest.model;
        let mut records = Vec::with_capacity(manifest.entries.len());
        for entry in &manifest.entries {
            let vector = inline_vector(entry)?;
            if vector.len() != model.dim {
                return Err(StoreError::DimensionMismatch {
                    context: format!("entry {}", entry.id),
                    expected: model.dim,
                    actual: vector.len(),
                });
            }
            records.push(record_for(entry, vector));
        }
        tracing::debug!(
            model = %model.id,
            records = records.len(),
            "built inline vector records"
        );
        Self::from_records(model.clone(), records, options)
    }

    /// Build from a fetched blob, pairing blob row `i` with entry `i`.
    ///
    /// The declared checksum, when present, is verified over the raw bytes
    /// before anything is decoded.
    pub fn from_blob(
        manifest: &Manifest,
        bytes: &[u8],
        options: &StoreOptions,
    ) -> Result<Self, StoreError> {
        let model = &manifest.model;
        if let Some(declared) = manifest.declared_checksum() {
            checksum::verify_sha256(bytes, declared)?;
            tracing::debug!(bytes = bytes.len(), "blob checksum verified");
        }

        let decoded = match manifest.vectors_format {
            Some(version) => blob::decode_as(bytes, version)?,
            None => blob::decode(bytes)?,
        };
        let header = decoded.header;
        if header.dim as usize != model.dim {
            return Err(StoreError::DimensionMismatch {
                context: "vector blob header".to_string(),
                expected: model.dim,
                actual: header.dim as usize,
            });
        }
        if decoded.vectors.len() != manifest.entries.len() {
            return Err(StoreError::CountMismatch {
                expected: manifest.entries.len(),
                actual: decoded.vectors.len(),
            });
        }
        tracing::debug!(
            model = %model.id,
            version = ?header.version,
            quant = %header.quant,
            dim = header.dim,
            count = header.count,
            "decoded vector blob"
        );

        let records = manifest
            .entries
            .iter()
            .zip(decoded.vectors)
            .map(|(entry, vector)| record_for(entry, vector))
            .collect();
        Self::from_records(model.clone(), records, options)
    }

    fn from_records(
        model: ModelCard,
        mut records: Vec<VectorRecord>,
        options: &StoreOptions,
    ) -> Result<Self, StoreError> {
        if records.is_empty() {
            return Err(StoreError::EmptyStore);
        }
        for record in &records {
            if let Some(pos) = record.vector.iter().position(|x| !x.is_finite()) {
                return Err(StoreError::InvalidEmbedding {
                    id: record.id.clone(),
                    reason: format!("non-finite value {} at index {pos}", record.vector[pos]),
                });
            }
        }

        if !model.normalize || options.renormalize {
            for record in &mut records {
                normalize_in_place(&mut record.vector);
            }
        } else {
            let mut repaired = 0usize;
            for record in &mut records {
                let zero = record.vector.iter().all(|x| *x == 0.0);
                if !zero && !is_unit(&record.vector, UNIT_TOLERANCE) {
                    normalize_in_place(&mut record.vector);
                    repaired += 1;
                }
            }
            if repaired > 0 {
                tracing::warn!(
                    model = %model.id,
                    repaired,
                    "model card declares normalized vectors but some were not unit length"
                );
            }
        }
        debug_assert!(
            records
                .iter()
                .all(|r| is_unit(&r.vector, UNIT_TOLERANCE) || r.vector.iter().all(|x| *x == 0.0)),
            "stored vectors must be unit length or zero"
        );

        Ok(Self {
            model,
            records,
            parallel_threshold: options.parallel_threshold,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.model.dim
    }

    pub fn model(&self) -> &ModelCard {
        &self.model
    }

    pub fn records(&self) -> &[VectorRecord] {
        &self.records
    }

    /// Top-`k` records by cosine similarity to a unit-length `query`.
    ///
    /// Hits are ordered by score descending; equal scores keep insertion
    /// order. Fewer than `k` eligible records yields all of them.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&MetaFilter>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if query.len() != self.model.dim {
            return Err(StoreError::DimensionMismatch {
                context: "query".to_string(),
                expected: self.model.dim,
                actual: query.len(),
            });
        }
        let k = k.min(self.records.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored = match self.parallel_threshold {
            Some(threshold) if self.records.len() >= threshold => {
                self.top_k_parallel(query, k, filter)
            }
            _ => top_k_in(&self.records, 0, query, k, filter),
        };
        scored.sort_by(|a, b| b.cmp(a));

        Ok(scored
            .into_iter()
            .map(|entry| {
                let record = &self.records[entry.index];
                SearchHit {
                    id: record.id.clone(),
                    score: entry.score,
                    text: record.text.clone(),
                    meta: record.meta.clone(),
                }
            })
            .collect())
    }

    /// Chunked scan with thread-local heaps, merged into one top-k.
    fn top_k_parallel(&self, query: &[f32], k: usize, filter: Option<&MetaFilter>) -> Vec<Scored> {
        let partials: Vec<Vec<Scored>> = self
            .records
            .par_chunks(PARALLEL_CHUNK_SIZE)
            .enumerate()
            .map(|(chunk_idx, chunk)| {
                top_k_in(chunk, chunk_idx * PARALLEL_CHUNK_SIZE, query, k, filter)
            })
            .collect();

        let mut heap = BinaryHeap::with_capacity(k + 1);
        for entry in partials.into_iter().flatten() {
            heap.push(std::cmp::Reverse(entry));
            if heap.len() > k {
                heap.pop();
            }
        }
        heap.into_iter().map(|r| r.0).collect()
    }
}

fn top_k_in(
    records: &[VectorRecord],
    base: usize,
    query: &[f32],
    k: usize,
    filter: Option<&MetaFilter>,
) -> Vec<Scored> {
    let mut heap = BinaryHeap::with_capacity(k + 1);
    for (offset, record) in records.iter().enumerate() {
        if let Some(filter) = filter
            && !filter.matches(record.meta.as_ref())
        {
            continue;
        }
        heap.push(std::cmp::Reverse(Scored {
            score: cosine(query, &record.vector),
            index: base + offset,
        }));
        if heap.len() > k {
            heap.pop();
        }
    }
    heap.into_iter().map(|r| r.0).collect()
}

/// Candidate hit. Ordered so that "greater" means "ranks first": higher score,
/// then lower insertion index.
#[derive(Debug, Clone, Copy)]
struct Scored {
    score: f32,
    index: usize,
}

impl PartialEq for Scored {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| other.index.cmp(&self.index))
    }
}

fn record_for(entry: &Entry, vector: Vec<f32>) -> VectorRecord {
    VectorRecord {
        vector,
        id: entry.id.clone(),
        text: entry.text.clone(),
        meta: entry.meta.clone(),
    }
}

/// The vector carried inline on `entry`, exactly as written.
pub fn inline_vector(entry: &Entry) -> Result<Vec<f32>, StoreError> {
    match (&entry.embedding, &entry.embedding_b64) {
        (Some(values), None) => Ok(values.clone()),
        (None, Some(encoded)) => decode_b64_vector(&entry.id, encoded),
        (None, None) => Err(StoreError::MissingEmbedding {
            id: entry.id.clone(),
            detail: "neither embedding nor embedding_b64 is set",
        }),
        (Some(_), Some(_)) => Err(StoreError::MissingEmbedding {
            id: entry.id.clone(),
            detail: "both embedding and embedding_b64 are set",
        }),
    }
}

fn decode_b64_vector(id: &str, encoded: &str) -> Result<Vec<f32>, StoreError> {
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| StoreError::InvalidEmbedding {
            id: id.to_string(),
            reason: format!("bad base64: {e}"),
        })?;
    if !bytes.len().is_multiple_of(4) {
        return Err(StoreError::InvalidEmbedding {
            id: id.to_string(),
            reason: format!("{} bytes is not a whole number of f32 values", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Base64 form of `vector` as accepted in `embedding_b64`.
pub fn encode_b64_vector(vector: &[f32]) -> String {
    let bytes: Vec<u8> = vector.iter().flat_map(|v| v.to_le_bytes()).collect();
    BASE64_STANDARD.encode(bytes)
}

/// Encode a manifest's inline vectors into a blob, unnormalized and in entry
/// order, so the manifest can point at the blob instead.
pub fn pack_inline_vectors(
    manifest: &Manifest,
    quant: BlobQuant,
    version: HeaderVersion,
) -> Result<Vec<u8>, StoreError> {
    let mut vectors = Vec::with_capacity(manifest.entries.len());
    for entry in &manifest.entries {
        let vector = inline_vector(entry)?;
        if vector.len() != manifest.model.dim {
            return Err(StoreError::DimensionMismatch {
                context: format!("entry {}", entry.id),
                expected: manifest.model.dim,
                actual: vector.len(),
            });
        }
        vectors.push(vector);
    }
    if vectors.is_empty() {
        return Err(StoreError::EmptyStore);
    }
    Ok(blob::encode_with(&vectors, quant, version)?)
}
