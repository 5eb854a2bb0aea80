//! Vector layer.
//!
//! - **[`fp16`]**: IEEE-754 binary16 conversion for quantized blobs.
//! - **[`blob`]**: Vector blob codec (legacy v0 and v1 headers, fp32/fp16 payloads).
//! - **[`similarity`]**: Norms, normalization and SIMD dot products.
//! - **[`checksum`]**: SHA-256 verification of fetched blobs.
//! - **[`vector_store`]**: In-memory store with exact cosine top-k search.
//! - **[`embedder`]**: Embedder trait and the manifest model contract.
//! - **[`hash_embedder`]**: FNV-1a feature hashing embedder (deterministic fallback).
//! - **[`knowledge_base`]**: Manifest + store facade used by the CLI.

pub mod blob;
pub mod checksum;
pub mod embedder;
pub mod fp16;
pub mod hash_embedder;
pub mod knowledge_base;
pub mod similarity;
pub mod vector_store;
