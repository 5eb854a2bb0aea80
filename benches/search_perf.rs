use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use kbvec::model::manifest::Manifest;
use kbvec::model::types::{Entry, ModelCard};
use kbvec::search::blob::{self, BlobQuant};
use kbvec::search::embedder::{EmbedOptions, Embedder};
use kbvec::search::hash_embedder::HashEmbedder;
use kbvec::search::similarity::{dot_product_scalar_bench, dot_product_simd_bench};
use kbvec::search::vector_store::{MetaFilter, StoreOptions, VectorStore};
use serde_json::json;
use std::hint::black_box;

// =============================================================================
// Embedding and dot product
// =============================================================================

fn bench_hash_embed_1000_docs(c: &mut Criterion) {
    let embedder = HashEmbedder::default_dimension();
    let docs: Vec<String> = (0..1000)
        .map(|i| format!("Document number {i} about vector blobs, checksums and cosine search over a small knowledge base."))
        .collect();

    c.bench_function("hash_embed_1000_docs", |b| {
        b.iter(|| {
            for doc in &docs {
                let _ = black_box(embedder.embed_one(doc, EmbedOptions::default()));
            }
        })
    });
}

fn bench_dot_product(c: &mut Criterion) {
    let a = build_query(384);
    let b_vec: Vec<f32> = a.iter().rev().copied().collect();
    let mut group = c.benchmark_group("dot_product_384");
    group.bench_function("scalar", |b| {
        b.iter(|| black_box(dot_product_scalar_bench(black_box(&a), black_box(&b_vec))))
    });
    group.bench_function("simd", |b| {
        b.iter(|| black_box(dot_product_simd_bench(black_box(&a), black_box(&b_vec))))
    });
    group.finish();
}

// =============================================================================
// Blob codec
// =============================================================================

fn bench_blob_decode_10k(c: &mut Criterion) {
    let vectors = build_vectors(10_000, 384);
    let mut group = c.benchmark_group("blob_decode_10k");
    for quant in [BlobQuant::Fp32, BlobQuant::Fp16] {
        let bytes = blob::encode(&vectors, quant).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(quant), &bytes, |b, bytes| {
            b.iter(|| black_box(blob::decode(black_box(bytes)).unwrap()));
        });
    }
    group.finish();
}

// =============================================================================
// Vector store search
// =============================================================================

/// Target: <5ms
fn bench_store_search_10k(c: &mut Criterion) {
    let store = build_store(10_000, 384, StoreOptions::default());
    let query = unit_query(384);

    c.bench_function("store_search_10k", |b| {
        b.iter(|| black_box(store.search(black_box(&query), 25, None).unwrap()));
    });
}

fn bench_store_search_50k_filtered(c: &mut Criterion) {
    let store = build_store(50_000, 384, StoreOptions::default());
    let query = unit_query(384);
    let filter = MetaFilter::field_eq("shard", json!(3));

    c.bench_function("store_search_50k_filtered", |b| {
        b.iter(|| black_box(store.search(black_box(&query), 25, Some(&filter)).unwrap()));
    });
}

/// Sequential vs rayon top-k at several store sizes.
fn bench_store_search_scaling(c: &mut Criterion) {
    let dimension = 384;
    let query = unit_query(dimension);
    let mut group = c.benchmark_group("store_search_scaling");

    for size in [1_000, 10_000, 50_000] {
        let sequential = build_store(
            size,
            dimension,
            StoreOptions {
                renormalize: false,
                parallel_threshold: None,
            },
        );
        let parallel = build_store(
            size,
            dimension,
            StoreOptions {
                renormalize: false,
                parallel_threshold: Some(1),
            },
        );
        group.bench_with_input(BenchmarkId::new("sequential", size), &size, |b, _| {
            b.iter(|| black_box(sequential.search(black_box(&query), 25, None).unwrap()));
        });
        group.bench_with_input(BenchmarkId::new("parallel", size), &size, |b, _| {
            b.iter(|| black_box(parallel.search(black_box(&query), 25, None).unwrap()));
        });
    }
    group.finish();
}

fn build_vectors(count: usize, dimension: usize) -> Vec<Vec<f32>> {
    (0..count)
        .map(|idx| {
            (0..dimension)
                .map(|d| ((idx + d * 31) % 997) as f32 / 997.0 - 0.5)
                .collect()
        })
        .collect()
}

fn build_store(count: usize, dimension: usize, options: StoreOptions) -> VectorStore {
    let entries = build_vectors(count, dimension)
        .into_iter()
        .enumerate()
        .map(|(idx, vector)| {
            let meta = json!({"shard": idx % 8}).as_object().cloned().unwrap();
            Entry::new(format!("doc-{idx}"), "bench").with_embedding(vector).with_meta(meta)
        })
        .collect();
    let manifest = Manifest::new(ModelCard::new("bench-embedder", dimension, false), entries);
    VectorStore::from_inline(&manifest, &options).unwrap()
}

fn build_query(dimension: usize) -> Vec<f32> {
    (0..dimension).map(|d| (d % 17) as f32 / 17.0).collect()
}

fn unit_query(dimension: usize) -> Vec<f32> {
    let mut query = build_query(dimension);
    kbvec::search::similarity::normalize_in_place(&mut query);
    query
}

criterion_group!(
    benches,
    bench_hash_embed_1000_docs,
    bench_dot_product,
    bench_blob_decode_10k,
    bench_store_search_10k,
    bench_store_search_50k_filtered,
    bench_store_search_scaling,
);
criterion_main!(benches);
