use kbvec::model::manifest::Manifest;
use kbvec::model::types::{Entry, Meta, ModelCard};
use kbvec::search::blob::{BlobQuant, HeaderVersion};
use kbvec::search::checksum::sha256_hex;
use kbvec::search::embedder::{EmbedMode, EmbedOptions, Embedder};
use kbvec::search::hash_embedder::HashEmbedder;
use kbvec::search::vector_store::{SearchHit, encode_b64_vector, pack_inline_vectors};
use serde_json::json;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

#[allow(dead_code)]
struct TestWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[allow(dead_code)]
pub struct EnvGuard {
    key: String,
    prev: Option<String>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn set(key: &str, val: impl AsRef<str>) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::set_var(key, val.as_ref()) };
        Self {
            key: key.to_string(),
            prev,
        }
    }

    pub fn unset(key: &str) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::remove_var(key) };
        Self {
            key: key.to_string(),
            prev,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(v) => unsafe { std::env::set_var(&self.key, v) },
            None => unsafe { std::env::remove_var(&self.key) },
        }
    }
}

/// Small documentation corpus embedded with the hash embedder.
#[allow(dead_code)]
pub const DOCS: &[(&str, &str, &str)] = &[
    ("install", "install the kbvec command line tool with cargo", "guide"),
    ("blob", "vector blob header carries magic version dim and count", "reference"),
    ("checksum", "verify the sha256 checksum of a fetched blob", "reference"),
    ("cosine", "cosine similarity ranks nearest vectors first", "guide"),
    ("fp16", "half precision payloads halve the blob size", "reference"),
];

/// Deterministic knowledge-base manifest generator for tests.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub struct KbFixtureBuilder {
    dimension: usize,
    docs: Vec<(String, String, String)>,
    base64: bool,
}

#[allow(dead_code)]
impl KbFixtureBuilder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            docs: DOCS
                .iter()
                .map(|(id, text, kind)| (id.to_string(), text.to_string(), kind.to_string()))
                .collect(),
            base64: false,
        }
    }

    pub fn with_doc(mut self, id: &str, text: &str, kind: &str) -> Self {
        self.docs
            .push((id.to_string(), text.to_string(), kind.to_string()));
        self
    }

    /// Store inline vectors as `embedding_b64` instead of JSON arrays.
    pub fn base64(mut self) -> Self {
        self.base64 = true;
        self
    }

    pub fn embedder(&self) -> HashEmbedder {
        HashEmbedder::new(self.dimension).expect("non-zero dimension")
    }

    pub fn build_inline(&self) -> Manifest {
        let embedder = self.embedder();
        let opts = EmbedOptions {
            mode: EmbedMode::Document,
            normalize: true,
        };
        let entries = self
            .docs
            .iter()
            .map(|(id, text, kind)| {
                let vector = embedder.embed_one(text, opts).expect("embed");
                let mut meta = Meta::new();
                meta.insert("kind".to_string(), json!(kind));
                let entry = Entry::new(id.as_str(), text.as_str()).with_meta(meta);
                if self.base64 {
                    Entry {
                        embedding_b64: Some(encode_b64_vector(&vector)),
                        ..entry
                    }
                } else {
                    entry.with_embedding(vector)
                }
            })
            .collect();
        let info = embedder.info();
        let mut manifest = Manifest::new(ModelCard::new(info.id, info.dimension, true), entries);
        manifest.name = Some("kbvec docs".to_string());
        manifest
    }

    /// Pack the inline vectors into `blob_name` under `dir` and return the
    /// external manifest pointing at it, plus the blob's sha256.
    pub fn build_external(
        &self,
        dir: &Path,
        blob_name: &str,
        quant: BlobQuant,
        version: HeaderVersion,
    ) -> (Manifest, String) {
        let mut manifest = self.build_inline();
        let bytes = pack_inline_vectors(&manifest, quant, version).expect("pack");
        std::fs::write(dir.join(blob_name), &bytes).expect("write blob");
        let sha = sha256_hex(&bytes);
        for entry in &mut manifest.entries {
            entry.embedding = None;
            entry.embedding_b64 = None;
        }
        manifest.vectors_uri = Some(blob_name.to_string());
        manifest.vectors_checksum = Some(format!("sha256:{sha}"));
        (manifest, sha)
    }
}

#[allow(dead_code)]
pub struct TempFixtureDir {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TempFixtureDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    pub fn write_manifest(&self, name: &str, manifest: &Manifest) -> PathBuf {
        let path = self.dir.path().join(name);
        let json = serde_json::to_string_pretty(manifest).expect("serialize manifest");
        std::fs::write(&path, json).expect("write manifest");
        path
    }
}

/// Helper to fluently assert `SearchHit` fields in tests.
#[allow(dead_code)]
pub struct SearchHitAssert<'a> {
    hit: &'a SearchHit,
}

#[allow(dead_code)]
pub fn assert_hit(hit: &SearchHit) -> SearchHitAssert<'_> {
    SearchHitAssert { hit }
}

#[allow(dead_code)]
impl SearchHitAssert<'_> {
    pub fn id(self, expected: impl AsRef<str>) -> Self {
        assert_eq!(self.hit.id, expected.as_ref(), "id mismatch for hit {:?}", self.hit);
        self
    }

    pub fn score_between(self, low: f32, high: f32) -> Self {
        assert!(
            (low..=high).contains(&self.hit.score),
            "score {} outside [{low}, {high}] for hit {}",
            self.hit.score,
            self.hit.id
        );
        self
    }

    pub fn meta_eq(self, key: &str, expected: serde_json::Value) -> Self {
        let actual = self.hit.meta.as_ref().and_then(|m| m.get(key));
        assert_eq!(
            actual,
            Some(&expected),
            "meta[{key}] mismatch for hit {}",
            self.hit.id
        );
        self
    }
}
