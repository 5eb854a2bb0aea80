//! Where vector blobs come from.
//!
//! A manifest's `vectors_uri` may name an IPFS object, an HTTP(S) URL, a
//! `file://` URL or a plain path. [`fetch::BlobFetcher`] resolves the URI
//! against an explicit [`fetch::FetchConfig`] and returns the raw bytes; the
//! vector store verifies and decodes them.
//!
//! ```rust,ignore
//! use kbvec::sources::fetch::{BlobFetcher, FetchConfig};
//!
//! let fetcher = BlobFetcher::new(FetchConfig::default())?;
//! let bytes = fetcher.fetch("ipfs://bafy.../vectors.bin").await?;
//! ```

pub mod fetch;
