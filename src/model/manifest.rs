//! Knowledge-base manifest loading and structural validation.
//!
//! The vector store trusts what it is handed: required fields present, ids
//! unique, at least one entry. [`Manifest::validate`] is where those checks
//! live.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::types::{Entry, ModelCard};
use crate::search::blob::HeaderVersion;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to read manifest {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse manifest: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid manifest: {0}")]
    Invalid(String),

    #[error("duplicate entry id: {0}")]
    DuplicateId(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Manifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub model: ModelCard,
    pub entries: Vec<Entry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vectors_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vectors_checksum: Option<String>,
    /// Pins the blob header layout instead of sniffing it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vectors_format: Option<HeaderVersion>,
}

impl Manifest {
    pub fn new(model: ModelCard, entries: Vec<Entry>) -> Self {
        Self {
            name: None,
            description: None,
            model,
            entries,
            vectors_uri: None,
            vectors_checksum: None,
            vectors_format: None,
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_str(json)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, ManifestError> {
        let manifest: Self = serde_json::from_slice(bytes)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let bytes = std::fs::read(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_slice(&bytes)
    }

    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.model.id.trim().is_empty() {
            return Err(ManifestError::Invalid("model.id is empty".to_string()));
        }
        if self.model.dim == 0 {
            return Err(ManifestError::Invalid("model.dim must be positive".to_string()));
        }
        if self.entries.is_empty() {
            return Err(ManifestError::Invalid("manifest has no entries".to_string()));
        }
        let mut seen = HashSet::with_capacity(self.entries.len());
        for entry in &self.entries {
            if !seen.insert(entry.id.as_str()) {
                return Err(ManifestError::DuplicateId(entry.id.clone()));
            }
        }
        if let Some(uri) = &self.vectors_uri
            && uri.trim().is_empty()
        {
            return Err(ManifestError::Invalid("vectors_uri is empty".to_string()));
        }
        Ok(())
    }

    pub fn has_external_vectors(&self) -> bool {
        self.vectors_uri.is_some()
    }

    /// Declared blob checksum; the model card's checksum is the fallback.
    pub fn declared_checksum(&self) -> Option<&str> {
        self.vectors_checksum
            .as_deref()
            .or(self.model.checksum.as_deref())
    }
}
