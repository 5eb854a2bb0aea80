//! Manifest data model.

pub mod manifest;
pub mod types;
