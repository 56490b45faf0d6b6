//! `manifest.json`: SHA-1 digest of every other file in the bundle.

use std::collections::BTreeMap;

use sha1::{Digest, Sha1};

/// File names that never appear in the manifest.
const UNLISTED: &[&str] = &["manifest.json", "signature"];

/// Lowercase hex SHA-1 of `data`.
pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Ordered map of file name to content digest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    /// Build a manifest over `files`, skipping the manifest and signature.
    pub fn from_files<'a, I>(files: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [u8])>,
    {
        let entries = files
            .into_iter()
            .filter(|(name, _)| !UNLISTED.contains(name))
            .map(|(name, data)| (name.to_string(), sha1_hex(data)))
            .collect();
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialise to the exact bytes that get signed.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.entries)
    }
}
