//! Update manifest: one entry per artifact key.
//!
//! ```json
//! {
//!   "aquamon": {
//!     "latest_version": "0.4.0",
//!     "min_supported_version": "0.2.0",
//!     "files": { "aquamon": { "url": "https://…", "sha256": "…" } }
//!   }
//! }
//! ```
//!
//! Fields are optional at the serde layer so a malformed entry yields a
//! precise [`UpdateError::MissingField`] instead of a generic parse error.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::error::UpdateError;

#[derive(Debug, Clone, Deserialize)]
struct RawEntry {
    latest_version: Option<String>,
    min_supported_version: Option<String>,
    files: Option<BTreeMap<String, RawFile>>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawFile {
    url: Option<String>,
    sha256: Option<String>,
}

/// A downloadable file of a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseFile {
    /// Path relative to the install root (or the artifact name).
    pub path: String,
    pub url: String,
    /// Lowercase hex digest.
    pub sha256: String,
}

/// A manifest entry with every required field present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub latest_version: String,
    pub min_supported_version: Option<String>,
    pub files: Vec<ReleaseFile>,
}

impl Release {
    pub fn file(&self, path: &str) -> Option<&ReleaseFile> {
        self.files.iter().find(|f| f.path == path)
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_owned()).filter(|s| !s.is_empty())
}

/// Parse `body` and extract the entry for `key`.
pub fn parse_release(body: &[u8], key: &str) -> Result<Release, UpdateError> {
    let mut entries: BTreeMap<String, RawEntry> =
        serde_json::from_slice(body).map_err(|e| UpdateError::ManifestParse(e.to_string()))?;
    let entry = entries
        .remove(key)
        .ok_or_else(|| UpdateError::MissingEntry(key.to_owned()))?;

    let latest_version =
        non_empty(entry.latest_version).ok_or(UpdateError::MissingField("latest_version"))?;
    let raw_files = entry
        .files
        .filter(|f| !f.is_empty())
        .ok_or(UpdateError::MissingField("files"))?;

    let mut files = Vec::with_capacity(raw_files.len());
    for (path, file) in raw_files {
        let url = non_empty(file.url).ok_or(UpdateError::MissingField("url"))?;
        let sha256 = non_empty(file.sha256)
            .ok_or(UpdateError::MissingField("sha256"))?
            .to_ascii_lowercase();
        files.push(ReleaseFile { path, url, sha256 });
    }

    Ok(Release {
        latest_version,
        min_supported_version: non_empty(entry.min_supported_version),
        files,
    })
}
