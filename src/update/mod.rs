//! Update manager: manifest → version compare → download → SHA-256 verify
//! → atomic replace → re-exec.
//!
//! ```text
//!  check():  GET manifest ─▶ entry[key] ─▶ min_supported? ─▶ latest > current?
//!  apply():  GET artifact ─▶ sha256 ─▶ <live>.new (fsync) ─▶ <live>.bak ─▶ rename
//! ```
//!
//! Every failure before the final rename leaves the live file untouched
//! and removes the staged `.new` file.  [`bundle`] applies the same
//! scheme to a whole directory of files.

pub mod bundle;
pub mod fetch;
pub mod manifest;
pub mod version;

use std::cmp::Ordering;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::UpdateError;

use fetch::{sha256_hex, Fetcher};
use manifest::{Release, ReleaseFile};

/// Outcome of a manifest check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateStatus {
    UpToDate { latest: String },
    Available(Release),
}

/// Fetch the manifest and extract the entry for `key`.
pub fn fetch_release(fetcher: &impl Fetcher, url: &str, key: &str) -> Result<Release, UpdateError> {
    if url.is_empty() {
        return Err(UpdateError::Fetch("no manifest URL configured".into()));
    }
    let body = fetcher.get(url)?;
    manifest::parse_release(&body, key)
}

/// Decide whether `release` is an update for `current`.
pub fn evaluate_release(release: Release, current: &str) -> Result<UpdateStatus, UpdateError> {
    if let Some(minimum) = &release.min_supported_version {
        if version::compare(current, minimum) == Ordering::Less {
            return Err(UpdateError::Unsupported {
                current: current.to_owned(),
                minimum: minimum.clone(),
            });
        }
    }
    if version::compare(&release.latest_version, current) == Ordering::Greater {
        Ok(UpdateStatus::Available(release))
    } else {
        Ok(UpdateStatus::UpToDate {
            latest: release.latest_version,
        })
    }
}

/// Download `file` and check its digest.  Nothing is written.
pub fn download_verified(fetcher: &impl Fetcher, file: &ReleaseFile) -> Result<Vec<u8>, UpdateError> {
    let data = fetcher.get(&file.url)?;
    let actual = sha256_hex(&data);
    if actual != file.sha256 {
        warn!("Update: {} hash mismatch", file.path);
        return Err(UpdateError::HashMismatch {
            file: file.path.clone(),
            expected: file.sha256.clone(),
            actual,
        });
    }
    Ok(data)
}

/// `path` with `suffix` appended to its file name.
pub(crate) fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.file_name().map(OsString::from).unwrap_or_default();
    name.push(suffix);
    path.with_file_name(name)
}

pub(crate) fn io_err(step: &'static str) -> impl Fn(std::io::Error) -> UpdateError {
    move |e| UpdateError::Io {
        step,
        detail: e.to_string(),
    }
}

/// Write `data` to `path` and fsync it.  A partial file is removed.
pub(crate) fn write_synced(path: &Path, data: &[u8]) -> Result<(), UpdateError> {
    let result = File::create(path)
        .and_then(|mut f| f.write_all(data).and_then(|()| f.sync_all()))
        .map_err(io_err("write staged file"));
    if result.is_err() {
        let _ = fs::remove_file(path);
    }
    result
}

// ───────────────────────────────────────────────────────────────
// Single-artifact manager
// ───────────────────────────────────────────────────────────────

pub struct UpdateManager<F: Fetcher> {
    fetcher: F,
    manifest_url: String,
    artifact_key: String,
    current_version: String,
    live_path: PathBuf,
}

impl<F: Fetcher> UpdateManager<F> {
    pub fn new(
        fetcher: F,
        manifest_url: impl Into<String>,
        artifact_key: impl Into<String>,
        current_version: impl Into<String>,
        live_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher,
            manifest_url: manifest_url.into(),
            artifact_key: artifact_key.into(),
            current_version: current_version.into(),
            live_path: live_path.into(),
        }
    }

    pub fn live_path(&self) -> &Path {
        &self.live_path
    }

    pub fn check(&self) -> Result<UpdateStatus, UpdateError> {
        let release = fetch_release(&self.fetcher, &self.manifest_url, &self.artifact_key)?;
        let status = evaluate_release(release, &self.current_version)?;
        match &status {
            UpdateStatus::UpToDate { latest } => {
                info!("Update: up to date (current {}, latest {})", self.current_version, latest);
            }
            UpdateStatus::Available(r) => {
                info!("Update: {} available (current {})", r.latest_version, self.current_version);
            }
        }
        Ok(status)
    }

    /// The release file that replaces the live artifact: the one named by
    /// the artifact key, or the only file.
    fn artifact<'r>(&self, release: &'r Release) -> Result<&'r ReleaseFile, UpdateError> {
        release
            .file(&self.artifact_key)
            .or(match release.files.as_slice() {
                [only] => Some(only),
                _ => None,
            })
            .ok_or_else(|| UpdateError::MissingEntry(format!("{}/files", self.artifact_key)))
    }

    /// Download, verify and atomically replace the live artifact.
    pub fn apply(&self, release: &Release) -> Result<(), UpdateError> {
        let file = self.artifact(release)?;
        let data = download_verified(&self.fetcher, file)?;

        let staged = with_suffix(&self.live_path, ".new");
        let backup = with_suffix(&self.live_path, ".bak");
        write_synced(&staged, &data)?;

        let finish = || -> Result<(), UpdateError> {
            let perms = fs::metadata(&self.live_path)
                .map_err(io_err("read live metadata"))?
                .permissions();
            fs::set_permissions(&staged, perms).map_err(io_err("copy permissions"))?;
            fs::copy(&self.live_path, &backup).map_err(io_err("backup live file"))?;
            fs::rename(&staged, &self.live_path).map_err(io_err("replace live file"))
        };
        if let Err(e) = finish() {
            let _ = fs::remove_file(&staged);
            return Err(e);
        }
        info!(
            "Update: {} replaced with {} (backup at {})",
            self.live_path.display(),
            release.latest_version,
            backup.display()
        );
        Ok(())
    }

    /// Replace the current process with the live artifact, keeping the
    /// command-line arguments.  Only returns on failure.
    #[cfg(unix)]
    pub fn restart(&self) -> UpdateError {
        use std::os::unix::process::CommandExt;

        info!("Update: restarting {}", self.live_path.display());
        let err = std::process::Command::new(&self.live_path)
            .args(std::env::args_os().skip(1))
            .exec();
        UpdateError::Restart(err.to_string())
    }

    #[cfg(not(unix))]
    pub fn restart(&self) -> UpdateError {
        UpdateError::Restart("re-exec is only supported on unix".into())
    }
}
