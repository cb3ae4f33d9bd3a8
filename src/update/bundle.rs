//! Multi-file bundle update under an install root.
//!
//! Three phases, each leaving the tree consistent on failure:
//!
//! 1. download and verify every file into `<path>.new`
//! 2. back up every existing original to `backup/<path with / → _>.bak`
//! 3. rename each `.new` into place, restoring from backup on failure
//!
//! On success `VERSION` holds the new version and `.last_update_check`
//! the unix time of the update.  Applying a release that is not newer
//! than `VERSION` reinstalls it, which repairs locally modified files.

use std::cmp::Ordering;
use std::fs;
use std::path::{Component, Path, PathBuf};

use log::{error, info, warn};

use super::fetch::Fetcher;
use super::manifest::{Release, ReleaseFile};
use super::{download_verified, evaluate_release, fetch_release, io_err, with_suffix, write_synced};
use super::{version, UpdateStatus};
use crate::error::UpdateError;

pub const VERSION_FILE: &str = "VERSION";
pub const LAST_CHECK_FILE: &str = ".last_update_check";
pub const BACKUP_DIR: &str = "backup";

struct Staged {
    target: PathBuf,
    staged: PathBuf,
    backup: PathBuf,
    existed: bool,
}

pub struct BundleUpdater<F: Fetcher> {
    root: PathBuf,
    fetcher: F,
}

impl<F: Fetcher> BundleUpdater<F> {
    pub fn new(root: impl Into<PathBuf>, fetcher: F) -> Self {
        Self {
            root: root.into(),
            fetcher,
        }
    }

    /// Installed bundle version, from `VERSION` (`0` when absent).
    pub fn installed_version(&self) -> String {
        fs::read_to_string(self.root.join(VERSION_FILE))
            .map(|s| s.trim().to_owned())
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "0".into())
    }

    pub fn check(&self, manifest_url: &str, key: &str) -> Result<UpdateStatus, UpdateError> {
        let release = fetch_release(&self.fetcher, manifest_url, key)?;
        evaluate_release(release, &self.installed_version())
    }

    /// Record a check that found nothing to do.
    pub fn record_check(&self, now_unix: u64) -> Result<(), UpdateError> {
        fs::write(self.root.join(LAST_CHECK_FILE), now_unix.to_string())
            .map_err(io_err("write last check"))
    }

    fn resolve(&self, file: &ReleaseFile) -> Result<Staged, UpdateError> {
        let rel = Path::new(&file.path);
        let escapes = rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if file.path.is_empty() || escapes {
            return Err(UpdateError::Io {
                step: "resolve bundle path",
                detail: format!("{:?} escapes the install root", file.path),
            });
        }
        let target = self.root.join(rel);
        let flat = file.path.replace(['/', '\\'], "_");
        Ok(Staged {
            staged: with_suffix(&target, ".new"),
            backup: self.root.join(BACKUP_DIR).join(format!("{flat}.bak")),
            existed: target.exists(),
            target,
        })
    }

    fn stage_all(&self, release: &Release) -> Result<Vec<Staged>, UpdateError> {
        let mut staged = Vec::with_capacity(release.files.len());
        for file in &release.files {
            let result = self.resolve(file).and_then(|s| {
                let data = download_verified(&self.fetcher, file)?;
                if let Some(dir) = s.target.parent() {
                    fs::create_dir_all(dir).map_err(io_err("create bundle directory"))?;
                }
                write_synced(&s.staged, &data)?;
                Ok(s)
            });
            match result {
                Ok(s) => staged.push(s),
                Err(e) => {
                    discard(&staged);
                    return Err(e);
                }
            }
        }
        Ok(staged)
    }

    fn backup_all(&self, staged: &[Staged]) -> Result<(), UpdateError> {
        fs::create_dir_all(self.root.join(BACKUP_DIR)).map_err(io_err("create backup directory"))?;
        for s in staged.iter().filter(|s| s.existed) {
            fs::copy(&s.target, &s.backup).map_err(io_err("backup bundle file"))?;
        }
        Ok(())
    }

    /// Download, verify and install every file of `release`.
    pub fn apply(&self, release: &Release, now_unix: u64) -> Result<(), UpdateError> {
        if release.files.is_empty() {
            return Err(UpdateError::MissingField("files"));
        }
        let installed = self.installed_version();
        if version::compare(&release.latest_version, &installed) != Ordering::Greater {
            info!(
                "Bundle: {} is not newer than installed {}, reinstalling",
                release.latest_version, installed
            );
        }

        let staged = self.stage_all(release)?;
        info!("Bundle: {} file(s) staged and verified", staged.len());

        if let Err(e) = self.backup_all(&staged) {
            discard(&staged);
            return Err(e);
        }

        for (i, s) in staged.iter().enumerate() {
            if let Err(e) = fs::rename(&s.staged, &s.target) {
                error!("Bundle: replacing {} failed: {}", s.target.display(), e);
                restore(&staged[..i]);
                discard(&staged[i..]);
                return Err(io_err("replace bundle file")(e));
            }
        }

        fs::write(self.root.join(VERSION_FILE), &release.latest_version)
            .map_err(io_err("write version"))?;
        self.record_check(now_unix)?;
        info!("Bundle: updated {} -> {}", installed, release.latest_version);
        Ok(())
    }
}

fn discard(staged: &[Staged]) {
    for s in staged {
        let _ = fs::remove_file(&s.staged);
    }
}

fn restore(replaced: &[Staged]) {
    for s in replaced {
        let result = if s.existed {
            fs::copy(&s.backup, &s.target).map(drop)
        } else {
            fs::remove_file(&s.target)
        };
        if let Err(e) = result {
            warn!("Bundle: restoring {} failed: {}", s.target.display(), e);
        }
    }
}
