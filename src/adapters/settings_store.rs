//! JSON settings file adapter.
//!
//! Implements [`ConfigPort`] over a single pretty-printed JSON file.
//!
//! - Validation: [`SystemConfig::validate`] runs on load and before every
//!   save.  Invalid values are rejected, never clamped.
//! - Atomic writes: the file is written to `<path>.tmp`, fsynced, then
//!   renamed over the original.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::app::ports::{ConfigError, ConfigPort};
use crate::config::SystemConfig;

pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored config, or defaults when nothing is stored yet.  A corrupt or
    /// invalid file is reported, not overwritten.
    pub fn load_or_default(&self) -> Result<SystemConfig, ConfigError> {
        match self.load() {
            Err(ConfigError::NotFound) => {
                info!("JsonFileStore: no config at {}, using defaults", self.path.display());
                Ok(SystemConfig::default())
            }
            other => other,
        }
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

fn map_io(e: &io::Error) -> ConfigError {
    match e.kind() {
        io::ErrorKind::NotFound => ConfigError::NotFound,
        io::ErrorKind::StorageFull => ConfigError::StorageFull,
        _ => ConfigError::IoError,
    }
}

impl ConfigPort for JsonFileStore {
    fn load(&self) -> Result<SystemConfig, ConfigError> {
        let bytes = fs::read(&self.path).map_err(|e| map_io(&e))?;
        let cfg: SystemConfig = serde_json::from_slice(&bytes).map_err(|e| {
            warn!("JsonFileStore: {} unreadable: {}", self.path.display(), e);
            ConfigError::Corrupted
        })?;
        cfg.validate()?;
        info!("JsonFileStore: loaded config from {}", self.path.display());
        Ok(cfg)
    }

    fn save(&self, config: &SystemConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let body = serde_json::to_vec_pretty(config).map_err(|_| ConfigError::Corrupted)?;

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).map_err(|e| map_io(&e))?;
        }
        let tmp = self.tmp_path();
        let written = File::create(&tmp)
            .and_then(|mut f| f.write_all(&body).and_then(|()| f.sync_all()))
            .and_then(|()| fs::rename(&tmp, &self.path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            warn!("JsonFileStore: save to {} failed: {}", self.path.display(), e);
            return Err(map_io(&e));
        }
        info!("JsonFileStore: saved config to {}", self.path.display());
        Ok(())
    }
}
