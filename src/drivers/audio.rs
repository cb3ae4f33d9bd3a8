//! Alarm cue playback through an external player process (`aplay -q`).
//!
//! At most one cue plays at a time.  Replaying the current cue is a no-op;
//! a different cue preempts it with SIGTERM, a short grace period, then
//! SIGKILL.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info};

use crate::app::ports::AudioPort;
use crate::config::AudioConfig;
use crate::error::HardwareError;

struct Playing {
    cue: PathBuf,
    child: Child,
}

pub struct PlayerAudio {
    player: String,
    args: Vec<String>,
    base_dir: Option<PathBuf>,
    grace: Duration,
    current: Option<Playing>,
}

impl PlayerAudio {
    pub fn new(player: impl Into<String>, args: Vec<String>, grace: Duration) -> Self {
        Self {
            player: player.into(),
            args,
            base_dir: None,
            grace,
            current: None,
        }
    }

    pub fn from_config(config: &AudioConfig) -> Self {
        Self::new(
            config.player.clone(),
            config.player_args.clone(),
            Duration::from_millis(config.stop_grace_ms),
        )
    }

    /// Resolve relative cue paths against `dir`.
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Cue currently playing, if its process is still alive.
    pub fn playing(&mut self) -> Option<&Path> {
        let finished = match self.current.as_mut() {
            Some(p) => !matches!(p.child.try_wait(), Ok(None)),
            None => return None,
        };
        if finished {
            self.current = None;
            return None;
        }
        self.current.as_ref().map(|p| p.cue.as_path())
    }

    fn terminate(&mut self) -> Result<(), HardwareError> {
        let Some(mut playing) = self.current.take() else {
            return Ok(());
        };
        if !matches!(playing.child.try_wait(), Ok(None)) {
            return Ok(());
        }
        send_term(&playing.child);
        let deadline = Instant::now() + self.grace;
        while Instant::now() < deadline {
            match playing.child.try_wait() {
                Ok(Some(_)) => return Ok(()),
                Ok(None) => thread::sleep(Duration::from_millis(20)),
                Err(e) => return Err(HardwareError::AudioStop(e.to_string())),
            }
        }
        debug!("Audio: '{}' ignored SIGTERM, killing", playing.cue.display());
        playing
            .child
            .kill()
            .map_err(|e| HardwareError::AudioStop(e.to_string()))?;
        playing
            .child
            .wait()
            .map(drop)
            .map_err(|e| HardwareError::AudioStop(e.to_string()))
    }
}

#[cfg(unix)]
fn send_term(child: &Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Ok(pid) = i32::try_from(child.id()) {
        if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
            debug!("Audio: SIGTERM to {} failed: {}", pid, e);
        }
    }
}

#[cfg(not(unix))]
fn send_term(_child: &Child) {}

impl AudioPort for PlayerAudio {
    fn play(&mut self, cue: &Path) -> Result<(), HardwareError> {
        if self.playing() == Some(cue) {
            return Ok(());
        }
        self.terminate()?;

        let path = match &self.base_dir {
            Some(dir) => dir.join(cue),
            None => PathBuf::from(cue),
        };
        let child = Command::new(&self.player)
            .args(&self.args)
            .arg(&path)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| HardwareError::AudioSpawn(format!("{}: {}", self.player, e)))?;
        info!("Audio: playing {}", path.display());
        self.current = Some(Playing {
            cue: cue.to_path_buf(),
            child,
        });
        Ok(())
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        self.terminate()
    }
}

impl Drop for PlayerAudio {
    fn drop(&mut self) {
        if let Err(e) = self.terminate() {
            debug!("Audio: stop on drop failed: {}", e);
        }
    }
}
