//! Hardware adapter: bridges the relay bank and audio player to the
//! domain port traits.
//!
//! This is the only module that touches GPIO lines and the player
//! process.  With the simulated GPIO backend and audio disabled it runs
//! on any host.

use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::app::ports::{AudioPort, Relay, RelayPort};
use crate::config::{GpioBackend, GpioConfig, SystemConfig};
use crate::drivers::audio::PlayerAudio;
use crate::drivers::relay::RelayBank;
use crate::drivers::sysfs_gpio::{GpioPin, SimulatedPin, SysfsPin};
use crate::error::HardwareError;

/// Concrete adapter that combines all outputs behind port traits.
pub struct HardwareAdapter {
    relays: RelayBank<GpioPin>,
    audio: Option<PlayerAudio>,
}

fn open_pin(backend: GpioBackend, line: u32) -> io::Result<(GpioPin, u32)> {
    let pin = match backend {
        GpioBackend::Sysfs => GpioPin::Sysfs(SysfsPin::open(line)?),
        GpioBackend::Simulated => GpioPin::Simulated(SimulatedPin::new(line)),
    };
    Ok((pin, line))
}

impl HardwareAdapter {
    pub fn new(relays: RelayBank<GpioPin>, audio: Option<PlayerAudio>) -> Self {
        Self { relays, audio }
    }

    /// Open the configured GPIO lines and player.  Relative cue paths
    /// resolve against `cue_dir`.
    pub fn from_config(config: &SystemConfig, cue_dir: Option<PathBuf>) -> io::Result<Self> {
        let GpioConfig {
            backend,
            pump_a,
            pump_b,
            any_pump,
            active_low,
        } = config.gpio;
        let relays = RelayBank::new(
            open_pin(backend, pump_a)?,
            open_pin(backend, pump_b)?,
            open_pin(backend, any_pump)?,
            active_low,
        );
        info!(
            "HardwareAdapter: relays on lines {}/{}/{} ({:?})",
            pump_a, pump_b, any_pump, backend
        );

        let audio = config.audio.enabled.then(|| {
            let player = PlayerAudio::from_config(&config.audio);
            match cue_dir {
                Some(dir) => player.with_base_dir(dir),
                None => player,
            }
        });
        if audio.is_none() {
            info!("HardwareAdapter: audio disabled");
        }
        Ok(Self::new(relays, audio))
    }

    pub fn relay_is_on(&self, relay: Relay) -> bool {
        self.relays.is_on(relay)
    }

    /// Force every relay off, e.g. on shutdown.
    pub fn all_off(&mut self) {
        if let Err(e) = self.relays.all_off() {
            warn!("HardwareAdapter: relay shutdown incomplete: {}", e);
        }
    }
}

impl RelayPort for HardwareAdapter {
    fn set_relay(&mut self, relay: Relay, on: bool) -> Result<(), HardwareError> {
        self.relays.set_relay(relay, on)
    }
}

impl AudioPort for HardwareAdapter {
    fn play(&mut self, cue: &Path) -> Result<(), HardwareError> {
        match self.audio.as_mut() {
            Some(audio) => audio.play(cue),
            None => Ok(()),
        }
    }

    fn stop(&mut self) -> Result<(), HardwareError> {
        match self.audio.as_mut() {
            Some(audio) => audio.stop(),
            None => Ok(()),
        }
    }
}
