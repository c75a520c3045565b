//! Manual override protocol.
//!
//! An override is a 3-character record `<plant><actuator><level>`, e.g. `101`
//! = plant 1, irrigation, on. Pending content is taken and cleared in one
//! step, so a bad record is never seen twice.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::actuator::{ActuatorKind, Origin, Transition};
use crate::address::HardwareAddress;
use crate::error::OverrideError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverrideCommand {
    pub plant: char,
    pub node: HardwareAddress,
    pub kind: ActuatorKind,
    pub level: u8,
}

impl OverrideCommand {
    pub fn transition(&self) -> Transition {
        Transition {
            node: self.node,
            kind: self.kind,
            level: self.level,
            origin: Origin::Override,
        }
    }
}

/// Plant selector → node address, loaded once at startup.
pub type PlantTable = HashMap<char, HardwareAddress>;

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse one override record. Anything that is not exactly three characters,
/// line terminators included, is malformed.
pub fn parse_override(raw: &str, plants: &PlantTable) -> Result<OverrideCommand, OverrideError> {
    let chars: Vec<char> = raw.chars().collect();
    let &[plant, actuator, level] = chars.as_slice() else {
        return Err(OverrideError::Malformed(raw.to_string()));
    };

    let node = *plants
        .get(&plant)
        .ok_or(OverrideError::UnknownPlant(plant))?;

    let kind = match actuator {
        '0' => ActuatorKind::Pump,
        '1' => ActuatorKind::Light,
        other => return Err(OverrideError::UnknownActuator(other)),
    };

    let level = level
        .to_digit(10)
        .ok_or_else(|| OverrideError::Malformed(raw.to_string()))? as u8;

    Ok(OverrideCommand {
        plant,
        node,
        kind,
        level,
    })
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Somewhere pending override records come from.
pub trait OverrideSource {
    /// Take everything pending and leave the source empty. `None` when there
    /// is nothing to take.
    async fn take_pending(&mut self) -> Result<Option<String>>;
}

/// Operator-written control file, read then truncated each cycle.
pub struct FileOverrideSource {
    path: PathBuf,
}

impl FileOverrideSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl OverrideSource for FileOverrideSource {
    async fn take_pending(&mut self) -> Result<Option<String>> {
        let mut file = match tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)
            .await
        {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to open {}", self.path.display()))
            }
        };

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .await
            .with_context(|| format!("failed to read {}", self.path.display()))?;

        if bytes.is_empty() {
            return Ok(None);
        }

        file.set_len(0)
            .await
            .with_context(|| format!("failed to truncate {}", self.path.display()))?;
        file.rewind().await?;

        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// In-process queue, fed by the HTTP API.
pub struct ChannelOverrideSource {
    rx: mpsc::Receiver<String>,
}

impl ChannelOverrideSource {
    pub fn new(rx: mpsc::Receiver<String>) -> Self {
        Self { rx }
    }
}

impl OverrideSource for ChannelOverrideSource {
    async fn take_pending(&mut self) -> Result<Option<String>> {
        // One record per cycle, like the file.
        Ok(self.rx.try_recv().ok().filter(|s| !s.is_empty()))
    }
}

/// The configured sources, drained in order every cycle.
pub enum OverrideFeed {
    File(FileOverrideSource),
    Channel(ChannelOverrideSource),
}

impl OverrideSource for OverrideFeed {
    async fn take_pending(&mut self) -> Result<Option<String>> {
        match self {
            Self::File(s) => s.take_pending().await,
            Self::Channel(s) => s.take_pending().await,
        }
    }
}

/// Take whatever is pending on `source` and turn it into a command. Every
/// failure is logged and discarded.
pub async fn consume_override<S: OverrideSource>(
    source: &mut S,
    plants: &PlantTable,
) -> Option<OverrideCommand> {
    let raw = match source.take_pending().await {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            warn!("override source unreadable: {e:#}");
            return None;
        }
    };

    match parse_override(&raw, plants) {
        Ok(cmd) => {
            info!(
                plant = %cmd.plant,
                node = %cmd.node,
                kind = %cmd.kind,
                level = cmd.level,
                "override received"
            );
            Some(cmd)
        }
        Err(e) => {
            warn!(raw = ?raw, "override discarded: {e}");
            None
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
