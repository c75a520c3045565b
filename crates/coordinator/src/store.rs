//! Append-only reading storage.
//!
//! Storage is best-effort from the control loop's point of view: a failure to
//! persist is logged and never holds back actuator control.

use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::{Map, Value};
use tracing::warn;

use crate::actuator::{ActuatorCommand, Transition};
use crate::address::HardwareAddress;
use crate::config::{StorageBackend, StorageConfig};
use crate::db::Db;
use crate::error::StorageUnavailable;
use crate::frame::SensorReading;

pub trait ReadingStore {
    async fn append(&self, node: HardwareAddress, reading: &SensorReading) -> Result<()>;

    /// Audit a dispatched command. Backends without an audit trail ignore it.
    async fn record_command(&self, _t: &Transition, _cmd: &ActuatorCommand) -> Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON log
// ---------------------------------------------------------------------------

/// A single JSON document: `{ "<ADDRESS>": [reading, ...], ... }`.
pub struct JsonLog {
    path: PathBuf,
}

impl JsonLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Current document, or an empty one if the file is missing, unreadable
    /// or not a JSON object.
    async fn load(&self) -> Map<String, Value> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Map::new(),
            Err(e) => {
                let e = StorageUnavailable(format!("{}: {e}", self.path.display()));
                warn!("{e}; starting from an empty log");
                return Map::new();
            }
        };

        match serde_json::from_slice::<Value>(&contents) {
            Ok(Value::Object(map)) => map,
            Ok(_) | Err(_) if contents.iter().all(u8::is_ascii_whitespace) => Map::new(),
            Ok(_) => {
                let e = StorageUnavailable(format!("{}: not a JSON object", self.path.display()));
                warn!("{e}; starting from an empty log");
                Map::new()
            }
            Err(e) => {
                let e = StorageUnavailable(format!("{}: {e}", self.path.display()));
                warn!("{e}; starting from an empty log");
                Map::new()
            }
        }
    }
}

impl ReadingStore for JsonLog {
    async fn append(&self, node: HardwareAddress, reading: &SensorReading) -> Result<()> {
        let mut doc = self.load().await;
        let record = serde_json::to_value(reading).context("failed to encode reading")?;

        match doc
            .entry(node.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(records) => records.push(record),
            other => *other = Value::Array(vec![record]),
        }

        let bytes = serde_json::to_vec(&doc).context("failed to encode reading log")?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Configured backend
// ---------------------------------------------------------------------------

pub enum Storage {
    Json(JsonLog),
    Sqlite(Db),
}

impl Storage {
    pub async fn open(cfg: &StorageConfig) -> Result<Self> {
        match cfg.backend {
            StorageBackend::Json => Ok(Self::Json(JsonLog::new(&cfg.path))),
            StorageBackend::Sqlite => {
                let db = Db::connect(&cfg.db_url).await?;
                db.migrate().await?;
                Ok(Self::Sqlite(db))
            }
        }
    }
}

impl ReadingStore for Storage {
    async fn append(&self, node: HardwareAddress, reading: &SensorReading) -> Result<()> {
        match self {
            Self::Json(log) => log.append(node, reading).await,
            Self::Sqlite(db) => db.insert_reading(node, reading).await,
        }
    }

    async fn record_command(&self, t: &Transition, cmd: &ActuatorCommand) -> Result<()> {
        match self {
            Self::Json(_) => Ok(()),
            Self::Sqlite(db) => db.insert_command(t, cmd).await,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
