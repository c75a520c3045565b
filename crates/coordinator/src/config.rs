//! TOML config file loading and validation for the radio bridge, actuator
//! endpoints, storage, overrides and the per-node threshold table.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::actuator::Endpoints;
use crate::address::HardwareAddress;
use crate::overrides::PlantTable;
use crate::thresholds::{StaticThresholds, ThresholdConfig};

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub radio: RadioConfig,
    #[serde(default)]
    pub mqtt: MqttConfig,
    pub actuators: ActuatorEntry,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub overrides: OverrideConfig,
    #[serde(default)]
    pub nodes: Vec<NodeEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// Serial device of the coordinator radio, handed to the gateway.
    pub port: String,
    pub baud_rate: u32,
    pub receive_timeout_sec: u64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".into(),
            baud_rate: 9600,
            receive_timeout_sec: 60,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    /// Frames arrive on `<prefix>/<SENDER>/rx`, commands go to
    /// `<prefix>/<TARGET>/tx`.
    pub topic_prefix: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            client_id: "plant-coordinator".into(),
            topic_prefix: "xbee".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ActuatorEntry {
    pub irrigation: String,
    pub light: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Json,
    Sqlite,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// JSON log location (json backend).
    pub path: PathBuf,
    /// Connection string (sqlite backend).
    pub db_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Json,
            path: "data.json".into(),
            db_url: "sqlite:plants.db?mode=rwc".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OverrideConfig {
    pub file_enabled: bool,
    pub file: PathBuf,
    /// Capacity of the HTTP override queue.
    pub queue_capacity: usize,
}

impl Default for OverrideConfig {
    fn default() -> Self {
        Self {
            file_enabled: true,
            file: "priority.txt".into(),
            queue_capacity: 8,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NodeEntry {
    pub address: String,
    /// Single-character selector used by override records.
    #[serde(default)]
    pub plant: Option<String>,
    pub soil_moisture_high: f64,
    pub light_low: f64,
    pub light_high: f64,
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_radio(&mut errors);
        self.validate_actuators(&mut errors);
        self.validate_nodes(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_radio(&self, errors: &mut Vec<String>) {
        if self.radio.port.trim().is_empty() {
            errors.push("radio: port is empty".into());
        }
        if self.radio.receive_timeout_sec == 0 {
            errors.push("radio: receive_timeout_sec must be positive".into());
        }
        if self.mqtt.topic_prefix.trim().is_empty() || self.mqtt.topic_prefix.contains(['+', '#']) {
            errors.push(format!(
                "mqtt: topic_prefix '{}' must be non-empty and free of wildcards",
                self.mqtt.topic_prefix
            ));
        }
        if self.overrides.queue_capacity == 0 {
            errors.push("overrides: queue_capacity must be positive".into());
        }
    }

    fn validate_actuators(&self, errors: &mut Vec<String>) {
        let irrigation = self.actuators.irrigation.parse::<HardwareAddress>();
        let light = self.actuators.light.parse::<HardwareAddress>();

        if let Err(e) = &irrigation {
            errors.push(format!("actuators.irrigation: {e}"));
        }
        if let Err(e) = &light {
            errors.push(format!("actuators.light: {e}"));
        }
        if let (Ok(i), Ok(l)) = (irrigation, light) {
            if i == l {
                errors.push(format!(
                    "actuators: irrigation and light share endpoint {i}"
                ));
            }
        }
    }

    fn validate_nodes(&self, errors: &mut Vec<String>) {
        let mut seen_addrs: HashSet<HardwareAddress> = HashSet::new();
        let mut seen_plants: HashSet<char> = HashSet::new();

        for (i, n) in self.nodes.iter().enumerate() {
            let ctx = || {
                if n.address.is_empty() {
                    format!("nodes[{i}]")
                } else {
                    format!("node '{}'", n.address)
                }
            };

            // ── Identity ────────────────────────────────────────
            match n.address.parse::<HardwareAddress>() {
                Ok(addr) => {
                    if !seen_addrs.insert(addr) {
                        errors.push(format!("{}: duplicate address", ctx()));
                    }
                }
                Err(e) => errors.push(format!("{}: {e}", ctx())),
            }

            if let Some(plant) = &n.plant {
                let mut chars = plant.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => {
                        if !seen_plants.insert(c) {
                            errors.push(format!("{}: plant '{c}' already assigned", ctx()));
                        }
                    }
                    _ => errors.push(format!(
                        "{}: plant selector '{plant}' must be exactly one character",
                        ctx()
                    )),
                }
            }

            // ── Thresholds ──────────────────────────────────────
            if let Err(e) = ThresholdConfig::new(n.soil_moisture_high, n.light_low, n.light_high) {
                errors.push(format!("{}: {e}", ctx()));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Typed views (only meaningful after validate())
    // -----------------------------------------------------------------------

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.radio.receive_timeout_sec)
    }

    pub fn endpoints(&self) -> Result<Endpoints> {
        Ok(Endpoints {
            irrigation: self.actuators.irrigation.parse()?,
            light: self.actuators.light.parse()?,
        })
    }

    pub fn thresholds(&self) -> Result<StaticThresholds> {
        let entries = self
            .nodes
            .iter()
            .map(|n| -> Result<(HardwareAddress, ThresholdConfig)> {
                let addr: HardwareAddress = n.address.parse()?;
                let cfg = ThresholdConfig::new(n.soil_moisture_high, n.light_low, n.light_high)
                    .with_context(|| format!("node '{}'", n.address))?;
                Ok((addr, cfg))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(StaticThresholds::new(entries))
    }

    pub fn plants(&self) -> Result<PlantTable> {
        let mut table = PlantTable::new();
        for n in &self.nodes {
            if let Some(c) = n.plant.as_deref().and_then(|p| p.chars().next()) {
                table.insert(c, n.address.parse()?);
            }
        }
        Ok(table)
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    let config: Config =
        toml::from_str(&contents).with_context(|| format!("failed to parse config: {path}"))?;
    config
        .validate()
        .with_context(|| format!("invalid config: {path}"))?;
    Ok(config)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[radio]
port = "/dev/ttyUSB0"
receive_timeout_sec = 60

[actuators]
irrigation = "0013A200415D76BF"
light = "0013A200415B8CBA"

[storage]
backend = "json"
path = "data.json"

[[nodes]]
address = "0013A200410809DD"
plant = "1"
soil_moisture_high = 800.0
light_low = 50.0
light_high = 300.0

[[nodes]]
address = "0013A200410809E3"
plant = "2"
soil_moisture_high = 800.0
light_low = 50.0
light_high = 300.0
"#;

    fn valid_config() -> Config {
        toml::from_str(SAMPLE).unwrap()
    }

    fn valid_node() -> NodeEntry {
        NodeEntry {
            address: "0013A200410809D8".into(),
            plant: Some("3".into()),
            soil_moisture_high: 800.0,
            light_low: 50.0,
            light_high: 300.0,
        }
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_sample_config() {
        let cfg = valid_config();
        assert_eq!(cfg.nodes.len(), 2);
        assert_eq!(cfg.storage.backend, StorageBackend::Json);
        assert_eq!(cfg.receive_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.mqtt.topic_prefix, "xbee");
        assert!(cfg.overrides.file_enabled);
        cfg.validate().unwrap();
    }

    #[test]
    fn parse_requires_actuators() {
        assert!(toml::from_str::<Config>("").is_err());
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg: Config = toml::from_str(
            r#"
[actuators]
irrigation = "0013A200415D76BF"
light = "0013A200415B8CBA"
"#,
        )
        .unwrap();
        assert_eq!(cfg.radio.receive_timeout_sec, 60);
        assert_eq!(cfg.overrides.file, PathBuf::from("priority.txt"));
        assert!(cfg.nodes.is_empty());
        cfg.validate().unwrap();
    }

    // -- Typed views ------------------------------------------------------

    #[test]
    fn typed_views_resolve_addresses() {
        let cfg = valid_config();
        let endpoints = cfg.endpoints().unwrap();
        assert_eq!(endpoints.irrigation.to_string(), "0013A200415D76BF");

        let plants = cfg.plants().unwrap();
        assert_eq!(plants.len(), 2);
        assert_eq!(plants[&'2'].to_string(), "0013A200410809E3");

        assert_eq!(cfg.thresholds().unwrap().len(), 2);
    }

    #[test]
    fn node_without_plant_is_not_overridable() {
        let mut cfg = valid_config();
        cfg.nodes.push(NodeEntry {
            plant: None,
            ..valid_node()
        });
        cfg.validate().unwrap();
        assert_eq!(cfg.plants().unwrap().len(), 2);
        assert_eq!(cfg.thresholds().unwrap().len(), 3);
    }

    // -- Validation -------------------------------------------------------

    #[test]
    fn bad_node_address_rejected() {
        let mut cfg = valid_config();
        cfg.nodes[0].address = "xyz".into();
        assert_validation_err(&cfg, "must be exactly 16 hex digits");
    }

    #[test]
    fn duplicate_node_address_rejected() {
        let mut cfg = valid_config();
        cfg.nodes.push(NodeEntry {
            address: "0013A200410809DD".into(),
            ..valid_node()
        });
        assert_validation_err(&cfg, "duplicate address");
    }

    #[test]
    fn duplicate_plant_rejected() {
        let mut cfg = valid_config();
        cfg.nodes.push(NodeEntry {
            plant: Some("1".into()),
            ..valid_node()
        });
        assert_validation_err(&cfg, "plant '1' already assigned");
    }

    #[test]
    fn multi_char_plant_rejected() {
        let mut cfg = valid_config();
        cfg.nodes[0].plant = Some("12".into());
        assert_validation_err(&cfg, "must be exactly one character");
    }

    #[test]
    fn inverted_light_band_rejected() {
        let mut cfg = valid_config();
        cfg.nodes[0].light_low = 400.0;
        assert_validation_err(&cfg, "light_low (400) must be less than light_high (300)");
    }

    #[test]
    fn zero_soil_threshold_rejected() {
        let mut cfg = valid_config();
        cfg.nodes[1].soil_moisture_high = 0.0;
        assert_validation_err(&cfg, "soil_moisture_high must be positive");
    }

    #[test]
    fn shared_endpoint_rejected() {
        let mut cfg = valid_config();
        cfg.actuators.light = cfg.actuators.irrigation.clone();
        assert_validation_err(&cfg, "share endpoint");
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut cfg = valid_config();
        cfg.radio.receive_timeout_sec = 0;
        assert_validation_err(&cfg, "receive_timeout_sec must be positive");
    }

    #[test]
    fn wildcard_prefix_rejected() {
        let mut cfg = valid_config();
        cfg.mqtt.topic_prefix = "xbee/#".into();
        assert_validation_err(&cfg, "free of wildcards");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = valid_config();
        cfg.actuators.irrigation = "nope".into();
        cfg.nodes[0].light_low = 500.0;
        cfg.nodes[1].plant = Some("".into());
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(msg.contains("3 errors"), "unexpected summary in: {msg}");
        assert!(msg.contains("actuators.irrigation"), "missing endpoint error in: {msg}");
        assert!(msg.contains("light_low"), "missing band error in: {msg}");
        assert!(msg.contains("exactly one character"), "missing plant error in: {msg}");
    }
}
