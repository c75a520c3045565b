//! Per-node setpoints and hysteresis bands.

use std::collections::HashMap;

use anyhow::{ensure, Result};
use serde::Serialize;

use crate::address::HardwareAddress;
use crate::error::ControlError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdConfig {
    /// Pump turns on strictly above this raw soil reading (higher = drier).
    pub soil_moisture_high: f64,
    /// Light turns on strictly below this level.
    pub light_low: f64,
    /// Light turns off strictly above this level.
    pub light_high: f64,
}

impl ThresholdConfig {
    pub fn new(soil_moisture_high: f64, light_low: f64, light_high: f64) -> Result<Self> {
        ensure!(
            soil_moisture_high.is_finite() && light_low.is_finite() && light_high.is_finite(),
            "thresholds must be finite numbers"
        );
        ensure!(
            soil_moisture_high > 0.0,
            "soil_moisture_high must be positive, got {soil_moisture_high}"
        );
        ensure!(
            light_low < light_high,
            "light_low ({light_low}) must be less than light_high ({light_high})"
        );
        Ok(Self {
            soil_moisture_high,
            light_low,
            light_high,
        })
    }
}

/// Lookup of thresholds by node. Swappable per deployment.
pub trait ThresholdPolicy {
    fn thresholds_for(&self, node: HardwareAddress) -> Result<ThresholdConfig, ControlError>;
}

/// Table loaded once at startup and never modified.
#[derive(Debug, Clone, Default)]
pub struct StaticThresholds {
    table: HashMap<HardwareAddress, ThresholdConfig>,
}

impl StaticThresholds {
    pub fn new(entries: impl IntoIterator<Item = (HardwareAddress, ThresholdConfig)>) -> Self {
        Self {
            table: entries.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl ThresholdPolicy for StaticThresholds {
    fn thresholds_for(&self, node: HardwareAddress) -> Result<ThresholdConfig, ControlError> {
        self.table
            .get(&node)
            .copied()
            .ok_or(ControlError::UnknownNode(node))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: HardwareAddress = HardwareAddress::new(0x0013_A200_4108_09DD);

    #[test]
    fn valid_band_accepted() {
        let c = ThresholdConfig::new(800.0, 50.0, 300.0).unwrap();
        assert_eq!(c.light_high, 300.0);
    }

    #[test]
    fn degenerate_light_band_rejected() {
        let err = ThresholdConfig::new(800.0, 300.0, 300.0).unwrap_err();
        assert!(err.to_string().contains("must be less than light_high"));
    }

    #[test]
    fn non_positive_soil_threshold_rejected() {
        assert!(ThresholdConfig::new(0.0, 50.0, 300.0).is_err());
        assert!(ThresholdConfig::new(f64::NAN, 50.0, 300.0).is_err());
    }

    #[test]
    fn lookup_known_and_unknown() {
        let cfg = ThresholdConfig::new(800.0, 50.0, 300.0).unwrap();
        let policy = StaticThresholds::new([(NODE, cfg)]);
        assert_eq!(policy.thresholds_for(NODE), Ok(cfg));

        let other = HardwareAddress::new(1);
        assert_eq!(
            policy.thresholds_for(other),
            Err(ControlError::UnknownNode(other))
        );
    }
}
