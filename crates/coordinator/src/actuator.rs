//! Edge-triggered actuator control with hysteresis.
//!
//! Each (node, actuator) pair is a two-state machine, `OFF` at start. A fresh
//! reading computes a target state; a command is produced only when the
//! target differs from the stored state.
//!
//! ```text
//! pump:  OFF ──[soil > high]──▶ ON ──[soil <= high]──▶ OFF
//! light: OFF ──[light < low]──▶ ON ──[light > high]──▶ OFF
//! ```
//!
//! The stored table changes only in [`ActuatorStateMachine::drive`], after the
//! command has been handed to the radio. Overrides use the same path.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::address::HardwareAddress;
use crate::error::RadioError;
use crate::frame::SensorReading;
use crate::radio::Radio;
use crate::thresholds::ThresholdConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActuatorKind {
    Pump,
    Light,
}

impl fmt::Display for ActuatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pump => write!(f, "pump"),
            Self::Light => write!(f, "light"),
        }
    }
}

/// Radio endpoints that physically switch the shared actuators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    pub irrigation: HardwareAddress,
    pub light: HardwareAddress,
}

impl Endpoints {
    pub fn for_kind(&self, kind: ActuatorKind) -> HardwareAddress {
        match kind {
            ActuatorKind::Pump => self.irrigation,
            ActuatorKind::Light => self.light,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    Automatic,
    Override,
}

/// A decided state change, not yet sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub node: HardwareAddress,
    pub kind: ActuatorKind,
    /// 0/1 for automatic control; overrides may carry any small level.
    pub level: u8,
    pub origin: Origin,
}

impl Transition {
    pub fn turns_on(&self) -> bool {
        self.level != 0
    }
}

/// What actually went out on the radio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActuatorCommand {
    pub target: HardwareAddress,
    pub payload: Vec<u8>,
}

impl ActuatorCommand {
    /// Node address bytes followed by the level byte.
    pub fn new(target: HardwareAddress, node: HardwareAddress, level: u8) -> Self {
        let mut payload = node.to_bytes().to_vec();
        payload.push(level);
        Self { target, payload }
    }
}

// ---------------------------------------------------------------------------
// Transition rules
// ---------------------------------------------------------------------------

/// Target pump state, or `None` if it should stay as is. A reading exactly at
/// the threshold counts as wet enough.
pub fn next_pump_state(on: bool, soil_moisture: f64, cfg: &ThresholdConfig) -> Option<bool> {
    match on {
        false if soil_moisture > cfg.soil_moisture_high => Some(true),
        true if soil_moisture <= cfg.soil_moisture_high => Some(false),
        _ => None,
    }
}

/// Target light state, or `None` inside the dead band.
pub fn next_light_state(on: bool, light: f64, cfg: &ThresholdConfig) -> Option<bool> {
    match on {
        false if light < cfg.light_low => Some(true),
        true if light > cfg.light_high => Some(false),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// State table
// ---------------------------------------------------------------------------

pub struct ActuatorStateMachine {
    endpoints: Endpoints,
    states: HashMap<(HardwareAddress, ActuatorKind), bool>,
}

impl ActuatorStateMachine {
    pub fn new(endpoints: Endpoints) -> Self {
        Self {
            endpoints,
            states: HashMap::new(),
        }
    }

    pub fn is_on(&self, node: HardwareAddress, kind: ActuatorKind) -> bool {
        self.states.get(&(node, kind)).copied().unwrap_or(false)
    }

    /// Decide which actuators of `node` must change for `reading`. Light is
    /// evaluated before the pump.
    pub fn evaluate(
        &self,
        node: HardwareAddress,
        reading: &SensorReading,
        cfg: &ThresholdConfig,
    ) -> Vec<Transition> {
        let light = next_light_state(self.is_on(node, ActuatorKind::Light), reading.light, cfg)
            .map(|on| (ActuatorKind::Light, on));
        let pump = next_pump_state(
            self.is_on(node, ActuatorKind::Pump),
            reading.soil_moisture,
            cfg,
        )
        .map(|on| (ActuatorKind::Pump, on));

        [light, pump]
            .into_iter()
            .flatten()
            .map(|(kind, on)| Transition {
                node,
                kind,
                level: u8::from(on),
                origin: Origin::Automatic,
            })
            .collect()
    }

    /// Send the command for `t` and, only once the radio accepted it, store
    /// the new state.
    pub async fn drive<R: Radio>(
        &mut self,
        radio: &R,
        t: Transition,
    ) -> Result<ActuatorCommand, RadioError> {
        let command = ActuatorCommand::new(self.endpoints.for_kind(t.kind), t.node, t.level);
        radio.send(command.target, command.payload.clone()).await?;
        self.states.insert((t.node, t.kind), t.turns_on());
        Ok(command)
    }

    /// Current table, sorted for stable output.
    pub fn snapshot(&self) -> Vec<(HardwareAddress, ActuatorKind, bool)> {
        let mut out: Vec<_> = self
            .states
            .iter()
            .map(|(&(node, kind), &on)| (node, kind, on))
            .collect();
        out.sort();
        out
    }
}

// ===========================================================================
// Tests
// ===========================================================================
