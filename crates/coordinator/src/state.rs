use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

use crate::actuator::{ActuatorKind, Origin};
use crate::address::HardwareAddress;
use crate::frame::SensorReading;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

/// Read-only mirror of the control loop for the status API. The loop writes
/// it after the fact; nothing reads decisions back out of it.
pub type SharedState = Arc<RwLock<SystemState>>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub radio_connected: bool,
    pub nodes: BTreeMap<HardwareAddress, NodeStatus>,
    pub actuators: BTreeMap<String, ActuatorStatus>,
    pub events: VecDeque<SystemEvent>,
}

#[derive(Clone, Serialize)]
pub struct NodeStatus {
    pub last_seen: DateTime<Utc>,
    pub reading: SensorReading,
}

#[derive(Clone, Serialize)]
pub struct ActuatorStatus {
    pub node: HardwareAddress,
    pub kind: ActuatorKind,
    pub on: bool,
    pub level: u8,
    pub origin: Origin,
    pub last_changed: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct SystemEvent {
    pub ts: DateTime<Utc>,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Actuator,
    Override,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub radio_connected: bool,
    pub nodes: BTreeMap<HardwareAddress, NodeStatus>,
    pub actuators: Vec<ActuatorStatus>,
    pub events: Vec<SystemEvent>,
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            radio_connected: false,
            nodes: BTreeMap::new(),
            actuators: BTreeMap::new(),
            events: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Record a decoded reading from a node.
    pub fn record_reading(&mut self, node: HardwareAddress, reading: &SensorReading) {
        let detail = format!(
            "{node}: temperature={} humidity={} soil_moisture={} light={}",
            reading.temperature, reading.humidity, reading.soil_moisture, reading.light
        );

        self.nodes.insert(
            node,
            NodeStatus {
                last_seen: Utc::now(),
                reading: reading.clone(),
            },
        );

        self.push_event(EventKind::Reading, detail);
    }

    /// Record a command that went out on the radio.
    pub fn record_actuator(&mut self, node: HardwareAddress, kind: ActuatorKind, level: u8, origin: Origin) {
        let on = level != 0;
        self.actuators.insert(
            format!("{node}/{kind}"),
            ActuatorStatus {
                node,
                kind,
                on,
                level,
                origin,
                last_changed: Utc::now(),
            },
        );

        let event = match origin {
            Origin::Automatic => EventKind::Actuator,
            Origin::Override => EventKind::Override,
        };
        let state_str = if on { "ON" } else { "OFF" };
        self.push_event(event, format!("{node} {kind} set {state_str} (level {level})"));
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            radio_connected: self.radio_connected,
            nodes: self.nodes.clone(),
            actuators: self.actuators.values().cloned().collect(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: Utc::now(),
            kind,
            detail,
        });
    }
}

impl Default for SystemState {
    fn default() -> Self {
        Self::new()
    }
}
