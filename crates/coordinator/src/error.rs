//! Error taxonomy for the control core.
//!
//! Every variant here is recovered where it is detected; none of them stops
//! the coordinator loop. Startup failures use `anyhow` instead.

use crate::address::HardwareAddress;

/// A radio payload could not be turned into a reading.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: field '{field}' needs {needed} bytes, {remaining} remaining")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("malformed frame: field '{field}' is not a finite number")]
    NonFinite { field: &'static str },
    #[error("malformed frame: schema has no field '{field}'")]
    MissingField { field: &'static str },
}

/// Lookup failures against the static node tables.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("unknown node {0}: no thresholds configured")]
    UnknownNode(HardwareAddress),
}

/// A manual override record that must be discarded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OverrideError {
    #[error("malformed override {0:?}: expected <plant><actuator><level>")]
    Malformed(String),
    #[error("unknown plant selector '{0}'")]
    UnknownPlant(char),
    #[error("unknown actuator selector '{0}' (use 0=irrigation, 1=light)")]
    UnknownActuator(char),
}

#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    #[error("radio link closed")]
    Disconnected,
    #[error("radio send to {target} failed: {reason}")]
    Send {
        target: HardwareAddress,
        reason: String,
    },
}

/// The backing store could not be read; callers treat it as empty.
#[derive(Debug, thiserror::Error)]
#[error("storage unavailable: {0}")]
pub struct StorageUnavailable(pub String);
