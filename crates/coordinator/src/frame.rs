//! Binary sensor frame decoding.
//!
//! A node payload is a run of little-endian IEEE-754 `f32` values in schema
//! order. Decoding is all-or-nothing: a payload too short for the schema
//! yields [`FrameError`] and no partial reading.

use chrono::Local;
use serde::Serialize;

use crate::error::FrameError;

/// Width of every schema field on the wire.
const F32_WIDTH: usize = 4;

/// Capture timestamp format shared with the reading store.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    name: &'static str,
    width: usize,
}

impl FieldSpec {
    pub const fn f32(name: &'static str) -> Self {
        Self {
            name,
            width: F32_WIDTH,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }
}

/// Field layout of every sensor node frame.
pub const READING_SCHEMA: [FieldSpec; 4] = [
    FieldSpec::f32("temperature"),
    FieldSpec::f32("humidity"),
    FieldSpec::f32("soil_moisture"),
    FieldSpec::f32("light"),
];

/// Total payload length demanded by a schema.
pub fn schema_len(schema: &[FieldSpec]) -> usize {
    schema.iter().map(FieldSpec::width).sum()
}

// ---------------------------------------------------------------------------
// Readings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub temperature: f64,
    pub humidity: f64,
    pub soil_moisture: f64,
    pub light: f64,
    pub timestamp: String,
}

/// Source of capture timestamps, swappable in tests.
pub trait Clock {
    fn timestamp(&self) -> String;
}

/// Local wall clock, second resolution.
pub struct SystemClock;

impl Clock for SystemClock {
    fn timestamp(&self) -> String {
        Local::now().format(TIMESTAMP_FORMAT).to_string()
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

fn round2(v: f32) -> f64 {
    (f64::from(v) * 100.0).round() / 100.0
}

/// Decode `payload` against `schema`, left to right.
///
/// Bytes past the end of the schema are ignored.
pub fn decode_fields(
    payload: &[u8],
    schema: &[FieldSpec],
) -> Result<Vec<(&'static str, f64)>, FrameError> {
    let mut rest = payload;
    let mut out = Vec::with_capacity(schema.len());

    for field in schema {
        if rest.len() < field.width {
            return Err(FrameError::Truncated {
                field: field.name,
                needed: field.width,
                remaining: rest.len(),
            });
        }
        let (head, tail) = rest.split_at(field.width);
        let mut raw = [0u8; F32_WIDTH];
        raw.copy_from_slice(&head[..F32_WIDTH]);
        let value = f32::from_le_bytes(raw);
        if !value.is_finite() {
            return Err(FrameError::NonFinite { field: field.name });
        }
        out.push((field.name, round2(value)));
        rest = tail;
    }

    if !rest.is_empty() {
        tracing::debug!(trailing = rest.len(), "ignoring trailing frame bytes");
    }

    Ok(out)
}

/// Decode a node payload into a timestamped reading.
pub fn decode_reading<C: Clock + ?Sized>(
    payload: &[u8],
    clock: &C,
) -> Result<SensorReading, FrameError> {
    let fields = decode_fields(payload, &READING_SCHEMA)?;
    reading_from_fields(&fields, clock.timestamp())
}

/// Every reading field must come out of the schema; none defaults to zero.
fn reading_from_fields(
    fields: &[(&'static str, f64)],
    timestamp: String,
) -> Result<SensorReading, FrameError> {
    let value = |field: &'static str| {
        fields
            .iter()
            .find(|(n, _)| *n == field)
            .map(|(_, v)| *v)
            .ok_or(FrameError::MissingField { field })
    };

    Ok(SensorReading {
        temperature: value("temperature")?,
        humidity: value("humidity")?,
        soil_moisture: value("soil_moisture")?,
        light: value("light")?,
        timestamp,
    })
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) struct FixedClock(pub &'static str);

    impl Clock for FixedClock {
        fn timestamp(&self) -> String {
            self.0.to_string()
        }
    }

    /// Encode values the way a node does.
    pub(crate) fn encode(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn decodes_every_field_in_schema_order() {
        let payload = encode(&[21.456, 48.0, 812.333, 120.5]);
        let fields = decode_fields(&payload, &READING_SCHEMA).unwrap();
        let names: Vec<_> = fields.iter().map(|(n, _)| *n).collect();
        assert_eq!(names, ["temperature", "humidity", "soil_moisture", "light"]);
        assert_eq!(fields[0].1, 21.46);
        assert_eq!(fields[1].1, 48.0);
        assert_eq!(fields[2].1, 812.33);
        assert_eq!(fields[3].1, 120.5);
    }

    #[test]
    fn schema_len_is_sum_of_widths() {
        assert_eq!(schema_len(&READING_SCHEMA), 16);
    }

    #[test]
    fn reading_gets_clock_timestamp() {
        let payload = encode(&[20.0, 55.5, 700.0, 40.0]);
        let reading = decode_reading(&payload, &FixedClock("2018-04-10 18:36:00")).unwrap();
        assert_eq!(
            reading,
            SensorReading {
                temperature: 20.0,
                humidity: 55.5,
                soil_moisture: 700.0,
                light: 40.0,
                timestamp: "2018-04-10 18:36:00".into(),
            }
        );
    }

    #[test]
    fn short_payload_is_malformed() {
        let mut payload = encode(&[20.0, 55.5, 700.0, 40.0]);
        payload.truncate(14);
        let err = decode_reading(&payload, &FixedClock("t")).unwrap_err();
        assert_eq!(
            err,
            FrameError::Truncated {
                field: "light",
                needed: 4,
                remaining: 2,
            }
        );
    }

    #[test]
    fn empty_payload_fails_on_first_field() {
        let err = decode_fields(&[], &READING_SCHEMA).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Truncated {
                field: "temperature",
                remaining: 0,
                ..
            }
        ));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut payload = encode(&[1.0, 2.0, 3.0, 4.0]);
        payload.extend_from_slice(&[0xFF, 0xFF]);
        let fields = decode_fields(&payload, &READING_SCHEMA).unwrap();
        assert_eq!(fields.len(), 4);
        assert_eq!(fields[3].1, 4.0);
    }

    #[test]
    fn reading_requires_every_field() {
        let fields = [("temperature", 20.0), ("humidity", 50.0), ("soil_moisture", 900.0)];
        assert_eq!(
            reading_from_fields(&fields, "t".into()).unwrap_err(),
            FrameError::MissingField { field: "light" }
        );
    }

    #[test]
    fn nan_field_is_malformed() {
        let payload = encode(&[1.0, f32::NAN, 3.0, 4.0]);
        assert_eq!(
            decode_fields(&payload, &READING_SCHEMA).unwrap_err(),
            FrameError::NonFinite { field: "humidity" }
        );
    }

    #[test]
    fn system_clock_uses_storage_format() {
        let ts = SystemClock.timestamp();
        assert!(
            chrono::NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT).is_ok(),
            "unexpected timestamp: {ts}"
        );
    }
}
