//! Stateful plant sensor simulator for local development.
//!
//! Produces the four values a real node measures:
//! - temperature (°C) and humidity (%), random walk around a scenario centre
//! - soil moisture on the raw 0..=1023 probe scale, higher = drier, with
//!   evaporation drift and a closed-loop response to the irrigation pump
//! - light (raw 0..=1023), day/night cycle plus cloud noise

use std::fmt;

// ---------------------------------------------------------------------------
// Gaussian approximation (no extra dependency)
// ---------------------------------------------------------------------------

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

const PROBE_MAX: f64 = 1023.0;

// ---------------------------------------------------------------------------
// Scenario presets
// ---------------------------------------------------------------------------

/// Pre-configured simulation profiles selectable via `SIM_SCENARIO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// Starts mid-range and dries out steadily. Crosses a typical 800 soil
    /// threshold within a few dozen samples.
    Drying,
    /// Hovers mid-range with little noise. Rarely crosses anything.
    Stable,
    /// Noisy readings near the thresholds; exercises hysteresis.
    Flaky,
    /// Starts wet and dries very slowly.
    Wet,
}

impl Scenario {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "stable" => Self::Stable,
            "flaky" => Self::Flaky,
            "wet" => Self::Wet,
            _ => Self::Drying,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Drying => write!(f, "drying"),
            Self::Stable => write!(f, "stable"),
            Self::Flaky => write!(f, "flaky"),
            Self::Wet => write!(f, "wet"),
        }
    }
}

// ---------------------------------------------------------------------------
// Sample
// ---------------------------------------------------------------------------

/// One tick of simulated sensors, in frame order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub temperature: f32,
    pub humidity: f32,
    pub soil_moisture: f32,
    pub light: f32,
}

impl Sample {
    /// Little-endian f32 values: temperature, humidity, soil_moisture, light.
    pub fn encode(&self) -> Vec<u8> {
        [self.temperature, self.humidity, self.soil_moisture, self.light]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Main simulator
// ---------------------------------------------------------------------------

pub struct PlantSim {
    temperature: f64,
    humidity: f64,
    soil: f64,

    temp_centre: f64,
    humidity_centre: f64,

    // Soil random walk
    dry_per_sample: f64,
    soil_sigma: f64,
    noise_sigma: f64,

    // Diurnal cycle
    period_s: f64,
    light_peak: f64,

    // Watering response
    watering: bool,
    wet_rate: f64,
}

impl PlantSim {
    /// `period_s` is the day/night cycle length. Use 600 (10 min) for fast
    /// dev iteration or 86400 for real time.
    pub fn new(scenario: Scenario, period_s: f64) -> Self {
        let (soil_start, dry, soil_sigma, noise_sigma) = match scenario {
            Scenario::Drying => (650.0, 6.0, 4.0, 3.0),
            Scenario::Stable => (500.0, 0.5, 1.5, 1.0),
            Scenario::Flaky => (790.0, 1.0, 10.0, 15.0),
            Scenario::Wet => (300.0, 1.5, 2.0, 2.0),
        };

        Self {
            temperature: gaussian(21.0, 1.0),
            humidity: gaussian(45.0, 3.0),
            soil: soil_start,
            temp_centre: 21.0,
            humidity_centre: 45.0,
            dry_per_sample: dry,
            soil_sigma,
            noise_sigma,
            period_s,
            light_peak: 700.0,
            watering: false,
            wet_rate: -25.0,
        }
    }

    /// Inform the simulator whether the irrigation pump is running.
    pub fn set_watering(&mut self, active: bool) {
        self.watering = active;
    }

    pub fn watering(&self) -> bool {
        self.watering
    }

    /// Advance one tick. `t_s` is seconds since the epoch and drives the
    /// day/night cycle.
    pub fn sample(&mut self, t_s: f64) -> Sample {
        let phase = 2.0 * std::f64::consts::PI * t_s / self.period_s;
        // 0 at night, 1 at midday.
        let daylight = phase.sin().max(0.0);

        self.temperature += 0.1 * (self.temp_centre + 4.0 * daylight - self.temperature)
            + gaussian(0.0, 0.2);
        self.humidity += 0.1 * (self.humidity_centre - 8.0 * daylight - self.humidity)
            + gaussian(0.0, 0.5);

        let wet = if self.watering { self.wet_rate } else { 0.0 };
        self.soil = (self.soil + self.dry_per_sample + wet + gaussian(0.0, self.soil_sigma))
            .clamp(0.0, PROBE_MAX);

        let light = self.light_peak * daylight + gaussian(15.0, 10.0);

        Sample {
            temperature: self.temperature as f32,
            humidity: self.humidity.clamp(0.0, 100.0) as f32,
            soil_moisture: (self.soil + gaussian(0.0, self.noise_sigma))
                .round()
                .clamp(0.0, PROBE_MAX) as f32,
            light: light.round().clamp(0.0, PROBE_MAX) as f32,
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
