//! Flight-phase aircraft emission estimation.
//!
//! Converts engine fuel flow into pollutant emission indices under non-reference
//! ambient conditions (Boeing Fuel Flow Method 2) and aggregates gate, taxi and
//! flight contributions per movement and time bucket.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod aggregate;
pub mod ambient;
pub mod bffm2;
pub mod calibration;
pub mod config;
pub mod inventory;
pub mod nox;
pub mod phases;
pub mod trajectory;

pub use aggregate::{
    bucket_total, MovementEmissionAggregator, MovementEmissions, Phase, PhaseEmissions, TimeBucket,
};
pub use ambient::{AmbientCondition, AmbientRatios, AmbientSeries};
pub use bffm2::{emission_index, Bffm2Interpolator};
pub use calibration::{CalibrationPoint, CalibrationTable, EngineModeData, InstallationCorrections};
pub use config::{Method, StudyConfig};
pub use inventory::{Aircraft, Engine, Gate, GateProfile, Movement, Repositories, Runway, TaxiRoute};
pub use nox::AmbientNOxCorrector;
pub use phases::{MovementPhaseEstimator, PhaseEstimator};
pub use trajectory::{Trajectory, TrajectoryPoint};

/// Floor used for zero emission indices, non-positive fuel flows and the
/// back-transform cut-off.
pub const EPSILON: f64 = 1e-4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmissionsError {
    #[error("unsupported pollutant: {0}")]
    UnsupportedPollutant(String),
    #[error("unsupported emission method: {0}")]
    UnsupportedMethod(String),
    #[error("calibration table for {pollutant} is missing mode {mode}")]
    MissingCalibrationMode { pollutant: Pollutant, mode: Mode },
    #[error("no {kind} found for '{key}'")]
    MissingReference { kind: &'static str, key: String },
    #[error("no gate profile for gate type '{gate_type}', group '{group}', {operation}")]
    MissingGateProfile {
        gate_type: String,
        group: String,
        operation: Operation,
    },
    #[error("trajectory '{0}' has no points")]
    EmptyTrajectory(String),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("degenerate humidity input (denominator {0})")]
    DegenerateHumidity(f64),
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Pollutant {
    #[serde(rename = "CO")]
    Co,
    #[serde(rename = "CO2")]
    Co2,
    #[serde(rename = "HC")]
    Hc,
    #[serde(rename = "NOx")]
    Nox,
    #[serde(rename = "SOx")]
    Sox,
    #[serde(rename = "PM10")]
    Pm10,
    #[serde(rename = "P1")]
    P1,
    #[serde(rename = "P2")]
    P2,
}

impl Pollutant {
    pub fn name(&self) -> &'static str {
        match self {
            Pollutant::Co => "CO",
            Pollutant::Co2 => "CO2",
            Pollutant::Hc => "HC",
            Pollutant::Nox => "NOx",
            Pollutant::Sox => "SOx",
            Pollutant::Pm10 => "PM10",
            Pollutant::P1 => "P1",
            Pollutant::P2 => "P2",
        }
    }
}

impl fmt::Display for Pollutant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Pollutant {
    type Err = EmissionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "co" => Ok(Pollutant::Co),
            "co2" => Ok(Pollutant::Co2),
            "hc" => Ok(Pollutant::Hc),
            "nox" => Ok(Pollutant::Nox),
            "sox" => Ok(Pollutant::Sox),
            "pm10" => Ok(Pollutant::Pm10),
            "p1" => Ok(Pollutant::P1),
            "p2" => Ok(Pollutant::P2),
            _ => Err(EmissionsError::UnsupportedPollutant(s.to_string())),
        }
    }
}

/// ICAO landing-takeoff operating point.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mode {
    Idle,
    Approach,
    Climbout,
    Takeoff,
}

impl Mode {
    pub const ALL: [Mode; 4] = [Mode::Idle, Mode::Approach, Mode::Climbout, Mode::Takeoff];

    /// Rated thrust fraction of the certification point.
    pub fn thrust(&self) -> f64 {
        match self {
            Mode::Idle => 0.07,
            Mode::Approach => 0.30,
            Mode::Climbout => 0.85,
            Mode::Takeoff => 1.00,
        }
    }

    pub fn default_installation_factor(&self) -> f64 {
        match self {
            Mode::Takeoff => 1.010,
            Mode::Climbout => 1.012,
            Mode::Approach => 1.020,
            Mode::Idle => 1.100,
        }
    }

    /// Mode whose thrust level is closest to `power_setting`.
    pub fn nearest(power_setting: f64) -> Mode {
        let mut best = Mode::Idle;
        for mode in Mode::ALL {
            if (mode.thrust() - power_setting).abs() < (best.thrust() - power_setting).abs() {
                best = mode;
            }
        }
        best
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Mode::Idle => "Idle",
            Mode::Approach => "Approach",
            Mode::Climbout => "Climbout",
            Mode::Takeoff => "Takeoff",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    #[serde(rename = "departure", alias = "D")]
    Departure,
    #[serde(rename = "arrival", alias = "A")]
    Arrival,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Departure => f.write_str("departure"),
            Operation::Arrival => f.write_str("arrival"),
        }
    }
}

/// Additive emission totals. Fuel in kg, pollutants in g.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EmissionResult {
    #[serde(default)]
    pub fuel_kg: f64,
    #[serde(default)]
    pub co_g: f64,
    #[serde(default)]
    pub co2_g: f64,
    #[serde(default)]
    pub hc_g: f64,
    #[serde(default)]
    pub nox_g: f64,
    #[serde(default)]
    pub sox_g: f64,
    #[serde(default)]
    pub pm10_g: f64,
    #[serde(default)]
    pub p1_g: f64,
    #[serde(default)]
    pub p2_g: f64,
}

impl EmissionResult {
    /// Emissions from burning `fuel_kg` at the given per-pollutant indices (g/kg).
    pub fn from_fuel(fuel_kg: f64, indices: &PollutantIndices) -> Self {
        Self {
            fuel_kg,
            co_g: fuel_kg * indices.co,
            co2_g: fuel_kg * indices.co2,
            hc_g: fuel_kg * indices.hc,
            nox_g: fuel_kg * indices.nox,
            sox_g: fuel_kg * indices.sox,
            pm10_g: fuel_kg * indices.pm10,
            p1_g: fuel_kg * indices.p1,
            p2_g: fuel_kg * indices.p2,
        }
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            fuel_kg: self.fuel_kg * factor,
            co_g: self.co_g * factor,
            co2_g: self.co2_g * factor,
            hc_g: self.hc_g * factor,
            nox_g: self.nox_g * factor,
            sox_g: self.sox_g * factor,
            pm10_g: self.pm10_g * factor,
            p1_g: self.p1_g * factor,
            p2_g: self.p2_g * factor,
        }
    }

    pub fn is_zero(&self) -> bool {
        [
            self.fuel_kg,
            self.co_g,
            self.co2_g,
            self.hc_g,
            self.nox_g,
            self.sox_g,
            self.pm10_g,
            self.p1_g,
            self.p2_g,
        ]
        .iter()
        .all(|v| *v == 0.0)
    }
}

impl Add for EmissionResult {
    type Output = EmissionResult;

    fn add(mut self, rhs: EmissionResult) -> EmissionResult {
        self += rhs;
        self
    }
}

impl AddAssign for EmissionResult {
    fn add_assign(&mut self, rhs: EmissionResult) {
        self.fuel_kg += rhs.fuel_kg;
        self.co_g += rhs.co_g;
        self.co2_g += rhs.co2_g;
        self.hc_g += rhs.hc_g;
        self.nox_g += rhs.nox_g;
        self.sox_g += rhs.sox_g;
        self.pm10_g += rhs.pm10_g;
        self.p1_g += rhs.p1_g;
        self.p2_g += rhs.p2_g;
    }
}

impl Sum for EmissionResult {
    fn sum<I: Iterator<Item = EmissionResult>>(iter: I) -> Self {
        iter.fold(EmissionResult::default(), |acc, r| acc + r)
    }
}

/// Emission indices (g/kg fuel) for every tracked pollutant.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct PollutantIndices {
    #[serde(default)]
    pub co: f64,
    #[serde(default = "default_co2_index")]
    pub co2: f64,
    #[serde(default)]
    pub hc: f64,
    #[serde(default)]
    pub nox: f64,
    #[serde(default)]
    pub sox: f64,
    #[serde(default)]
    pub pm10: f64,
    #[serde(default)]
    pub p1: f64,
    #[serde(default)]
    pub p2: f64,
}

/// CO2 per kg of kerosene burned.
pub const CO2_INDEX_G_PER_KG: f64 = 3160.0;

fn default_co2_index() -> f64 {
    CO2_INDEX_G_PER_KG
}

impl Default for PollutantIndices {
    fn default() -> Self {
        Self {
            co: 0.0,
            co2: CO2_INDEX_G_PER_KG,
            hc: 0.0,
            nox: 0.0,
            sox: 0.0,
            pm10: 0.0,
            p1: 0.0,
            p2: 0.0,
        }
    }
}

impl PollutantIndices {
    pub fn get(&self, pollutant: Pollutant) -> f64 {
        match pollutant {
            Pollutant::Co => self.co,
            Pollutant::Co2 => self.co2,
            Pollutant::Hc => self.hc,
            Pollutant::Nox => self.nox,
            Pollutant::Sox => self.sox,
            Pollutant::Pm10 => self.pm10,
            Pollutant::P1 => self.p1,
            Pollutant::P2 => self.p2,
        }
    }

    pub fn set(&mut self, pollutant: Pollutant, value: f64) {
        match pollutant {
            Pollutant::Co => self.co = value,
            Pollutant::Co2 => self.co2 = value,
            Pollutant::Hc => self.hc = value,
            Pollutant::Nox => self.nox = value,
            Pollutant::Sox => self.sox = value,
            Pollutant::Pm10 => self.pm10 = value,
            Pollutant::P1 => self.p1 = value,
            Pollutant::P2 => self.p2 = value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emission_result_sum_and_zero() {
        let a = EmissionResult {
            fuel_kg: 1.0,
            nox_g: 10.0,
            ..EmissionResult::default()
        };
        let b = EmissionResult {
            fuel_kg: 2.0,
            co_g: 3.0,
            ..EmissionResult::default()
        };
        let total: EmissionResult = vec![a, b].into_iter().sum();
        assert_eq!(total.fuel_kg, 3.0);
        assert_eq!(total.nox_g, 10.0);
        assert_eq!(total.co_g, 3.0);
        assert!(!total.is_zero());
        assert!(EmissionResult::default().is_zero());
    }

    #[test]
    fn test_pollutant_parse() {
        assert_eq!("NOx".parse::<Pollutant>().unwrap(), Pollutant::Nox);
        assert_eq!(" hc ".parse::<Pollutant>().unwrap(), Pollutant::Hc);
        assert!(matches!(
            "O3".parse::<Pollutant>(),
            Err(EmissionsError::UnsupportedPollutant(_))
        ));
    }

    #[test]
    fn test_nearest_mode() {
        assert_eq!(Mode::nearest(0.05), Mode::Idle);
        assert_eq!(Mode::nearest(0.4), Mode::Approach);
        assert_eq!(Mode::nearest(0.9), Mode::Climbout);
        assert_eq!(Mode::nearest(0.99), Mode::Takeoff);
    }
}
