use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::EmissionsError;

pub const ISA_TEMPERATURE_K: f64 = 288.15;
pub const ISA_PRESSURE_PA: f64 = 101_325.0;
pub const ISA_RELATIVE_HUMIDITY: f64 = 0.6;
/// Reference humidity ratio (kg water / kg dry air) used by the humidity coefficient.
pub const REFERENCE_HUMIDITY_RATIO: f64 = 0.00634;

const PA_PER_PSI: f64 = 6894.757;
const HPA_PER_PSI: f64 = 68.9473;
const GAMMA_AIR: f64 = 1.4;
const R_AIR: f64 = 287.05;

/// Ambient state for one calculation. Temperature in K, pressure in Pa,
/// relative humidity as a fraction.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct AmbientCondition {
    pub temperature_k: f64,
    pub pressure_pa: f64,
    pub relative_humidity: f64,
    #[serde(default)]
    pub mach_number: f64,
    #[serde(default)]
    pub humidity_ratio: Option<f64>,
}

impl Default for AmbientCondition {
    fn default() -> Self {
        Self {
            temperature_k: ISA_TEMPERATURE_K,
            pressure_pa: ISA_PRESSURE_PA,
            relative_humidity: ISA_RELATIVE_HUMIDITY,
            mach_number: 0.0,
            humidity_ratio: None,
        }
    }
}

/// Dimensionless ratios shared by every ambient correction.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AmbientRatios {
    /// T / 288.15
    pub theta: f64,
    /// P / 101325
    pub delta: f64,
    /// Humidity ratio ω.
    pub omega: f64,
    /// Humidity coefficient -19·(ω − 0.00634).
    pub humidity_coefficient: f64,
}

impl AmbientCondition {
    pub fn with_mach(&self, mach_number: f64) -> Self {
        Self {
            mach_number,
            ..*self
        }
    }

    pub fn speed_of_sound_mps(&self) -> f64 {
        (GAMMA_AIR * R_AIR * self.temperature_k).sqrt()
    }

    /// Saturation vapour pressure in hPa (Magnus form).
    pub fn saturation_vapour_pressure_hpa(&self) -> f64 {
        let t_c = self.temperature_k - 273.15;
        6.107 * 10f64.powf((7.5 * t_c) / (237.3 + t_c))
    }

    fn humidity_denominator(&self) -> f64 {
        let p_psia = self.pressure_pa / PA_PER_PSI;
        p_psia * HPA_PER_PSI - self.relative_humidity * self.saturation_vapour_pressure_hpa()
    }

    /// Humidity ratio, either supplied or derived from relative humidity.
    /// A zero denominator propagates as a non-finite value.
    pub fn humidity_ratio(&self) -> f64 {
        if let Some(omega) = self.humidity_ratio {
            return omega;
        }
        let p_sat = self.saturation_vapour_pressure_hpa();
        0.62197058 * self.relative_humidity * p_sat / self.humidity_denominator()
    }

    pub fn normalize(&self) -> AmbientRatios {
        let theta = self.temperature_k / ISA_TEMPERATURE_K;
        let delta = self.pressure_pa / ISA_PRESSURE_PA;
        if delta < 0.001 {
            warn!(
                pressure = self.pressure_pa,
                "pressure ratio {:.2e} is implausibly small; is pressure given in Pa?", delta
            );
        }
        let omega = self.humidity_ratio();
        AmbientRatios {
            theta,
            delta,
            omega,
            humidity_coefficient: -19.0 * (omega - REFERENCE_HUMIDITY_RATIO),
        }
    }

    /// Like [`normalize`](Self::normalize) but rejects a degenerate humidity input.
    pub fn try_normalize(&self) -> Result<AmbientRatios, EmissionsError> {
        if self.humidity_ratio.is_none() {
            let denominator = self.humidity_denominator();
            if denominator.abs() < 1e-9 {
                return Err(EmissionsError::DegenerateHumidity(denominator));
            }
        }
        let ratios = self.normalize();
        if !ratios.omega.is_finite() {
            return Err(EmissionsError::DegenerateHumidity(ratios.omega));
        }
        Ok(ratios)
    }
}

/// Ambient conditions keyed by the start of the period they apply to.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AmbientSeries {
    entries: BTreeMap<DateTime<Utc>, AmbientCondition>,
}

impl AmbientSeries {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest entry at or before `at`; ISA sea level when none applies.
    pub fn at(&self, at: DateTime<Utc>) -> AmbientCondition {
        self.entries
            .range(..=at)
            .next_back()
            .map(|(_, c)| *c)
            .unwrap_or_default()
    }
}
