//! Certification reference points and installation correction.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::{EmissionsError, Mode, Pollutant, PollutantIndices, EPSILON};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct CalibrationPoint {
    pub mode: Mode,
    pub fuel_flow_kg_s: f64,
    pub emission_index_g_kg: f64,
}

/// Per-mode multiplicative factors applied to certification fuel flow.
/// Modes without an override use [`Mode::default_installation_factor`].
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct InstallationCorrections {
    overrides: BTreeMap<Mode, f64>,
}

impl InstallationCorrections {
    pub fn with_override(mut self, mode: Mode, factor: f64) -> Self {
        self.overrides.insert(mode, factor);
        self
    }

    pub fn factor(&self, mode: Mode) -> f64 {
        self.overrides
            .get(&mode)
            .copied()
            .unwrap_or_else(|| mode.default_installation_factor())
    }
}

/// The four reference points of one pollutant for one engine.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct CalibrationTable {
    pub pollutant: Pollutant,
    pub points: Vec<CalibrationPoint>,
}

impl CalibrationTable {
    pub fn new(pollutant: Pollutant, points: Vec<CalibrationPoint>) -> Self {
        let table = Self { pollutant, points };
        table.check_shape();
        table
    }

    /// Logs (without failing) tables that do not carry exactly one point per mode
    /// or whose fuel flows are not strictly increasing.
    pub fn check_shape(&self) {
        if self.points.len() != Mode::ALL.len() {
            error!(
                pollutant = %self.pollutant,
                "calibration table has {} points, expected {}",
                self.points.len(),
                Mode::ALL.len()
            );
        }
        let flows: Vec<OrderedFloat<f64>> = Mode::ALL
            .iter()
            .filter_map(|m| self.point(*m).ok())
            .map(|p| OrderedFloat(p.fuel_flow_kg_s))
            .collect();
        if flows.windows(2).any(|w| w[0] >= w[1]) {
            warn!(
                pollutant = %self.pollutant,
                "calibration fuel flows are not strictly increasing with thrust"
            );
        }
    }

    pub fn point(&self, mode: Mode) -> Result<&CalibrationPoint, EmissionsError> {
        self.points
            .iter()
            .find(|p| p.mode == mode)
            .ok_or(EmissionsError::MissingCalibrationMode {
                pollutant: self.pollutant,
                mode,
            })
    }

    /// New table with every fuel flow multiplied by its mode's installation factor.
    /// Emission indices are untouched.
    pub fn with_installation_corrections(&self, corrections: &InstallationCorrections) -> Self {
        Self {
            pollutant: self.pollutant,
            points: self
                .points
                .iter()
                .map(|p| CalibrationPoint {
                    fuel_flow_kg_s: p.fuel_flow_kg_s * corrections.factor(p.mode),
                    ..*p
                })
                .collect(),
        }
    }

    pub fn is_all_zero(&self) -> bool {
        self.points.iter().all(|p| p.emission_index_g_kg == 0.0)
    }

    /// `(fuel_flow, emission_index)` for Idle, Approach, Climbout, Takeoff with
    /// zero indices replaced by small positive floors so they survive log10.
    pub fn substituted_points(&self) -> Result<[(f64, f64); 4], EmissionsError> {
        let mut out = [(0.0, 0.0); 4];
        let mut idle_nonzero = true;
        for (slot, mode) in out.iter_mut().zip(Mode::ALL) {
            let point = self.point(mode)?;
            let mut ei = point.emission_index_g_kg;
            if ei == 0.0 {
                ei = match mode {
                    Mode::Idle => {
                        idle_nonzero = false;
                        10.0 * EPSILON
                    }
                    Mode::Approach if idle_nonzero => 10.0 * EPSILON,
                    Mode::Approach | Mode::Climbout | Mode::Takeoff => EPSILON,
                };
            }
            *slot = (point.fuel_flow_kg_s, ei);
        }
        Ok(out)
    }
}

/// Certification data of one engine at one LTO mode.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct EngineModeData {
    pub mode: Mode,
    pub fuel_flow_kg_s: f64,
    pub indices: PollutantIndices,
}

/// Builds the calibration table of `pollutant` from per-mode engine data.
pub fn table_from_modes(pollutant: Pollutant, modes: &[EngineModeData]) -> CalibrationTable {
    let points = modes
        .iter()
        .map(|m| CalibrationPoint {
            mode: m.mode,
            fuel_flow_kg_s: m.fuel_flow_kg_s,
            emission_index_g_kg: m.indices.get(pollutant),
        })
        .collect();
    CalibrationTable::new(pollutant, points)
}

/// Fuel flow (kg/s) at `power_setting`, linear in thrust between the LTO
/// points and clamped outside them.
pub fn fuel_flow_at_power(modes: &[EngineModeData], power_setting: f64) -> Option<f64> {
    let mut pts: Vec<(f64, f64)> = modes
        .iter()
        .map(|m| (m.mode.thrust(), m.fuel_flow_kg_s))
        .collect();
    if pts.is_empty() {
        return None;
    }
    pts.sort_by_key(|(thrust, _)| OrderedFloat(*thrust));
    let (first, last) = (pts[0], pts[pts.len() - 1]);
    if power_setting <= first.0 {
        return Some(first.1);
    }
    if power_setting >= last.0 {
        return Some(last.1);
    }
    pts.windows(2).find_map(|w| {
        let ((t0, f0), (t1, f1)) = (w[0], w[1]);
        if power_setting >= t0 && power_setting <= t1 {
            let frac = if (t1 - t0).abs() > f64::EPSILON {
                (power_setting - t0) / (t1 - t0)
            } else {
                0.0
            };
            Some(f0 + (f1 - f0) * frac)
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nox_table() -> CalibrationTable {
        CalibrationTable::new(
            Pollutant::Nox,
            vec![
                CalibrationPoint {
                    mode: Mode::Idle,
                    fuel_flow_kg_s: 0.1011,
                    emission_index_g_kg: 4.0,
                },
                CalibrationPoint {
                    mode: Mode::Approach,
                    fuel_flow_kg_s: 0.291,
                    emission_index_g_kg: 8.0,
                },
                CalibrationPoint {
                    mode: Mode::Climbout,
                    fuel_flow_kg_s: 0.862,
                    emission_index_g_kg: 19.6,
                },
                CalibrationPoint {
                    mode: Mode::Takeoff,
                    fuel_flow_kg_s: 1.051,
                    emission_index_g_kg: 24.6,
                },
            ],
        )
    }

    #[test]
    fn test_empty_corrections_use_defaults() {
        let corrected =
            nox_table().with_installation_corrections(&InstallationCorrections::default());
        let expected = [0.1011 * 1.100, 0.291 * 1.020, 0.862 * 1.012, 1.051 * 1.010];
        for (mode, want) in Mode::ALL.iter().zip(expected) {
            let got = corrected.point(*mode).unwrap().fuel_flow_kg_s;
            assert!((got - want).abs() < 1e-12, "{mode}: {got} vs {want}");
        }
    }

    #[test]
    fn test_override_only_touches_its_mode() {
        let corrections = InstallationCorrections::default().with_override(Mode::Idle, 1.0);
        let corrected = nox_table().with_installation_corrections(&corrections);
        assert_eq!(corrected.point(Mode::Idle).unwrap().fuel_flow_kg_s, 0.1011);
        let takeoff = corrected.point(Mode::Takeoff).unwrap().fuel_flow_kg_s;
        assert!((takeoff - 1.051 * 1.01).abs() < 1e-12);
    }

    #[test]
    fn test_double_correction_moves_fuel_flows_again() {
        let corrections = InstallationCorrections::default();
        let table = nox_table();
        let once = table.with_installation_corrections(&corrections);
        let twice = once.with_installation_corrections(&corrections);
        assert_ne!(once, twice);
        for mode in Mode::ALL {
            assert!(
                twice.point(mode).unwrap().fuel_flow_kg_s > once.point(mode).unwrap().fuel_flow_kg_s
            );
            assert_eq!(
                twice.point(mode).unwrap().emission_index_g_kg,
                once.point(mode).unwrap().emission_index_g_kg
            );
        }
        // The source table itself is never modified.
        assert_eq!(table, nox_table());
    }

    #[test]
    fn test_zero_substitution_policy() {
        let mut table = nox_table();
        for p in table.points.iter_mut() {
            p.emission_index_g_kg = 0.0;
        }
        let pts = table.substituted_points().unwrap();
        assert_eq!(pts[0].1, 10.0 * EPSILON);
        assert_eq!(pts[1].1, EPSILON);
        assert_eq!(pts[2].1, EPSILON);
        assert_eq!(pts[3].1, EPSILON);

        table.points[0].emission_index_g_kg = 2.0;
        let pts = table.substituted_points().unwrap();
        assert_eq!(pts[0].1, 2.0);
        assert_eq!(pts[1].1, 10.0 * EPSILON);
    }

    #[test]
    fn test_missing_mode_is_an_error() {
        let mut table = nox_table();
        table.points.retain(|p| p.mode != Mode::Climbout);
        assert!(matches!(
            table.substituted_points(),
            Err(EmissionsError::MissingCalibrationMode {
                mode: Mode::Climbout,
                ..
            })
        ));
    }

    #[test]
    fn test_fuel_flow_at_power() {
        let modes: Vec<EngineModeData> = nox_table()
            .points
            .iter()
            .map(|p| EngineModeData {
                mode: p.mode,
                fuel_flow_kg_s: p.fuel_flow_kg_s,
                indices: PollutantIndices::default(),
            })
            .collect();
        assert_eq!(fuel_flow_at_power(&modes, 0.0), Some(0.1011));
        assert_eq!(fuel_flow_at_power(&modes, 1.2), Some(1.051));
        let mid = fuel_flow_at_power(&modes, 0.575).unwrap();
        assert!((mid - (0.291 + 0.862) / 2.0).abs() < 1e-12);
        assert_eq!(fuel_flow_at_power(&[], 0.5), None);
    }
}
