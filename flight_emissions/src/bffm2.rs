//! Boeing Fuel Flow Method 2.
//!
//! Emission indices at actual conditions are read off a log-log curve through the
//! four installation-corrected certification points, evaluated at the reference
//! (sea-level ISA) fuel flow, then corrected back to ambient conditions.

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::ambient::AmbientCondition;
use crate::calibration::{CalibrationTable, InstallationCorrections};
use crate::{EmissionsError, Pollutant, EPSILON};

/// Shape of a CO/HC curve between the approach and climb-out points.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum DataBehavior {
    Standard,
    NonStandard,
}

type Point = (f64, f64);

#[derive(Clone, Debug)]
enum LogCurve {
    Nox {
        x: [f64; 4],
        y: [f64; 4],
    },
    CoHc {
        x: [f64; 4],
        y: [f64; 4],
        lin_av: f64,
        intersection: Point,
        behavior: DataBehavior,
    },
}

/// Interpolator prepared for one pollutant of one engine.
///
/// The installation correction is applied to a copy of the table exactly once, at
/// construction; evaluating many fuel flows never re-applies it.
#[derive(Clone, Debug)]
pub struct Bffm2Interpolator {
    pollutant: Pollutant,
    curve: Option<LogCurve>,
}

impl Bffm2Interpolator {
    pub fn new(
        table: &CalibrationTable,
        corrections: &InstallationCorrections,
    ) -> Result<Self, EmissionsError> {
        let pollutant = table.pollutant;
        if !matches!(pollutant, Pollutant::Nox | Pollutant::Co | Pollutant::Hc) {
            error!(%pollutant, "BFFM2 only covers NOx, CO and HC");
            return Err(EmissionsError::UnsupportedPollutant(pollutant.to_string()));
        }
        if table.is_all_zero() {
            warn!(%pollutant, "all calibration emission indices are zero; BFFM2 yields 0");
            return Ok(Self::degenerate(pollutant));
        }

        let corrected = table.with_installation_corrections(corrections);
        let points = corrected.substituted_points()?;
        let x = points.map(|(ff, _)| ff.log10());
        let y = points.map(|(_, ei)| ei.log10());

        let curve = if pollutant == Pollutant::Nox {
            LogCurve::Nox { x, y }
        } else {
            let (ei3, ei4) = (points[2].1, points[3].1);
            let lin_av = (0.5 * (ei3 + ei4)).log10();
            let intersection =
                segment_intersection((x[0], y[0]), (x[1], y[1]), (x[2], lin_av), (x[3], lin_av));
            let behavior = classify(&x, intersection);
            debug!(%pollutant, ?behavior, ip_x = intersection.0, "BFFM2 curve prepared");
            LogCurve::CoHc {
                x,
                y,
                lin_av,
                intersection,
                behavior,
            }
        };
        Ok(Self {
            pollutant,
            curve: Some(curve),
        })
    }

    /// Interpolator that evaluates to 0.0 at every fuel flow.
    pub fn degenerate(pollutant: Pollutant) -> Self {
        Self {
            pollutant,
            curve: None,
        }
    }

    pub fn data_behavior(&self) -> Option<DataBehavior> {
        match &self.curve {
            Some(LogCurve::CoHc { behavior, .. }) => Some(*behavior),
            _ => None,
        }
    }

    /// Emission index (g/kg) at `fuel_flow_kg_s` under `ambient`.
    pub fn evaluate(&self, fuel_flow_kg_s: f64, ambient: &AmbientCondition) -> f64 {
        let Some(curve) = &self.curve else {
            return 0.0;
        };
        let ratios = ambient.normalize();
        let mach = ambient.mach_number;
        let mut ff_ref =
            (fuel_flow_kg_s / ratios.delta) * ratios.theta.powf(3.8) * (0.2 * mach * mach).exp();
        if !(ff_ref > 0.0) {
            ff_ref = EPSILON;
        }
        let x_ff = ff_ref.log10();

        let Some(y_ff) = curve.log_index(x_ff).filter(|y| y.is_finite()) else {
            debug!(pollutant = %self.pollutant, x_ff, "no BFFM2 branch matched");
            return 0.0;
        };
        let ei_ref = 10f64.powf(y_ff);
        if ei_ref <= EPSILON {
            return 0.0;
        }

        let (theta, delta) = (ratios.theta, ratios.delta);
        match self.pollutant {
            Pollutant::Nox => {
                ei_ref
                    * ratios.humidity_coefficient.exp()
                    * (delta.powf(1.02) / theta.powf(3.3)).powf(0.5)
            }
            _ => ei_ref * (theta.powf(3.3) / delta.powf(1.02)),
        }
    }
}

/// One-shot BFFM2 evaluation.
///
/// `table` holds uncorrected certification data; it is copied before the
/// installation correction is applied. An all-zero table yields exactly 0.
pub fn emission_index(
    pollutant: Pollutant,
    fuel_flow_kg_s: f64,
    table: &CalibrationTable,
    ambient: &AmbientCondition,
    corrections: &InstallationCorrections,
) -> Result<f64, EmissionsError> {
    if table.pollutant != pollutant {
        return Err(EmissionsError::InvalidParameter(format!(
            "calibration table holds {} but {} was requested",
            table.pollutant, pollutant
        )));
    }
    Ok(Bffm2Interpolator::new(table, corrections)?.evaluate(fuel_flow_kg_s, ambient))
}

impl LogCurve {
    fn log_index(&self, x_ff: f64) -> Option<f64> {
        match self {
            LogCurve::Nox { x, y } => {
                if x_ff < x[0] {
                    return Some(line_at((x[0], y[0]), (x[1], y[1]), x_ff));
                }
                if x_ff > x[3] {
                    return Some(line_at((x[2], y[2]), (x[3], y[3]), x_ff));
                }
                (0..3)
                    .find(|&i| x_ff >= x[i] && x_ff <= x[i + 1])
                    .map(|i| line_at((x[i], y[i]), (x[i + 1], y[i + 1]), x_ff))
            }
            LogCurve::CoHc {
                x,
                y,
                lin_av,
                intersection,
                behavior,
            } => {
                let (p1, p2, p3, p4) = ((x[0], y[0]), (x[1], y[1]), (x[2], y[2]), (x[3], y[3]));
                if x_ff <= x[1] {
                    Some(line_at(p1, p2, x_ff))
                } else if x_ff <= x[2] {
                    match behavior {
                        DataBehavior::Standard if x_ff < intersection.0 => {
                            Some(line_at(p2, *intersection, x_ff))
                        }
                        DataBehavior::Standard => Some(line_at(*intersection, p3, x_ff)),
                        DataBehavior::NonStandard => Some(line_at(p2, (x[2], *lin_av), x_ff)),
                    }
                } else if x_ff <= x[3] {
                    Some(line_at(p3, p4, x_ff))
                } else if x_ff > x[3] {
                    Some(line_at(*intersection, (x[3], *lin_av), x_ff))
                } else {
                    None
                }
            }
        }
    }
}

/// Non-standard when the intersection lies right of the lower climb-out/takeoff
/// point or left of the higher idle/approach point.
fn classify(x: &[f64; 4], intersection: Point) -> DataBehavior {
    if intersection.0 > x[2].min(x[3]) || intersection.0 < x[0].max(x[1]) {
        DataBehavior::NonStandard
    } else {
        DataBehavior::Standard
    }
}

fn line_at(p0: Point, p1: Point, x: f64) -> f64 {
    let slope = (p1.1 - p0.1) / (p1.0 - p0.0);
    let intercept = p0.1 - slope * p0.0;
    slope * x + intercept
}

fn perp(d: Point) -> Point {
    (-d.1, d.0)
}

fn dot(a: Point, b: Point) -> f64 {
    a.0 * b.0 + a.1 * b.1
}

/// Intersection of the infinite lines a1-a2 and b1-b2. Parallel lines give
/// non-finite coordinates.
pub fn segment_intersection(a1: Point, a2: Point, b1: Point, b2: Point) -> Point {
    let da = (a2.0 - a1.0, a2.1 - a1.1);
    let db = (b2.0 - b1.0, b2.1 - b1.1);
    let dp = (a1.0 - b1.0, a1.1 - b1.1);
    let dap = perp(da);
    let t = dot(dap, dp) / dot(dap, db);
    (t * db.0 + b1.0, t * db.1 + b1.1)
}
