//! Flight-profile and taxi-route geometry: per-segment distance and time of flight.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{EmissionsError, Mode};

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const VINCENTY_MAX_ITER: usize = 200;

/// Operating mode attached to a profile point.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FlightMode {
    Taxi,
    Takeoff,
    Climb,
    Approach,
    Other(String),
}

impl FlightMode {
    pub fn code(&self) -> &str {
        match self {
            FlightMode::Taxi => "TX",
            FlightMode::Takeoff => "TO",
            FlightMode::Climb => "CL",
            FlightMode::Approach => "AP",
            FlightMode::Other(code) => code,
        }
    }

    /// Certification mode used by the LTO method.
    pub fn lto_mode(&self) -> Option<Mode> {
        match self {
            FlightMode::Taxi => Some(Mode::Idle),
            FlightMode::Takeoff => Some(Mode::Takeoff),
            FlightMode::Climb => Some(Mode::Climbout),
            FlightMode::Approach => Some(Mode::Approach),
            FlightMode::Other(_) => None,
        }
    }
}

impl From<String> for FlightMode {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "TX" => FlightMode::Taxi,
            "TO" => FlightMode::Takeoff,
            "CL" => FlightMode::Climb,
            "AP" => FlightMode::Approach,
            _ => FlightMode::Other(value),
        }
    }
}

impl From<FlightMode> for String {
    fn from(value: FlightMode) -> Self {
        value.code().to_string()
    }
}

impl fmt::Display for FlightMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Profile point. With a cartesian trajectory `x`/`y` are metres; otherwise
/// they are longitude/latitude in degrees. `z` is always metres.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TrajectoryPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub true_airspeed_mps: f64,
    #[serde(default)]
    pub power_setting: f64,
    #[serde(default)]
    pub weight_kg: f64,
    pub mode: FlightMode,
}

#[derive(Clone, Debug, Deserialize)]
struct TrajectoryRecord {
    id: String,
    #[serde(default = "default_cartesian")]
    cartesian: bool,
    points: Vec<TrajectoryPoint>,
}

fn default_cartesian() -> bool {
    true
}

/// Ordered, non-empty sequence of profile points.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "TrajectoryRecord")]
pub struct Trajectory {
    id: String,
    cartesian: bool,
    points: Vec<TrajectoryPoint>,
}

impl TryFrom<TrajectoryRecord> for Trajectory {
    type Error = EmissionsError;

    fn try_from(record: TrajectoryRecord) -> Result<Self, Self::Error> {
        Trajectory::new(record.id, record.cartesian, record.points)
    }
}

/// Two consecutive points with the distance and time between them.
#[derive(Clone, Debug)]
pub struct Segment<'a> {
    pub start: &'a TrajectoryPoint,
    pub end: &'a TrajectoryPoint,
    pub distance_m: f64,
    pub time_s: f64,
}

impl Segment<'_> {
    pub fn mean_airspeed_mps(&self) -> f64 {
        0.5 * (self.start.true_airspeed_mps + self.end.true_airspeed_mps)
    }

    pub fn mean_power_setting(&self) -> f64 {
        0.5 * (self.start.power_setting + self.end.power_setting)
    }
}

impl Trajectory {
    pub fn new(
        id: impl Into<String>,
        cartesian: bool,
        points: Vec<TrajectoryPoint>,
    ) -> Result<Self, EmissionsError> {
        let id = id.into();
        if points.is_empty() {
            return Err(EmissionsError::EmptyTrajectory(id));
        }
        Ok(Self {
            id,
            cartesian,
            points,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn segments(&self) -> Vec<Segment<'_>> {
        self.points
            .windows(2)
            .map(|w| {
                let distance_m = pair_distance(&w[0], &w[1], self.cartesian);
                Segment {
                    start: &w[0],
                    end: &w[1],
                    distance_m,
                    time_s: pair_time(&w[0], &w[1], distance_m),
                }
            })
            .collect()
    }

    /// Segments whose start point is in `mode`; all segments for `None`.
    pub fn segments_of_mode(&self, mode: Option<&FlightMode>) -> Vec<Segment<'_>> {
        self.segments()
            .into_iter()
            .filter(|s| mode.map_or(true, |m| &s.start.mode == m))
            .collect()
    }

    pub fn distance_of_mode(&self, mode: Option<&FlightMode>) -> f64 {
        self.segments_of_mode(mode).iter().map(|s| s.distance_m).sum()
    }

    pub fn time_of_mode(&self, mode: Option<&FlightMode>) -> f64 {
        self.segments_of_mode(mode).iter().map(|s| s.time_s).sum()
    }

    /// Mean weight over the points that carry one.
    pub fn mean_weight_kg(&self) -> Option<f64> {
        let weights: Vec<f64> = self
            .points
            .iter()
            .map(|p| p.weight_kg)
            .filter(|w| *w > 0.0)
            .collect();
        if weights.is_empty() {
            None
        } else {
            Some(weights.iter().sum::<f64>() / weights.len() as f64)
        }
    }
}

fn pair_distance(a: &TrajectoryPoint, b: &TrajectoryPoint, cartesian: bool) -> f64 {
    let dz = b.z - a.z;
    let horizontal = if cartesian {
        (b.x - a.x).hypot(b.y - a.y)
    } else {
        geodesic_distance(a.y, a.x, b.y, b.x)
    };
    horizontal.hypot(dz)
}

fn pair_time(a: &TrajectoryPoint, b: &TrajectoryPoint, distance_m: f64) -> f64 {
    let mean_speed = 0.5 * (a.true_airspeed_mps + b.true_airspeed_mps);
    if mean_speed <= 0.0 {
        return 0.0;
    }
    distance_m / mean_speed
}

/// Ellipsoidal (WGS84) distance in metres, Vincenty inverse formula.
/// Falls back to the spherical haversine distance for near-antipodal points
/// where the iteration does not converge.
pub fn geodesic_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    vincenty_inverse(lat1, lon1, lat2, lon2).unwrap_or_else(|| {
        warn!(lat1, lon1, lat2, lon2, "Vincenty did not converge; using haversine");
        haversine_distance(lat1, lon1, lat2, lon2)
    })
}

fn vincenty_inverse(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> Option<f64> {
    let b = (1.0 - WGS84_F) * WGS84_A;
    let l = (lon2 - lon1).to_radians();
    let u1 = ((1.0 - WGS84_F) * lat1.to_radians().tan()).atan();
    let u2 = ((1.0 - WGS84_F) * lat2.to_radians().tan()).atan();
    let (sin_u1, cos_u1) = u1.sin_cos();
    let (sin_u2, cos_u2) = u2.sin_cos();

    let mut lambda = l;
    for _ in 0..VINCENTY_MAX_ITER {
        let (sin_lambda, cos_lambda) = lambda.sin_cos();
        let sin_sigma = ((cos_u2 * sin_lambda).powi(2)
            + (cos_u1 * sin_u2 - sin_u1 * cos_u2 * cos_lambda).powi(2))
        .sqrt();
        if sin_sigma == 0.0 {
            return Some(0.0);
        }
        let cos_sigma = sin_u1 * sin_u2 + cos_u1 * cos_u2 * cos_lambda;
        let sigma = sin_sigma.atan2(cos_sigma);
        let sin_alpha = cos_u1 * cos_u2 * sin_lambda / sin_sigma;
        let cos_sq_alpha = 1.0 - sin_alpha * sin_alpha;
        // Equatorial lines have cos²α = 0.
        let cos_2sigma_m = if cos_sq_alpha != 0.0 {
            cos_sigma - 2.0 * sin_u1 * sin_u2 / cos_sq_alpha
        } else {
            0.0
        };
        let c = WGS84_F / 16.0 * cos_sq_alpha * (4.0 + WGS84_F * (4.0 - 3.0 * cos_sq_alpha));
        let lambda_prev = lambda;
        lambda = l
            + (1.0 - c)
                * WGS84_F
                * sin_alpha
                * (sigma
                    + c * sin_sigma
                        * (cos_2sigma_m + c * cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))));
        if (lambda - lambda_prev).abs() < 1e-12 {
            let u_sq = cos_sq_alpha * (WGS84_A.powi(2) - b.powi(2)) / b.powi(2);
            let big_a =
                1.0 + u_sq / 16384.0 * (4096.0 + u_sq * (-768.0 + u_sq * (320.0 - 175.0 * u_sq)));
            let big_b = u_sq / 1024.0 * (256.0 + u_sq * (-128.0 + u_sq * (74.0 - 47.0 * u_sq)));
            let delta_sigma = big_b
                * sin_sigma
                * (cos_2sigma_m
                    + big_b / 4.0
                        * (cos_sigma * (-1.0 + 2.0 * cos_2sigma_m.powi(2))
                            - big_b / 6.0
                                * cos_2sigma_m
                                * (-3.0 + 4.0 * sin_sigma.powi(2))
                                * (-3.0 + 4.0 * cos_2sigma_m.powi(2))));
            return Some(b * big_a * (sigma - delta_sigma));
        }
    }
    None
}

fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let r = 6_371_000.0_f64;
    let to_rad = |deg: f64| deg.to_radians();
    let dlat = to_rad(lat2 - lat1);
    let dlon = to_rad(lon2 - lon1);
    let a = (dlat / 2.0).sin().powi(2)
        + to_rad(lat1).cos() * to_rad(lat2).cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    r * c
}
