//! Time-bucketed movement emissions.
//!
//! Gate emissions are computed once per (gate, aircraft group, operation) and
//! flight emissions once per (engine, profile); every movement sharing the key
//! receives the same result. Taxi emissions are computed per movement.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::StudyConfig;
use crate::inventory::{Movement, Repositories};
use crate::phases::PhaseEstimator;
use crate::{EmissionResult, EmissionsError, Operation};

/// Half-open interval `[start, end)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct TimeBucket {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeBucket {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, EmissionsError> {
        if end <= start {
            return Err(EmissionsError::InvalidParameter(format!(
                "bucket end {end} is not after start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start && t < self.end
    }

    /// Consecutive buckets of `minutes` covering `[start, end)`; the last one
    /// is clipped at `end`.
    pub fn split(
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        minutes: u32,
    ) -> Result<Vec<TimeBucket>, EmissionsError> {
        if minutes == 0 {
            return Err(EmissionsError::InvalidParameter(
                "bucket length must be > 0 minutes".into(),
            ));
        }
        let step = Duration::minutes(i64::from(minutes));
        let mut buckets = Vec::new();
        let mut cursor = start;
        while cursor < end {
            let next = (cursor + step).min(end);
            buckets.push(TimeBucket::new(cursor, next)?);
            cursor = next;
        }
        Ok(buckets)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    Gate,
    Taxi,
    Flight,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Gate => "gate",
            Phase::Taxi => "taxi",
            Phase::Flight => "flight",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PhaseEmissions {
    pub phase: Phase,
    pub emissions: EmissionResult,
}

/// Result for one movement in one bucket. `phases` is `None` when every phase
/// came out zero.
#[derive(Clone, Debug, Serialize)]
pub struct MovementEmissions<'m> {
    pub timestamp: DateTime<Utc>,
    pub movement: &'m Movement,
    pub phases: Option<Vec<PhaseEmissions>>,
}

impl MovementEmissions<'_> {
    pub fn total(&self) -> EmissionResult {
        self.phases
            .iter()
            .flatten()
            .map(|p| p.emissions)
            .sum()
    }

    pub fn phase(&self, phase: Phase) -> Option<&EmissionResult> {
        self.phases
            .as_ref()?
            .iter()
            .find(|p| p.phase == phase)
            .map(|p| &p.emissions)
    }
}

type GateKey = (String, String, Operation);
type FlightKey = (String, String);

pub struct MovementEmissionAggregator<'a, E> {
    repos: &'a Repositories,
    config: &'a StudyConfig,
    estimator: E,
}

impl<'a, E: PhaseEstimator> MovementEmissionAggregator<'a, E> {
    pub fn new(repos: &'a Repositories, config: &'a StudyConfig, estimator: E) -> Self {
        Self {
            repos,
            config,
            estimator,
        }
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }

    /// Emissions of every admitted movement whose runway time falls in `bucket`.
    pub fn process_bucket<'m>(
        &self,
        bucket: &TimeBucket,
        movements: &'m [Movement],
    ) -> Result<Vec<MovementEmissions<'m>>, EmissionsError> {
        let mut gate_results: HashMap<GateKey, EmissionResult> = HashMap::new();
        let mut flight_results: HashMap<FlightKey, EmissionResult> = HashMap::new();
        let mut out = Vec::new();

        for movement in movements
            .iter()
            .filter(|m| bucket.contains(m.runway_time) && self.config.admits(m))
        {
            let aircraft = self.repos.aircraft(&movement.aircraft)?;
            let gate_key = (
                movement.gate.clone(),
                aircraft.group.clone(),
                movement.operation,
            );
            let gate = match gate_results.get(&gate_key) {
                Some(result) => *result,
                None => {
                    let result = self.estimator.gate_emissions(movement)?;
                    gate_results.insert(gate_key, result);
                    result
                }
            };

            let engine = self.repos.movement_engine(movement)?;
            let flight_key = (engine.id.clone(), movement.profile_id.clone());
            let flight = match flight_results.get(&flight_key) {
                Some(result) => *result,
                None => {
                    let result = self.estimator.flight_emissions(movement)?;
                    flight_results.insert(flight_key, result);
                    result
                }
            };

            let taxi = self.estimator.taxi_emissions(movement)?;

            let phases: Vec<PhaseEmissions> = [
                (Phase::Gate, gate),
                (Phase::Taxi, taxi),
                (Phase::Flight, flight),
            ]
            .into_iter()
            .filter(|(_, emissions)| !emissions.is_zero())
            .map(|(phase, emissions)| PhaseEmissions { phase, emissions })
            .collect();
            let phases = if phases.is_empty() {
                warn!(movement = %movement.id, "movement has no non-zero emissions");
                None
            } else {
                Some(phases)
            };
            out.push(MovementEmissions {
                timestamp: bucket.start,
                movement,
                phases,
            });
        }

        debug!(
            bucket_start = %bucket.start,
            movements = out.len(),
            gate_groups = gate_results.len(),
            flight_groups = flight_results.len(),
            "bucket processed"
        );
        Ok(out)
    }
}

/// Sum over every movement of a bucket.
pub fn bucket_total(results: &[MovementEmissions<'_>]) -> EmissionResult {
    results.iter().map(|r| r.total()).sum()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::ambient::AmbientCondition;
    use crate::phases::tests::{departure, engine_without, repositories, runway_time};
    use crate::phases::MovementPhaseEstimator;
    use crate::trajectory::{FlightMode, Trajectory, TrajectoryPoint};

    struct CountingEstimator<'a> {
        inner: MovementPhaseEstimator<'a>,
        gate_calls: Cell<usize>,
        flight_calls: Cell<usize>,
        taxi_calls: Cell<usize>,
    }

    impl<'a> CountingEstimator<'a> {
        fn new(inner: MovementPhaseEstimator<'a>) -> Self {
            Self {
                inner,
                gate_calls: Cell::new(0),
                flight_calls: Cell::new(0),
                taxi_calls: Cell::new(0),
            }
        }
    }

    impl PhaseEstimator for CountingEstimator<'_> {
        fn gate_emissions(&self, movement: &Movement) -> Result<EmissionResult, EmissionsError> {
            self.gate_calls.set(self.gate_calls.get() + 1);
            self.inner.gate_emissions(movement)
        }

        fn flight_emissions(&self, movement: &Movement) -> Result<EmissionResult, EmissionsError> {
            self.flight_calls.set(self.flight_calls.get() + 1);
            self.inner.flight_emissions(movement)
        }

        fn taxi_emissions(&self, movement: &Movement) -> Result<EmissionResult, EmissionsError> {
            self.taxi_calls.set(self.taxi_calls.get() + 1);
            self.inner.taxi_emissions(movement)
        }
    }

    fn morning() -> TimeBucket {
        TimeBucket::new(runway_time(8, 0), runway_time(9, 0)).unwrap()
    }

    #[test]
    fn test_gate_group_computed_once_and_broadcast() {
        let repos = repositories();
        let config = StudyConfig::default();
        let est = CountingEstimator::new(MovementPhaseEstimator::new(
            &repos,
            &config,
            AmbientCondition::default(),
        ));
        let agg = MovementEmissionAggregator::new(&repos, &config, est);
        let movements = vec![departure("m1", "G1"), departure("m2", "G1")];

        let results = agg.process_bucket(&morning(), &movements).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(agg.estimator().gate_calls.get(), 1);
        assert_eq!(agg.estimator().flight_calls.get(), 1);
        assert_eq!(agg.estimator().taxi_calls.get(), 2);
        let g1 = results[0].phase(Phase::Gate).unwrap();
        let g2 = results[1].phase(Phase::Gate).unwrap();
        assert_eq!(g1, g2);
        assert_eq!(
            results[0].phase(Phase::Flight),
            results[1].phase(Phase::Flight)
        );
        assert_eq!(results[0].timestamp, runway_time(8, 0));
    }

    #[test]
    fn test_distinct_gate_keys_are_computed_separately() {
        let repos = repositories();
        let config = StudyConfig::default();
        let est = CountingEstimator::new(MovementPhaseEstimator::new(
            &repos,
            &config,
            AmbientCondition::default(),
        ));
        let agg = MovementEmissionAggregator::new(&repos, &config, est);
        let movements = vec![
            departure("m1", "G1"),
            departure("m2", "G2"),
            departure("m3", "G1"),
        ];
        let results = agg.process_bucket(&morning(), &movements).unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(agg.estimator().gate_calls.get(), 2);
        // REMOTE gate profile is all zero, so the gate phase is dropped.
        assert!(results[1].phase(Phase::Gate).is_none());
        assert!(results[1].phase(Phase::Flight).is_some());
    }

    #[test]
    fn test_bucket_bounds_and_filters() {
        let repos = repositories();
        let config = StudyConfig {
            runways: Some(vec!["09L".into()]),
            ..StudyConfig::default()
        };
        let est = MovementPhaseEstimator::new(&repos, &config, AmbientCondition::default());
        let agg = MovementEmissionAggregator::new(&repos, &config, est);

        let mut at_end = departure("late", "G1");
        at_end.runway_time = runway_time(9, 0);
        let mut at_start = departure("early", "G1");
        at_start.runway_time = runway_time(8, 0);
        let mut other_runway = departure("other", "G1");
        other_runway.runway = "27R".into();
        let movements = vec![at_end, at_start, other_runway];

        let results = agg.process_bucket(&morning(), &movements).unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.movement.id.as_str()).collect();
        assert_eq!(ids, vec!["early"]);
    }

    #[test]
    fn test_all_zero_movement_gets_no_payload() {
        let repos = repositories().with_profile(
            Trajectory::new(
                "PARKED",
                true,
                vec![TrajectoryPoint {
                    x: 0.0,
                    y: 0.0,
                    z: 0.0,
                    true_airspeed_mps: 0.0,
                    power_setting: 0.0,
                    weight_kg: 0.0,
                    mode: FlightMode::Taxi,
                }],
            )
            .unwrap(),
        );
        let config = StudyConfig::default();
        let est = MovementPhaseEstimator::new(&repos, &config, AmbientCondition::default());
        let agg = MovementEmissionAggregator::new(&repos, &config, est);
        let mut mv = departure("idle", "G2");
        mv.profile_id = "PARKED".into();
        mv.taxi_route = None;
        let movements = vec![mv];
        let results = agg.process_bucket(&morning(), &movements).unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].phases.is_none());
        assert!(results[0].total().is_zero());
    }

    #[test]
    fn test_empty_bucket_and_totals() {
        let repos = repositories();
        let config = StudyConfig::default();
        let est = MovementPhaseEstimator::new(&repos, &config, AmbientCondition::default());
        let agg = MovementEmissionAggregator::new(&repos, &config, est);
        assert!(agg.process_bucket(&morning(), &[]).unwrap().is_empty());

        let movements = vec![departure("m1", "G1"), departure("m2", "G1")];
        let results = agg.process_bucket(&morning(), &movements).unwrap();
        let total = bucket_total(&results);
        let single = results[0].total();
        assert!((total.fuel_kg - 2.0 * single.fuel_kg).abs() < 1e-9);
    }

    #[test]
    fn test_missing_aircraft_is_an_error() {
        let repos = repositories();
        let config = StudyConfig::default();
        let est = MovementPhaseEstimator::new(&repos, &config, AmbientCondition::default());
        let agg = MovementEmissionAggregator::new(&repos, &config, est);
        let mut mv = departure("m1", "G1");
        mv.aircraft = "B744".into();
        assert!(agg.process_bucket(&morning(), &[mv]).is_err());
    }

    #[test]
    fn test_engine_missing_a_mode_is_still_priced() {
        let repos = repositories().with_engine(engine_without(crate::Mode::Climbout));
        let config = StudyConfig::default();
        let est = MovementPhaseEstimator::new(&repos, &config, AmbientCondition::default());
        let agg = MovementEmissionAggregator::new(&repos, &config, est);
        let movements = vec![departure("m1", "G1")];

        let results = agg.process_bucket(&morning(), &movements).unwrap();
        assert_eq!(results.len(), 1);
        let flight = results[0].phase(Phase::Flight).unwrap();
        assert!(flight.fuel_kg > 0.0);
        assert_eq!(flight.nox_g, 0.0);
        let taxi = results[0].phase(Phase::Taxi).unwrap();
        assert!(taxi.co2_g > 0.0);
        assert_eq!(results[0].phase(Phase::Gate).unwrap().nox_g, 120.0);
    }

    #[test]
    fn test_split_buckets() {
        let buckets = TimeBucket::split(runway_time(8, 0), runway_time(10, 30), 60).unwrap();
        assert_eq!(buckets.len(), 3);
        assert_eq!(buckets[2].end, runway_time(10, 30));
        assert!(TimeBucket::split(runway_time(8, 0), runway_time(9, 0), 0).is_err());
    }
}
