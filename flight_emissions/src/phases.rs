//! Per-phase emission estimates for a single movement.

use std::cell::RefCell;
use std::collections::HashMap;

use tracing::{debug, error};

use crate::ambient::AmbientCondition;
use crate::bffm2::Bffm2Interpolator;
use crate::config::{Method, StudyConfig};
use crate::inventory::{Engine, Movement, Repositories};
use crate::nox::AmbientNOxCorrector;
use crate::trajectory::FlightMode;
use crate::{EmissionResult, EmissionsError, Mode, Pollutant, PollutantIndices};

/// Computes the three emission phases of a movement.
pub trait PhaseEstimator {
    /// Ground handling at the gate.
    fn gate_emissions(&self, movement: &Movement) -> Result<EmissionResult, EmissionsError>;
    /// Airborne and runway part of the flight profile.
    fn flight_emissions(&self, movement: &Movement) -> Result<EmissionResult, EmissionsError>;
    fn taxi_emissions(&self, movement: &Movement) -> Result<EmissionResult, EmissionsError>;
}

/// Estimator backed by inventory repositories and one ambient condition.
///
/// Prepared BFFM2 curves are cached per (engine, pollutant). The cache is not
/// shared between threads; build one estimator per worker.
pub struct MovementPhaseEstimator<'a> {
    repos: &'a Repositories,
    config: &'a StudyConfig,
    ambient: AmbientCondition,
    curves: RefCell<HashMap<(String, Pollutant), Bffm2Interpolator>>,
}

impl<'a> MovementPhaseEstimator<'a> {
    pub fn new(
        repos: &'a Repositories,
        config: &'a StudyConfig,
        ambient: AmbientCondition,
    ) -> Self {
        Self {
            repos,
            config,
            ambient,
            curves: RefCell::new(HashMap::new()),
        }
    }

    fn bffm2_index(
        &self,
        engine: &Engine,
        pollutant: Pollutant,
        fuel_flow_kg_s: f64,
        ambient: &AmbientCondition,
    ) -> Result<f64, EmissionsError> {
        let key = (engine.id.clone(), pollutant);
        if let Some(curve) = self.curves.borrow().get(&key) {
            return Ok(curve.evaluate(fuel_flow_kg_s, ambient));
        }
        let table = engine.calibration_table(pollutant);
        let curve = match Bffm2Interpolator::new(&table, &self.config.installation_corrections) {
            Ok(curve) => curve,
            Err(err @ EmissionsError::MissingCalibrationMode { .. }) => {
                error!(engine = %engine.id, "{err}; BFFM2 {pollutant} index set to 0");
                Bffm2Interpolator::degenerate(pollutant)
            }
            Err(err) => return Err(err),
        };
        debug!(
            engine = %engine.id,
            %pollutant,
            behavior = ?curve.data_behavior(),
            "BFFM2 curve prepared"
        );
        let ei = curve.evaluate(fuel_flow_kg_s, ambient);
        self.curves.borrow_mut().insert(key, curve);
        Ok(ei)
    }

    /// Indices for one engine operating at `fuel_flow_kg_s`. `mode` selects the
    /// certification row used for pollutants BFFM2 does not cover.
    fn indices_at(
        &self,
        engine: &Engine,
        fuel_flow_kg_s: f64,
        mode: Mode,
        ambient: &AmbientCondition,
        nox_corrector: &AmbientNOxCorrector,
    ) -> Result<PollutantIndices, EmissionsError> {
        let mut indices = engine.mode_or_nearest(mode)?.indices;
        match self.config.method {
            Method::Bffm2 => {
                for pollutant in [Pollutant::Nox, Pollutant::Co, Pollutant::Hc] {
                    let ei = self.bffm2_index(engine, pollutant, fuel_flow_kg_s, ambient)?;
                    indices.set(pollutant, ei);
                }
            }
            Method::Lto => {
                if self.config.apply_nox_correction {
                    indices.nox = nox_corrector.apply(indices.nox, ambient);
                }
            }
        }
        Ok(indices)
    }
}

impl PhaseEstimator for MovementPhaseEstimator<'_> {
    fn gate_emissions(&self, movement: &Movement) -> Result<EmissionResult, EmissionsError> {
        let gate = self.repos.gate(&movement.gate)?;
        let aircraft = self.repos.aircraft(&movement.aircraft)?;
        let profile =
            self.repos
                .gate_profile(&gate.gate_type, &aircraft.group, movement.operation)?;
        Ok(*profile)
    }

    fn flight_emissions(&self, movement: &Movement) -> Result<EmissionResult, EmissionsError> {
        let aircraft = self.repos.aircraft(&movement.aircraft)?;
        let engine = self.repos.movement_engine(movement)?;
        let profile = self.repos.profile(&movement.profile_id)?;
        let engines = f64::from(aircraft.engine_count);
        let mean_weight_kg = profile.mean_weight_kg().unwrap_or(0.0);
        let corrector = AmbientNOxCorrector::from_weights(mean_weight_kg, aircraft.mtow_kg);
        let speed_of_sound = self.ambient.speed_of_sound_mps();

        let mut total = EmissionResult::default();
        for segment in profile.segments() {
            if segment.start.mode == FlightMode::Taxi || segment.time_s <= 0.0 {
                continue;
            }
            let power = segment.mean_power_setting();
            let fuel_flow = engine.fuel_flow_at(power)?;
            let ambient = self
                .ambient
                .with_mach(segment.mean_airspeed_mps() / speed_of_sound);
            let mode = segment
                .start
                .mode
                .lto_mode()
                .unwrap_or_else(|| Mode::nearest(power));
            let indices = self.indices_at(engine, fuel_flow, mode, &ambient, &corrector)?;
            let fuel_kg = fuel_flow * engines * segment.time_s;
            total += EmissionResult::from_fuel(fuel_kg, &indices);
        }
        debug!(
            movement = %movement.id,
            profile = %movement.profile_id,
            fuel_kg = total.fuel_kg,
            "flight emissions"
        );
        Ok(total)
    }

    fn taxi_emissions(&self, movement: &Movement) -> Result<EmissionResult, EmissionsError> {
        let Some(route_name) = movement.taxi_route.as_deref() else {
            return Ok(EmissionResult::default());
        };
        let route = self.repos.taxi_route(route_name)?;
        let aircraft = self.repos.aircraft(&movement.aircraft)?;
        let engine = self.repos.movement_engine(movement)?;
        let idle = engine.mode_or_nearest(Mode::Idle)?;

        let taxi_time_s = route.trajectory.time_of_mode(None);
        let fuel_kg = idle.fuel_flow_kg_s * f64::from(aircraft.engine_count) * taxi_time_s;
        let powered = 1.0 - movement.tow_ratio.clamp(0.0, 1.0);
        let ground = self.ambient.with_mach(0.0);
        let indices = self.indices_at(
            engine,
            idle.fuel_flow_kg_s,
            Mode::Idle,
            &ground,
            &AmbientNOxCorrector::default(),
        )?;
        Ok(EmissionResult::from_fuel(fuel_kg, &indices).scaled(powered))
    }
}
