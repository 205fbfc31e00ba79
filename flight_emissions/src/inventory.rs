//! Inventory records and the lookup tables they resolve against.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::calibration::{fuel_flow_at_power, table_from_modes, CalibrationTable, EngineModeData};
use crate::trajectory::Trajectory;
use crate::{EmissionResult, EmissionsError, Mode, Operation, Pollutant};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Aircraft {
    pub icao: String,
    /// Size/category group used for gate emission profiles.
    pub group: String,
    pub engine_count: u32,
    #[serde(default)]
    pub mtow_kg: f64,
    /// Engine fitted when a movement does not name one.
    pub engine: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Engine {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub modes: Vec<EngineModeData>,
}

impl Engine {
    pub fn calibration_table(&self, pollutant: Pollutant) -> CalibrationTable {
        table_from_modes(pollutant, &self.modes)
    }

    pub fn mode(&self, mode: Mode) -> Result<&EngineModeData, EmissionsError> {
        self.modes
            .iter()
            .find(|m| m.mode == mode)
            .ok_or_else(|| EmissionsError::MissingReference {
                kind: "engine mode",
                key: format!("{}/{}", self.id, mode),
            })
    }

    /// Row for `mode`, or the row with the closest thrust level when the engine
    /// was certified without it.
    pub fn mode_or_nearest(&self, mode: Mode) -> Result<&EngineModeData, EmissionsError> {
        if let Ok(row) = self.mode(mode) {
            return Ok(row);
        }
        let nearest = self
            .modes
            .iter()
            .min_by_key(|m| OrderedFloat((m.mode.thrust() - mode.thrust()).abs()))
            .ok_or_else(|| missing("engine mode", &format!("{}/{}", self.id, mode)))?;
        warn!(engine = %self.id, missing = %mode, using = %nearest.mode, "engine lacks mode");
        Ok(nearest)
    }

    /// Fuel flow per engine (kg/s) at a power setting between 0 and 1.
    pub fn fuel_flow_at(&self, power_setting: f64) -> Result<f64, EmissionsError> {
        fuel_flow_at_power(&self.modes, power_setting).ok_or_else(|| {
            EmissionsError::MissingReference {
                kind: "engine fuel flow",
                key: self.id.clone(),
            }
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Gate {
    pub name: String,
    pub gate_type: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Runway {
    pub name: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaxiRoute {
    pub name: String,
    pub trajectory: Trajectory,
}

/// Ground-handling emissions of one movement at a gate of the given type.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GateProfile {
    pub gate_type: String,
    pub aircraft_group: String,
    pub operation: Operation,
    pub emissions: EmissionResult,
}

/// One arrival or departure.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Movement {
    pub id: String,
    pub runway_time: DateTime<Utc>,
    pub aircraft: String,
    #[serde(default)]
    pub engine: Option<String>,
    pub profile_id: String,
    pub gate: String,
    pub runway: String,
    pub operation: Operation,
    #[serde(default)]
    pub taxi_route: Option<String>,
    /// Fraction of the taxi distance covered under tow.
    #[serde(default)]
    pub tow_ratio: f64,
}

impl Movement {
    /// Names of the sources this movement touches.
    pub fn source_names(&self) -> Vec<&str> {
        let mut names = vec![self.gate.as_str(), self.runway.as_str()];
        if let Some(route) = self.taxi_route.as_deref() {
            names.push(route);
        }
        names
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
struct RepositoryRecords {
    #[serde(default)]
    aircraft: Vec<Aircraft>,
    #[serde(default)]
    engines: Vec<Engine>,
    #[serde(default)]
    gates: Vec<Gate>,
    #[serde(default)]
    runways: Vec<Runway>,
    #[serde(default)]
    taxi_routes: Vec<TaxiRoute>,
    #[serde(default)]
    profiles: Vec<Trajectory>,
    #[serde(default)]
    gate_profiles: Vec<GateProfile>,
}

/// Lookup tables handed to the estimators by reference.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(from = "RepositoryRecords")]
pub struct Repositories {
    aircraft: HashMap<String, Aircraft>,
    engines: HashMap<String, Engine>,
    gates: HashMap<String, Gate>,
    runways: HashMap<String, Runway>,
    taxi_routes: HashMap<String, TaxiRoute>,
    profiles: HashMap<String, Trajectory>,
    gate_profiles: HashMap<(String, String, Operation), EmissionResult>,
}

impl From<RepositoryRecords> for Repositories {
    fn from(records: RepositoryRecords) -> Self {
        let mut repos = Repositories::default();
        for a in records.aircraft {
            repos = repos.with_aircraft(a);
        }
        for e in records.engines {
            repos = repos.with_engine(e);
        }
        for g in records.gates {
            repos = repos.with_gate(g);
        }
        for r in records.runways {
            repos = repos.with_runway(r);
        }
        for t in records.taxi_routes {
            repos = repos.with_taxi_route(t);
        }
        for p in records.profiles {
            repos = repos.with_profile(p);
        }
        for gp in records.gate_profiles {
            repos = repos.with_gate_profile(gp);
        }
        repos
    }
}

fn missing(kind: &'static str, key: &str) -> EmissionsError {
    EmissionsError::MissingReference {
        kind,
        key: key.to_string(),
    }
}

impl Repositories {
    pub fn with_aircraft(mut self, aircraft: Aircraft) -> Self {
        self.aircraft.insert(aircraft.icao.clone(), aircraft);
        self
    }

    pub fn with_engine(mut self, engine: Engine) -> Self {
        self.engines.insert(engine.id.clone(), engine);
        self
    }

    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gates.insert(gate.name.clone(), gate);
        self
    }

    pub fn with_runway(mut self, runway: Runway) -> Self {
        self.runways.insert(runway.name.clone(), runway);
        self
    }

    pub fn with_taxi_route(mut self, route: TaxiRoute) -> Self {
        self.taxi_routes.insert(route.name.clone(), route);
        self
    }

    pub fn with_profile(mut self, profile: Trajectory) -> Self {
        self.profiles.insert(profile.id().to_string(), profile);
        self
    }

    pub fn with_gate_profile(mut self, profile: GateProfile) -> Self {
        self.gate_profiles.insert(
            (profile.gate_type, profile.aircraft_group, profile.operation),
            profile.emissions,
        );
        self
    }

    pub fn aircraft(&self, icao: &str) -> Result<&Aircraft, EmissionsError> {
        self.aircraft.get(icao).ok_or_else(|| missing("aircraft", icao))
    }

    pub fn engine(&self, id: &str) -> Result<&Engine, EmissionsError> {
        self.engines.get(id).ok_or_else(|| missing("engine", id))
    }

    pub fn gate(&self, name: &str) -> Result<&Gate, EmissionsError> {
        self.gates.get(name).ok_or_else(|| missing("gate", name))
    }

    pub fn runway(&self, name: &str) -> Result<&Runway, EmissionsError> {
        self.runways.get(name).ok_or_else(|| missing("runway", name))
    }

    pub fn taxi_route(&self, name: &str) -> Result<&TaxiRoute, EmissionsError> {
        self.taxi_routes
            .get(name)
            .ok_or_else(|| missing("taxi route", name))
    }

    pub fn profile(&self, id: &str) -> Result<&Trajectory, EmissionsError> {
        self.profiles.get(id).ok_or_else(|| missing("flight profile", id))
    }

    pub fn gate_profile(
        &self,
        gate_type: &str,
        group: &str,
        operation: Operation,
    ) -> Result<&EmissionResult, EmissionsError> {
        self.gate_profiles
            .get(&(gate_type.to_string(), group.to_string(), operation))
            .ok_or_else(|| EmissionsError::MissingGateProfile {
                gate_type: gate_type.to_string(),
                group: group.to_string(),
                operation,
            })
    }

    /// Engine flown by `movement`: its own override or the aircraft default.
    pub fn movement_engine(&self, movement: &Movement) -> Result<&Engine, EmissionsError> {
        match movement.engine.as_deref() {
            Some(id) => self.engine(id),
            None => self.engine(&self.aircraft(&movement.aircraft)?.engine),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPOS_JSON: &str = r#"{
        "aircraft": [{"icao": "A320", "group": "JET MEDIUM", "engine_count": 2, "mtow_kg": 78000, "engine": "CFM56"}],
        "engines": [{"id": "CFM56", "modes": [
            {"mode": "Idle", "fuel_flow_kg_s": 0.1, "indices": {"nox": 4.0}},
            {"mode": "Approach", "fuel_flow_kg_s": 0.3, "indices": {"nox": 8.0}},
            {"mode": "Climbout", "fuel_flow_kg_s": 0.9, "indices": {"nox": 19.0}},
            {"mode": "Takeoff", "fuel_flow_kg_s": 1.1, "indices": {"nox": 24.0}}
        ]}],
        "gates": [{"name": "G1", "gate_type": "PIER"}],
        "gate_profiles": [{"gate_type": "PIER", "aircraft_group": "JET MEDIUM", "operation": "arrival",
                           "emissions": {"fuel_kg": 12.0, "nox_g": 150.0}}]
    }"#;

    #[test]
    fn test_repositories_from_json() {
        let repos: Repositories = serde_json::from_str(REPOS_JSON).unwrap();
        let aircraft = repos.aircraft("A320").unwrap();
        assert_eq!(aircraft.engine_count, 2);
        let engine = repos.engine("CFM56").unwrap();
        let nox = engine.calibration_table(Pollutant::Nox);
        assert_eq!(nox.point(Mode::Climbout).unwrap().emission_index_g_kg, 19.0);
        assert_eq!(engine.mode(Mode::Idle).unwrap().indices.co2, crate::CO2_INDEX_G_PER_KG);
        let gate = repos.gate("G1").unwrap();
        let profile = repos
            .gate_profile(&gate.gate_type, &aircraft.group, Operation::Arrival)
            .unwrap();
        assert_eq!(profile.nox_g, 150.0);
    }

    #[test]
    fn test_mode_or_nearest_substitutes_closest_thrust() {
        let repos: Repositories = serde_json::from_str(REPOS_JSON).unwrap();
        let mut engine = repos.engine("CFM56").unwrap().clone();
        assert_eq!(engine.mode_or_nearest(Mode::Climbout).unwrap().indices.nox, 19.0);

        engine.modes.retain(|m| m.mode != Mode::Climbout);
        let row = engine.mode_or_nearest(Mode::Climbout).unwrap();
        assert_eq!(row.mode, Mode::Takeoff);
        assert!(matches!(
            engine.mode(Mode::Climbout),
            Err(EmissionsError::MissingReference { .. })
        ));

        engine.modes.clear();
        assert!(engine.mode_or_nearest(Mode::Idle).is_err());
    }

    #[test]
    fn test_missing_lookups_are_errors() {
        let repos: Repositories = serde_json::from_str(REPOS_JSON).unwrap();
        assert!(matches!(
            repos.profile("DEP-1"),
            Err(EmissionsError::MissingReference { kind: "flight profile", .. })
        ));
        assert!(matches!(
            repos.gate_profile("PIER", "JET MEDIUM", Operation::Departure),
            Err(EmissionsError::MissingGateProfile { .. })
        ));
    }
}
