use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::calibration::InstallationCorrections;
use crate::inventory::Movement;
use crate::EmissionsError;

/// Source-name allow-list entry that admits every movement.
pub const ALL_SOURCES: &str = "all";

/// How NOx/CO/HC indices are obtained away from the certification points.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(try_from = "String", into = "String")]
pub enum Method {
    /// Boeing Fuel Flow Method 2.
    #[default]
    Bffm2,
    /// Certification indices of the matching LTO mode.
    Lto,
}

impl Method {
    pub fn name(&self) -> &'static str {
        match self {
            Method::Bffm2 => "BFFM2",
            Method::Lto => "LTO",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Method {
    type Err = EmissionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BFFM2" => Ok(Method::Bffm2),
            "LTO" => Ok(Method::Lto),
            _ => Err(EmissionsError::UnsupportedMethod(s.to_string())),
        }
    }
}

impl TryFrom<String> for Method {
    type Error = EmissionsError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Method> for String {
    fn from(value: Method) -> Self {
        value.name().to_string()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    pub method: Method,
    /// Apply the ambient NOx correction to LTO-method NOx.
    pub apply_nox_correction: bool,
    pub installation_corrections: InstallationCorrections,
    /// Only movements on these runways are kept.
    pub runways: Option<Vec<String>>,
    /// Source-name allow-list; `"all"` admits everything.
    pub sources: Vec<String>,
    pub bucket_minutes: u32,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            method: Method::Bffm2,
            apply_nox_correction: false,
            installation_corrections: InstallationCorrections::default(),
            runways: None,
            sources: vec![ALL_SOURCES.to_string()],
            bucket_minutes: 60,
        }
    }
}

impl StudyConfig {
    pub fn validate(&self) -> Result<(), EmissionsError> {
        if self.bucket_minutes == 0 {
            return Err(EmissionsError::InvalidParameter(
                "bucket_minutes must be > 0".into(),
            ));
        }
        if self.apply_nox_correction && self.method == Method::Bffm2 {
            tracing::warn!("NOx ambient correction is ignored with BFFM2");
        }
        Ok(())
    }

    /// Whether `movement` passes the runway and source filters.
    pub fn admits(&self, movement: &Movement) -> bool {
        if let Some(runways) = self.runways.as_ref() {
            if !runways.iter().any(|r| r == &movement.runway) {
                return false;
            }
        }
        if self.sources.iter().any(|s| s.eq_ignore_ascii_case(ALL_SOURCES)) {
            return true;
        }
        movement
            .source_names()
            .iter()
            .any(|name| self.sources.iter().any(|s| s == name))
    }

    pub fn params_hash_sha256(&self) -> Result<String, EmissionsError> {
        let bytes =
            serde_json::to_vec(self).map_err(|e| EmissionsError::InvalidParameter(e.to_string()))?;
        Ok(sha256_hex(&bytes))
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Mode, Operation};
    use chrono::TimeZone;

    fn movement(runway: &str, gate: &str) -> Movement {
        Movement {
            id: "m1".into(),
            runway_time: chrono::Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
            aircraft: "A320".into(),
            engine: None,
            profile_id: "DEP".into(),
            gate: gate.into(),
            runway: runway.into(),
            operation: Operation::Departure,
            taxi_route: None,
            tow_ratio: 0.0,
        }
    }

    #[test]
    fn test_config_from_json() {
        let cfg: StudyConfig = serde_json::from_str(
            r#"{"method": "bffm2", "installation_corrections": {"Idle": 1.05}, "runways": ["09L"]}"#,
        )
        .unwrap();
        assert_eq!(cfg.method, Method::Bffm2);
        assert_eq!(cfg.installation_corrections.factor(Mode::Idle), 1.05);
        assert_eq!(cfg.installation_corrections.factor(Mode::Takeoff), 1.010);
        assert_eq!(cfg.sources, vec!["all".to_string()]);
        assert_eq!(cfg.bucket_minutes, 60);
    }

    #[test]
    fn test_stub_methods_rejected() {
        for name in ["by mode", "matching", "linear scaling"] {
            assert!(matches!(
                name.parse::<Method>(),
                Err(EmissionsError::UnsupportedMethod(_))
            ));
        }
        assert!(serde_json::from_str::<StudyConfig>(r#"{"method": "matching"}"#).is_err());
    }

    #[test]
    fn test_runway_and_source_filters() {
        let mut cfg = StudyConfig::default();
        assert!(cfg.admits(&movement("09L", "G1")));

        cfg.runways = Some(vec!["27R".into()]);
        assert!(!cfg.admits(&movement("09L", "G1")));
        assert!(cfg.admits(&movement("27R", "G1")));

        cfg.sources = vec!["G2".into()];
        assert!(!cfg.admits(&movement("27R", "G1")));
        assert!(cfg.admits(&movement("27R", "G2")));
    }

    #[test]
    fn test_params_hash_is_stable() {
        let a = StudyConfig::default().params_hash_sha256().unwrap();
        let b = StudyConfig::default().params_hash_sha256().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let other = StudyConfig {
            method: Method::Lto,
            ..StudyConfig::default()
        };
        assert_ne!(a, other.params_hash_sha256().unwrap());
    }

    #[test]
    fn test_zero_bucket_rejected() {
        let cfg = StudyConfig {
            bucket_minutes: 0,
            ..StudyConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
