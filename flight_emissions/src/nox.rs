//! Ambient correction for NOx from the LTO method. Not used together with BFFM2,
//! which carries its own ambient terms.

use tracing::debug;

use crate::ambient::AmbientCondition;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AmbientNOxCorrector {
    /// Actual take-off weight over the reference (maximum) take-off weight.
    pub weight_ratio: f64,
}

impl Default for AmbientNOxCorrector {
    fn default() -> Self {
        Self { weight_ratio: 1.0 }
    }
}

impl AmbientNOxCorrector {
    /// Ratio from an actual and a reference weight. Falls back to 1 when the
    /// reference is unknown.
    pub fn from_weights(actual_kg: f64, reference_kg: f64) -> Self {
        let weight_ratio = if reference_kg > 0.0 && actual_kg > 0.0 {
            actual_kg / reference_kg
        } else {
            1.0
        };
        Self { weight_ratio }
    }

    /// Multiplier on NOx: weight ratio × θ^-1.65 × e^H.
    pub fn factor(&self, ambient: &AmbientCondition) -> f64 {
        let ratios = ambient.normalize();
        let temperature = ratios.theta.powf(-1.65);
        let humidity = ratios.humidity_coefficient.exp();
        let factor = self.weight_ratio * temperature * humidity;
        debug!(
            weight_ratio = self.weight_ratio,
            temperature, humidity, factor, "NOx ambient correction"
        );
        factor
    }

    pub fn apply(&self, nox_g: f64, ambient: &AmbientCondition) -> f64 {
        nox_g * self.factor(ambient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ambient::REFERENCE_HUMIDITY_RATIO;

    #[test]
    fn test_reference_conditions_are_neutral() {
        let ambient = AmbientCondition {
            humidity_ratio: Some(REFERENCE_HUMIDITY_RATIO),
            ..AmbientCondition::default()
        };
        assert_eq!(AmbientNOxCorrector::default().apply(100.0, &ambient), 100.0);
    }

    #[test]
    fn test_lighter_aircraft_emits_less() {
        let ambient = AmbientCondition::default();
        let light = AmbientNOxCorrector::from_weights(60_000.0, 80_000.0);
        assert!((light.weight_ratio - 0.75).abs() < 1e-12);
        assert!(light.factor(&ambient) < AmbientNOxCorrector::default().factor(&ambient));
    }

    #[test]
    fn test_unknown_reference_weight() {
        assert_eq!(AmbientNOxCorrector::from_weights(60_000.0, 0.0).weight_ratio, 1.0);
    }

    #[test]
    fn test_hot_humid_day_reduces_nox() {
        let hot = AmbientCondition {
            temperature_k: 303.15,
            relative_humidity: 0.9,
            ..AmbientCondition::default()
        };
        let f = AmbientNOxCorrector::default().factor(&hot);
        assert!(f < 1.0);
    }
}
