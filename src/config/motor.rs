//! Motor parameter record
//!
//! Field names on the wire match the external configuration schema
//! (`poles, Rs, Ld, Lq, flux_linkage, J, B, max_current, max_voltage,
//! dc_bus_voltage, sample_time`). Loading and saving the record is left to
//! the caller; this module only validates it.

use serde::{Deserialize, Serialize};

use super::params;
use crate::error::{ensure_positive, ConfigError};

/// Electrical and mechanical parameters of one machine + inverter.
///
/// Immutable for the duration of a run. Components take a copy at
/// construction and replace it wholesale on `reload()`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotorParameters {
    /// Pole-pair count
    #[serde(rename = "poles")]
    pub pole_pairs: u8,

    /// Stator resistance [Ω]
    #[serde(rename = "Rs")]
    pub rs: f64,

    /// d-axis inductance [H]
    #[serde(rename = "Ld")]
    pub ld: f64,

    /// q-axis inductance [H]
    #[serde(rename = "Lq")]
    pub lq: f64,

    /// Permanent-magnet flux linkage [Wb]
    pub flux_linkage: f64,

    /// Rotor inertia [kg·m²]
    #[serde(rename = "J")]
    pub inertia: f64,

    /// Viscous friction [N·m·s]
    #[serde(rename = "B")]
    pub friction: f64,

    /// Maximum current magnitude [A]
    pub max_current: f64,

    /// Current-loop output limit [V]
    pub max_voltage: f64,

    /// DC bus voltage [V]
    pub dc_bus_voltage: f64,

    /// Control period [s]
    pub sample_time: f64,
}

impl MotorParameters {
    /// Nominal machine built from the `DEFAULT_*` constants.
    pub const fn nominal() -> Self {
        Self {
            pole_pairs: params::DEFAULT_POLE_PAIRS,
            rs: params::DEFAULT_RS,
            ld: params::DEFAULT_LD,
            lq: params::DEFAULT_LQ,
            flux_linkage: params::DEFAULT_FLUX_LINKAGE,
            inertia: params::DEFAULT_INERTIA,
            friction: params::DEFAULT_FRICTION,
            max_current: params::DEFAULT_MAX_CURRENT,
            max_voltage: params::DEFAULT_MAX_VOLTAGE,
            dc_bus_voltage: params::DEFAULT_DC_BUS_VOLTAGE,
            sample_time: params::DEFAULT_SAMPLE_TIME,
        }
    }

    /// Check every invariant the controllers rely on.
    ///
    /// Friction may be zero; everything that ends up in a denominator or
    /// defines a limit must be strictly positive.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pole_pairs == 0 {
            return Err(ConfigError::ZeroPolePairs);
        }
        ensure_positive(self.sample_time, "sample_time")?;
        ensure_positive(self.rs, "Rs")?;
        ensure_positive(self.ld, "Ld")?;
        ensure_positive(self.lq, "Lq")?;
        ensure_positive(self.flux_linkage, "flux_linkage")?;
        ensure_positive(self.inertia, "J")?;
        ensure_positive(self.max_current, "max_current")?;
        ensure_positive(self.max_voltage, "max_voltage")?;
        ensure_positive(self.dc_bus_voltage, "dc_bus_voltage")?;

        if !self.friction.is_finite() {
            return Err(ConfigError::NonFinite { field: "B" });
        }
        if self.friction < 0.0 {
            return Err(ConfigError::NonPositive { field: "B" });
        }
        Ok(())
    }

    /// Largest phase-voltage magnitude the inverter can synthesize
    /// (inscribed circle of the SVM hexagon) [V]
    pub fn max_phase_voltage(&self) -> f64 {
        self.dc_bus_voltage / SQRT3
    }

    /// Torque constant 1.5·p·ψ [N·m/A]
    pub fn torque_constant(&self) -> f64 {
        1.5 * self.pole_pairs as f64 * self.flux_linkage
    }

    /// Electrical time constant min(Ld, Lq)/Rs [s]
    pub fn electrical_time_constant(&self) -> f64 {
        self.ld.min(self.lq) / self.rs
    }
}

impl Default for MotorParameters {
    fn default() -> Self {
        Self::nominal()
    }
}

pub(crate) const SQRT3: f64 = 1.732_050_807_568_877_2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_is_valid() {
        assert!(MotorParameters::nominal().validate().is_ok());
    }

    #[test]
    fn test_rejects_non_positive_sample_time() {
        let params = MotorParameters {
            sample_time: 0.0,
            ..MotorParameters::nominal()
        };
        assert_eq!(
            params.validate(),
            Err(ConfigError::NonPositive {
                field: "sample_time"
            })
        );
    }

    #[test]
    fn test_rejects_bad_inductance() {
        let params = MotorParameters {
            lq: -1e-3,
            ..MotorParameters::nominal()
        };
        assert_eq!(
            params.validate(),
            Err(ConfigError::NonPositive { field: "Lq" })
        );

        let params = MotorParameters {
            ld: f64::INFINITY,
            ..MotorParameters::nominal()
        };
        assert_eq!(
            params.validate(),
            Err(ConfigError::NonFinite { field: "Ld" })
        );
    }

    #[test]
    fn test_rejects_zero_pole_pairs() {
        let params = MotorParameters {
            pole_pairs: 0,
            ..MotorParameters::nominal()
        };
        assert_eq!(params.validate(), Err(ConfigError::ZeroPolePairs));
    }

    #[test]
    fn test_zero_friction_allowed() {
        let params = MotorParameters {
            friction: 0.0,
            ..MotorParameters::nominal()
        };
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_external_field_names() {
        let json = serde_json::to_value(MotorParameters::nominal()).unwrap();
        for key in [
            "poles",
            "Rs",
            "Ld",
            "Lq",
            "flux_linkage",
            "J",
            "B",
            "max_current",
            "max_voltage",
            "dc_bus_voltage",
            "sample_time",
        ] {
            assert!(json.get(key).is_some(), "missing field {}", key);
        }
    }

    #[test]
    fn test_missing_field_rejected() {
        let json = r#"{"poles": 4, "Rs": 0.5}"#;
        assert!(serde_json::from_str::<MotorParameters>(json).is_err());
    }
}
