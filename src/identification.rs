//! Online parameter identification
//!
//! Four independent RLS estimators run side by side on the signals the
//! drive already has: resistance near standstill, inductances and flux
//! above a speed threshold, and the mechanical pair (J, B) whenever the
//! machine accelerates. Derivatives are one-sample backward differences
//! with no filtering.
//!
//! The identifier never feeds back into control by itself; callers decide
//! whether to [`IdentifiedParameters::apply_to`] a parameter record and
//! reload.

mod excitation;
mod rls;

use serde::{Deserialize, Serialize};

pub use excitation::{Excitation, ExcitationKind, ExcitationSignal};
pub use rls::Rls;

use crate::config::{identification as ident, MotorParameters};
use crate::error::{ensure_in_range, ensure_positive, Error};

/// Identification tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IdentifierConfig {
    /// λ in (0, 1]
    pub forgetting_factor: f64,
    pub initial_covariance: f64,
    /// Speed separating the standstill and running regressions [rad/s]
    pub speed_threshold: f64,
    /// Minimum current for the resistance and flux regressions [A]
    pub current_threshold: f64,
}

impl Default for IdentifierConfig {
    fn default() -> Self {
        Self {
            forgetting_factor: ident::DEFAULT_FORGETTING_FACTOR,
            initial_covariance: ident::DEFAULT_INITIAL_COVARIANCE,
            speed_threshold: ident::DEFAULT_SPEED_THRESHOLD,
            current_threshold: ident::DEFAULT_CURRENT_THRESHOLD,
        }
    }
}

impl IdentifierConfig {
    fn validate(&self) -> Result<(), Error> {
        ensure_in_range(self.forgetting_factor, 0.0, 1.0, "forgetting_factor")?;
        ensure_positive(self.initial_covariance, "initial_covariance")?;
        ensure_positive(self.speed_threshold, "speed_threshold")?;
        ensure_positive(self.current_threshold, "current_threshold")?;
        Ok(())
    }
}

/// Persisted identification result
///
/// Field names match the motor parameter record, so a stored result can be
/// read back next to it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct IdentifiedParameters {
    #[serde(rename = "Rs")]
    pub rs: f64,
    #[serde(rename = "Ld")]
    pub ld: f64,
    #[serde(rename = "Lq")]
    pub lq: f64,
    pub flux_linkage: f64,
    #[serde(rename = "J")]
    pub inertia: f64,
    #[serde(rename = "B")]
    pub friction: f64,
    pub identification_complete: bool,
    pub identification_count: u32,
}

impl IdentifiedParameters {
    /// Nominal values with no samples taken
    pub fn from_nominal(params: &MotorParameters) -> Self {
        Self {
            rs: params.rs,
            ld: params.ld,
            lq: params.lq,
            flux_linkage: params.flux_linkage,
            inertia: params.inertia,
            friction: params.friction,
            identification_complete: false,
            identification_count: 0,
        }
    }

    /// `base` with the identified electrical and mechanical values
    ///
    /// The result is validated, so a diverged estimate (e.g. a negative
    /// inductance) is rejected instead of reaching the controllers.
    pub fn apply_to(&self, base: &MotorParameters) -> Result<MotorParameters, Error> {
        let params = MotorParameters {
            rs: self.rs,
            ld: self.ld,
            lq: self.lq,
            flux_linkage: self.flux_linkage,
            inertia: self.inertia,
            friction: self.friction,
            ..*base
        };
        params.validate()?;
        Ok(params)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Sample {
    id: f64,
    iq: f64,
    wr: f64,
}

/// RLS-based online identifier for one machine
#[derive(Debug, Clone)]
pub struct ParameterIdentifier {
    params: MotorParameters,
    config: IdentifierConfig,
    enabled: bool,
    resistance: Rls<1>,
    /// q-axis regression, θ = [Ld, Lq]
    inductance_q: Rls<2>,
    /// d-axis regression, θ = [Lq, Ld]
    inductance_d: Rls<2>,
    flux: Rls<1>,
    /// θ = [J, B]
    mechanical: Rls<2>,
    identified: IdentifiedParameters,
    prev: Option<Sample>,
}

impl ParameterIdentifier {
    pub fn new(params: MotorParameters) -> Result<Self, Error> {
        Self::with_config(params, IdentifierConfig::default())
    }

    pub fn with_config(params: MotorParameters, config: IdentifierConfig) -> Result<Self, Error> {
        params.validate()?;
        config.validate()?;

        let identified = IdentifiedParameters::from_nominal(&params);
        let mut identifier = Self {
            params,
            config,
            enabled: true,
            resistance: Rls::new([0.0], 0.0, 1.0),
            inductance_q: Rls::new([0.0; 2], 0.0, 1.0),
            inductance_d: Rls::new([0.0; 2], 0.0, 1.0),
            flux: Rls::new([0.0], 0.0, 1.0),
            mechanical: Rls::new([0.0; 2], 0.0, 1.0),
            identified,
            prev: None,
        };
        identifier.seed(&identified);
        Ok(identifier)
    }

    /// Re-initialise every estimator at `from` with the configured covariance
    fn seed(&mut self, from: &IdentifiedParameters) {
        let p0 = self.config.initial_covariance;
        let lambda = self.config.forgetting_factor;
        self.resistance = Rls::new([from.rs], p0, lambda);
        self.inductance_q = Rls::new([from.ld, from.lq], p0, lambda);
        self.inductance_d = Rls::new([from.lq, from.ld], p0, lambda);
        self.flux = Rls::new([from.flux_linkage], p0, lambda);
        self.mechanical = Rls::new([from.inertia, from.friction], p0, lambda);
        self.identified = *from;
        self.prev = None;
    }

    pub fn enable(&mut self) {
        if !self.enabled {
            debug!("identification: enabled");
            self.enabled = true;
            self.prev = None;
        }
    }

    pub fn disable(&mut self) {
        if self.enabled {
            debug!("identification: disabled");
            self.enabled = false;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Feed one control-interval sample
    ///
    /// # Arguments
    /// * `vd`, `vq` - Applied d/q voltages [V]
    /// * `id`, `iq` - Measured d/q currents [A]
    /// * `wr` - Speed in the units of the plant equations [rad/s]
    /// * `torque` - Electromagnetic torque if known; enables the J/B regression
    pub fn update(
        &mut self,
        vd: f64,
        id: f64,
        vq: f64,
        iq: f64,
        wr: f64,
        torque: Option<f64>,
    ) -> IdentifiedParameters {
        if !self.enabled {
            return self.identified;
        }

        let dt = self.params.sample_time;
        let (did, diq, dwr) = match self.prev {
            Some(prev) => ((id - prev.id) / dt, (iq - prev.iq) / dt, (wr - prev.wr) / dt),
            None => (0.0, 0.0, 0.0),
        };
        self.prev = Some(Sample { id, iq, wr });

        self.identify_resistance(vd, id, vq, iq, wr);
        self.identify_inductance(vd, id, vq, iq, wr, did, diq);
        self.identify_flux_linkage(id, vq, iq, wr);
        if let Some(torque) = torque {
            self.identify_mechanical(torque, wr, dwr);
        }

        self.identified.identification_count = self.identified.identification_count.saturating_add(1);
        if !self.identified.identification_complete
            && self.identified.identification_count > ident::COMPLETION_SAMPLES
        {
            self.identified.identification_complete = true;
            info!(
                "identification: complete after {} samples (Rs={}, Ld={}, Lq={}, flux={})",
                self.identified.identification_count,
                self.identified.rs,
                self.identified.ld,
                self.identified.lq,
                self.identified.flux_linkage
            );
        }

        self.identified
    }

    /// `v = Rs·i` on whichever axis carries more current, near standstill
    fn identify_resistance(&mut self, vd: f64, id: f64, vq: f64, iq: f64, wr: f64) {
        if wr.abs() >= self.config.speed_threshold {
            return;
        }
        let (i, v) = if id.abs() >= iq.abs() { (id, vd) } else { (iq, vq) };
        if i.abs() > self.config.current_threshold {
            self.resistance.update(&[i], v);
            self.identified.rs = self.resistance.theta()[0];
        }
    }

    /// Cross-axis voltage balance
    ///
    /// ```text
    /// vq - Rs·iq - ω·ψ = Ld·(ω·id) + Lq·diq/dt
    /// vd - Rs·id       = Lq·(-ω·iq) + Ld·did/dt
    /// ```
    #[allow(clippy::too_many_arguments)]
    fn identify_inductance(&mut self, vd: f64, id: f64, vq: f64, iq: f64, wr: f64, did: f64, diq: f64) {
        if wr.abs() <= self.config.speed_threshold {
            return;
        }
        let rs = self.identified.rs;

        if diq.abs() > ident::DERIVATIVE_THRESHOLD {
            let y = vq - rs * iq - wr * self.identified.flux_linkage;
            self.inductance_q.update(&[wr * id, diq], y);
            self.identified.ld = self.inductance_q.theta()[0];
        }

        if did.abs() > ident::DERIVATIVE_THRESHOLD {
            let y = vd - rs * id;
            self.inductance_d.update(&[-wr * iq, did], y);
            self.identified.lq = self.inductance_d.theta()[0];
        }
    }

    /// `vq - Rs·iq - ω·Ld·id = ψ·ω`, steady-state q-axis balance
    fn identify_flux_linkage(&mut self, id: f64, vq: f64, iq: f64, wr: f64) {
        if wr.abs() <= self.config.speed_threshold || iq.abs() <= self.config.current_threshold {
            return;
        }
        let y = vq - self.identified.rs * iq - wr * self.identified.ld * id;
        self.flux.update(&[wr], y);
        self.identified.flux_linkage = self.flux.theta()[0];
    }

    /// `Te = J·dω/dt + B·ω`; any load torque biases the fit
    fn identify_mechanical(&mut self, torque: f64, wr: f64, dwr: f64) {
        if dwr.abs() <= ident::DERIVATIVE_THRESHOLD {
            return;
        }
        self.mechanical.update(&[dwr, wr], torque);
        let [inertia, friction] = *self.mechanical.theta();
        self.identified.inertia = inertia;
        self.identified.friction = friction;
    }

    pub fn identified(&self) -> IdentifiedParameters {
        self.identified
    }

    pub fn is_complete(&self) -> bool {
        self.identified.identification_complete
    }

    /// Seed the estimators from a persisted record
    ///
    /// Completion state and sample count are taken over as stored; the
    /// covariances restart from their initial value.
    pub fn restore(&mut self, stored: &IdentifiedParameters) {
        debug!("identification: restored {} samples", stored.identification_count);
        self.seed(stored);
    }

    /// Back to the nominal values; the enabled flag is kept
    pub fn reset(&mut self) {
        let nominal = IdentifiedParameters::from_nominal(&self.params);
        self.seed(&nominal);
    }

    /// New nominal record; estimators restart from it
    pub fn reload(&mut self, params: MotorParameters) -> Result<(), Error> {
        params.validate()?;
        self.params = params;
        self.reset();
        debug!("identification: parameters reloaded");
        Ok(())
    }
}
