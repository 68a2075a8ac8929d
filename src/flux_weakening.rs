//! Flux weakening
//!
//! Above base speed the back-EMF ωψ would exceed the available phase
//! voltage; injecting negative d-axis current opposes the magnet flux and
//! extends the speed range. Three interchangeable policies produce the
//! d-axis reference, plus an MTPA helper for torque-commanded operation.
//!
//! Speeds passed to this module are MECHANICAL rad/s, the unit of
//! [`FluxWeakeningController::base_speed`].

use core::str::FromStr;

use libm::sqrt;

use crate::config::{flux_weakening as fw, MotorParameters};
use crate::error::{ensure_in_range, ensure_positive, Error, ModeSelector};
use crate::foc::transforms::limit_vector;
use crate::foc::PiController;

/// d-axis reference policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FluxWeakeningMethod {
    /// PI loop on the voltage magnitude in excess of the margin
    VoltageFeedback,
    /// Analytic id above base speed
    SpeedThreshold,
    /// Closed-form approximation indexed by speed / base speed
    Lookup,
}

impl FromStr for FluxWeakeningMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voltage" => Ok(Self::VoltageFeedback),
            "speed" => Ok(Self::SpeedThreshold),
            "lookup" => Ok(Self::Lookup),
            _ => Err(Error::InvalidMode(ModeSelector::FluxWeakening)),
        }
    }
}

/// Flux-weakening tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FluxWeakeningConfig {
    pub kp: f64,
    pub ki: f64,
    /// Fraction of Vdc/√3 at which the voltage loop engages, in (0, 1]
    pub voltage_margin: f64,
}

impl Default for FluxWeakeningConfig {
    fn default() -> Self {
        Self {
            kp: fw::DEFAULT_KP,
            ki: fw::DEFAULT_KI,
            voltage_margin: fw::DEFAULT_VOLTAGE_MARGIN,
        }
    }
}

impl FluxWeakeningConfig {
    fn validate(&self) -> Result<(), Error> {
        ensure_positive(self.kp, "fw_kp")?;
        ensure_positive(self.ki, "fw_ki")?;
        ensure_in_range(self.voltage_margin, 0.0, 1.0, "voltage_margin")?;
        Ok(())
    }
}

/// Voltage-limit ellipse in the id/iq plane at a given speed
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoltageEllipse {
    pub id_center: f64,
    pub iq_center: f64,
    /// Half-axis along id [A]
    pub d_radius: f64,
    /// Half-axis along iq [A]
    pub q_radius: f64,
}

/// Current-limit circle (centered at the origin)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentCircle {
    pub id_center: f64,
    pub iq_center: f64,
    pub radius: f64,
}

#[derive(Debug, Clone)]
pub struct FluxWeakeningController {
    params: MotorParameters,
    config: FluxWeakeningConfig,
    method: FluxWeakeningMethod,
    pi: PiController,
    /// Mechanical base speed [rad/s]
    base_speed: f64,
    id_fw: f64,
    in_flux_weakening: bool,
}

impl FluxWeakeningController {
    pub fn new(params: MotorParameters) -> Result<Self, Error> {
        Self::with_config(params, FluxWeakeningConfig::default())
    }

    pub fn with_config(params: MotorParameters, config: FluxWeakeningConfig) -> Result<Self, Error> {
        params.validate()?;
        config.validate()?;

        let base_speed = Self::calculate_base_speed(&params);
        info!("flux weakening: base speed {} rad/s (mech)", base_speed);

        // The current PIs clamp at max_voltage; below the margin the
        // voltage-feedback policy can never see an excess.
        let engage = params.max_phase_voltage() * config.voltage_margin;
        if params.max_voltage < engage {
            warn!(
                "flux weakening: max_voltage {} V below engagement level {} V",
                params.max_voltage,
                engage
            );
        }

        Ok(Self {
            params,
            config,
            method: FluxWeakeningMethod::VoltageFeedback,
            pi: PiController::new(config.kp, config.ki, -params.max_current, 0.0),
            base_speed,
            id_fw: 0.0,
            in_flux_weakening: false,
        })
    }

    /// Mechanical speed at which back-EMF reaches Vdc/√3 [rad/s]
    pub fn calculate_base_speed(params: &MotorParameters) -> f64 {
        let base_speed_e = params.max_phase_voltage() / params.flux_linkage;
        base_speed_e / params.pole_pairs as f64
    }

    /// Select the policy used by [`update`](Self::update)
    ///
    /// Switching resets the voltage loop so no stale integral carries over.
    pub fn set_method(&mut self, method: FluxWeakeningMethod) {
        if method != self.method {
            debug!("flux weakening: method changed");
            self.method = method;
            self.reset();
        }
    }

    pub fn method(&self) -> FluxWeakeningMethod {
        self.method
    }

    /// Override the analytic base speed (e.g. with a measured value)
    pub fn set_base_speed(&mut self, base_speed: f64) -> Result<(), Error> {
        ensure_positive(base_speed, "base_speed")?;
        self.base_speed = base_speed;
        Ok(())
    }

    pub fn base_speed(&self) -> f64 {
        self.base_speed
    }

    pub fn in_flux_weakening(&self) -> bool {
        self.in_flux_weakening
    }

    /// d-axis reference produced by the last policy evaluation
    pub fn id_reference(&self) -> f64 {
        self.id_fw
    }

    /// Run the selected policy
    ///
    /// # Arguments
    /// * `wr` - Mechanical speed [rad/s]
    /// * `vd`, `vq` - Voltage commands of this step [V]
    /// * `iq_ref` - q-axis current reference [A]
    pub fn update(&mut self, wr: f64, vd: f64, vq: f64, iq_ref: f64) -> f64 {
        match self.method {
            FluxWeakeningMethod::VoltageFeedback => self.voltage_feedback(vd, vq),
            FluxWeakeningMethod::SpeedThreshold => self.speed_threshold(wr, iq_ref),
            FluxWeakeningMethod::Lookup => self.lookup(wr, iq_ref),
        }
    }

    /// Voltage-feedback policy
    ///
    /// The PI sees the negated excess `-(|V| - margin·Vlimit)` so its output
    /// lands in [-Imax, 0]. Once the excess is gone the output decays
    /// geometrically and the loop is released below `RELEASE_THRESHOLD`.
    pub fn voltage_feedback(&mut self, vd: f64, vq: f64) -> f64 {
        let v_mag = sqrt(vd * vd + vq * vq);
        let v_limit = self.params.max_phase_voltage() * self.config.voltage_margin;
        let excess = v_mag - v_limit;

        if excess > 0.0 {
            if !self.in_flux_weakening {
                trace!("flux weakening: engaged, |V|={} > {}", v_mag, v_limit);
            }
            self.in_flux_weakening = true;
            self.id_fw = self.pi.update(-excess, self.params.sample_time);
        } else {
            self.in_flux_weakening = false;
            self.id_fw *= fw::DECAY_FACTOR;
            if self.id_fw.abs() < fw::RELEASE_THRESHOLD {
                self.id_fw = 0.0;
                self.pi.reset();
            }
        }

        self.id_fw
    }

    /// Speed-threshold policy: `id = -(ψ + Lq·iq)/Ld` above base speed
    pub fn speed_threshold(&mut self, wr: f64, iq_ref: f64) -> f64 {
        if wr > self.base_speed {
            if !self.in_flux_weakening {
                trace!("flux weakening: above base speed ({} rad/s)", wr);
            }
            self.in_flux_weakening = true;
            self.id_fw = self.speed_threshold_id(wr, iq_ref);
        } else {
            self.in_flux_weakening = false;
            self.id_fw = 0.0;
            self.pi.reset();
        }

        self.id_fw
    }

    /// Stateless part of the speed-threshold policy
    pub fn speed_threshold_id(&self, wr: f64, iq_ref: f64) -> f64 {
        if wr <= self.base_speed {
            return 0.0;
        }
        let p = &self.params;
        let id = -(p.flux_linkage + p.lq * iq_ref) / p.ld;
        id.clamp(-p.max_current, 0.0)
    }

    /// Lookup policy, closed-form in the over-speed ratio
    pub fn lookup(&mut self, wr: f64, iq_ref: f64) -> f64 {
        let p = &self.params;
        let speed_ratio = wr / self.base_speed;

        self.id_fw = if speed_ratio <= 1.0 {
            0.0
        } else {
            let over_speed = speed_ratio - 1.0;
            let id = -over_speed * p.flux_linkage / p.ld - p.lq * iq_ref / p.ld;
            id.clamp(-p.max_current, 0.0)
        };
        self.in_flux_weakening = self.id_fw < 0.0;

        self.id_fw
    }

    /// Current references for a torque request
    ///
    /// Surface machines (Ld ≈ Lq) use id = 0 below base speed and the
    /// speed-threshold id above it. Interior machines follow the MTPA locus
    /// below base speed. The result is circularly clamped to max_current.
    ///
    /// # Returns
    /// Tuple of (id_ref, iq_ref)
    pub fn optimal_current_references(&self, wr: f64, torque_ref: f64) -> (f64, f64) {
        let p = &self.params;
        let kt = p.torque_constant();
        let iq_surface = torque_ref / kt;

        let (id_ref, iq_ref) = if (p.ld - p.lq).abs() < fw::SALIENCY_EPSILON {
            if wr <= self.base_speed {
                (0.0, iq_surface)
            } else {
                (self.speed_threshold_id(wr, iq_surface), iq_surface)
            }
        } else if wr <= self.base_speed {
            self.mtpa(torque_ref)
        } else {
            (self.speed_threshold_id(wr, iq_surface), iq_surface)
        };

        limit_vector(id_ref, iq_ref, p.max_current)
    }

    /// MTPA point for `torque_ref` on a salient machine
    ///
    /// Alternates between the MTPA locus
    /// `id = ψ/(2(Lq-Ld)) - sqrt(ψ²/(4(Lq-Ld)²) + iq²)` and the torque
    /// equation solved for iq.
    fn mtpa(&self, torque_ref: f64) -> (f64, f64) {
        let p = &self.params;
        let pole_pairs = p.pole_pairs as f64;
        let delta = p.lq - p.ld;
        let half = p.flux_linkage / (2.0 * delta);

        let mtpa_id = |iq: f64| half - sqrt(half * half + iq * iq);

        let mut iq = torque_ref / p.torque_constant();
        let mut id = mtpa_id(iq);
        for _ in 0..fw::MTPA_ITERATIONS {
            let flux_eff = p.flux_linkage + (p.ld - p.lq) * id;
            if flux_eff <= 0.0 {
                break;
            }
            iq = torque_ref / (1.5 * pole_pairs * flux_eff);
            id = mtpa_id(iq);
        }
        (id, iq)
    }

    /// Voltage-limit ellipse at electrical speed `we` (resistance neglected)
    ///
    /// Below `ELLIPSE_MIN_SPEED` the ellipse is unbounded and the current
    /// circle is returned instead.
    pub fn voltage_limit_ellipse(&self, we: f64) -> VoltageEllipse {
        let p = &self.params;
        let v_max = p.max_phase_voltage();

        if we.abs() > fw::ELLIPSE_MIN_SPEED {
            VoltageEllipse {
                id_center: -p.flux_linkage / p.ld,
                iq_center: 0.0,
                d_radius: v_max / (we.abs() * p.ld),
                q_radius: v_max / (we.abs() * p.lq),
            }
        } else {
            VoltageEllipse {
                id_center: 0.0,
                iq_center: 0.0,
                d_radius: p.max_current,
                q_radius: p.max_current,
            }
        }
    }

    pub fn current_limit_circle(&self) -> CurrentCircle {
        CurrentCircle {
            id_center: 0.0,
            iq_center: 0.0,
            radius: self.params.max_current,
        }
    }

    pub fn reset(&mut self) {
        self.pi.reset();
        self.id_fw = 0.0;
        self.in_flux_weakening = false;
    }

    /// Swap in a new parameter record; the base speed is recomputed, which
    /// drops any manual override.
    pub fn reload(&mut self, params: MotorParameters) -> Result<(), Error> {
        params.validate()?;
        self.params = params;
        self.base_speed = Self::calculate_base_speed(&params);
        self.pi.set_limits(-params.max_current, 0.0);
        self.id_fw = self.id_fw.clamp(-params.max_current, 0.0);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::motor::SQRT3;

    const EPSILON: f64 = 1e-9;

    fn controller() -> FluxWeakeningController {
        FluxWeakeningController::new(MotorParameters::nominal()).unwrap()
    }

    #[test]
    fn test_base_speed() {
        let params = MotorParameters::nominal();
        let expected = params.dc_bus_voltage / SQRT3 / params.flux_linkage / 4.0;
        assert!((controller().base_speed() - expected).abs() < EPSILON);
    }

    #[test]
    fn test_speed_threshold_policy() {
        let params = MotorParameters::nominal();
        let mut fw = controller();
        fw.set_base_speed(100.0).unwrap();

        let id = fw.speed_threshold(150.0, 5.0);
        let expected = (-(params.flux_linkage + params.lq * 5.0) / params.ld)
            .clamp(-params.max_current, 0.0);
        assert!(id < 0.0);
        assert!((id - expected).abs() < EPSILON);
        assert!(fw.in_flux_weakening());

        assert_eq!(fw.speed_threshold(50.0, 5.0), 0.0);
        assert!(!fw.in_flux_weakening());
    }

    #[test]
    fn test_speed_threshold_unclamped_region() {
        // Large Ld keeps the analytic value inside [-Imax, 0]
        let params = MotorParameters {
            ld: 0.02,
            lq: 0.02,
            ..MotorParameters::nominal()
        };
        let mut fw = FluxWeakeningController::new(params).unwrap();
        fw.set_base_speed(100.0).unwrap();
        let id = fw.speed_threshold(150.0, 5.0);
        assert!((id - (-(0.05 + 0.02 * 5.0) / 0.02)).abs() < EPSILON);
    }

    #[test]
    fn test_voltage_feedback_engages_and_releases() {
        let mut fw = controller();
        let v_limit = MotorParameters::nominal().max_phase_voltage();

        let mut id = 0.0;
        for _ in 0..50 {
            id = fw.update(0.0, 0.0, v_limit * 1.2, 0.0);
        }
        assert!(id < 0.0);
        assert!(id >= -MotorParameters::nominal().max_current);
        assert!(fw.in_flux_weakening());

        // Below the margin: geometric decay, then release to exactly zero
        let held = id;
        let decayed = fw.update(0.0, 0.0, 0.0, 0.0);
        assert!((decayed - held * 0.95).abs() < EPSILON);
        for _ in 0..500 {
            fw.update(0.0, 0.0, 0.0, 0.0);
        }
        assert_eq!(fw.id_reference(), 0.0);
        assert!(!fw.in_flux_weakening());
    }

    #[test]
    fn test_lookup_policy() {
        let params = MotorParameters {
            ld: 0.02,
            lq: 0.02,
            ..MotorParameters::nominal()
        };
        let mut fw = FluxWeakeningController::new(params).unwrap();
        fw.set_base_speed(100.0).unwrap();
        fw.set_method(FluxWeakeningMethod::Lookup);

        assert_eq!(fw.update(80.0, 0.0, 0.0, 1.0), 0.0);
        let id = fw.update(150.0, 0.0, 0.0, 1.0);
        let expected = -0.5 * 0.05 / 0.02 - 0.02 * 1.0 / 0.02;
        assert!((id - expected).abs() < EPSILON);
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!(
            "voltage".parse::<FluxWeakeningMethod>(),
            Ok(FluxWeakeningMethod::VoltageFeedback)
        );
        assert_eq!(
            "speed".parse::<FluxWeakeningMethod>(),
            Ok(FluxWeakeningMethod::SpeedThreshold)
        );
        assert_eq!(
            "lookup".parse::<FluxWeakeningMethod>(),
            Ok(FluxWeakeningMethod::Lookup)
        );
        assert_eq!(
            "Voltage".parse::<FluxWeakeningMethod>(),
            Err(Error::InvalidMode(ModeSelector::FluxWeakening))
        );
    }

    #[test]
    fn test_surface_machine_references() {
        let params = MotorParameters {
            lq: MotorParameters::nominal().ld,
            ..MotorParameters::nominal()
        };
        let fw = FluxWeakeningController::new(params).unwrap();
        let (id, iq) = fw.optimal_current_references(10.0, 0.6);
        assert_eq!(id, 0.0);
        assert!((iq - 0.6 / params.torque_constant()).abs() < EPSILON);
    }

    #[test]
    fn test_interior_mtpa_on_locus_and_meets_torque() {
        let params = MotorParameters::nominal();
        let fw = controller();
        let torque = 1.2;
        let (id, iq) = fw.optimal_current_references(10.0, torque);

        assert!(id < 0.0 && iq > 0.0);
        let produced =
            1.5 * params.pole_pairs as f64 * (params.flux_linkage * iq + (params.ld - params.lq) * id * iq);
        assert!((produced - torque).abs() < 1e-6);

        let delta = params.lq - params.ld;
        let half = params.flux_linkage / (2.0 * delta);
        let on_locus = half - sqrt(half * half + iq * iq);
        assert!((id - on_locus).abs() < 1e-6);
    }

    #[test]
    fn test_references_clamped_to_current_circle() {
        let fw = controller();
        let (id, iq) = fw.optimal_current_references(10.0, 50.0);
        let magnitude = sqrt(id * id + iq * iq);
        assert!((magnitude - MotorParameters::nominal().max_current).abs() < 1e-9);
    }

    #[test]
    fn test_voltage_ellipse() {
        let params = MotorParameters::nominal();
        let fw = controller();
        let ellipse = fw.voltage_limit_ellipse(400.0);
        assert!((ellipse.id_center + params.flux_linkage / params.ld).abs() < EPSILON);
        assert!(ellipse.d_radius > ellipse.q_radius);

        let low = fw.voltage_limit_ellipse(1.0);
        assert_eq!(low.d_radius, params.max_current);
        assert_eq!(fw.current_limit_circle().radius, params.max_current);
    }

    #[test]
    fn test_invalid_margin_rejected() {
        let config = FluxWeakeningConfig {
            voltage_margin: 1.5,
            ..FluxWeakeningConfig::default()
        };
        assert!(FluxWeakeningController::with_config(MotorParameters::nominal(), config).is_err());
    }
}
