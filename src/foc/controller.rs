//! Cascaded speed → current field-oriented controller
//!
//! One `update()` per sample: Clarke → Park → speed PI (iq reference) →
//! d/q current PIs → circular voltage limit → inverse Park → SVM. There is
//! no mode state machine; the only state lives in the three PI integrators
//! and the externally set references.

use super::pi_controller::PiController;
use super::svpwm::{Modulation, PhaseDuty};
use super::transforms::{clarke, inverse_park, limit_voltage, park};
use crate::config::{gains, MotorParameters};
use crate::error::{ensure_positive, Error};

/// PI gains for the three cascaded loops
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FocGains {
    pub id_kp: f64,
    pub id_ki: f64,
    pub iq_kp: f64,
    pub iq_ki: f64,
    pub speed_kp: f64,
    pub speed_ki: f64,
}

impl FocGains {
    /// Current loops placed at `DEFAULT_CURRENT_BANDWIDTH` by pole-zero
    /// cancellation (kp = ωc·L, ki = ωc·Rs); fixed speed-loop gains.
    pub fn for_motor(params: &MotorParameters) -> Self {
        let wc = gains::DEFAULT_CURRENT_BANDWIDTH;
        Self {
            id_kp: wc * params.ld,
            id_ki: wc * params.rs,
            iq_kp: wc * params.lq,
            iq_ki: wc * params.rs,
            speed_kp: gains::DEFAULT_SPEED_KP,
            speed_ki: gains::DEFAULT_SPEED_KI,
        }
    }

    fn validate(&self) -> Result<(), Error> {
        ensure_positive(self.id_kp, "id_kp")?;
        ensure_positive(self.id_ki, "id_ki")?;
        ensure_positive(self.iq_kp, "iq_kp")?;
        ensure_positive(self.iq_ki, "iq_ki")?;
        ensure_positive(self.speed_kp, "speed_kp")?;
        ensure_positive(self.speed_ki, "speed_ki")?;
        Ok(())
    }
}

/// Duty cycles plus the loop diagnostics of one FOC step
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct FocOutput {
    pub duty: PhaseDuty,
    pub sector: u8,
    pub id_actual: f64,
    pub iq_actual: f64,
    pub id_ref: f64,
    pub iq_ref: f64,
    /// d-axis voltage after the circular limit [V]
    pub vd: f64,
    /// q-axis voltage after the circular limit [V]
    pub vq: f64,
    pub v_alpha: f64,
    pub v_beta: f64,
}

/// Field-oriented controller for one machine
#[derive(Debug, Clone)]
pub struct FocController {
    params: MotorParameters,
    gains: FocGains,
    id_pi: PiController,
    iq_pi: PiController,
    speed_pi: PiController,
    speed_ref: f64,
    id_ref: f64,
    iq_ref: f64,
    /// Feed-forward added to the speed-loop output
    iq_compensation: f64,
    modulation: Modulation,
}

impl FocController {
    /// Build a controller with the default gains for `params`
    pub fn new(params: MotorParameters) -> Result<Self, Error> {
        params.validate()?;
        Self::with_gains(params, FocGains::for_motor(&params))
    }

    pub fn with_gains(params: MotorParameters, gains: FocGains) -> Result<Self, Error> {
        params.validate()?;
        gains.validate()?;

        info!(
            "FOC: current loop Kp={}/{}, Ki={}/{}; speed loop Kp={}, Ki={}",
            gains.id_kp,
            gains.iq_kp,
            gains.id_ki,
            gains.iq_ki,
            gains.speed_kp,
            gains.speed_ki
        );

        Ok(Self {
            params,
            gains,
            id_pi: PiController::new_symmetric(gains.id_kp, gains.id_ki, params.max_voltage),
            iq_pi: PiController::new_symmetric(gains.iq_kp, gains.iq_ki, params.max_voltage),
            speed_pi: PiController::new_symmetric(
                gains.speed_kp,
                gains.speed_ki,
                params.max_current,
            ),
            speed_ref: 0.0,
            id_ref: 0.0,
            iq_ref: 0.0,
            iq_compensation: 0.0,
            modulation: Modulation::default(),
        })
    }

    /// Run one control step
    ///
    /// # Arguments
    /// * `i_a`, `i_b`, `i_c` - Measured phase currents [A]
    /// * `speed_ref` - Electrical speed reference [rad/s]
    /// * `speed_actual` - Measured electrical speed [rad/s]
    /// * `theta` - Electrical angle [rad]
    pub fn update(
        &mut self,
        i_a: f64,
        i_b: f64,
        i_c: f64,
        speed_ref: f64,
        speed_actual: f64,
        theta: f64,
    ) -> FocOutput {
        let dt = self.params.sample_time;
        self.speed_ref = speed_ref;

        let (i_alpha, i_beta) = clarke(i_a, i_b, i_c);
        let (id_actual, iq_actual) = park(i_alpha, i_beta, theta);

        let iq_speed = self.speed_pi.update(speed_ref - speed_actual, dt);
        self.iq_ref = (iq_speed + self.iq_compensation)
            .clamp(-self.params.max_current, self.params.max_current);

        let vd = self.id_pi.update(self.id_ref - id_actual, dt);
        let vq = self.iq_pi.update(self.iq_ref - iq_actual, dt);
        let (vd, vq) = limit_voltage(vd, vq, self.params.max_phase_voltage());

        let (v_alpha, v_beta) = inverse_park(vd, vq, theta);
        let (duty, sector) = self.modulation.modulate(v_alpha, v_beta, self.params.dc_bus_voltage);

        FocOutput {
            duty,
            sector,
            id_actual,
            iq_actual,
            id_ref: self.id_ref,
            iq_ref: self.iq_ref,
            vd,
            vq,
            v_alpha,
            v_beta,
        }
    }

    /// Select the inverter modulation; takes effect on the next update
    pub fn set_modulation(&mut self, modulation: Modulation) {
        if modulation != self.modulation {
            debug!("FOC: modulation {} -> {}", self.modulation, modulation);
        }
        self.modulation = modulation;
    }

    pub fn modulation(&self) -> Modulation {
        self.modulation
    }

    /// Set the d-axis current reference, clamped to ±max_current
    pub fn set_id_reference(&mut self, id_ref: f64) {
        self.id_ref = id_ref.clamp(-self.params.max_current, self.params.max_current);
    }

    /// Set the speed reference [rad/s electrical]
    ///
    /// `update()` also takes the reference directly; this is for callers
    /// that keep it here between ticks.
    pub fn set_speed_reference(&mut self, speed_ref: f64) {
        self.speed_ref = speed_ref;
    }

    /// Additive q-axis current feed-forward applied from the next step on
    pub fn set_iq_compensation(&mut self, iq_compensation: f64) {
        self.iq_compensation = iq_compensation;
    }

    /// Replace the d/q current-loop gains; integrators are kept
    pub fn set_current_gains(&mut self, id: (f64, f64), iq: (f64, f64)) {
        self.gains.id_kp = id.0;
        self.gains.id_ki = id.1;
        self.gains.iq_kp = iq.0;
        self.gains.iq_ki = iq.1;
        self.id_pi.set_gains(id.0, id.1);
        self.iq_pi.set_gains(iq.0, iq.1);
    }

    /// Replace the speed-loop gains; the integrator is kept
    pub fn set_speed_gains(&mut self, kp: f64, ki: f64) {
        self.gains.speed_kp = kp;
        self.gains.speed_ki = ki;
        self.speed_pi.set_gains(kp, ki);
    }

    /// Reset all integrators and references
    pub fn reset(&mut self) {
        self.id_pi.reset();
        self.iq_pi.reset();
        self.speed_pi.reset();
        self.speed_ref = 0.0;
        self.id_ref = 0.0;
        self.iq_ref = 0.0;
        self.iq_compensation = 0.0;
    }

    /// Swap in a new parameter record
    ///
    /// Gains are recomputed from the new record; loop limits follow the new
    /// current/voltage ratings. Integrator state is kept so a reload does not
    /// kick the running machine.
    pub fn reload(&mut self, params: MotorParameters) -> Result<(), Error> {
        params.validate()?;
        let gains = FocGains::for_motor(&params);

        self.params = params;
        self.gains = gains;
        self.id_pi.set_gains(gains.id_kp, gains.id_ki);
        self.iq_pi.set_gains(gains.iq_kp, gains.iq_ki);
        self.speed_pi.set_gains(gains.speed_kp, gains.speed_ki);
        self.id_pi.set_symmetric_limit(params.max_voltage);
        self.iq_pi.set_symmetric_limit(params.max_voltage);
        self.speed_pi.set_symmetric_limit(params.max_current);
        self.set_id_reference(self.id_ref);

        debug!("FOC: parameters reloaded");
        Ok(())
    }

    pub fn params(&self) -> &MotorParameters {
        &self.params
    }

    pub fn gains(&self) -> &FocGains {
        &self.gains
    }

    pub fn speed_reference(&self) -> f64 {
        self.speed_ref
    }

    pub fn id_reference(&self) -> f64 {
        self.id_ref
    }

    /// q-axis reference produced by the last update
    pub fn iq_reference(&self) -> f64 {
        self.iq_ref
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::foc::transforms::inverse_clarke;
    use libm::sqrt;

    fn controller() -> FocController {
        FocController::new(MotorParameters::nominal()).unwrap()
    }

    #[test]
    fn test_idle_at_rest() {
        let mut foc = controller();
        let out = foc.update(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert_eq!(out.vd, 0.0);
        assert_eq!(out.vq, 0.0);
        assert!((out.duty.a - 0.5).abs() < 1e-12);
        assert!((out.duty.b - 0.5).abs() < 1e-12);
        assert!((out.duty.c - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_positive_speed_error_drives_positive_vq() {
        let mut foc = controller();
        let out = foc.update(0.0, 0.0, 0.0, 100.0, 0.0, 0.0);
        assert!(out.iq_ref > 0.0);
        assert!(out.vq > 0.0);
        assert!(out.iq_ref <= MotorParameters::nominal().max_current);
    }

    #[test]
    fn test_sinusoidal_modulation_selectable() {
        let mut svm = controller();
        let mut sine = controller();
        sine.set_modulation(Modulation::Sinusoidal);
        assert_eq!(svm.modulation(), Modulation::SpaceVector);
        assert_eq!(sine.modulation(), Modulation::Sinusoidal);

        let a = svm.update(0.0, 0.0, 0.0, 100.0, 0.0, 0.0);
        let b = sine.update(0.0, 0.0, 0.0, 100.0, 0.0, 0.0);

        // Same control law, only the duty synthesis differs
        assert_eq!(a.vd, b.vd);
        assert_eq!(a.vq, b.vq);
        assert_eq!(a.sector, b.sector);
        assert_ne!(a.duty, b.duty);

        // Pure β command at θ = 0: phase a sits at mid-duty
        assert!((b.duty.a - 0.5).abs() < 1e-9);
        assert!(b.duty.b > 0.5 && b.duty.c < 0.5);
        for d in [b.duty.a, b.duty.b, b.duty.c] {
            assert!((0.0..=1.0).contains(&d));
        }
    }

    #[test]
    fn test_measured_currents_through_clarke_park() {
        let mut foc = controller();
        let theta = 0.8;
        let (alpha, beta) = inverse_park(1.0, 2.0, theta);
        let (a, b, c) = inverse_clarke(alpha, beta);
        let out = foc.update(a, b, c, 0.0, 0.0, theta);
        assert!((out.id_actual - 1.0).abs() < 1e-9);
        assert!((out.iq_actual - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_voltage_vector_limited() {
        let params = MotorParameters::nominal();
        let mut foc = controller();
        foc.set_id_reference(-params.max_current);
        let out = foc.update(0.0, 0.0, 0.0, 1.0e4, 0.0, 0.3);
        let magnitude = sqrt(out.vd * out.vd + out.vq * out.vq);
        assert!(magnitude <= params.max_phase_voltage() + 1e-9);
    }

    #[test]
    fn test_id_reference_clamped() {
        let mut foc = controller();
        foc.set_id_reference(-1.0e3);
        assert_eq!(foc.id_reference(), -MotorParameters::nominal().max_current);
    }

    #[test]
    fn test_iq_compensation_added_and_clamped() {
        let mut foc = controller();
        foc.set_iq_compensation(2.0);
        let out = foc.update(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert!((out.iq_ref - 2.0).abs() < 1e-12);

        foc.set_iq_compensation(1.0e3);
        let out = foc.update(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert_eq!(out.iq_ref, MotorParameters::nominal().max_current);
    }

    #[test]
    fn test_rejects_bad_dc_bus() {
        let params = MotorParameters {
            dc_bus_voltage: 0.0,
            ..MotorParameters::nominal()
        };
        assert!(matches!(
            FocController::new(params),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_reload_rejects_invalid_and_keeps_old() {
        let mut foc = controller();
        let bad = MotorParameters {
            ld: 0.0,
            ..MotorParameters::nominal()
        };
        assert!(foc.reload(bad).is_err());
        assert_eq!(*foc.params(), MotorParameters::nominal());

        let good = MotorParameters {
            max_current: 5.0,
            ..MotorParameters::nominal()
        };
        foc.reload(good).unwrap();
        let out = foc.update(0.0, 0.0, 0.0, 1.0e4, 0.0, 0.0);
        assert_eq!(out.iq_ref, 5.0);
    }

    #[test]
    fn test_reset_clears_references() {
        let mut foc = controller();
        foc.set_id_reference(-2.0);
        foc.set_iq_compensation(1.0);
        foc.update(0.0, 0.0, 0.0, 50.0, 0.0, 0.0);
        foc.reset();
        assert_eq!(foc.id_reference(), 0.0);
        assert_eq!(foc.iq_reference(), 0.0);
        let out = foc.update(0.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert_eq!(out.vq, 0.0);
    }
}
