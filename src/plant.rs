//! PMSM plant model in the rotating d-q frame
//!
//! ```text
//! d(id)/dt    = (vd - Rs·id + wr·Lq·iq) / Ld
//! d(iq)/dt    = (vq - Rs·iq - wr·Ld·id - wr·ψ) / Lq
//! Te          = 1.5·p·(ψ·iq + (Ld - Lq)·id·iq)
//! d(wr)/dt    = (Te - TL - B·wr) / J
//! d(theta)/dt = wr
//! ```
//!
//! Integrated with classic RK4. The electrical time constant min(L)/Rs can
//! be far shorter than the sample time, so every sample is split into
//! `substeps` equal RK4 steps, sized at construction so that each sub-step
//! spans at most a quarter of the time constant (capped at
//! `MAX_SUBSTEPS`). Inputs are held constant across the sample (ZOH).

use core::f64::consts::PI;

use libm::{ceil, fabs};

use crate::config::{plant as plant_params, MotorParameters};
use crate::error::Error;
use crate::foc::transforms::{inverse_clarke, inverse_park, limit_vector, normalize_angle};

/// Electro-mechanical state, exclusively owned by the plant
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct PlantState {
    /// d-axis current [A]
    pub id: f64,
    /// q-axis current [A]
    pub iq: f64,
    /// Electrical angular velocity [rad/s]
    pub wr: f64,
    /// Electrical angle [rad], kept in [0, 2π)
    pub theta: f64,
    /// Load torque applied during the last step [N·m]
    pub load_torque: f64,
}

impl PlantState {
    fn is_finite(&self) -> bool {
        self.id.is_finite() && self.iq.is_finite() && self.wr.is_finite() && self.theta.is_finite()
    }
}

/// Result of one plant step
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct PlantOutput {
    pub id: f64,
    pub iq: f64,
    /// Electrical angular velocity [rad/s]
    pub speed: f64,
    /// Electrical angle [rad]
    pub angle: f64,
    /// Electromagnetic torque [N·m]
    pub torque: f64,
    /// Mechanical speed [RPM]
    pub speed_rpm: f64,
}

/// Derivative of [id, iq, wr, theta]
type Derivative = [f64; 4];

#[derive(Debug, Clone)]
pub struct MotorPlantModel {
    params: MotorParameters,
    state: PlantState,
    substeps: u32,
    steps: u64,
}

impl MotorPlantModel {
    pub fn new(params: MotorParameters) -> Result<Self, Error> {
        params.validate()?;
        let substeps = Self::substeps_for(&params);
        debug!(
            "plant: tau_e={}s, Ts={}s, {} RK4 sub-steps",
            params.electrical_time_constant(),
            params.sample_time,
            substeps
        );
        Ok(Self {
            params,
            state: PlantState::default(),
            substeps,
            steps: 0,
        })
    }

    fn substeps_for(params: &MotorParameters) -> u32 {
        let max_step =
            params.electrical_time_constant() / plant_params::SUBSTEPS_PER_TIME_CONSTANT;
        let needed = ceil(params.sample_time / max_step);
        if needed >= plant_params::MAX_SUBSTEPS as f64 {
            plant_params::MAX_SUBSTEPS
        } else if needed <= 1.0 {
            1
        } else {
            needed as u32
        }
    }

    /// Advance the plant by exactly one sample interval
    ///
    /// On a non-finite result the state is rolled back to its pre-step value
    /// and `NumericalInstability` is returned, so a bad step never leaks
    /// into the next one.
    pub fn update(&mut self, vd: f64, vq: f64, load_torque: f64) -> Result<PlantOutput, Error> {
        let h = self.params.sample_time / self.substeps as f64;
        let mut x = [self.state.id, self.state.iq, self.state.wr, self.state.theta];

        for _ in 0..self.substeps {
            x = self.rk4_step(x, h, vd, vq, load_torque);
        }
        self.steps += 1;

        let next = PlantState {
            id: x[0],
            iq: x[1],
            wr: x[2],
            theta: normalize_angle(x[3]),
            load_torque,
        };

        if !next.is_finite() {
            warn!(
                "plant: non-finite state at step {} (vd={}, vq={}, load={})",
                self.steps,
                vd,
                vq,
                load_torque
            );
            return Err(Error::NumericalInstability { step: self.steps });
        }

        self.state = next;
        Ok(self.output())
    }

    fn rk4_step(&self, x: Derivative, h: f64, vd: f64, vq: f64, load: f64) -> Derivative {
        let k1 = self.derivative(&x, vd, vq, load);
        let k2 = self.derivative(&offset(&x, &k1, h / 2.0), vd, vq, load);
        let k3 = self.derivative(&offset(&x, &k2, h / 2.0), vd, vq, load);
        let k4 = self.derivative(&offset(&x, &k3, h), vd, vq, load);

        let mut next = x;
        for i in 0..4 {
            next[i] += h / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
        }
        next
    }

    fn derivative(&self, x: &Derivative, vd: f64, vq: f64, load: f64) -> Derivative {
        let p = &self.params;
        let [id, iq, wr, _] = *x;

        let did = (vd - p.rs * id + wr * p.lq * iq) / p.ld;
        let diq = (vq - p.rs * iq - wr * p.ld * id - wr * p.flux_linkage) / p.lq;
        let torque = self.torque_at(id, iq);
        let dwr = (torque - load - p.friction * wr) / p.inertia;

        [did, diq, dwr, wr]
    }

    fn torque_at(&self, id: f64, iq: f64) -> f64 {
        let p = &self.params;
        1.5 * p.pole_pairs as f64 * (p.flux_linkage * iq + (p.ld - p.lq) * id * iq)
    }

    fn output(&self) -> PlantOutput {
        PlantOutput {
            id: self.state.id,
            iq: self.state.iq,
            speed: self.state.wr,
            angle: self.state.theta,
            torque: self.torque(),
            speed_rpm: self.speed_rpm(),
        }
    }

    /// Electromagnetic torque at the current state [N·m]
    pub fn torque(&self) -> f64 {
        self.torque_at(self.state.id, self.state.iq)
    }

    /// Mechanical speed [RPM]
    pub fn speed_rpm(&self) -> f64 {
        self.state.wr * 60.0 / (2.0 * PI * self.params.pole_pairs as f64)
    }

    /// Balanced phase currents (ia, ib, ic) from the dq state
    pub fn three_phase_currents(&self) -> (f64, f64, f64) {
        let (i_alpha, i_beta) = inverse_park(self.state.id, self.state.iq, self.state.theta);
        inverse_clarke(i_alpha, i_beta)
    }

    /// DC bus current estimate [A]
    ///
    /// Sum of phase-current magnitudes. This is a coarse indicator, not a
    /// switching-period average of the inverter input current.
    pub fn dc_bus_current(&self) -> f64 {
        let (ia, ib, ic) = self.three_phase_currents();
        fabs(ia) + fabs(ib) + fabs(ic)
    }

    /// Clamp (vd, vq) onto the circle of radius Vdc/√3, keeping direction
    pub fn apply_voltage_limits(&self, vd: f64, vq: f64) -> (f64, f64) {
        limit_vector(vd, vq, self.params.max_phase_voltage())
    }

    /// Clamp (id, iq) onto the circle of radius max_current, keeping direction
    pub fn apply_current_limits(&self, id: f64, iq: f64) -> (f64, f64) {
        limit_vector(id, iq, self.params.max_current)
    }

    /// Zero all state
    pub fn reset(&mut self) {
        self.state = PlantState::default();
        self.steps = 0;
    }

    /// Overwrite the state (initial conditions); the angle is normalized
    pub fn set_state(&mut self, state: PlantState) {
        self.state = PlantState {
            theta: normalize_angle(state.theta),
            ..state
        };
    }

    /// Swap in a new parameter record, keeping the current state
    pub fn reload(&mut self, params: MotorParameters) -> Result<(), Error> {
        params.validate()?;
        self.substeps = Self::substeps_for(&params);
        self.params = params;
        Ok(())
    }

    pub fn state(&self) -> &PlantState {
        &self.state
    }

    pub fn params(&self) -> &MotorParameters {
        &self.params
    }

    /// RK4 sub-steps per sample
    pub fn substeps(&self) -> u32 {
        self.substeps
    }

    /// Completed update calls since construction or reset
    pub fn steps(&self) -> u64 {
        self.steps
    }
}

fn offset(x: &Derivative, k: &Derivative, scale: f64) -> Derivative {
    [
        x[0] + scale * k[0],
        x[1] + scale * k[1],
        x[2] + scale * k[2],
        x[3] + scale * k[3],
    ]
}
