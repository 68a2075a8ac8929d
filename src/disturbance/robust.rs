//! Robust speed compensation
//!
//! Two interchangeable laws act on the speed error `e = ω_ref - ω`:
//! a boundary-layer sliding-mode law and a fixed static state feedback.
//! [`RobustController::update`] returns a q-axis demand in which a positive
//! value asks for more torque.

use core::str::FromStr;

use crate::error::{Error, ModeSelector};

/// Compensation law
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RobustLaw {
    /// `s = ė + λe` with a saturated switching term
    SlidingMode,
    /// `K·[∫e dt, e]` with fixed K.
    ///
    /// Stand-in for an H∞ design: the gains are not synthesized from any
    /// plant model and carry no robustness guarantee.
    StaticFeedback,
}

impl FromStr for RobustLaw {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sliding" => Ok(Self::SlidingMode),
            "static" => Ok(Self::StaticFeedback),
            _ => Err(Error::InvalidMode(ModeSelector::RobustLaw)),
        }
    }
}

/// Robust-law tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustConfig {
    /// λ
    pub surface_slope: f64,
    /// k
    pub switching_gain: f64,
    /// δ, half-width of the boundary layer
    pub boundary_layer: f64,
    /// Low-pass bandwidth on the differenced error [rad/s]
    pub derivative_bandwidth: f64,
    pub static_gains: [f64; 2],
}

/// Boundary-layer sliding-mode law
///
/// Returns `(u, s)` with `s = ė + λe` and
/// `u = -ė - λe - k·sat(s/δ) - d̂`, where `sat` is linear inside the layer
/// and `sign(s)` outside it.
pub fn sliding_mode_control(
    error: f64,
    error_rate: f64,
    disturbance: f64,
    config: &RobustConfig,
) -> (f64, f64) {
    let surface = error_rate + config.surface_slope * error;
    let equivalent = -error_rate - config.surface_slope * error;

    let switching = if surface.abs() < config.boundary_layer {
        -config.switching_gain * surface / config.boundary_layer
    } else {
        -config.switching_gain * surface.signum()
    };

    (equivalent + switching - disturbance, surface)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustController {
    law: RobustLaw,
    config: RobustConfig,
    dt: f64,
    prev_error: Option<f64>,
    error_rate: f64,
    error_integral: f64,
    surface: f64,
    output: f64,
}

impl RobustController {
    pub fn new(config: RobustConfig, dt: f64) -> Self {
        Self {
            law: RobustLaw::SlidingMode,
            config,
            dt,
            prev_error: None,
            error_rate: 0.0,
            error_integral: 0.0,
            surface: 0.0,
            output: 0.0,
        }
    }

    pub fn set_law(&mut self, law: RobustLaw) {
        if law != self.law {
            self.law = law;
            self.reset();
        }
    }

    pub fn law(&self) -> RobustLaw {
        self.law
    }

    /// One compensation step
    ///
    /// `ė` is the backward difference of `error`, low-pass filtered; it is
    /// zero on the first call after a reset. The sliding law is posed on the
    /// error dynamics, where torque enters `ė` with a negative sign, so its
    /// `u` is negated to form the demand.
    pub fn update(&mut self, error: f64, disturbance: f64) -> f64 {
        let raw_rate = match self.prev_error {
            Some(prev) => (error - prev) / self.dt,
            None => 0.0,
        };
        self.prev_error = Some(error);

        let wdt = self.config.derivative_bandwidth * self.dt;
        let alpha = wdt / (1.0 + wdt);
        self.error_rate += alpha * (raw_rate - self.error_rate);

        self.output = match self.law {
            RobustLaw::SlidingMode => {
                let (u, surface) =
                    sliding_mode_control(error, self.error_rate, disturbance, &self.config);
                self.surface = surface;
                -u
            }
            RobustLaw::StaticFeedback => {
                self.error_integral += error * self.dt;
                let [k_int, k_prop] = self.config.static_gains;
                k_int * self.error_integral + k_prop * error
            }
        };

        self.output
    }

    /// Sliding surface of the last sliding-mode step
    pub fn surface(&self) -> f64 {
        self.surface
    }

    /// Filtered error derivative
    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    pub fn output(&self) -> f64 {
        self.output
    }

    pub fn reset(&mut self) {
        self.prev_error = None;
        self.error_rate = 0.0;
        self.error_integral = 0.0;
        self.surface = 0.0;
        self.output = 0.0;
    }

    pub fn reload(&mut self, dt: f64) {
        self.dt = dt;
        self.reset();
    }
}
