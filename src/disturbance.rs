//! Disturbance rejection
//!
//! Wraps the load observer, the adaptive gain scheduler and the robust
//! compensator behind one mode selector. Per step the controller observes
//! the disturbance, records performance history and returns the (possibly
//! modified) q-axis reference together with the scheduled gains.
//!
//! Speeds are in the units of the plant's mechanical equation, i.e. the
//! same `wr` the FOC speed loop regulates.

mod adaptive;
mod metrics;
mod observer;
mod robust;

use core::str::FromStr;

use serde::Serialize;

pub use adaptive::{AdaptiveConfig, AdaptiveGainScheduler, AdaptiveGains, GainPair};
pub use metrics::{PerformanceMetrics, PerformanceMonitor, RingBuffer};
pub use observer::DisturbanceObserver;
pub use robust::{sliding_mode_control, RobustConfig, RobustController, RobustLaw};

use crate::config::{disturbance as dr, MotorParameters};
use crate::error::{ensure_in_range, ensure_positive, Error, ModeSelector};
use crate::foc::FocGains;

/// Disturbance-rejection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DisturbanceMode {
    /// Feed-forward of the observed disturbance torque
    Observer,
    /// Gain scheduling only; references pass through
    Adaptive,
    /// Robust compensation on the speed error
    Robust,
    /// Observer feed-forward plus scaled robust term, with gain scheduling
    Combined,
}

impl FromStr for DisturbanceMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "observer" => Ok(Self::Observer),
            "adaptive" => Ok(Self::Adaptive),
            "robust" => Ok(Self::Robust),
            "combined" => Ok(Self::Combined),
            _ => Err(Error::InvalidMode(ModeSelector::DisturbanceRejection)),
        }
    }
}

/// Disturbance-rejection tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisturbanceConfig {
    /// Observer bandwidth [rad/s]
    pub observer_bandwidth: f64,
    pub adaptive: AdaptiveConfig,
    pub robust: RobustConfig,
    /// Robust demand → iq scaling in robust mode
    pub robust_scale: f64,
    /// Robust demand → iq scaling in combined mode
    pub combined_robust_scale: f64,
}

impl Default for DisturbanceConfig {
    fn default() -> Self {
        Self {
            observer_bandwidth: dr::DEFAULT_OBSERVER_BANDWIDTH,
            adaptive: AdaptiveConfig {
                adaptation_rate: dr::DEFAULT_ADAPTATION_RATE,
                min_gain: dr::DEFAULT_MIN_GAIN,
                max_gain: dr::DEFAULT_MAX_GAIN,
                energy_thresholds: dr::DEFAULT_ENERGY_THRESHOLDS,
                decay_interval: dr::DEFAULT_DECAY_INTERVAL,
                decay_factor: dr::DEFAULT_DECAY_FACTOR,
            },
            robust: RobustConfig {
                surface_slope: dr::DEFAULT_SURFACE_SLOPE,
                switching_gain: dr::DEFAULT_SLIDING_GAIN,
                boundary_layer: dr::DEFAULT_BOUNDARY_LAYER,
                derivative_bandwidth: dr::DEFAULT_DERIVATIVE_BANDWIDTH,
                static_gains: dr::DEFAULT_STATIC_FEEDBACK_GAINS,
            },
            robust_scale: dr::ROBUST_SCALE,
            combined_robust_scale: dr::COMBINED_ROBUST_SCALE,
        }
    }
}

impl DisturbanceConfig {
    fn validate(&self) -> Result<(), Error> {
        ensure_positive(self.observer_bandwidth, "observer_bandwidth")?;

        let a = &self.adaptive;
        ensure_in_range(a.adaptation_rate, 0.0, 1.0, "adaptation_rate")?;
        ensure_positive(a.min_gain, "min_gain")?;
        ensure_positive(a.max_gain, "max_gain")?;
        if a.min_gain > a.max_gain {
            return Err(crate::error::ConfigError::OutOfRange { field: "min_gain" }.into());
        }
        for threshold in a.energy_thresholds {
            ensure_positive(threshold, "energy_threshold")?;
        }
        ensure_in_range(a.decay_factor, 0.0, 1.0, "decay_factor")?;

        let r = &self.robust;
        ensure_positive(r.surface_slope, "surface_slope")?;
        ensure_positive(r.switching_gain, "switching_gain")?;
        ensure_positive(r.boundary_layer, "boundary_layer")?;
        ensure_positive(r.derivative_bandwidth, "derivative_bandwidth")?;
        ensure_positive(self.robust_scale, "robust_scale")?;
        ensure_positive(self.combined_robust_scale, "combined_robust_scale")?;
        Ok(())
    }
}

/// Result of one disturbance-rejection step
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DisturbanceOutput {
    /// d-axis reference, passed through unchanged
    pub id_ref: f64,
    pub iq_ref: f64,
    /// `iq_ref` minus the incoming reference [A]
    pub iq_compensation: f64,
    /// Observed disturbance torque [N·m]
    pub disturbance_estimate: f64,
    pub gains: AdaptiveGains,
    pub metrics: PerformanceMetrics,
}

/// Observer / adaptive / robust / combined disturbance rejection
#[derive(Debug, Clone)]
pub struct DisturbanceRejectionController {
    params: MotorParameters,
    config: DisturbanceConfig,
    mode: DisturbanceMode,
    observer: DisturbanceObserver,
    adaptive: AdaptiveGainScheduler,
    robust: RobustController,
    monitor: PerformanceMonitor<{ dr::METRICS_CAPACITY }>,
    load_estimate: f64,
}

impl DisturbanceRejectionController {
    pub fn new(params: MotorParameters) -> Result<Self, Error> {
        Self::with_config(params, DisturbanceConfig::default())
    }

    pub fn with_config(params: MotorParameters, config: DisturbanceConfig) -> Result<Self, Error> {
        params.validate()?;
        config.validate()?;

        let observer = DisturbanceObserver::new(
            config.observer_bandwidth,
            params.inertia,
            params.friction,
            params.sample_time,
        );
        let initial = Self::initial_gains(&params, &config);
        info!(
            "disturbance rejection: observer gain {}, bandwidth {} rad/s",
            observer.gain(),
            config.observer_bandwidth
        );

        Ok(Self {
            params,
            config,
            mode: DisturbanceMode::Observer,
            observer,
            adaptive: AdaptiveGainScheduler::new(config.adaptive, initial, params.sample_time),
            robust: RobustController::new(config.robust, params.sample_time),
            monitor: PerformanceMonitor::new(dr::METRICS_MIN_SAMPLES),
            load_estimate: 0.0,
        })
    }

    fn initial_gains(params: &MotorParameters, config: &DisturbanceConfig) -> AdaptiveGains {
        AdaptiveGains::from_foc_gains(
            &FocGains::for_motor(params),
            config.adaptive.min_gain,
            config.adaptive.max_gain,
        )
    }

    pub fn set_mode(&mut self, mode: DisturbanceMode) {
        if mode != self.mode {
            debug!("disturbance rejection: mode changed");
            self.mode = mode;
        }
    }

    pub fn mode(&self) -> DisturbanceMode {
        self.mode
    }

    pub fn set_robust_law(&mut self, law: RobustLaw) {
        self.robust.set_law(law);
    }

    pub fn robust_law(&self) -> RobustLaw {
        self.robust.law()
    }

    /// Known load torque added to the observer output [N·m]
    pub fn set_load_estimate(&mut self, load_estimate: f64) {
        self.load_estimate = load_estimate;
    }

    /// One disturbance-rejection step
    ///
    /// # Arguments
    /// * `torque` - Electromagnetic torque [N·m]
    /// * `speed`, `speed_ref` - Measured and reference speed [rad/s]
    /// * `id`, `iq` - Measured d/q currents [A]
    /// * `id_ref`, `iq_ref` - Current references of this step [A]
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        torque: f64,
        speed: f64,
        speed_ref: f64,
        id: f64,
        iq: f64,
        id_ref: f64,
        iq_ref: f64,
    ) -> DisturbanceOutput {
        let speed_error = speed_ref - speed;
        let id_error = id_ref - id;
        let iq_error = iq_ref - iq;

        let disturbance = self.observer.update(torque, speed, self.load_estimate);
        let metrics = self.monitor.record(speed_error, torque, disturbance);

        let feed_forward = disturbance / self.params.torque_constant();

        let compensation = match self.mode {
            DisturbanceMode::Observer => feed_forward,
            DisturbanceMode::Adaptive => {
                self.adaptive.update(id_error, iq_error, speed_error);
                0.0
            }
            DisturbanceMode::Robust => {
                self.robust.update(speed_error, disturbance) * self.config.robust_scale
            }
            DisturbanceMode::Combined => {
                self.adaptive.update(id_error, iq_error, speed_error);
                let robust = self.robust.update(speed_error, disturbance);
                feed_forward + robust * self.config.combined_robust_scale
            }
        };

        DisturbanceOutput {
            id_ref,
            iq_ref: iq_ref + compensation,
            iq_compensation: compensation,
            disturbance_estimate: disturbance,
            gains: self.adaptive.gains(),
            metrics,
        }
    }

    pub fn disturbance_estimate(&self) -> f64 {
        self.observer.observed_torque()
    }

    pub fn adaptive_gains(&self) -> AdaptiveGains {
        self.adaptive.gains()
    }

    /// The motor's designed FOC gains with the scheduler's adjustments
    /// applied
    pub fn scheduled_foc_gains(&self) -> FocGains {
        self.adaptive.scale_gains(&FocGains::for_motor(&self.params))
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.monitor.metrics()
    }

    pub fn observer(&self) -> &DisturbanceObserver {
        &self.observer
    }

    pub fn robust(&self) -> &RobustController {
        &self.robust
    }

    /// Reset estimators, scheduler and history; mode and law are kept
    pub fn reset(&mut self) {
        self.observer.reset();
        self.adaptive.reset();
        self.robust.reset();
        self.monitor.clear();
    }

    pub fn reload(&mut self, params: MotorParameters) -> Result<(), Error> {
        params.validate()?;
        self.params = params;
        self.observer.reload(
            self.config.observer_bandwidth,
            params.inertia,
            params.friction,
            params.sample_time,
        );
        self.adaptive
            .reload(Self::initial_gains(&params, &self.config), params.sample_time);
        self.robust.reload(params.sample_time);
        debug!("disturbance rejection: parameters reloaded");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(mode: DisturbanceMode) -> DisturbanceRejectionController {
        let mut rejection = DisturbanceRejectionController::new(MotorParameters::nominal()).unwrap();
        rejection.set_mode(mode);
        rejection
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("observer".parse(), Ok(DisturbanceMode::Observer));
        assert_eq!("adaptive".parse(), Ok(DisturbanceMode::Adaptive));
        assert_eq!("robust".parse(), Ok(DisturbanceMode::Robust));
        assert_eq!("combined".parse(), Ok(DisturbanceMode::Combined));
        assert_eq!(
            "hybrid".parse::<DisturbanceMode>(),
            Err(Error::InvalidMode(ModeSelector::DisturbanceRejection))
        );
    }

    #[test]
    fn test_observer_mode_feed_forward() {
        let mut rejection = controller(DisturbanceMode::Observer);
        rejection.set_load_estimate(0.3);
        let out = rejection.update(0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        let kt = MotorParameters::nominal().torque_constant();
        assert!((out.disturbance_estimate - 0.3).abs() < 1e-12);
        assert!((out.iq_ref - (1.0 + 0.3 / kt)).abs() < 1e-12);
    }

    #[test]
    fn test_adaptive_mode_passes_references_through() {
        let mut rejection = controller(DisturbanceMode::Adaptive);
        let before = rejection.adaptive_gains();
        let out = rejection.update(0.1, 5.0, 10.0, 0.0, 1.0, 0.0, 2.0);
        assert_eq!(out.iq_ref, 2.0);
        assert_eq!(out.id_ref, 0.0);
        assert_ne!(out.gains, before);
    }

    #[test]
    fn test_robust_mode_pushes_toward_reference() {
        let mut rejection = controller(DisturbanceMode::Robust);
        let out = rejection.update(0.0, 0.0, 20.0, 0.0, 0.0, 0.0, 0.0);
        assert!(out.iq_ref > 0.0);

        rejection.reset();
        let out = rejection.update(0.0, 20.0, 0.0, 0.0, 0.0, 0.0, 0.0);
        assert!(out.iq_ref < 0.0);
    }

    #[test]
    fn test_combined_mode_scales_robust_term() {
        let mut robust = controller(DisturbanceMode::Robust);
        let mut combined = controller(DisturbanceMode::Combined);
        let r = robust.update(0.0, 0.0, 20.0, 0.0, 0.0, 0.0, 0.0);
        let c = combined.update(0.0, 0.0, 20.0, 0.0, 0.0, 0.0, 0.0);
        assert!((c.iq_compensation - r.iq_compensation * 0.5).abs() < 1e-12);
        assert_ne!(c.gains, robust.adaptive_gains());
    }

    #[test]
    fn test_metrics_after_history() {
        let mut rejection = controller(DisturbanceMode::Observer);
        for _ in 0..11 {
            rejection.update(0.5, 0.0, 2.0, 0.0, 0.0, 0.0, 0.0);
        }
        let metrics = rejection.metrics();
        assert!((metrics.speed_error_rms - 2.0).abs() < 1e-12);
        assert_eq!(metrics.torque_ripple, 0.0);
    }

    #[test]
    fn test_reset_clears_history() {
        let mut rejection = controller(DisturbanceMode::Combined);
        for _ in 0..50 {
            rejection.update(0.5, 1.0, 2.0, 0.0, 0.0, 0.0, 0.0);
        }
        rejection.reset();
        assert_eq!(rejection.metrics(), PerformanceMetrics::default());
        assert_eq!(rejection.disturbance_estimate(), 0.0);
        assert_eq!(rejection.mode(), DisturbanceMode::Combined);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = DisturbanceConfig::default();
        config.adaptive.min_gain = 20.0;
        assert!(DisturbanceRejectionController::with_config(MotorParameters::nominal(), config).is_err());
    }
}
