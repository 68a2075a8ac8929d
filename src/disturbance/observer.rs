//! Reduced-order load-torque observer
//!
//! Two coupled Euler integrators run against the mechanical equation
//! `J·ω' = Te - B·ω - TL`:
//!
//! ```text
//! d̂ += g·(ω̂ - ω)·dt
//! ω̂ += (Te - B·ω - d̂)/J·dt
//! ```
//!
//! with `g = bandwidth·J`. The pair has no damping term, so after a load
//! step `d̂` oscillates about the true load at `sqrt(g/J)` rad/s rather
//! than settling; downstream loops see the mean.

/// Observer state for one mechanical axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisturbanceObserver {
    gain: f64,
    inertia: f64,
    friction: f64,
    dt: f64,
    disturbance_estimate: f64,
    speed_estimate: f64,
    observed_torque: f64,
}

impl DisturbanceObserver {
    pub fn new(bandwidth: f64, inertia: f64, friction: f64, dt: f64) -> Self {
        Self {
            gain: bandwidth * inertia,
            inertia,
            friction,
            dt,
            disturbance_estimate: 0.0,
            speed_estimate: 0.0,
            observed_torque: 0.0,
        }
    }

    /// Advance one sample and return the observed disturbance torque
    ///
    /// # Arguments
    /// * `torque` - Electromagnetic torque [N·m]
    /// * `speed` - Measured speed, in the units of the mechanical equation [rad/s]
    /// * `load_estimate` - Known load added to the output [N·m]
    pub fn update(&mut self, torque: f64, speed: f64, load_estimate: f64) -> f64 {
        let speed_error = self.speed_estimate - speed;
        self.disturbance_estimate += self.gain * speed_error * self.dt;
        self.speed_estimate +=
            (torque - self.friction * speed - self.disturbance_estimate) / self.inertia * self.dt;

        self.observed_torque = self.disturbance_estimate + load_estimate;
        self.observed_torque
    }

    pub fn disturbance_estimate(&self) -> f64 {
        self.disturbance_estimate
    }

    pub fn speed_estimate(&self) -> f64 {
        self.speed_estimate
    }

    /// Output of the last update (estimate + load estimate)
    pub fn observed_torque(&self) -> f64 {
        self.observed_torque
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }

    pub fn reset(&mut self) {
        self.disturbance_estimate = 0.0;
        self.speed_estimate = 0.0;
        self.observed_torque = 0.0;
    }

    /// New mechanical constants; the estimate itself is kept
    pub fn reload(&mut self, bandwidth: f64, inertia: f64, friction: f64, dt: f64) {
        self.gain = bandwidth * inertia;
        self.inertia = inertia;
        self.friction = friction;
        self.dt = dt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const J: f64 = 1.0e-3;
    const B: f64 = 1.0e-4;
    const DT: f64 = 1.0e-4;

    /// Exact Euler mechanical axis driven by `torque` against `load`
    fn run(observer: &mut DisturbanceObserver, torque: f64, load: f64, steps: usize) -> (f64, f64) {
        let mut speed = 0.0;
        let mut low = f64::MAX;
        let mut high = f64::MIN;
        for _ in 0..steps {
            let d = observer.update(torque, speed, 0.0);
            low = low.min(d);
            high = high.max(d);
            speed += (torque - load - B * speed) / J * DT;
        }
        (low, high)
    }

    #[test]
    fn test_gain_from_bandwidth() {
        let observer = DisturbanceObserver::new(100.0, J, B, DT);
        assert!((observer.gain() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_no_load_no_estimate() {
        let mut observer = DisturbanceObserver::new(100.0, J, B, DT);
        let (low, high) = run(&mut observer, 0.2, 0.0, 2000);
        assert!(low.abs() < 1e-9);
        assert!(high.abs() < 1e-9);
    }

    #[test]
    fn test_load_estimate_swings_about_true_load() {
        // One oscillation period at sqrt(g/J) = 10 rad/s is ~6283 samples
        let load = 0.1;
        let mut observer = DisturbanceObserver::new(100.0, J, B, DT);
        let (low, high) = run(&mut observer, 0.0, load, 7000);
        assert!(low > -0.01 * load);
        assert!(high > 1.5 * load);
        assert!(high < 2.1 * load);
    }

    #[test]
    fn test_load_estimate_passthrough() {
        let mut observer = DisturbanceObserver::new(100.0, J, B, DT);
        let out = observer.update(0.0, 0.0, 0.25);
        assert_eq!(out, 0.25);
        assert_eq!(observer.observed_torque(), 0.25);
    }

    #[test]
    fn test_reset() {
        let mut observer = DisturbanceObserver::new(100.0, J, B, DT);
        run(&mut observer, 0.0, 0.1, 500);
        observer.reset();
        assert_eq!(observer.disturbance_estimate(), 0.0);
        assert_eq!(observer.speed_estimate(), 0.0);
    }
}
