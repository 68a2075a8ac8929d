// PI (Proportional-Integral) controller with conditional anti-windup

/// PI controller with output limiting and directional anti-windup
///
/// Every step integrates the error first. If the resulting output saturates
/// and the error pushes further into the same limit, that step's integral
/// contribution is rolled back. Errors pulling the output back out of
/// saturation are always integrated.
#[derive(Debug, Clone, Copy)]
pub struct PiController {
    /// Proportional gain
    kp: f64,
    /// Integral gain
    ki: f64,
    /// Integral accumulator (∫error·dt)
    integral: f64,
    /// Error seen on the previous update
    prev_error: f64,
    /// Minimum output limit
    output_min: f64,
    /// Maximum output limit
    output_max: f64,
    /// Last calculated output
    last_output: f64,
}

impl PiController {
    /// Create a new PI controller
    ///
    /// # Arguments
    /// * `kp` - Proportional gain
    /// * `ki` - Integral gain
    /// * `output_min` - Minimum output limit
    /// * `output_max` - Maximum output limit
    pub const fn new(kp: f64, ki: f64, output_min: f64, output_max: f64) -> Self {
        Self {
            kp,
            ki,
            integral: 0.0,
            prev_error: 0.0,
            output_min,
            output_max,
            last_output: 0.0,
        }
    }

    /// Create a symmetric PI controller (output range: -limit to +limit)
    pub const fn new_symmetric(kp: f64, ki: f64, output_limit: f64) -> Self {
        Self::new(kp, ki, -output_limit, output_limit)
    }

    /// Update the PI controller
    ///
    /// # Arguments
    /// * `error` - Setpoint minus measurement
    /// * `dt` - Time step (seconds)
    ///
    /// # Returns
    /// Controller output (limited to output_min..output_max)
    pub fn update(&mut self, error: f64, dt: f64) -> f64 {
        let step = error * dt;
        self.integral += step;

        let output = self.kp * error + self.ki * self.integral;

        let limited = if output > self.output_max {
            if error > 0.0 {
                self.integral -= step;
            }
            self.output_max
        } else if output < self.output_min {
            if error < 0.0 {
                self.integral -= step;
            }
            self.output_min
        } else {
            output
        };

        self.prev_error = error;
        self.last_output = limited;
        limited
    }

    /// Reset the integral term and error history to zero
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = 0.0;
        self.last_output = 0.0;
    }

    /// Set the proportional and integral gains
    ///
    /// The accumulator is kept, so the integral term jumps by the ratio of
    /// the new to the old `ki`.
    pub fn set_gains(&mut self, kp: f64, ki: f64) {
        self.kp = kp;
        self.ki = ki;
    }

    /// Set the output limits
    pub fn set_limits(&mut self, output_min: f64, output_max: f64) {
        self.output_min = output_min;
        self.output_max = output_max;
    }

    /// Set symmetric output limits (±limit)
    pub fn set_symmetric_limit(&mut self, output_limit: f64) {
        self.output_min = -output_limit;
        self.output_max = output_limit;
    }

    /// Get the current output
    pub fn get_output(&self) -> f64 {
        self.last_output
    }

    /// Get the current integral accumulator
    pub fn get_integral(&self) -> f64 {
        self.integral
    }

    /// Get the error from the previous update
    pub fn get_prev_error(&self) -> f64 {
        self.prev_error
    }

    /// Get the proportional gain
    pub fn get_kp(&self) -> f64 {
        self.kp
    }

    /// Get the integral gain
    pub fn get_ki(&self) -> f64 {
        self.ki
    }

    /// Get the output limits as (min, max)
    pub fn get_limits(&self) -> (f64, f64) {
        (self.output_min, self.output_max)
    }

    /// Check if output is currently saturated
    pub fn is_saturated(&self) -> bool {
        self.last_output <= self.output_min || self.last_output >= self.output_max
    }
}
