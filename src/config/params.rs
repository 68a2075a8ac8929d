//! Motor and controller default parameters

/// Pole-pair count of the nominal machine
pub const DEFAULT_POLE_PAIRS: u8 = 4;

/// Stator resistance [Ω]
pub const DEFAULT_RS: f64 = 0.5;

/// d-axis inductance [H]
pub const DEFAULT_LD: f64 = 0.8e-3;

/// q-axis inductance [H] (interior magnet, Lq > Ld)
pub const DEFAULT_LQ: f64 = 1.2e-3;

/// Permanent-magnet flux linkage [Wb]
pub const DEFAULT_FLUX_LINKAGE: f64 = 0.05;

/// Rotor inertia [kg·m²]
pub const DEFAULT_INERTIA: f64 = 1.0e-3;

/// Viscous friction coefficient [N·m·s]
pub const DEFAULT_FRICTION: f64 = 1.0e-4;

/// Maximum phase current magnitude [A]
pub const DEFAULT_MAX_CURRENT: f64 = 10.0;

/// Current-loop output limit [V]
pub const DEFAULT_MAX_VOLTAGE: f64 = 24.0;

/// DC bus voltage [V]
pub const DEFAULT_DC_BUS_VOLTAGE: f64 = 48.0;

/// Control period [s] (10 kHz)
pub const DEFAULT_SAMPLE_TIME: f64 = 1.0e-4;

/// Controller gains
pub mod gains {
    /// Current-loop bandwidth [rad/s]; kp = ωc·L, ki = ωc·Rs
    pub const DEFAULT_CURRENT_BANDWIDTH: f64 = 1000.0;

    /// Speed-loop proportional gain [A/(rad/s)]
    pub const DEFAULT_SPEED_KP: f64 = 0.5;

    /// Speed-loop integral gain [A/rad]
    pub const DEFAULT_SPEED_KI: f64 = 5.0;
}

/// Plant integrator
pub mod plant {
    /// RK4 sub-steps per electrical time constant
    pub const SUBSTEPS_PER_TIME_CONSTANT: f64 = 4.0;

    /// Upper bound on RK4 sub-steps per sample
    pub const MAX_SUBSTEPS: u32 = 256;
}

/// Flux-weakening controller
pub mod flux_weakening {
    pub const DEFAULT_KP: f64 = 0.5;
    pub const DEFAULT_KI: f64 = 10.0;

    /// Fraction of the available phase voltage at which weakening starts
    pub const DEFAULT_VOLTAGE_MARGIN: f64 = 0.95;

    /// Per-step decay of the voltage-loop output once the excess is gone
    pub const DECAY_FACTOR: f64 = 0.95;

    /// Output magnitude [A] below which the decayed output snaps to zero
    pub const RELEASE_THRESHOLD: f64 = 0.01;

    /// Saliency below which the machine is treated as surface-mounted [H]
    pub const SALIENCY_EPSILON: f64 = 1.0e-6;

    /// Fixed-point iterations when solving the MTPA locus for a torque
    pub const MTPA_ITERATIONS: usize = 12;

    /// Electrical speed [rad/s] below which the voltage ellipse is unbounded
    pub const ELLIPSE_MIN_SPEED: f64 = 10.0;
}

/// Disturbance rejection controller
pub mod disturbance {
    /// Observer bandwidth [rad/s]; observer gain = bandwidth·J
    pub const DEFAULT_OBSERVER_BANDWIDTH: f64 = 100.0;

    pub const DEFAULT_ADAPTATION_RATE: f64 = 0.01;
    pub const DEFAULT_MIN_GAIN: f64 = 0.1;
    pub const DEFAULT_MAX_GAIN: f64 = 10.0;

    /// Squared-error energy thresholds (d-current, q-current, speed)
    pub const DEFAULT_ENERGY_THRESHOLDS: [f64; 3] = [0.1, 0.1, 1.0];

    /// Energy accumulators are decayed every this many scheduler calls
    pub const DEFAULT_DECAY_INTERVAL: u32 = 100;
    pub const DEFAULT_DECAY_FACTOR: f64 = 0.9;

    /// Sliding-mode switching gain
    pub const DEFAULT_SLIDING_GAIN: f64 = 10.0;

    /// Boundary-layer half-width δ
    pub const DEFAULT_BOUNDARY_LAYER: f64 = 0.1;

    /// Sliding-surface slope λ in s = ė + λe
    pub const DEFAULT_SURFACE_SLOPE: f64 = 10.0;

    /// Low-pass bandwidth applied to the backward-difference ė [rad/s]
    pub const DEFAULT_DERIVATIVE_BANDWIDTH: f64 = 100.0;

    /// Static state-feedback gains on [∫e dt, e]
    pub const DEFAULT_STATIC_FEEDBACK_GAINS: [f64; 2] = [5.0, 2.0];

    /// Robust output → iq scaling in robust-only mode
    pub const ROBUST_SCALE: f64 = 1.0 / 10.0;

    /// Robust output → iq scaling in combined mode
    pub const COMBINED_ROBUST_SCALE: f64 = 1.0 / 20.0;

    /// Metrics history length
    pub const METRICS_CAPACITY: usize = 1000;

    /// Samples required before metrics are computed
    pub const METRICS_MIN_SAMPLES: usize = 10;
}

/// Online parameter identification
pub mod identification {
    pub const DEFAULT_FORGETTING_FACTOR: f64 = 0.99;

    /// Initial covariance diagonal
    pub const DEFAULT_INITIAL_COVARIANCE: f64 = 1000.0;

    /// |speed| [rad/s] separating stall (resistance) from running (L, ψ) fits
    pub const DEFAULT_SPEED_THRESHOLD: f64 = 10.0;

    /// Minimum current [A] for a usable regression sample
    pub const DEFAULT_CURRENT_THRESHOLD: f64 = 0.1;

    /// Minimum |derivative| for inductance and inertia fits
    pub const DERIVATIVE_THRESHOLD: f64 = 1.0e-6;

    /// RLS gain denominator guard
    pub const GAIN_EPSILON: f64 = 1.0e-10;

    /// Sample count after which identification is reported complete
    pub const COMPLETION_SAMPLES: u32 = 100;
}
