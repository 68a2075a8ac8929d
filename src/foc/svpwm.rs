// Space Vector PWM (SVPWM) generation
//
// Sector-based synthesis: the reference vector's angle selects one of six
// 60° sectors, the two adjacent active vectors get on-times t1/t2, and the
// remaining time t0 is split evenly between the two zero vectors
// (center-aligned PWM).

use core::f64::consts::{FRAC_PI_3, TAU};

use libm::{atan2, floor};

use super::transforms::{inverse_clarke, normalize_angle};
use crate::config::motor::SQRT3;

/// Per-phase duty cycles, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default, serde::Serialize)]
pub struct PhaseDuty {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

/// Result of one modulation step
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SvmOutput {
    pub duty: PhaseDuty,
    /// Sector 1..=6, counter-clockwise from the α axis
    pub sector: u8,
    /// Normalized on-time of the first active vector
    pub t1: f64,
    /// Normalized on-time of the second active vector
    pub t2: f64,
}

/// Inverter modulation strategy used by the FOC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Modulation {
    /// Sector-based space-vector modulation
    #[default]
    SpaceVector,
    /// Per-phase sine-triangle modulation, linear up to Vdc/2
    Sinusoidal,
}

impl Modulation {
    /// Duty cycles and sector for an αβ voltage command
    ///
    /// The sinusoidal strategy reports the sector of the voltage vector
    /// for diagnostics only.
    pub fn modulate(self, v_alpha: f64, v_beta: f64, v_dc: f64) -> (PhaseDuty, u8) {
        match self {
            Modulation::SpaceVector => {
                let svm = calculate_svpwm(v_alpha, v_beta, v_dc);
                (svm.duty, svm.sector)
            }
            Modulation::Sinusoidal => (
                calculate_sinusoidal_pwm(v_alpha, v_beta, v_dc),
                sector_from_angle(atan2(v_beta, v_alpha)),
            ),
        }
    }
}

/// Classify an angle into an SVM sector
///
/// `sector = ⌊angle / (π/3)⌋ + 1` on the normalized angle. Each boundary
/// kπ/3 belongs to the sector it opens; rounding right below 2π is folded
/// back into sector 6.
pub fn sector_from_angle(angle: f64) -> u8 {
    let normalized = normalize_angle(angle);
    let sector = floor(normalized / FRAC_PI_3) as u8 + 1;
    sector.min(6)
}

/// Calculate Space Vector PWM duty cycles
///
/// # Arguments
/// * `v_alpha` - Alpha-axis voltage command (volts)
/// * `v_beta` - Beta-axis voltage command (volts)
/// * `v_dc` - DC bus voltage (volts); must be > 0, callers validate it
///
/// # Algorithm
/// 1. Sector from atan2(v_beta, v_alpha)
/// 2. Normalized X/Y/Z projections of the reference onto the active vectors
/// 3. Sector-specific (t1, t2) pair; overmodulation scales both down
/// 4. t0 = (1 - t1 - t2) / 2 and the sector's switching pattern
pub fn calculate_svpwm(v_alpha: f64, v_beta: f64, v_dc: f64) -> SvmOutput {
    let mut angle = atan2(v_beta, v_alpha);
    if angle < 0.0 {
        angle += TAU;
    }
    let sector = sector_from_angle(angle);

    let x = SQRT3 * v_beta / v_dc;
    let y = (1.5 * v_alpha + 0.5 * SQRT3 * v_beta) / v_dc;
    let z = (-1.5 * v_alpha + 0.5 * SQRT3 * v_beta) / v_dc;

    let (mut t1, mut t2) = match sector {
        1 => (y - x, x),
        2 => (y, z),
        3 => (x, -y),
        4 => (z, -x),
        5 => (-y, -z),
        _ => (-x, y),
    };

    // Reference outside the hexagon: keep direction, drop the zero vectors
    let active = t1 + t2;
    if active > 1.0 {
        t1 /= active;
        t2 /= active;
    }

    let t0 = (1.0 - t1 - t2) / 2.0;

    let duty = match sector {
        1 => PhaseDuty {
            a: t1 + t2 + t0,
            b: t2 + t0,
            c: t0,
        },
        2 => PhaseDuty {
            a: t1 + t0,
            b: t1 + t2 + t0,
            c: t0,
        },
        3 => PhaseDuty {
            a: t0,
            b: t1 + t2 + t0,
            c: t2 + t0,
        },
        4 => PhaseDuty {
            a: t0,
            b: t1 + t0,
            c: t1 + t2 + t0,
        },
        5 => PhaseDuty {
            a: t2 + t0,
            b: t0,
            c: t1 + t2 + t0,
        },
        _ => PhaseDuty {
            a: t1 + t2 + t0,
            b: t0,
            c: t1 + t0,
        },
    };

    SvmOutput {
        duty,
        sector,
        t1,
        t2,
    }
}

/// Calculate sinusoidal PWM duty cycles (simpler alternative to SVPWM)
///
/// Direct per-phase modulation around 50 %. About 15 % less voltage
/// utilization than SVPWM.
pub fn calculate_sinusoidal_pwm(v_alpha: f64, v_beta: f64, v_dc: f64) -> PhaseDuty {
    let (v_a, v_b, v_c) = inverse_clarke(v_alpha, v_beta);

    PhaseDuty {
        a: (v_a / v_dc + 0.5).clamp(0.0, 1.0),
        b: (v_b / v_dc + 0.5).clamp(0.0, 1.0),
        c: (v_c / v_dc + 0.5).clamp(0.0, 1.0),
    }
}
