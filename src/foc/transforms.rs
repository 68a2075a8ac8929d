// Coordinate transformations for FOC (Field Oriented Control)
// Clarke / Park transforms, their inverses, and circular vector limiting

use core::f64::consts::TAU;

use libm::{fmod, sqrt};
#[cfg(not(feature = "fast-trig"))]
use libm::{cos, sin};

use crate::config::motor::SQRT3;

/// sin/cos pair used by the Park transforms
///
/// With the `fast-trig` feature the pair comes from `idsp::cossin()`
/// (fixed-point phase, no libm call); otherwise from libm.
#[inline]
pub fn cos_sin(theta: f64) -> (f64, f64) {
    #[cfg(feature = "fast-trig")]
    {
        cos_sin_idsp(theta)
    }
    #[cfg(not(feature = "fast-trig"))]
    {
        (cos(theta), sin(theta))
    }
}

/// idsp-based sin/cos
///
/// idsp represents -π..π as the full i32 range.
#[cfg(feature = "fast-trig")]
#[inline]
fn cos_sin_idsp(theta: f64) -> (f64, f64) {
    use core::f64::consts::PI;

    let wrapped = normalize_angle(theta);
    let signed = if wrapped >= PI { wrapped - TAU } else { wrapped };

    const SCALE: f64 = 2_147_483_648.0 / PI; // 2^31 / π
    let phase = (signed * SCALE) as i32;

    let (cos_i32, sin_i32) = idsp::cossin(phase);

    const I32_TO_F64: f64 = 1.0 / 2_147_483_648.0; // 1 / 2^31
    (cos_i32 as f64 * I32_TO_F64, sin_i32 as f64 * I32_TO_F64)
}

/// Clarke transformation (abc → αβ), amplitude invariant
///
/// Uses phases a and b only; c is implied by a + b + c = 0.
pub fn clarke(i_a: f64, i_b: f64, _i_c: f64) -> (f64, f64) {
    let i_alpha = i_a;
    let i_beta = (i_a + 2.0 * i_b) / SQRT3;
    (i_alpha, i_beta)
}

/// Inverse Clarke transformation (αβ → abc)
pub fn inverse_clarke(v_alpha: f64, v_beta: f64) -> (f64, f64, f64) {
    const SQRT3_DIV_2: f64 = 0.866_025_403_784_438_6;
    const ONE_DIV_2: f64 = 0.5;

    let v_a = v_alpha;
    let v_b = -ONE_DIV_2 * v_alpha + SQRT3_DIV_2 * v_beta;
    let v_c = -ONE_DIV_2 * v_alpha - SQRT3_DIV_2 * v_beta;

    (v_a, v_b, v_c)
}

/// Park transformation (αβ → dq)
///
/// # Arguments
/// * `alpha`, `beta` - Stationary-frame components
/// * `theta` - Electrical angle in radians
pub fn park(alpha: f64, beta: f64, theta: f64) -> (f64, f64) {
    let (cos_theta, sin_theta) = cos_sin(theta);
    let d = alpha * cos_theta + beta * sin_theta;
    let q = -alpha * sin_theta + beta * cos_theta;
    (d, q)
}

/// Inverse Park transformation (dq → αβ)
///
/// # Arguments
/// * `vd` - d-axis component (aligned with rotor flux)
/// * `vq` - q-axis component (torque producing)
/// * `theta` - Electrical angle in radians
pub fn inverse_park(vd: f64, vq: f64, theta: f64) -> (f64, f64) {
    let (cos_theta, sin_theta) = cos_sin(theta);
    let v_alpha = vd * cos_theta - vq * sin_theta;
    let v_beta = vd * sin_theta + vq * cos_theta;
    (v_alpha, v_beta)
}

/// Limit a two-axis vector to a maximum magnitude
///
/// Circular limit: both components are scaled by the same factor, so the
/// direction is preserved. Vectors inside the circle pass unchanged.
///
/// # Returns
/// Tuple of (x_limited, y_limited)
pub fn limit_vector(x: f64, y: f64, max_magnitude: f64) -> (f64, f64) {
    let magnitude = sqrt(x * x + y * y);

    if magnitude > max_magnitude {
        let scale = max_magnitude / magnitude;
        (x * scale, y * scale)
    } else {
        (x, y)
    }
}

/// Limit the dq voltage vector to `max_voltage`
pub fn limit_voltage(vd: f64, vq: f64, max_voltage: f64) -> (f64, f64) {
    limit_vector(vd, vq, max_voltage)
}

/// Normalize angle to range [0, 2π)
pub fn normalize_angle(angle: f64) -> f64 {
    let mut normalized = fmod(angle, TAU);
    if normalized < 0.0 {
        normalized += TAU;
    }
    // -ε + 2π can round up to exactly 2π
    if normalized >= TAU {
        normalized = 0.0;
    }
    normalized
}
