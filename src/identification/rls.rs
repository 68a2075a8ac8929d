//! Recursive least squares with exponential forgetting

use crate::config::identification::GAIN_EPSILON;

/// RLS estimator for `y = φᵀθ` with `N` parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rls<const N: usize> {
    theta: [f64; N],
    p: [[f64; N]; N],
    lambda: f64,
}

impl<const N: usize> Rls<N> {
    /// Start from `theta` with covariance `initial_covariance·I`
    pub fn new(theta: [f64; N], initial_covariance: f64, lambda: f64) -> Self {
        let mut p = [[0.0; N]; N];
        for (i, row) in p.iter_mut().enumerate() {
            row[i] = initial_covariance;
        }
        Self { theta, p, lambda }
    }

    /// `y - φᵀθ` at the current estimate
    pub fn residual(&self, phi: &[f64; N], y: f64) -> f64 {
        y - dot(phi, &self.theta)
    }

    /// One RLS step; returns the residual before the update
    ///
    /// ```text
    /// K = Pφ / (λ + φᵀPφ)        K = 0 if the denominator < ε
    /// θ ← θ + K·(y - φᵀθ)
    /// P ← (P - K·φᵀP) / λ
    /// ```
    ///
    /// P is re-symmetrised after every step.
    pub fn update(&mut self, phi: &[f64; N], y: f64) -> f64 {
        let p_phi = mat_vec(&self.p, phi);
        let denominator = self.lambda + dot(phi, &p_phi);

        let mut gain = [0.0; N];
        if denominator.abs() >= GAIN_EPSILON {
            for (k, pp) in gain.iter_mut().zip(p_phi) {
                *k = pp / denominator;
            }
        }

        let error = self.residual(phi, y);
        for (t, k) in self.theta.iter_mut().zip(gain) {
            *t += k * error;
        }

        // φᵀP, row vector
        let mut phi_p = [0.0; N];
        for (j, v) in phi_p.iter_mut().enumerate() {
            *v = (0..N).map(|i| phi[i] * self.p[i][j]).sum();
        }
        for i in 0..N {
            for j in 0..N {
                self.p[i][j] = (self.p[i][j] - gain[i] * phi_p[j]) / self.lambda;
            }
        }
        for i in 0..N {
            for j in (i + 1)..N {
                let mean = 0.5 * (self.p[i][j] + self.p[j][i]);
                self.p[i][j] = mean;
                self.p[j][i] = mean;
            }
        }

        error
    }

    pub fn theta(&self) -> &[f64; N] {
        &self.theta
    }

    /// Overwrite the estimate; covariance is kept
    pub fn set_theta(&mut self, theta: [f64; N]) {
        self.theta = theta;
    }

    pub fn covariance(&self) -> &[[f64; N]; N] {
        &self.p
    }

    pub fn forgetting_factor(&self) -> f64 {
        self.lambda
    }
}

fn dot<const N: usize>(a: &[f64; N], b: &[f64; N]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn mat_vec<const N: usize>(m: &[[f64; N]; N], v: &[f64; N]) -> [f64; N] {
    let mut out = [0.0; N];
    for (o, row) in out.iter_mut().zip(m) {
        *o = dot(row, v);
    }
    out
}
