//! Energy-scheduled gain adaptation for the three FOC loops

use serde::Serialize;

use crate::foc::FocGains;

/// Proportional/integral gain pair of one loop
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GainPair {
    pub kp: f64,
    pub ki: f64,
}

impl GainPair {
    fn scale(&mut self, factor: f64, min: f64, max: f64) {
        self.kp = (self.kp * factor).clamp(min, max);
        self.ki = (self.ki * factor).clamp(min, max);
    }
}

/// Scheduled gains for the d-current, q-current and speed loops
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AdaptiveGains {
    pub id: GainPair,
    pub iq: GainPair,
    pub speed: GainPair,
}

impl AdaptiveGains {
    pub fn from_foc_gains(gains: &FocGains, min: f64, max: f64) -> Self {
        let pair = |kp: f64, ki: f64| GainPair {
            kp: kp.clamp(min, max),
            ki: ki.clamp(min, max),
        };
        Self {
            id: pair(gains.id_kp, gains.id_ki),
            iq: pair(gains.iq_kp, gains.iq_ki),
            speed: pair(gains.speed_kp, gains.speed_ki),
        }
    }
}

/// Scheduler tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveConfig {
    pub adaptation_rate: f64,
    pub min_gain: f64,
    pub max_gain: f64,
    /// Energy thresholds (d-current, q-current, speed)
    pub energy_thresholds: [f64; 3],
    pub decay_interval: u32,
    pub decay_factor: f64,
}

/// Gain scheduler
///
/// Each call accumulates `e²·dt` per loop. A loop whose energy exceeds its
/// threshold has both gains scaled by `1 + rate`, otherwise by
/// `1 - rate/2`; the result is clamped to `[min_gain, max_gain]`. Every
/// `decay_interval` calls the energies are multiplied by `decay_factor`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveGainScheduler {
    config: AdaptiveConfig,
    initial: AdaptiveGains,
    gains: AdaptiveGains,
    energy: [f64; 3],
    calls: u32,
    dt: f64,
}

impl AdaptiveGainScheduler {
    pub fn new(config: AdaptiveConfig, initial: AdaptiveGains, dt: f64) -> Self {
        Self {
            config,
            initial,
            gains: initial,
            energy: [0.0; 3],
            calls: 0,
            dt,
        }
    }

    /// Accumulate one sample of loop errors and rescale the gains
    pub fn update(&mut self, id_error: f64, iq_error: f64, speed_error: f64) -> AdaptiveGains {
        let errors = [id_error, iq_error, speed_error];
        for (energy, error) in self.energy.iter_mut().zip(errors) {
            *energy += error * error * self.dt;
        }

        let AdaptiveConfig {
            adaptation_rate,
            min_gain,
            max_gain,
            energy_thresholds,
            ..
        } = self.config;
        let up = 1.0 + adaptation_rate;
        let down = 1.0 - adaptation_rate * 0.5;

        let pairs = [&mut self.gains.id, &mut self.gains.iq, &mut self.gains.speed];
        for ((pair, energy), threshold) in pairs.into_iter().zip(self.energy).zip(energy_thresholds) {
            let factor = if energy > threshold { up } else { down };
            pair.scale(factor, min_gain, max_gain);
        }

        self.calls = self.calls.wrapping_add(1);
        if self.config.decay_interval > 0 && self.calls % self.config.decay_interval == 0 {
            for energy in self.energy.iter_mut() {
                *energy *= self.config.decay_factor;
            }
            trace!(
                "adaptive: energies decayed to {} / {} / {}",
                self.energy[0],
                self.energy[1],
                self.energy[2]
            );
        }

        self.gains
    }

    pub fn gains(&self) -> AdaptiveGains {
        self.gains
    }

    /// Rescale loop gains by how far each scheduled gain has moved from its
    /// seed
    ///
    /// Seeds are clamped into `[min_gain, max_gain]`, so a designed gain
    /// outside that range keeps its magnitude and only follows the
    /// scheduler's relative adjustments.
    pub fn scale_gains(&self, base: &FocGains) -> FocGains {
        let ratio = |now: f64, seed: f64| now / seed;
        let (g, s) = (&self.gains, &self.initial);
        FocGains {
            id_kp: base.id_kp * ratio(g.id.kp, s.id.kp),
            id_ki: base.id_ki * ratio(g.id.ki, s.id.ki),
            iq_kp: base.iq_kp * ratio(g.iq.kp, s.iq.kp),
            iq_ki: base.iq_ki * ratio(g.iq.ki, s.iq.ki),
            speed_kp: base.speed_kp * ratio(g.speed.kp, s.speed.kp),
            speed_ki: base.speed_ki * ratio(g.speed.ki, s.speed.ki),
        }
    }

    /// Accumulated error energy (d-current, q-current, speed)
    pub fn energy(&self) -> [f64; 3] {
        self.energy
    }

    pub fn calls(&self) -> u32 {
        self.calls
    }

    /// Clear the energies and the call counter; gains restart from their
    /// initial values
    pub fn reset(&mut self) {
        self.energy = [0.0; 3];
        self.calls = 0;
        self.gains = self.initial;
    }

    pub fn reload(&mut self, initial: AdaptiveGains, dt: f64) {
        self.initial = initial;
        self.dt = dt;
        self.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::disturbance as dr;

    const DT: f64 = 1.0e-4;

    fn config() -> AdaptiveConfig {
        AdaptiveConfig {
            adaptation_rate: dr::DEFAULT_ADAPTATION_RATE,
            min_gain: dr::DEFAULT_MIN_GAIN,
            max_gain: dr::DEFAULT_MAX_GAIN,
            energy_thresholds: dr::DEFAULT_ENERGY_THRESHOLDS,
            decay_interval: dr::DEFAULT_DECAY_INTERVAL,
            decay_factor: dr::DEFAULT_DECAY_FACTOR,
        }
    }

    fn initial() -> AdaptiveGains {
        let pair = GainPair { kp: 1.0, ki: 2.0 };
        AdaptiveGains {
            id: pair,
            iq: pair,
            speed: pair,
        }
    }

    #[test]
    fn test_small_errors_scale_down() {
        let mut scheduler = AdaptiveGainScheduler::new(config(), initial(), DT);
        let gains = scheduler.update(0.0, 0.0, 0.0);
        assert!((gains.id.kp - 0.995).abs() < 1e-12);
        assert!((gains.speed.ki - 1.99).abs() < 1e-12);
    }

    #[test]
    fn test_large_error_scales_its_loop_up() {
        let mut scheduler = AdaptiveGainScheduler::new(config(), initial(), DT);
        // 100² · 1e-4 = 1.0 > 0.1 on the q-current loop only
        let gains = scheduler.update(0.0, 100.0, 0.0);
        assert!((gains.iq.kp - 1.01).abs() < 1e-12);
        assert!((gains.id.kp - 0.995).abs() < 1e-12);
        assert!((gains.speed.kp - 0.995).abs() < 1e-12);
    }

    #[test]
    fn test_gains_stay_clamped() {
        let mut scheduler = AdaptiveGainScheduler::new(config(), initial(), DT);
        for _ in 0..5000 {
            scheduler.update(1.0e3, 1.0e3, 1.0e3);
        }
        let gains = scheduler.gains();
        assert_eq!(gains.id.kp, dr::DEFAULT_MAX_GAIN);
        assert_eq!(gains.speed.ki, dr::DEFAULT_MAX_GAIN);

        for _ in 0..30_000 {
            scheduler.update(0.0, 0.0, 0.0);
        }
        let gains = scheduler.gains();
        assert_eq!(gains.id.kp, dr::DEFAULT_MIN_GAIN);
        assert_eq!(gains.iq.ki, dr::DEFAULT_MIN_GAIN);
    }

    #[test]
    fn test_energy_decays_on_call_count() {
        let mut scheduler = AdaptiveGainScheduler::new(config(), initial(), DT);
        scheduler.update(10.0, 0.0, 0.0);
        for _ in 1..99 {
            scheduler.update(0.0, 0.0, 0.0);
        }
        let before = scheduler.energy()[0];
        assert!((before - 0.01).abs() < 1e-12);

        scheduler.update(0.0, 0.0, 0.0);
        assert_eq!(scheduler.calls(), 100);
        assert!((scheduler.energy()[0] - before * 0.9).abs() < 1e-15);
    }

    #[test]
    fn test_reset_restores_initial_gains() {
        let mut scheduler = AdaptiveGainScheduler::new(config(), initial(), DT);
        scheduler.update(5.0, 5.0, 5.0);
        scheduler.reset();
        assert_eq!(scheduler.gains(), initial());
        assert_eq!(scheduler.energy(), [0.0; 3]);
        assert_eq!(scheduler.calls(), 0);
    }

    #[test]
    fn test_scale_gains_keeps_designed_magnitude() {
        let foc = FocGains {
            id_kp: 0.8,
            id_ki: 500.0,
            iq_kp: 1.2,
            iq_ki: 500.0,
            speed_kp: 0.5,
            speed_ki: 5.0,
        };
        let seed = AdaptiveGains::from_foc_gains(&foc, 0.1, 10.0);
        let mut scheduler = AdaptiveGainScheduler::new(config(), seed, DT);
        assert_eq!(scheduler.scale_gains(&foc), foc);

        scheduler.update(0.0, 100.0, 0.0);
        let scaled = scheduler.scale_gains(&foc);
        assert!((scaled.id_ki - 500.0 * 0.995).abs() < 1e-9);
        assert!((scaled.iq_kp - 1.2 * 1.01).abs() < 1e-12);
        // Seed already at max_gain: the clamp holds the designed value
        assert_eq!(scaled.iq_ki, 500.0);
        assert!((scaled.speed_kp - 0.5 * 0.995).abs() < 1e-12);
    }

    #[test]
    fn test_seeded_from_foc_gains() {
        let foc = FocGains {
            id_kp: 0.8,
            id_ki: 500.0,
            iq_kp: 1.2,
            iq_ki: 500.0,
            speed_kp: 0.5,
            speed_ki: 5.0,
        };
        let gains = AdaptiveGains::from_foc_gains(&foc, 0.1, 10.0);
        assert_eq!(gains.id, GainPair { kp: 0.8, ki: 10.0 });
        assert_eq!(gains.speed, GainPair { kp: 0.5, ki: 5.0 });
    }
}
