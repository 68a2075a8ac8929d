//! Sinusoidal test signals for identification runs

use core::f64::consts::TAU;

use libm::{cos, round, sin};

use crate::error::{ensure_positive, Error};

/// Which quantity the signal perturbs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ExcitationKind {
    Current,
    Voltage,
    Speed,
}

/// One sample of a test signal
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Excitation {
    /// d/q current perturbation [A], sine on d, cosine on q
    Current { id: f64, iq: f64 },
    /// d/q voltage perturbation [V], sine on d, cosine on q
    Voltage { vd: f64, vq: f64 },
    /// Speed-reference perturbation [rad/s]
    Speed(f64),
}

/// Finite sinusoidal sequence sampled at the control rate
#[derive(Debug, Clone, PartialEq)]
pub struct ExcitationSignal {
    kind: ExcitationKind,
    amplitude: f64,
    frequency: f64,
    dt: f64,
    index: u64,
    samples: u64,
}

impl ExcitationSignal {
    /// One second of signal at `frequency` Hz
    pub fn new(kind: ExcitationKind, amplitude: f64, frequency: f64, dt: f64) -> Result<Self, Error> {
        ensure_positive(frequency, "excitation_frequency")?;
        ensure_positive(dt, "sample_time")?;
        if !amplitude.is_finite() {
            return Err(crate::error::ConfigError::NonFinite {
                field: "excitation_amplitude",
            }
            .into());
        }
        Ok(Self {
            kind,
            amplitude,
            frequency,
            dt,
            index: 0,
            samples: round(1.0 / dt) as u64,
        })
    }

    /// Change the length of the sequence to `seconds`
    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.samples = if seconds > 0.0 { round(seconds / self.dt) as u64 } else { 0 };
        self
    }

    pub fn kind(&self) -> ExcitationKind {
        self.kind
    }

    /// Sample at index `n`, independent of iteration state
    pub fn sample(&self, n: u64) -> Excitation {
        let phase = TAU * self.frequency * n as f64 * self.dt;
        let (s, c) = (self.amplitude * sin(phase), self.amplitude * cos(phase));
        match self.kind {
            ExcitationKind::Current => Excitation::Current { id: s, iq: c },
            ExcitationKind::Voltage => Excitation::Voltage { vd: s, vq: c },
            ExcitationKind::Speed => Excitation::Speed(s),
        }
    }

    pub fn rewind(&mut self) {
        self.index = 0;
    }
}

impl Iterator for ExcitationSignal {
    type Item = Excitation;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.samples {
            return None;
        }
        let sample = self.sample(self.index);
        self.index += 1;
        Some(sample)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.samples.saturating_sub(self.index) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ExcitationSignal {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_second_by_default() {
        let signal = ExcitationSignal::new(ExcitationKind::Speed, 1.0, 10.0, 1.0e-4).unwrap();
        assert_eq!(signal.len(), 10_000);
    }

    #[test]
    fn test_current_signal_quadrature() {
        let mut signal = ExcitationSignal::new(ExcitationKind::Current, 2.0, 10.0, 1.0e-4).unwrap();
        assert_eq!(signal.next(), Some(Excitation::Current { id: 0.0, iq: 2.0 }));
        // Quarter period of 10 Hz = 250 samples
        match signal.sample(250) {
            Excitation::Current { id, iq } => {
                assert!((id - 2.0).abs() < 1e-9);
                assert!(iq.abs() < 1e-9);
            }
            other => panic!("unexpected sample {:?}", other),
        }
    }

    #[test]
    fn test_sequence_ends() {
        let signal = ExcitationSignal::new(ExcitationKind::Voltage, 1.0, 5.0, 1.0e-3)
            .unwrap()
            .with_duration(0.01);
        assert_eq!(signal.count(), 10);
    }

    #[test]
    fn test_invalid_frequency() {
        assert!(ExcitationSignal::new(ExcitationKind::Speed, 1.0, 0.0, 1.0e-4).is_err());
    }
}
