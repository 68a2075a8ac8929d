//! Bounded history and performance figures

use libm::sqrt;
use serde::Serialize;

/// Fixed-capacity circular buffer, oldest sample evicted first
#[derive(Debug, Clone, PartialEq)]
pub struct RingBuffer<const N: usize> {
    data: [f64; N],
    head: usize,
    count: usize,
}

impl<const N: usize> Default for RingBuffer<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> RingBuffer<N> {
    pub const fn new() -> Self {
        Self {
            data: [0.0; N],
            head: 0,
            count: 0,
        }
    }

    pub fn push(&mut self, value: f64) {
        if N == 0 {
            return;
        }
        self.data[self.head] = value;
        self.head = (self.head + 1) % N;
        if self.count < N {
            self.count += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Samples in chronological order (oldest to newest)
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        let start = if self.count < N { 0 } else { self.head };
        (0..self.count).map(move |i| self.data[(start + i) % N])
    }

    pub fn latest(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let idx = if self.head == 0 { N - 1 } else { self.head - 1 };
        Some(self.data[idx])
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }
}

/// Disturbance-rejection performance figures
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub speed_error_rms: f64,
    /// (max - min) / (2·mean|T|)
    pub torque_ripple: f64,
    /// RMS speed error / max |disturbance|
    pub disturbance_rejection_ratio: f64,
}

/// Rolling windows of speed error, torque and disturbance estimate
#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceMonitor<const N: usize> {
    speed_error: RingBuffer<N>,
    torque: RingBuffer<N>,
    disturbance: RingBuffer<N>,
    min_samples: usize,
    metrics: PerformanceMetrics,
}

impl<const N: usize> PerformanceMonitor<N> {
    pub fn new(min_samples: usize) -> Self {
        Self {
            speed_error: RingBuffer::new(),
            torque: RingBuffer::new(),
            disturbance: RingBuffer::new(),
            min_samples,
            metrics: PerformanceMetrics::default(),
        }
    }

    /// Append one sample and refresh the metrics
    ///
    /// Nothing is computed until more than `min_samples` samples are held.
    /// Ripple and rejection ratio keep their previous value while their
    /// denominator is zero.
    pub fn record(&mut self, speed_error: f64, torque: f64, disturbance: f64) -> PerformanceMetrics {
        self.speed_error.push(speed_error);
        self.torque.push(torque);
        self.disturbance.push(disturbance);

        let n = self.speed_error.len();
        if n <= self.min_samples {
            return self.metrics;
        }
        let count = n as f64;

        let mean_square = self.speed_error.iter().map(|e| e * e).sum::<f64>() / count;
        self.metrics.speed_error_rms = sqrt(mean_square);

        let (mut t_min, mut t_max, mut t_abs) = (f64::INFINITY, f64::NEG_INFINITY, 0.0);
        for t in self.torque.iter() {
            t_min = t_min.min(t);
            t_max = t_max.max(t);
            t_abs += t.abs();
        }
        let mean_abs = t_abs / count;
        if mean_abs > 0.0 {
            self.metrics.torque_ripple = (t_max - t_min) / (2.0 * mean_abs);
        }

        let d_max = self.disturbance.iter().fold(0.0, |acc: f64, d| acc.max(d.abs()));
        if d_max > 0.0 {
            self.metrics.disturbance_rejection_ratio = self.metrics.speed_error_rms / d_max;
        }

        self.metrics
    }

    pub fn metrics(&self) -> PerformanceMetrics {
        self.metrics
    }

    pub fn len(&self) -> usize {
        self.speed_error.len()
    }

    pub fn is_empty(&self) -> bool {
        self.speed_error.is_empty()
    }

    pub fn clear(&mut self) {
        self.speed_error.clear();
        self.torque.clear();
        self.disturbance.clear();
        self.metrics = PerformanceMetrics::default();
    }
}
