//! Latency measurement
//!
//! [`Timer`] records one duration per timed call; [`LatencyStats`] summarizes
//! them. Only the inference call itself is timed, input reshaping and
//! quantization happen outside `start`/`stop`.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::backend::backend_name;

/// Latency statistics over a benchmark run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Number of timed calls
    pub count: usize,
    /// Sum of all timed calls in seconds
    pub total_s: f64,
    /// Mean latency in milliseconds
    pub mean_ms: f64,
    /// Standard deviation in milliseconds
    pub std_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    /// Median (50th percentile)
    pub p50_ms: f64,
    /// 95th percentile
    pub p95_ms: f64,
    /// 99th percentile
    pub p99_ms: f64,
}

impl LatencyStats {
    /// Calculate statistics from a list of durations
    pub fn from_durations(durations: &[Duration]) -> Self {
        if durations.is_empty() {
            return Self::default();
        }

        let total_s: f64 = durations.iter().map(Duration::as_secs_f64).sum();
        let mut times_ms: Vec<f64> = durations.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
        times_ms.sort_by(f64::total_cmp);

        let n = times_ms.len();
        let mean = total_s * 1000.0 / n as f64;
        let variance: f64 = times_ms.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n as f64;

        Self {
            count: n,
            total_s,
            mean_ms: mean,
            std_ms: variance.sqrt(),
            min_ms: times_ms[0],
            max_ms: times_ms[n - 1],
            p50_ms: percentile(&times_ms, 50.0),
            p95_ms: percentile(&times_ms, 95.0),
            p99_ms: percentile(&times_ms, 99.0),
        }
    }

    /// Mean latency in seconds: total elapsed over call count
    pub fn mean_s(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_s / self.count as f64
        }
    }

    /// Calls per second at the mean latency
    pub fn throughput(&self) -> f64 {
        let mean = self.mean_s();
        if mean > 0.0 {
            1.0 / mean
        } else {
            0.0
        }
    }
}

/// Calculate percentile from sorted data
fn percentile(sorted_data: &[f64], p: f64) -> f64 {
    if sorted_data.is_empty() {
        return 0.0;
    }

    let idx = (p / 100.0 * (sorted_data.len() - 1) as f64).round() as usize;
    sorted_data[idx.min(sorted_data.len() - 1)]
}

/// Where a benchmark ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Burn backend used for the baseline
    pub backend: String,
    pub os: String,
    pub arch: String,
    /// Available parallelism reported by the OS
    pub cpus: usize,
}

impl DeviceInfo {
    pub fn detect() -> Self {
        Self {
            backend: backend_name().to_string(),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            cpus: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
        }
    }
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self::detect()
    }
}

impl std::fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} on {}/{} ({} cpus)", self.backend, self.os, self.arch, self.cpus)
    }
}

/// Timer utility for benchmarking
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    times: Vec<Duration>,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            times: Vec::new(),
        }
    }

    /// Timer with room for `n` measurements
    pub fn with_capacity(n: usize) -> Self {
        Self {
            start: Instant::now(),
            times: Vec::with_capacity(n),
        }
    }

    pub fn start(&mut self) {
        self.start = Instant::now();
    }

    /// Stop timing and record the duration
    pub fn stop(&mut self) -> Duration {
        let elapsed = self.start.elapsed();
        self.times.push(elapsed);
        elapsed
    }

    /// Time one call of `f`, recording its duration
    pub fn time<T>(&mut self, f: impl FnOnce() -> T) -> T {
        self.start();
        let out = f();
        self.stop();
        out
    }

    pub fn times(&self) -> &[Duration] {
        &self.times
    }

    pub fn total(&self) -> Duration {
        self.times.iter().sum()
    }

    pub fn clear(&mut self) {
        self.times.clear();
    }

    pub fn stats(&self) -> LatencyStats {
        LatencyStats::from_durations(&self.times)
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_stats() {
        let durations: Vec<Duration> = vec![
            Duration::from_millis(10),
            Duration::from_millis(12),
            Duration::from_millis(11),
            Duration::from_millis(15),
            Duration::from_millis(9),
        ];

        let stats = LatencyStats::from_durations(&durations);

        assert_eq!(stats.count, 5);
        assert!((stats.mean_ms - 11.4).abs() < 0.1);
        assert!((stats.mean_s() - 0.0114).abs() < 1e-6);
        assert_eq!(stats.min_ms, 9.0);
        assert_eq!(stats.max_ms, 15.0);
        assert_eq!(stats.p50_ms, 11.0);
    }

    #[test]
    fn test_empty_stats() {
        let stats = LatencyStats::from_durations(&[]);
        assert_eq!(stats.count, 0);
        assert_eq!(stats.mean_s(), 0.0);
        assert_eq!(stats.throughput(), 0.0);
    }

    #[test]
    fn test_timer() {
        let mut timer = Timer::new();

        for _ in 0..5 {
            timer.start();
            std::thread::sleep(Duration::from_millis(1));
            timer.stop();
        }
        let doubled = timer.time(|| 21 * 2);

        assert_eq!(doubled, 42);
        assert_eq!(timer.times().len(), 6);
        assert!(timer.total() >= Duration::from_millis(5));

        timer.clear();
        assert!(timer.times().is_empty());
    }
}
