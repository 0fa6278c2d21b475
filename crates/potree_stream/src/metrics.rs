//! Engine-agnostic streaming statistics.
//!
//! Feature-gated and runtime-toggled to ensure zero overhead when disabled.
//!
//! # Usage
//!
//! ```ignore
//! use potree_stream::metrics::COLLECT_METRICS;
//!
//! // Compile with --features metrics
//! // Runtime toggle:
//! COLLECT_METRICS.store(false, Ordering::Relaxed);
//!
//! // The scheduler records into its own instance:
//! let metrics = potree.metrics();
//! println!("{:.1} us/frame", metrics.avg_frame_timing_us());
//! ```

use std::collections::VecDeque;
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;
use std::sync::atomic::AtomicBool;

/// Runtime toggle for metrics collection.
/// Set to false to disable metrics gathering at runtime.
pub static COLLECT_METRICS: AtomicBool = AtomicBool::new(true);

/// Check if metrics collection is enabled (both compile-time and runtime).
#[inline]
pub fn is_enabled() -> bool {
    #[cfg(feature = "metrics")]
    {
        COLLECT_METRICS.load(Ordering::Relaxed)
    }
    #[cfg(not(feature = "metrics"))]
    {
        false
    }
}

/// Rolling window for storing recent values (e.g., timing history).
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
    buffer: VecDeque<T>,
    capacity: usize,
}

impl<T> RollingWindow<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a new value, evicting the oldest if at capacity.
    pub fn push(&mut self, value: T) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Iterate over values (oldest to newest).
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buffer.iter()
    }

    pub fn last(&self) -> Option<&T> {
        self.buffer.back()
    }
}

impl<T: Copy + Default + std::ops::Add<Output = T>> RollingWindow<T> {
    pub fn sum(&self) -> T {
        self.buffer.iter().copied().fold(T::default(), |acc, x| acc + x)
    }
}

impl RollingWindow<u64> {
    pub fn average(&self) -> f64 {
        if self.buffer.is_empty() {
            0.0
        } else {
            self.sum() as f64 / self.buffer.len() as f64
        }
    }

    pub fn min_max(&self) -> Option<(u64, u64)> {
        let min = *self.buffer.iter().min()?;
        let max = *self.buffer.iter().max()?;
        Some((min, max))
    }
}

impl Default for RollingWindow<u64> {
    fn default() -> Self {
        Self::new(128) // ~2 seconds at 60fps
    }
}

/// Streaming statistics updated once per frame.
#[derive(Debug, Clone, Default)]
pub struct StreamingMetrics {
    // Working set
    /// Nodes handed to the renderer last frame.
    pub rendered_nodes: usize,
    /// Points handed to the renderer last frame.
    pub rendered_points: u64,
    /// Points resident in the cache after eviction.
    pub resident_points: u64,
    /// Loads in flight at the end of the last frame.
    pub loads_in_flight: usize,

    // Timing
    /// Rolling window of frame update times in microseconds.
    pub frame_timings: RollingWindow<u64>,
    /// Rolling window of dispatch-to-apply load latencies in microseconds.
    pub load_timings: RollingWindow<u64>,
    pub last_frame_us: u64,

    // Cumulative
    pub total_loads: u64,
    pub total_failed_loads: u64,
    pub total_evictions: u64,
}

impl StreamingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset per-frame values and timing windows.
    pub fn reset(&mut self) {
        self.rendered_nodes = 0;
        self.rendered_points = 0;
        self.resident_points = 0;
        self.loads_in_flight = 0;
        self.frame_timings.clear();
        self.load_timings.clear();
        self.last_frame_us = 0;
        // Totals are cumulative
    }

    pub fn record_load(&mut self, latency_us: u64) {
        if is_enabled() {
            self.load_timings.push(latency_us);
            self.total_loads += 1;
        }
    }

    pub fn record_failed_load(&mut self) {
        if is_enabled() {
            self.total_failed_loads += 1;
        }
    }

    /// Record the outcome of one frame update.
    pub fn record_frame(
        &mut self,
        timing_us: u64,
        rendered_nodes: usize,
        rendered_points: u64,
        resident_points: u64,
        loads_in_flight: usize,
        evictions: usize,
    ) {
        if !is_enabled() {
            return;
        }
        self.frame_timings.push(timing_us);
        self.last_frame_us = timing_us;
        self.rendered_nodes = rendered_nodes;
        self.rendered_points = rendered_points;
        self.resident_points = resident_points;
        self.loads_in_flight = loads_in_flight;
        self.total_evictions += evictions as u64;
    }

    pub fn avg_frame_timing_us(&self) -> f64 {
        self.frame_timings.average()
    }

    pub fn avg_load_timing_us(&self) -> f64 {
        self.load_timings.average()
    }
}

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;

    #[test]
    fn test_rolling_window() {
        let mut window = RollingWindow::new(3);
        assert!(window.is_empty());

        window.push(10u64);
        window.push(20);
        window.push(30);
        assert_eq!(window.len(), 3);
        assert_eq!(window.sum(), 60);
        assert_eq!(window.average(), 20.0);

        // Push one more, oldest should be evicted
        window.push(40);
        assert_eq!(window.len(), 3);
        assert_eq!(window.average(), 30.0);
        assert_eq!(window.min_max(), Some((20, 40)));
    }

    #[test]
    fn test_frame_recording() {
        let mut metrics = StreamingMetrics::new();
        metrics.record_frame(1000, 4, 400, 900, 2, 3);
        metrics.record_frame(3000, 5, 500, 800, 0, 1);

        assert_eq!(metrics.frame_timings.len(), 2);
        assert_eq!(metrics.avg_frame_timing_us(), 2000.0);
        assert_eq!(metrics.last_frame_us, 3000);
        assert_eq!(metrics.rendered_points, 500);
        assert_eq!(metrics.total_evictions, 4);

        metrics.reset();
        assert_eq!(metrics.rendered_points, 0);
        assert_eq!(metrics.total_evictions, 4);
    }

    #[test]
    fn test_load_recording() {
        let mut metrics = StreamingMetrics::new();
        metrics.record_load(100);
        metrics.record_load(300);
        metrics.record_failed_load();
        assert_eq!(metrics.total_loads, 2);
        assert_eq!(metrics.total_failed_loads, 1);
        assert_eq!(metrics.avg_load_timing_us(), 200.0);
    }
}
