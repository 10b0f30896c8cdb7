//! Throughput accounting for the capture loop.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Tracks all-time transfer totals plus a 1 s sliding-window rate.
#[derive(Debug)]
pub struct Counter {
    /// All-time total bytes transferred.
    pub total_bytes: usize,
    /// All-time number of completed buffers.
    pub n_buffers: usize,
    /// Time when this counter was created or last reset.
    pub t_begin: Instant,

    window: Duration,
    events: VecDeque<(Instant, usize)>,
    bytes_in_window: usize,
}

impl Default for Counter {
    fn default() -> Self {
        Counter {
            total_bytes: 0,
            n_buffers: 0,
            t_begin: Instant::now(),
            window: Duration::from_secs(1),
            events: VecDeque::new(),
            bytes_in_window: 0,
        }
    }
}

impl Counter {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn elapsed(&self) -> Duration {
        self.t_begin.elapsed()
    }

    /// Long-term average rate since the last reset, in MB/s.
    pub fn average_rate(&self) -> f64 {
        let secs = self.t_begin.elapsed().as_secs_f64().max(1e-6);
        (self.total_bytes as f64 / secs) / (1024.0 * 1024.0)
    }

    /// Sliding-window rate over the last second, in MB/s.
    pub fn rate(&self) -> f64 {
        let secs = self.window.as_secs_f64().max(1e-6);
        (self.bytes_in_window as f64 / secs) / (1024.0 * 1024.0)
    }

    /// Record one completed buffer of `size` bytes.
    pub fn increment(&mut self, size: usize) {
        let now = Instant::now();

        self.total_bytes += size;
        self.n_buffers += 1;

        self.events.push_back((now, size));
        self.bytes_in_window += size;

        // Evict entries older than the window.
        while let Some(&(ts, sz)) = self.events.front() {
            if now.duration_since(ts) > self.window {
                self.events.pop_front();
                self.bytes_in_window -= sz;
            } else {
                break;
            }
        }
    }

    pub fn reset(&mut self) {
        self.total_bytes = 0;
        self.n_buffers = 0;
        self.t_begin = Instant::now();
        self.events.clear();
        self.bytes_in_window = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_accumulate() {
        let mut counter = Counter::new();
        counter.increment(1024);
        counter.increment(2048);
        assert_eq!(counter.total_bytes, 3072);
        assert_eq!(counter.n_buffers, 2);
        assert!(counter.rate() > 0.0);
    }

    #[test]
    fn reset_clears_everything() {
        let mut counter = Counter::new();
        counter.increment(4096);
        counter.reset();
        assert_eq!(counter.total_bytes, 0);
        assert_eq!(counter.n_buffers, 0);
        assert_eq!(counter.rate(), 0.0);
    }
}
