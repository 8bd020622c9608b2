//! Timing utilities for per-frame streaming diagnostics

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

/// Number of samples kept per timer for rolling averages
pub const DEFAULT_TIMER_WINDOW: usize = 120;

/// Rolling statistics for one named timer
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimerStats {
    /// Average sample in seconds
    pub avg: f64,
    /// Smallest sample in the window
    pub min: f64,
    /// Largest sample in the window
    pub max: f64,
    /// Total samples ever recorded
    pub count: u64,
}

struct TimerTrack {
    started: Option<Instant>,
    window: VecDeque<f64>,
    total_count: u64,
}

impl TimerTrack {
    fn new() -> Self {
        Self {
            started: None,
            window: VecDeque::new(),
            total_count: 0,
        }
    }
}

/// A set of named timers, each keeping a rolling window of samples
///
/// Used by the orchestrator to report how long desired-set queries,
/// synchronous generation and mutation application take on average.
pub struct TimerSet {
    tracks: HashMap<&'static str, TimerTrack>,
    window_len: usize,
}

impl TimerSet {
    /// Create a timer set with the default window length
    pub fn new() -> Self {
        Self::with_window(DEFAULT_TIMER_WINDOW)
    }

    /// Create a timer set keeping `window_len` samples per timer
    pub fn with_window(window_len: usize) -> Self {
        Self {
            tracks: HashMap::new(),
            window_len: window_len.max(1),
        }
    }

    /// Start (or restart) the named timer
    pub fn start(&mut self, name: &'static str) {
        self.tracks
            .entry(name)
            .or_insert_with(TimerTrack::new)
            .started = Some(Instant::now());
    }

    /// Stop the named timer and record the elapsed time.
    ///
    /// Returns the elapsed duration, or `None` if the timer was never started.
    pub fn record(&mut self, name: &'static str) -> Option<Duration> {
        let track = self.tracks.get_mut(name)?;
        let elapsed = track.started.take()?.elapsed();
        Self::push_sample(track, elapsed.as_secs_f64(), self.window_len);
        Some(elapsed)
    }

    /// Record an externally measured sample
    pub fn record_sample(&mut self, name: &'static str, sample: Duration) {
        let window_len = self.window_len;
        let track = self.tracks.entry(name).or_insert_with(TimerTrack::new);
        Self::push_sample(track, sample.as_secs_f64(), window_len);
    }

    fn push_sample(track: &mut TimerTrack, secs: f64, window_len: usize) {
        track.window.push_back(secs);
        while track.window.len() > window_len {
            track.window.pop_front();
        }
        track.total_count += 1;
    }

    /// Average of the named timer in seconds (0 when no samples)
    pub fn average(&self, name: &str) -> f64 {
        self.stats(name).map(|s| s.avg).unwrap_or(0.0)
    }

    /// Rolling statistics of the named timer
    pub fn stats(&self, name: &str) -> Option<TimerStats> {
        let track = self.tracks.get(name)?;
        if track.window.is_empty() {
            return None;
        }

        let mut min = f64::INFINITY;
        let mut max = 0.0f64;
        let mut sum = 0.0;
        for &sample in &track.window {
            min = min.min(sample);
            max = max.max(sample);
            sum += sample;
        }

        Some(TimerStats {
            avg: sum / track.window.len() as f64,
            min,
            max,
            count: track.total_count,
        })
    }

    /// Names of all timers that have samples
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tracks
            .iter()
            .filter(|(_, t)| !t.window.is_empty())
            .map(|(name, _)| *name)
    }
}

impl Default for TimerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_start() {
        let mut timers = TimerSet::new();
        assert!(timers.record("missing").is_none());
        assert_eq!(timers.average("missing"), 0.0);
    }

    #[test]
    fn test_start_record() {
        let mut timers = TimerSet::new();
        timers.start("scan");
        std::thread::sleep(Duration::from_millis(2));
        let elapsed = timers.record("scan").unwrap();

        assert!(elapsed >= Duration::from_millis(2));
        let stats = timers.stats("scan").unwrap();
        assert_eq!(stats.count, 1);
        assert!(stats.avg > 0.0);
        assert!(timers.record("scan").is_none()); // already stopped
    }

    #[test]
    fn test_window_rolls() {
        let mut timers = TimerSet::with_window(2);
        timers.record_sample("t", Duration::from_secs(10));
        timers.record_sample("t", Duration::from_secs(1));
        timers.record_sample("t", Duration::from_secs(3));

        let stats = timers.stats("t").unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.avg - 2.0).abs() < 1e-9);
        assert!((stats.max - 3.0).abs() < 1e-9);
        assert!((stats.min - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_names() {
        let mut timers = TimerSet::new();
        timers.start("a");
        timers.record_sample("b", Duration::from_millis(1));
        let names: Vec<_> = timers.names().collect();
        assert_eq!(names, vec!["b"]);
    }
}
