//! Queue engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Queue engine configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// How often the worker loop checks the admission queue when idle
    /// (default: `250ms`).
    pub poll_interval: Duration,
    /// Bounded wait between cancellation re-checks while draining a
    /// running job's events (default: `100ms`).
    pub drain_interval: Duration,
    /// Pause after a contained worker-loop failure before the next tick
    /// (default: `500ms`).
    pub failure_pause: Duration,
    /// Path of the JSON queue snapshot (default: `queue.json`).
    pub snapshot_path: PathBuf,
    /// Lifecycle event bus capacity (default: `256`).
    pub event_capacity: usize,
}

impl QueueConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default      |
    /// |---------------------------|--------------|
    /// | `QUEUE_POLL_INTERVAL_MS`  | `250`        |
    /// | `QUEUE_DRAIN_INTERVAL_MS` | `100`        |
    /// | `QUEUE_FAILURE_PAUSE_MS`  | `500`        |
    /// | `QUEUE_SNAPSHOT_PATH`     | `queue.json` |
    /// | `QUEUE_EVENT_CAPACITY`    | `256`        |
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let poll_interval: u64 = std::env::var("QUEUE_POLL_INTERVAL_MS")
            .unwrap_or_else(|_| defaults.poll_interval.as_millis().to_string())
            .parse()
            .expect("QUEUE_POLL_INTERVAL_MS must be a valid u64");

        let drain_interval: u64 = std::env::var("QUEUE_DRAIN_INTERVAL_MS")
            .unwrap_or_else(|_| defaults.drain_interval.as_millis().to_string())
            .parse()
            .expect("QUEUE_DRAIN_INTERVAL_MS must be a valid u64");

        let failure_pause: u64 = std::env::var("QUEUE_FAILURE_PAUSE_MS")
            .unwrap_or_else(|_| defaults.failure_pause.as_millis().to_string())
            .parse()
            .expect("QUEUE_FAILURE_PAUSE_MS must be a valid u64");

        let snapshot_path: PathBuf = std::env::var("QUEUE_SNAPSHOT_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.snapshot_path);

        let event_capacity: usize = std::env::var("QUEUE_EVENT_CAPACITY")
            .unwrap_or_else(|_| defaults.event_capacity.to_string())
            .parse()
            .expect("QUEUE_EVENT_CAPACITY must be a valid usize");

        Self {
            poll_interval: Duration::from_millis(poll_interval),
            drain_interval: Duration::from_millis(drain_interval),
            failure_pause: Duration::from_millis(failure_pause),
            snapshot_path,
            event_capacity,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            drain_interval: Duration::from_millis(100),
            failure_pause: Duration::from_millis(500),
            snapshot_path: PathBuf::from("queue.json"),
            event_capacity: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_development_friendly() {
        let config = QueueConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.drain_interval, Duration::from_millis(100));
        assert_eq!(config.failure_pause, Duration::from_millis(500));
        assert_eq!(config.snapshot_path, PathBuf::from("queue.json"));
        assert_eq!(config.event_capacity, 256);
    }
}
