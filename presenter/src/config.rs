use serde::Deserialize;
use std::time::Duration;

/// Tunables for the presentation pipeline.
///
/// The defaults match the values the pipeline was designed around; they
/// are exposed so embedders can trade memory for scheduling slack.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PresenterOptions {
    /// Number of presentable frame buffers allocated per negotiated
    /// format. Three is enough to keep one frame on screen, one queued,
    /// and one being filled by the source.
    pub buffer_count: usize,

    /// How long to wait for the scheduler worker to signal readiness
    /// during startup.
    pub startup_timeout: Duration,

    /// How long to wait for the scheduler worker to acknowledge a flush.
    /// A timeout is logged and treated as best-effort, not fatal.
    pub flush_timeout: Duration,

    /// Minimum interval between periodic statistics log lines.
    pub stats_interval: Duration,
}

impl Default for PresenterOptions {
    fn default() -> Self {
        Self {
            buffer_count: 3,
            startup_timeout: Duration::from_secs(5),
            flush_timeout: Duration::from_secs(5),
            stats_interval: Duration::from_secs(3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = PresenterOptions::default();
        assert_eq!(opts.buffer_count, 3);
        assert_eq!(opts.startup_timeout, Duration::from_secs(5));
        assert_eq!(opts.flush_timeout, Duration::from_secs(5));
    }
}
