//! Configuration for the extractor, scheduler, and engine.
//!
//! Every tunable lives here with an explicit, documented default — nothing
//! is hardcoded at a use site. Configuration is supplied at construction
//! and owned by the component it configures.

use std::time::Duration;

/// Configuration for the [`StreamExtractor`](crate::StreamExtractor).
#[derive(Debug, Clone, Copy)]
pub struct ExtractorConfig {
    /// Maximum parse attempts per `feed` call.
    ///
    /// Bounds the work done in a single feed when the buffer contains many
    /// malformed `{` candidates. Remaining candidates are revisited on the
    /// next feed. Default: 16.
    pub max_attempts_per_feed: u32,

    /// Maximum total parse attempts per turn.
    ///
    /// Once exceeded, the extractor stops attempting extraction for the
    /// remainder of the turn and reports the condition through
    /// [`is_exhausted`](crate::StreamExtractor::is_exhausted) — a
    /// diagnostic, not a failure. Bounds pathological streams of endless
    /// near-JSON noise. Default: 256.
    pub max_parse_attempts: u32,

    /// Whether a payload without a `depends_on` field depends on every
    /// call previously extracted this turn.
    ///
    /// This matches sequential agent semantics: each extracted call runs
    /// after the ones the model emitted before it. A payload with an
    /// explicit `"depends_on": []` always opts out. Default: `true`.
    pub implicit_dependencies: bool,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_feed: 16,
            max_parse_attempts: 256,
            implicit_dependencies: true,
        }
    }
}

/// Configuration for the [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// Maximum number of tool executions simultaneously in flight.
    ///
    /// Values below 1 are clamped to 1. Default: 4.
    pub max_concurrency: usize,

    /// How long a cached result stays valid.
    ///
    /// Within the TTL, an identical call (same tool name and parameters,
    /// compared by canonical key) succeeds from cache without invoking the
    /// tool. Default: 15 minutes.
    pub cache_ttl: Duration,

    /// Maximum retries per call after a transient failure.
    ///
    /// A call makes at most `max_retries + 1` attempts. Permanent failures
    /// and cancellation are never retried. Default: 2.
    pub max_retries: u32,

    /// Execution deadline per invocation attempt.
    ///
    /// Elapsing maps to [`ToolError::Timeout`](crate::ToolError::Timeout),
    /// which is transient for retry purposes. `None` disables the
    /// deadline. Default: 60 seconds.
    pub tool_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            cache_ttl: Duration::from_secs(15 * 60),
            max_retries: 2,
            tool_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Configuration for a [`ToolEngine`](crate::ToolEngine): one extractor,
/// one scheduler, and the turn bound carried for the conversation driver.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Extractor tunables.
    pub extractor: ExtractorConfig,

    /// Scheduler tunables.
    pub scheduler: SchedulerConfig,

    /// Maximum conversation turns.
    ///
    /// The engine is turn-scoped and does not enforce this itself; the
    /// bound belongs to the conversation driver that owns the turn loop,
    /// and is carried here so it has one configured home. Default: 10.
    pub max_turns: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            extractor: ExtractorConfig::default(),
            scheduler: SchedulerConfig::default(),
            max_turns: 10,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extractor_defaults() {
        let config = ExtractorConfig::default();
        assert_eq!(config.max_attempts_per_feed, 16);
        assert_eq!(config.max_parse_attempts, 256);
        assert!(config.implicit_dependencies);
    }

    #[test]
    fn test_scheduler_defaults() {
        let config = SchedulerConfig::default();
        assert_eq!(config.max_concurrency, 4);
        assert_eq!(config.cache_ttl, Duration::from_secs(900));
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.tool_timeout, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_engine_default_turn_bound() {
        assert_eq!(EngineConfig::default().max_turns, 10);
    }
}
