//! Centralized configuration for Tideline.
//!
//! All tunable parameters of the simulator live here so that scheduler
//! budgets and progress granularity are not scattered through the code.

use std::time::Duration;

/// Central configuration for all Tideline components.
///
/// Supports environment variable overrides for runtime customization.
#[derive(Debug, Clone, Default)]
pub struct TidelineConfig {
    pub scheduler: SchedulerConfig,
    pub transport: TransportConfig,
}

/// Cooperative scheduler configuration.
///
/// Controls the deterministic seed and the number of turns a single drive
/// of the scheduler may execute before it gives up.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Seed for every pseudo-random choice the simulator makes
    pub seed: u64,
    /// Maximum turns executed by one drive of the scheduler
    pub max_turns: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            max_turns: 100_000,
        }
    }
}

/// Transport emulator configuration.
///
/// Controls simulated transfer granularity and the timeout applied to
/// transports that do not set their own.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Largest byte count a single progress event may advance by
    pub max_progress_chunk: u64,
    /// Timeout applied at send time when the transport has none (None = unlimited)
    pub default_timeout: Option<Duration>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_progress_chunk: 65536, // 64 KiB
            default_timeout: None,
        }
    }
}

impl TidelineConfig {
    /// Creates configuration with environment variable overrides.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(seed) = std::env::var("TIDELINE_SEED") {
            if let Ok(seed_value) = seed.parse::<u64>() {
                config.scheduler.seed = seed_value;
            }
        }

        if let Ok(max_turns) = std::env::var("TIDELINE_MAX_TURNS") {
            if let Ok(count) = max_turns.parse::<usize>() {
                config.scheduler.max_turns = count;
            }
        }

        if let Ok(chunk) = std::env::var("TIDELINE_PROGRESS_CHUNK") {
            if let Ok(bytes) = chunk.parse::<u64>() {
                if bytes > 0 {
                    config.transport.max_progress_chunk = bytes;
                }
            }
        }

        if let Ok(timeout) = std::env::var("TIDELINE_DEFAULT_TIMEOUT_MS") {
            if let Ok(millis) = timeout.parse::<u64>() {
                config.transport.default_timeout = match millis {
                    0 => None,
                    millis => Some(Duration::from_millis(millis)),
                };
            }
        }

        config
    }

    /// Creates a configuration for fast, fully reproducible tests.
    ///
    /// Small progress chunks make multi-event progress sequences likely
    /// even for short bodies.
    pub fn deterministic_testing() -> Self {
        Self {
            scheduler: SchedulerConfig {
                seed: 42,
                max_turns: 10_000,
            },
            transport: TransportConfig {
                max_progress_chunk: 4,
                default_timeout: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = TidelineConfig::default();

        assert_eq!(config.scheduler.seed, 42);
        assert_eq!(config.scheduler.max_turns, 100_000);
        assert_eq!(config.transport.max_progress_chunk, 65536);
        assert!(config.transport.default_timeout.is_none());
    }

    #[test]
    fn test_deterministic_testing_preset() {
        let config = TidelineConfig::deterministic_testing();

        assert_eq!(config.scheduler.max_turns, 10_000);
        assert_eq!(config.transport.max_progress_chunk, 4);
    }

    #[test]
    fn test_env_override() {
        unsafe {
            std::env::set_var("TIDELINE_SEED", "12345");
            std::env::set_var("TIDELINE_MAX_TURNS", "500");
            std::env::set_var("TIDELINE_PROGRESS_CHUNK", "0");
            std::env::set_var("TIDELINE_DEFAULT_TIMEOUT_MS", "250");
        }

        let config = TidelineConfig::from_env();

        assert_eq!(config.scheduler.seed, 12345);
        assert_eq!(config.scheduler.max_turns, 500);
        // Zero chunk is rejected
        assert_eq!(config.transport.max_progress_chunk, 65536);
        assert_eq!(
            config.transport.default_timeout,
            Some(Duration::from_millis(250))
        );

        // Cleanup
        unsafe {
            std::env::remove_var("TIDELINE_SEED");
            std::env::remove_var("TIDELINE_MAX_TURNS");
            std::env::remove_var("TIDELINE_PROGRESS_CHUNK");
            std::env::remove_var("TIDELINE_DEFAULT_TIMEOUT_MS");
        }
    }
}
