//! Pool configuration — defaults, normalisation and `pool.toml` parsing.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

/// Dial timeout used when none (or less than a second) is configured.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);
/// Idle timeout used when none (or less than a second) is configured.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(10);
/// Pool ceiling used when `max_size` is zero.
pub const DEFAULT_MAX_SIZE: usize = 100;
/// Pause between two reclaimer passes.
pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(1);
/// Lower bound applied by the runtime timeout setters.
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Configuration for a single-endpoint connection pool.
///
/// Values are taken as given until [`PoolConfig::normalized`] is called;
/// [`Pool::new`](crate::Pool::new) always normalises before use.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Remote address every pooled connection is dialed to (`host:port`).
    pub endpoint: String,
    /// Upper bound on a single dial (default: 5s).
    pub dial_timeout: Duration,
    /// Idle connections older than this are evicted once the pool holds
    /// more than `init_size` of them (default: 10s).
    pub idle_timeout: Duration,
    /// Admission ceiling, also the free queue capacity (default: 100).
    pub max_size: usize,
    /// Number of idle connections the reclaimer shrinks back towards (default: 1).
    pub init_size: usize,
    /// Reclaimer tick (default: 1s).
    pub reclaim_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_size: DEFAULT_MAX_SIZE,
            init_size: 1,
            reclaim_interval: DEFAULT_RECLAIM_INTERVAL,
        }
    }
}

impl PoolConfig {
    /// Default configuration for `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Self::default()
        }
    }

    /// Builder method: set the dial timeout.
    pub fn with_dial_timeout(self, dial_timeout: Duration) -> Self {
        Self {
            dial_timeout,
            ..self
        }
    }

    /// Builder method: set the idle timeout.
    pub fn with_idle_timeout(self, idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            ..self
        }
    }

    /// Builder method: set the maximum and initial pool sizes.
    pub fn with_sizes(self, max_size: usize, init_size: usize) -> Self {
        Self {
            max_size,
            init_size,
            ..self
        }
    }

    /// Builder method: set the reclaimer tick.
    pub fn with_reclaim_interval(self, reclaim_interval: Duration) -> Self {
        Self {
            reclaim_interval,
            ..self
        }
    }

    /// Apply the defaulting rules.
    ///
    /// - timeouts under one second fall back to their defaults
    /// - `max_size == 0` becomes 100, otherwise it is raised to at least
    ///   `2 * init_size` (using the init size as configured)
    /// - `init_size == 0` becomes 1
    pub fn normalized(self) -> Self {
        let dial_timeout = if self.dial_timeout < MIN_TIMEOUT {
            DEFAULT_DIAL_TIMEOUT
        } else {
            self.dial_timeout
        };
        let idle_timeout = if self.idle_timeout < MIN_TIMEOUT {
            DEFAULT_IDLE_TIMEOUT
        } else {
            self.idle_timeout
        };
        let doubled_init = self.init_size.saturating_mul(2);
        let max_size = if self.max_size < 1 {
            DEFAULT_MAX_SIZE
        } else if self.max_size <= doubled_init {
            doubled_init
        } else {
            self.max_size
        };
        let reclaim_interval = if self.reclaim_interval.is_zero() {
            DEFAULT_RECLAIM_INTERVAL
        } else {
            self.reclaim_interval
        };

        Self {
            endpoint: self.endpoint,
            dial_timeout,
            idle_timeout,
            max_size,
            init_size: self.init_size.max(1),
            reclaim_interval,
        }
    }

    /// Parse a `[pool]` table from TOML text and normalise it.
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let file: PoolFile = toml::from_str(content)?;
        let section = file.pool;
        let endpoint = section
            .endpoint
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("pool.endpoint is required"))?;

        let config = Self {
            endpoint,
            dial_timeout: section.dial_timeout.as_deref().map_or(Duration::ZERO, parse_duration),
            idle_timeout: section.idle_timeout.as_deref().map_or(Duration::ZERO, parse_duration),
            max_size: section.max_size.unwrap_or(0),
            init_size: section.init_size.unwrap_or(0),
            reclaim_interval: section
                .reclaim_interval
                .as_deref()
                .map_or(Duration::ZERO, parse_duration),
        };
        Ok(config.normalized())
    }

    /// Read and parse a `pool.toml` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

#[derive(Debug, Deserialize)]
struct PoolFile {
    pool: PoolSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PoolSection {
    endpoint: Option<String>,
    dial_timeout: Option<String>,
    idle_timeout: Option<String>,
    max_size: Option<usize>,
    init_size: Option<usize>,
    reclaim_interval: Option<String>,
}

/// Parse `"500ms"`, `"5s"` or `"2m"`.
///
/// Anything else yields zero, which normalisation turns into the default.
fn parse_duration(s: &str) -> Duration {
    let s = s.trim();
    let parsed = if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else {
        None
    };

    parsed.unwrap_or_else(|| {
        tracing::warn!(value = %s, "unparseable duration in pool config, using default");
        Duration::ZERO
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── Defaults ────────────────────────────────────────────────────

    #[test]
    fn default_config_values() {
        let config = PoolConfig::default();
        assert_eq!(config.dial_timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Duration::from_secs(10));
        assert_eq!(config.max_size, 100);
        assert_eq!(config.init_size, 1);
        assert_eq!(config.reclaim_interval, Duration::from_secs(1));
    }

    // ── Normalisation ───────────────────────────────────────────────

    #[test]
    fn zero_values_fall_back_to_defaults() {
        let config = PoolConfig::new("127.0.0.1:9898")
            .with_dial_timeout(Duration::ZERO)
            .with_idle_timeout(Duration::ZERO)
            .with_sizes(0, 0)
            .with_reclaim_interval(Duration::ZERO)
            .normalized();

        assert_eq!(config.dial_timeout, DEFAULT_DIAL_TIMEOUT);
        assert_eq!(config.idle_timeout, DEFAULT_IDLE_TIMEOUT);
        assert_eq!(config.max_size, 100);
        assert_eq!(config.init_size, 1);
        assert_eq!(config.reclaim_interval, DEFAULT_RECLAIM_INTERVAL);
    }

    #[test]
    fn sub_second_timeouts_fall_back_to_defaults() {
        let config = PoolConfig::new("a:1")
            .with_dial_timeout(Duration::from_millis(500))
            .with_idle_timeout(Duration::from_millis(999))
            .normalized();
        assert_eq!(config.dial_timeout, DEFAULT_DIAL_TIMEOUT);
        assert_eq!(config.idle_timeout, DEFAULT_IDLE_TIMEOUT);
    }

    #[test]
    fn max_size_raised_to_twice_init_size() {
        let config = PoolConfig::new("a:1").with_sizes(5, 4).normalized();
        assert_eq!(config.max_size, 8);
        assert_eq!(config.init_size, 4);

        let config = PoolConfig::new("a:1").with_sizes(8, 4).normalized();
        assert_eq!(config.max_size, 8);
    }

    #[test]
    fn max_size_kept_when_large_enough() {
        let config = PoolConfig::new("a:1").with_sizes(10, 1).normalized();
        assert_eq!(config.max_size, 10);
        assert_eq!(config.init_size, 1);
    }

    #[test]
    fn zero_max_size_ignores_init_size() {
        let config = PoolConfig::new("a:1").with_sizes(0, 80).normalized();
        assert_eq!(config.max_size, 100);
        assert_eq!(config.init_size, 80);
    }

    #[test]
    fn zero_init_size_uses_raw_value_for_max() {
        let config = PoolConfig::new("a:1").with_sizes(1, 0).normalized();
        assert_eq!(config.max_size, 1);
        assert_eq!(config.init_size, 1);
    }

    #[test]
    fn normalized_is_idempotent() {
        let once = PoolConfig::new("a:1").with_sizes(3, 2).normalized();
        assert_eq!(once.clone().normalized(), once);
    }

    // ── TOML ────────────────────────────────────────────────────────

    #[test]
    fn parse_full_pool_table() {
        let config = PoolConfig::from_toml_str(
            r#"
            [pool]
            endpoint = "127.0.0.1:9898"
            dial_timeout = "3s"
            idle_timeout = "5s"
            max_size = 10
            init_size = 1
            reclaim_interval = "500ms"
            "#,
        )
        .unwrap();

        assert_eq!(config.endpoint, "127.0.0.1:9898");
        assert_eq!(config.dial_timeout, Duration::from_secs(3));
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.max_size, 10);
        assert_eq!(config.init_size, 1);
        assert_eq!(config.reclaim_interval, Duration::from_millis(500));
    }

    #[test]
    fn parse_minimal_pool_table_applies_defaults() {
        let config = PoolConfig::from_toml_str("[pool]\nendpoint = \"db:5432\"\n").unwrap();
        assert_eq!(config, PoolConfig::new("db:5432"));
    }

    #[test]
    fn parse_missing_endpoint_fails() {
        let err = PoolConfig::from_toml_str("[pool]\nmax_size = 4\n").unwrap_err();
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn parse_invalid_toml_fails() {
        assert!(PoolConfig::from_toml_str("[pool\nendpoint = 1").is_err());
    }

    #[test]
    fn from_file_reads_pool_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.toml");
        std::fs::write(&path, "[pool]\nendpoint = \"svc:7000\"\nmax_size = 4\n").unwrap();

        let config = PoolConfig::from_file(&path).unwrap();
        assert_eq!(config.endpoint, "svc:7000");
        assert_eq!(config.max_size, 4);
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("2s"), Duration::from_secs(2));
        assert_eq!(parse_duration("500ms"), Duration::from_millis(500));
        assert_eq!(parse_duration("2m"), Duration::from_secs(120));
        assert_eq!(parse_duration("invalid"), Duration::ZERO);
    }
}
