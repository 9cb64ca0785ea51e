//! Manager configuration
//!
//! [`ManagerConfig`] bundles the failover [`RetryPolicy`] with the driver
//! pool knobs in [`EngineConfig`]. Both have sensible defaults, fluent
//! builders, and can be loaded from `SQLAX_*` environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default number of acquisition rounds
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default pause between two failed rounds
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Default wall-clock budget when a deadline policy is requested
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(10);

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required field: {field}. {hint}")]
    MissingRequired { field: String, hint: String },

    #[error("Invalid value for field '{field}': '{value}'. Expected: {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

/// Order in which candidate URLs are visited inside one acquisition round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailoverStrategy {
    /// Start at the manager's cursor (last selection) and wrap around
    #[default]
    ResumeAndWrap,
    /// Always start from the first URL
    RestartFromFirst,
}

impl FromStr for FailoverStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "resume" | "resume-and-wrap" | "wrap" => Ok(FailoverStrategy::ResumeAndWrap),
            "restart" | "restart-from-first" | "first" => Ok(FailoverStrategy::RestartFromFirst),
            _ => Err(ConfigError::InvalidValue {
                field: "failover".to_string(),
                value: s.to_string(),
                expected: "resume or restart".to_string(),
            }),
        }
    }
}

impl std::fmt::Display for FailoverStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailoverStrategy::ResumeAndWrap => write!(f, "resume"),
            FailoverStrategy::RestartFromFirst => write!(f, "restart"),
        }
    }
}

/// Retry policy for acquiring an engine out of several candidate URLs
///
/// At least one termination policy is always active: `max_attempts` bounds
/// the number of rounds and `deadline`, when set, bounds wall-clock time.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of rounds over the URL list
    pub max_attempts: u32,
    /// Sleep between two failed rounds
    pub backoff: Duration,
    /// Overall budget for one acquisition, checked before every attempt
    pub deadline: Option<Duration>,
    pub strategy: FailoverStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
            deadline: None,
            strategy: FailoverStrategy::default(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
            ..Default::default()
        }
    }

    /// Retry until `deadline` elapses, without a round limit
    pub fn deadline_only(deadline: Duration) -> Self {
        Self {
            max_attempts: u32::MAX,
            deadline: Some(deadline),
            ..Default::default()
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_strategy(mut self, strategy: FailoverStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_attempts".to_string(),
                value: "0".to_string(),
                expected: "at least 1".to_string(),
            });
        }

        if let Some(deadline) = self.deadline {
            if deadline.is_zero() {
                return Err(ConfigError::InvalidValue {
                    field: "deadline".to_string(),
                    value: "0ms".to_string(),
                    expected: "a positive duration".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Driver pool configuration applied to every engine the manager creates
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_seconds: u64,
    pub idle_timeout_seconds: Option<u64>,
    pub max_lifetime_seconds: Option<u64>,
    pub test_before_acquire: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 0,
            acquire_timeout_seconds: 30,
            idle_timeout_seconds: Some(600), // 10 minutes
            max_lifetime_seconds: Some(1800), // 30 minutes
            test_before_acquire: true,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_connections".to_string(),
                value: "0".to_string(),
                expected: "at least 1".to_string(),
            });
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue {
                field: "min_connections".to_string(),
                value: self.min_connections.to_string(),
                expected: format!("at most max_connections ({})", self.max_connections),
            });
        }

        Ok(())
    }
}

/// Complete configuration of a [`crate::DatabaseManager`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagerConfig {
    pub retry: RetryPolicy,
    pub engine: EngineConfig,
}

impl ManagerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.retry.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.retry.backoff = backoff;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.retry.deadline = Some(deadline);
        self
    }

    pub fn with_strategy(mut self, strategy: FailoverStrategy) -> Self {
        self.retry.strategy = strategy;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.engine.max_connections = max_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout_seconds: u64) -> Self {
        self.engine.acquire_timeout_seconds = timeout_seconds;
        self
    }

    /// Load configuration from `SQLAX_*` environment variables
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(attempts) = parse_env::<u32>("SQLAX_MAX_ATTEMPTS", "a positive integer")? {
            config.retry.max_attempts = attempts;
        }

        if let Some(ms) = parse_env::<u64>("SQLAX_RETRY_BACKOFF_MS", "milliseconds")? {
            config.retry.backoff = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_env::<u64>("SQLAX_CONNECT_DEADLINE_MS", "milliseconds")? {
            config.retry.deadline = Some(Duration::from_millis(ms));
        }

        if let Ok(strategy) = env::var("SQLAX_FAILOVER") {
            config.retry.strategy = strategy.parse()?;
        }

        if let Some(max) = parse_env::<u32>("SQLAX_MAX_CONNECTIONS", "a positive integer")? {
            config.engine.max_connections = max;
        }

        if let Some(min) = parse_env::<u32>("SQLAX_MIN_CONNECTIONS", "a non-negative integer")? {
            config.engine.min_connections = min;
        }

        if let Some(secs) = parse_env::<u64>("SQLAX_ACQUIRE_TIMEOUT_SECS", "seconds")? {
            config.engine.acquire_timeout_seconds = secs;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        self.engine.validate()
    }
}

/// Read candidate URLs from `DATABASE_URLS` (comma separated), falling back to `DATABASE_URL`
pub fn database_urls_from_env() -> Result<Vec<String>, ConfigError> {
    let raw = env::var("DATABASE_URLS")
        .or_else(|_| env::var("DATABASE_URL"))
        .map_err(|_| ConfigError::MissingRequired {
            field: "database_urls".to_string(),
            hint: "set DATABASE_URLS (comma separated) or DATABASE_URL".to_string(),
        })?;

    Ok(raw
        .split(',')
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
        .collect())
}

fn parse_env<T: FromStr>(var: &str, expected: &str) -> Result<Option<T>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                field: var.to_string(),
                value,
                expected: expected.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
