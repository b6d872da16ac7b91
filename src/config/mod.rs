use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub cache: CacheConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub analysis: AnalysisConfig,
    pub request: RequestConfig,
    pub discovery: DiscoveryConfig,
    pub scheduler: SchedulerConfig,
    pub pools: PoolConfig,
    pub llm: LlmConfig,
    pub aggregator: AggregatorConfig,
}

/// Shared cache configuration
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL. When unset the process-local cache is used.
    pub redis_url: Option<String>,
    pub leaderboard_name: String,
    pub leaderboard_ttl_secs: u64,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// External analysis service configuration
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    pub base_url: String,
    /// Sent in the caller-identification header on every request.
    pub caller_id: String,
    /// Prefix turning a bare item id into the canonical subject URL.
    pub subject_url_prefix: String,
}

/// HTTP request configuration for the analysis service
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

/// Content-discovery configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub base_url: String,
    pub classifier_url: Option<String>,
    pub query: String,
    pub region: String,
    /// `{id}` is replaced by the item id.
    pub thumbnail_fallback_template: String,
    pub timeout_ms: u64,
}

/// Scheduled job configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub refresh_interval_secs: u64,
    pub refresh_size: usize,
    pub dispatch_top_n: usize,
    pub dispatch_hour: u32,
    pub dispatch_minute: u32,
    pub freshness_max_age_secs: i64,
    pub lock_ttl_secs: u64,
    pub retry_sweep_hour: u32,
    pub monthly_day: u32,
    pub monthly_hour: u32,
}

/// Worker pool sizing
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub dispatch_concurrency: usize,
    pub dispatch_queue: usize,
    pub provider_queue: usize,
}

/// LLM pipe configuration for the scoring providers
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    /// Model assigned when the scoring pipes are created.
    pub model: String,
    pub rubric_pipe: String,
    pub checklist_pipe: String,
}

/// Multi-provider aggregation configuration
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub subject_delay_ms: u64,
    pub analysis_period: String,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_required(key: &str) -> Result<String, AppError> {
    env::var(key).map_err(|_| AppError::Config {
        message: format!("{} is required", key),
    })
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let cache = CacheConfig {
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty()),
            leaderboard_name: env_string("LEADERBOARD_NAME", "popular"),
            leaderboard_ttl_secs: env_or("LEADERBOARD_TTL_SECS", 70 * 60),
        };

        let database = DatabaseConfig {
            path: PathBuf::from(env_string("DATABASE_PATH", "./data/trendwatch.db")),
            max_connections: env_or("DATABASE_MAX_CONNECTIONS", 5),
        };

        let logging = LoggingConfig {
            level: env_string("LOG_LEVEL", "info"),
            format: match env_string("LOG_FORMAT", "pretty").to_lowercase().as_str() {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let analysis = AnalysisConfig {
            base_url: env_required("ANALYSIS_BASE_URL")?,
            caller_id: env_string("ANALYSIS_CALLER_ID", "trendwatch-scheduler"),
            subject_url_prefix: env_string(
                "ANALYSIS_SUBJECT_URL_PREFIX",
                "https://www.youtube.com/watch?v=",
            ),
        };

        let request = RequestConfig {
            connect_timeout_ms: env_or("CONNECT_TIMEOUT_MS", 5_000),
            read_timeout_ms: env_or("READ_TIMEOUT_MS", 600_000),
            max_attempts: env_or("MAX_ATTEMPTS", 3),
            initial_backoff_ms: env_or("INITIAL_BACKOFF_MS", 200),
        };

        let discovery = DiscoveryConfig {
            base_url: env_string("DISCOVERY_BASE_URL", "http://localhost:8081"),
            classifier_url: env::var("CLASSIFIER_BASE_URL")
                .ok()
                .filter(|s| !s.trim().is_empty()),
            query: env_string("DISCOVERY_QUERY", "news"),
            region: env_string("DISCOVERY_REGION", "KR"),
            thumbnail_fallback_template: env_string(
                "THUMBNAIL_FALLBACK_TEMPLATE",
                "https://i.ytimg.com/vi/{id}/hqdefault.jpg",
            ),
            timeout_ms: env_or("DISCOVERY_TIMEOUT_MS", 10_000),
        };

        let scheduler = SchedulerConfig {
            refresh_interval_secs: env_or("REFRESH_INTERVAL_SECS", 3_600),
            refresh_size: env_or("REFRESH_SIZE", 10),
            dispatch_top_n: env_or("DISPATCH_TOP_N", 10),
            dispatch_hour: env_or("DISPATCH_HOUR", 6),
            dispatch_minute: env_or("DISPATCH_MINUTE", 0),
            freshness_max_age_secs: env_or("FRESHNESS_MAX_AGE_SECS", 3_900),
            lock_ttl_secs: env_or("LOCK_TTL_SECS", 600),
            retry_sweep_hour: env_or("RETRY_SWEEP_HOUR", 3),
            monthly_day: env_or("MONTHLY_DAY", 1),
            monthly_hour: env_or("MONTHLY_HOUR", 2),
        };

        let pools = PoolConfig {
            dispatch_concurrency: env_or("DISPATCH_CONCURRENCY", 3),
            dispatch_queue: env_or("DISPATCH_QUEUE", 100),
            provider_queue: env_or("PROVIDER_QUEUE", 20),
        };

        let llm = LlmConfig {
            api_key: env_string("LLM_API_KEY", ""),
            base_url: env_string("LLM_BASE_URL", "https://api.langbase.com"),
            timeout_ms: env_or("LLM_TIMEOUT_MS", 120_000),
            max_retries: env_or("LLM_MAX_RETRIES", 2),
            retry_delay_ms: env_or("LLM_RETRY_DELAY_MS", 1_000),
            model: env_string("LLM_MODEL", "openai:gpt-4o-mini"),
            rubric_pipe: env_string("PIPE_RUBRIC", "credibility-rubric-v1"),
            checklist_pipe: env_string("PIPE_CHECKLIST", "credibility-checklist-v1"),
        };

        let aggregator = AggregatorConfig {
            subject_delay_ms: env_or("SUBJECT_DELAY_MS", 2_000),
            analysis_period: env_string("ANALYSIS_PERIOD", "monthly"),
        };

        Ok(Config {
            cache,
            database,
            logging,
            analysis,
            request,
            discovery,
            scheduler,
            pools,
            llm,
            aggregator,
        })
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            read_timeout_ms: 600_000,
            max_attempts: 3,
            initial_backoff_ms: 200,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            dispatch_concurrency: 3,
            dispatch_queue: 100,
            provider_queue: 20,
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            subject_delay_ms: 2_000,
            analysis_period: "monthly".to_string(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: 3_600,
            refresh_size: 10,
            dispatch_top_n: 10,
            dispatch_hour: 6,
            dispatch_minute: 0,
            freshness_max_age_secs: 3_900,
            lock_ttl_secs: 600,
            retry_sweep_hour: 3,
            monthly_day: 1,
            monthly_hour: 2,
        }
    }
}
