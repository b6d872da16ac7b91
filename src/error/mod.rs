use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),
}

/// Shared cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache connection failed: {message}")]
    Connection { message: String },

    #[error("Cache command failed: {message}")]
    Command { message: String },

    #[error("Malformed cache entry at {key}: {message}")]
    Malformed { key: String, message: String },

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// External analysis service errors
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("Analysis unavailable: {message} (attempts: {attempts})")]
    Unavailable { message: String, attempts: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Analysis cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// LLM pipe errors
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM unavailable: {message} (retries: {retries})")]
    Unavailable { message: String, retries: u32 },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Content-discovery and classifier errors
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Discovery request failed: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid discovery response: {message}")]
    InvalidResponse { message: String },

    #[error("Classifier returned {actual} verdicts for {expected} titles")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Worker pool errors
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("Pool {pool} rejected submission: queue full ({capacity} slots)")]
    Rejected { pool: String, capacity: usize },

    #[error("Pool {pool} task failed: {message}")]
    TaskFailed { pool: String, message: String },
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for analysis service calls
pub type AnalysisResult<T> = Result<T, AnalysisError>;

/// Result type alias for LLM pipe calls
pub type LlmResult<T> = Result<T, LlmError>;

/// Result type alias for discovery calls
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "missing key".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: missing key");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_analysis_error_display() {
        let err = AnalysisError::Unavailable {
            message: "server down".to_string(),
            attempts: 3,
        };
        assert_eq!(
            err.to_string(),
            "Analysis unavailable: server down (attempts: 3)"
        );

        let err = AnalysisError::Api {
            status: 502,
            message: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 502 - bad gateway");

        let err = AnalysisError::Cancelled { attempts: 2 };
        assert_eq!(err.to_string(), "Analysis cancelled after 2 attempt(s)");
    }

    #[test]
    fn test_pool_error_display() {
        let err = PoolError::Rejected {
            pool: "dispatch".to_string(),
            capacity: 64,
        };
        assert_eq!(
            err.to_string(),
            "Pool dispatch rejected submission: queue full (64 slots)"
        );
    }

    #[test]
    fn test_discovery_error_display() {
        let err = DiscoveryError::LengthMismatch {
            expected: 4,
            actual: 3,
        };
        assert_eq!(err.to_string(), "Classifier returned 3 verdicts for 4 titles");
    }

    #[test]
    fn test_error_conversions_to_app_error() {
        let app_err: AppError = CacheError::Command {
            message: "boom".to_string(),
        }
        .into();
        assert!(matches!(app_err, AppError::Cache(_)));

        let app_err: AppError = AnalysisError::Timeout { timeout_ms: 1000 }.into();
        assert!(matches!(app_err, AppError::Analysis(_)));

        let app_err: AppError = LlmError::Timeout { timeout_ms: 1000 }.into();
        assert!(matches!(app_err, AppError::Llm(_)));

        let app_err: AppError = StorageError::Query {
            message: "syntax".to_string(),
        }
        .into();
        assert!(matches!(app_err, AppError::Storage(_)));
    }
}
