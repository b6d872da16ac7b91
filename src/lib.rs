//! # Trendwatch
//!
//! Keeps a ranked leaderboard of trending items in a shared cache, sends the
//! top items to a slow external analysis service, and scores known subjects
//! with several LLM-backed providers folded into one composite record.
//!
//! ## Features
//!
//! - **Leaderboard refresh**: discovery, classifier filtering and one shared
//!   timestamp per batch, gated by a cache-backed lock
//! - **Analysis dispatch**: bounded worker pool, idempotency keys, exponential
//!   backoff and a PENDING/COMPLETED/FAILED lifecycle in SQLite
//! - **Composite scoring**: concurrent provider fan-out, averages over
//!   successful providers only, partial retries
//!
//! ## Architecture
//!
//! ```text
//! Discovery API ─→ LeaderboardRefresher ─→ Redis (ranked hashes, locks)
//!                                              │
//!                        Scheduler ─→ AnalysisDispatcher ─→ Analysis API
//!                            │               │
//!                            │               └─→ SQLite (status, results)
//!                            └─→ MultiProviderAggregator ─→ LLM pipes
//!                                            └─→ SQLite (composite scores)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use trendwatch::cache::{MemoryCache, SharedCache};
//! use trendwatch::leaderboard::{LeaderboardRefresher, RankedCache, RefresherSettings, TrendBoard};
//! use trendwatch::discovery::HttpDiscoverySource;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = trendwatch::Config::from_env()?;
//!     let cache: Arc<dyn SharedCache> = Arc::new(MemoryCache::new());
//!     let refresher = LeaderboardRefresher::new(
//!         RankedCache::new(cache),
//!         Arc::new(TrendBoard::new()),
//!         Arc::new(HttpDiscoverySource::new(&config.discovery)?),
//!         RefresherSettings::from_config(&config),
//!     );
//!     let popular = refresher.get_popular_list(10).await?;
//!     println!("{} items as of {}", popular.entries.len(), popular.updated_at);
//!     Ok(())
//! }
//! ```

/// Per-item external analysis: client, dispatcher and result upsert.
pub mod analysis;
/// Shared cache backends and the distributed lock.
pub mod cache;
/// Configuration loaded from the environment.
pub mod config;
/// Content discovery and title classification collaborators.
pub mod discovery;
/// Error types and result aliases for the application.
pub mod error;
/// Ranked leaderboards and the in-process trend snapshot.
pub mod leaderboard;
/// LLM pipe client used by the scoring providers.
pub mod llm;
/// Bounded worker pools.
pub mod pool;
/// System prompts for the scoring pipes.
pub mod prompts;
/// Retry with exponential backoff.
pub mod retry;
/// Timed jobs.
pub mod scheduler;
/// Multi-provider composite scoring.
pub mod scoring;
/// SQLite storage layer for persistence.
pub mod storage;

pub use config::Config;
pub use error::{AppError, AppResult};
