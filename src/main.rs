use std::sync::Arc;

use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use trendwatch::{
    analysis::{AnalysisDispatcher, DispatcherSettings, HttpAnalysisClient},
    cache::{DistributedLock, MemoryCache, RedisCache, SharedCache},
    config::{Config, LogFormat},
    discovery::{HttpDiscoverySource, HttpTitleClassifier},
    leaderboard::{LeaderboardRefresher, RankedCache, RefresherSettings, TrendBoard},
    llm::{CreatePipeRequest, LlmClient},
    pool::WorkerPool,
    prompts::{CHECKLIST_SCORING_PROMPT, RUBRIC_SCORING_PROMPT},
    scheduler::Scheduler,
    scoring::{
        AggregatorSettings, ChecklistScoringProvider, MultiProviderAggregator,
        RubricScoringProvider, ScoringProvider,
    },
    storage::{SqliteStorage, Storage, Subject},
};

#[derive(Parser)]
#[command(name = "trendwatch", version)]
#[command(about = "Trending leaderboard refresher, analysis dispatcher and composite scorer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run every scheduled job until interrupted
    Serve,
    /// Refresh the leaderboard once
    Refresh {
        /// Number of ranks to write (defaults to REFRESH_SIZE)
        #[arg(long)]
        size: Option<usize>,
    },
    /// Print the leaderboard as JSON, refilling it if short
    Popular {
        #[arg(long, default_value_t = 10)]
        size: usize,
    },
    /// Run the daily analysis dispatch once
    Dispatch,
    /// Score every active subject
    AnalyzeAll {
        /// Analysis date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Retry failed composite analyses under the retry cap
    RetryFailed,
    /// Register a subject for the scoring batch
    AddSubject { id: String, name: String },
}

/// Everything the subcommands need, wired from config.
struct App {
    config: Config,
    storage: Arc<SqliteStorage>,
    refresher: Arc<LeaderboardRefresher>,
    aggregator: Arc<MultiProviderAggregator>,
    llm: Arc<LlmClient>,
    scheduler: Arc<Scheduler>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "Trendwatch starting...");

    let app = match build(config).await {
        Ok(app) => app,
        Err(e) => {
            error!(error = %e, "Startup failed");
            return Err(e);
        }
    };

    match cli.command {
        Command::Serve => serve(app).await?,
        Command::Refresh { size } => {
            let size = size.unwrap_or(app.config.scheduler.refresh_size);
            let outcome = app.refresher.refresh(size).await;
            info!(?outcome, "Refresh finished");
        }
        Command::Popular { size } => {
            let list = app.refresher.get_popular_list(size).await?;
            println!("{}", serde_json::to_string_pretty(&list)?);
        }
        Command::Dispatch => {
            let run = app.scheduler.run_daily_dispatch(&Local::now()).await;
            info!(?run, "Dispatch finished");
        }
        Command::AnalyzeAll { date } => {
            let date = date.unwrap_or_else(|| Local::now().date_naive());
            let summary = app
                .aggregator
                .analyze_all_subjects(date, &app.scheduler.cancellation_token())
                .await;
            info!(?summary, "Batch analysis finished");
        }
        Command::RetryFailed => {
            let summary = app.aggregator.retry_failed_analyses().await;
            info!(?summary, "Retry sweep finished");
        }
        Command::AddSubject { id, name } => {
            app.storage.upsert_subject(&Subject::new(&id, &name)).await?;
            info!(subject_id = %id, "Subject registered");
        }
    }

    Ok(())
}

async fn build(config: Config) -> anyhow::Result<App> {
    let cache: Arc<dyn SharedCache> = match &config.cache.redis_url {
        Some(url) => {
            let cache = RedisCache::new(url).await?;
            info!("Redis cache connected");
            Arc::new(cache)
        }
        None => {
            warn!("REDIS_URL not set, using process-local cache; locks will not span instances");
            Arc::new(MemoryCache::new())
        }
    };

    let storage = Arc::new(SqliteStorage::new(&config.database).await?);
    info!(path = %config.database.path.display(), "Database initialized");

    let max_rank = [
        RankedCache::DEFAULT_MAX_RANK as usize,
        config.scheduler.refresh_size,
        config.scheduler.dispatch_top_n,
    ]
    .into_iter()
    .max()
    .unwrap_or_default() as u32;
    let mut refresher = LeaderboardRefresher::new(
        RankedCache::new(Arc::clone(&cache)).with_max_rank(max_rank),
        Arc::new(TrendBoard::new()),
        Arc::new(HttpDiscoverySource::new(&config.discovery)?),
        RefresherSettings::from_config(&config),
    );
    if let Some(url) = &config.discovery.classifier_url {
        refresher = refresher.with_classifier(Arc::new(HttpTitleClassifier::new(
            url,
            config.discovery.timeout_ms,
        )?));
    }
    let refresher = Arc::new(refresher);

    let cancel = CancellationToken::new();
    let dispatcher = AnalysisDispatcher::new(
        storage.clone(),
        Arc::new(HttpAnalysisClient::new(&config.analysis, &config.request)?),
        WorkerPool::new(
            "dispatch",
            config.pools.dispatch_concurrency,
            config.pools.dispatch_queue,
        ),
        DispatcherSettings::from_config(&config.analysis, &config.request),
        cancel.clone(),
    );

    let llm = Arc::new(LlmClient::new(&config.llm)?.with_cancellation(cancel.clone()));
    let providers: Vec<Arc<dyn ScoringProvider>> = vec![
        Arc::new(RubricScoringProvider::new(Arc::clone(&llm), &config.llm.rubric_pipe)),
        Arc::new(ChecklistScoringProvider::new(Arc::clone(&llm), &config.llm.checklist_pipe)),
    ];
    let provider_pool = WorkerPool::new("providers", providers.len(), config.pools.provider_queue);
    let aggregator = Arc::new(MultiProviderAggregator::new(
        storage.clone(),
        providers,
        provider_pool,
        AggregatorSettings::from(&config.aggregator),
    ));

    let scheduler = Arc::new(Scheduler::new(
        Arc::clone(&refresher),
        dispatcher,
        Arc::clone(&aggregator),
        DistributedLock::new(cache, "trendwatch"),
        config.scheduler.clone(),
        cancel,
    ));

    Ok(App {
        config,
        storage,
        refresher,
        aggregator,
        llm,
        scheduler,
    })
}

async fn serve(app: App) -> anyhow::Result<()> {
    for (name, description, prompt) in [
        (&app.config.llm.rubric_pipe, "Rubric credibility scoring", RUBRIC_SCORING_PROMPT),
        (&app.config.llm.checklist_pipe, "Checklist credibility scoring", CHECKLIST_SCORING_PROMPT),
    ] {
        let request = CreatePipeRequest::scoring(name.as_str(), description, &app.config.llm.model, prompt);
        if let Err(e) = app.llm.ensure_pipe(request).await {
            warn!(pipe = %name, error = %e, "Could not ensure scoring pipe, continuing");
        }
    }

    let token = app.scheduler.cancellation_token();
    let handles = Arc::clone(&app.scheduler).spawn();
    info!(jobs = handles.len(), "Scheduler running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    token.cancel();

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!(error = %e, "Scheduler job ended abnormally");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
