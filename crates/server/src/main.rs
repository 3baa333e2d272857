//! SMA Backtester: job-queue backed SMA-crossover backtesting
//!
//! Usage:
//!   sma-backtester serve --port 8000 --workers 2   (API server with embedded workers)
//!   sma-backtester worker                          (standalone worker process)
//!   sma-backtester submit --strategy-id 1 --symbol BTCUSD
//!   sma-backtester status 12
//!   sma-backtester report result.json
//!   sma-backtester diagnose --symbol BTCUSD --pair 5:20 --pair 10:50

mod api;
mod config;

use clap::{Parser, Subcommand};
use engine::diagnose::parse_pair;
use engine::{
    render_report, render_sweep, sweep, CsvSeriesSource, DateRange, PriceSeriesSource,
    SmaCrossoverConfig, Worker, DEFAULT_SWEEP,
};
use persistence::{Database, JobStore};
use serde_json::{json, Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{error, info, warn};

use api::{build_router, enqueue_backtest, AppState, BacktestRequest};
use config::{AllowedOrigins, AppConfig};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "sma-backtester")]
#[command(about = "SMA crossover backtester with a persistent job queue", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the HTTP API with embedded workers
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 8000)]
        port: u16,
        /// Number of embedded workers (0 = API only)
        #[arg(long, default_value_t = 1)]
        workers: usize,
    },
    /// Run a single worker until Ctrl+C
    Worker {
        /// Name used in logs
        #[arg(long, default_value = "worker")]
        name: String,
    },
    /// Queue a backtest job directly in the database
    Submit {
        #[arg(long)]
        strategy_id: i64,
        #[arg(long)]
        symbol: String,
        #[arg(long, default_value = "1m")]
        timeframe: String,
        /// Inclusive start (date or date-time)
        #[arg(long)]
        start: Option<String>,
        /// Inclusive end (a bare date covers the whole day)
        #[arg(long)]
        end: Option<String>,
        #[arg(long)]
        fast: Option<usize>,
        #[arg(long)]
        slow: Option<usize>,
        /// Stop-loss fraction, e.g. 0.03
        #[arg(long)]
        sl: Option<f64>,
        /// Take-profit fraction
        #[arg(long)]
        tp: Option<f64>,
        /// Leave a position open at the end instead of closing it
        #[arg(long)]
        no_force_close: bool,
    },
    /// Print a job as JSON
    Status {
        job_id: i64,
    },
    /// Print a text report of a saved result (API job JSON or raw result)
    Report {
        file: PathBuf,
    },
    /// Sweep fast/slow pairs over a local series and list crosses and trades
    Diagnose {
        #[arg(long, default_value = "BTCUSD")]
        symbol: String,
        #[arg(long, default_value = "1m")]
        timeframe: String,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        /// FAST:SLOW, repeatable (default: 2:3 2:4 3:5 5:8 10:20 2:50)
        #[arg(long = "pair")]
        pairs: Vec<String>,
        #[arg(long)]
        sl: Option<f64>,
        #[arg(long)]
        tp: Option<f64>,
        #[arg(long)]
        no_force_close: bool,
    },
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,persistence=debug,sma_backtester=debug,sqlx=warn")
    } else {
        EnvFilter::new("info,engine=info,sma_backtester=info,sqlx=warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    match cli.command {
        Commands::Serve { host, port, workers } => {
            cmd_serve(&config, &host, port, workers).await?;
        }
        Commands::Worker { name } => {
            cmd_worker(&config, name).await?;
        }
        Commands::Submit {
            strategy_id,
            symbol,
            timeframe,
            start,
            end,
            fast,
            slow,
            sl,
            tp,
            no_force_close,
        } => {
            let mut params = Map::new();
            for (key, value) in [
                ("fast", fast.map(Value::from)),
                ("slow", slow.map(Value::from)),
                ("sl", sl.map(Value::from)),
                ("tp", tp.map(Value::from)),
            ] {
                if let Some(v) = value {
                    params.insert(key.into(), v);
                }
            }
            let body = json!({
                "symbol": symbol,
                "timeframe": timeframe,
                "start": start,
                "end": end,
                "params": params,
                "force_close": !no_force_close,
            });
            let rest = match body {
                Value::Object(map) => map,
                _ => Map::new(),
            };
            cmd_submit(&config, BacktestRequest { strategy_id, rest }).await?;
        }
        Commands::Status { job_id } => {
            cmd_status(&config, job_id).await?;
        }
        Commands::Report { file } => {
            cmd_report(&file)?;
        }
        Commands::Diagnose {
            symbol,
            timeframe,
            start,
            end,
            pairs,
            sl,
            tp,
            no_force_close,
        } => {
            let base = SmaCrossoverConfig {
                stop_loss: sl,
                take_profit: tp,
                force_close: !no_force_close,
                ..SmaCrossoverConfig::default()
            };
            let range = DateRange::parse(start.as_deref(), end.as_deref())?;
            cmd_diagnose(&config, &symbol, &timeframe, &range, &pairs, &base)?;
        }
    }

    Ok(())
}

async fn open_database(config: &AppConfig) -> anyhow::Result<Database> {
    let db = Database::new(&config.db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", config.db_path.display());
    Ok(db)
}

fn series_source(config: &AppConfig) -> Arc<dyn PriceSeriesSource> {
    Arc::new(CsvSeriesSource::new(config.data_dirs.clone()))
}

fn cors_layer(origins: &AllowedOrigins) -> anyhow::Result<CorsLayer> {
    let allow_origin = match origins {
        AllowedOrigins::Any => AllowOrigin::from(Any),
        AllowedOrigins::List(list) => {
            let values = list
                .iter()
                .map(|o| o.parse::<axum::http::HeaderValue>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| anyhow::anyhow!("Invalid BACKTEST_ALLOW_ORIGINS entry: {}", e))?;
            AllowOrigin::list(values)
        }
    };
    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(Any)
        .allow_headers(Any))
}

// ============================================================================
// Serve command: Axum web server plus embedded workers
// ============================================================================

async fn cmd_serve(config: &AppConfig, host: &str, port: u16, workers: usize) -> anyhow::Result<()> {
    info!("SMA Backtester v{} starting...", APP_VERSION);

    let db = Arc::new(open_database(config).await?);
    let source = series_source(config);

    let mut progress = Vec::with_capacity(workers);
    let mut handles = Vec::with_capacity(workers);
    for i in 1..=workers {
        let worker = Worker::new(format!("worker-{i}"), db.clone(), source.clone(), config.worker);
        progress.push((worker.name().to_string(), worker.progress()));
        handles.push(tokio::spawn(async move { worker.run().await }));
    }

    let state = AppState::new(db).with_workers(progress);
    let app = build_router(state).layer(cors_layer(&config.allow_origins)?);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== SMA Backtester v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health              - Health check and job counts");
    println!("  POST /api/strategies          - Create strategy");
    println!("  GET  /api/strategies          - List strategies");
    println!("  GET  /api/strategies/:id      - Get strategy");
    println!("  POST /api/backtests           - Queue a backtest");
    println!("  GET  /api/backtests/:id       - Poll a backtest job");
    println!("  GET  /api/workers/status      - Embedded worker progress");
    println!("\n  Database: {}", config.db_path.display());
    println!("  Workers:  {}", workers);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Ctrl+C received, shutting down...");
        })
        .await?;

    // A job interrupted here stays `running`; there is no lease recovery
    for handle in handles {
        handle.abort();
    }
    Ok(())
}

// ============================================================================
// Worker command: standalone polling loop
// ============================================================================

async fn cmd_worker(config: &AppConfig, name: String) -> anyhow::Result<()> {
    info!("SMA Backtester v{} worker starting...", APP_VERSION);

    let db = Arc::new(open_database(config).await?);
    let worker = Worker::new(name, db, series_source(config), config.worker);

    tokio::select! {
        _ = worker.run() => {}
        _ = tokio::signal::ctrl_c() => {
            let snapshot = worker.progress().snapshot(worker.name());
            if let Some(job_id) = snapshot.current_job {
                warn!(job_id, "Stopping with a job in progress; it stays running");
            }
            info!(
                finished = snapshot.jobs_finished,
                failed = snapshot.jobs_failed,
                "Worker stopped"
            );
        }
    }
    Ok(())
}

// ============================================================================
// Diagnose command: parameter sweep over one local series
// ============================================================================

fn cmd_diagnose(
    config: &AppConfig,
    symbol: &str,
    timeframe: &str,
    range: &DateRange,
    pairs: &[String],
    base: &SmaCrossoverConfig,
) -> anyhow::Result<()> {
    let pairs = if pairs.is_empty() {
        DEFAULT_SWEEP.to_vec()
    } else {
        pairs
            .iter()
            .map(|raw| parse_pair(raw))
            .collect::<Result<Vec<_>, _>>()?
    };

    let bars = series_source(config).load(symbol, timeframe, range)?;
    println!("Loaded rows: {}", bars.len());
    if let (Some(first), Some(last)) = (bars.first(), bars.last()) {
        println!("From {} to {}", first.timestamp, last.timestamp);
    }

    let reports = sweep(&bars, &pairs, base)?;
    print!("{}", render_sweep(&reports));
    Ok(())
}

// ============================================================================
// CLI commands: submit / status / report
// ============================================================================

async fn cmd_submit(config: &AppConfig, request: BacktestRequest) -> anyhow::Result<()> {
    let db = open_database(config).await?;
    let job = enqueue_backtest(&db, request)
        .await
        .map_err(|e| anyhow::anyhow!("Submit failed: {}", e))?;
    println!("Queued job {} ({})", job.id, job.status);
    Ok(())
}

async fn cmd_status(config: &AppConfig, job_id: i64) -> anyhow::Result<()> {
    let db = open_database(config).await?;
    let job = db.get(job_id).await?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

fn cmd_report(file: &std::path::Path) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(file)
        .map_err(|e| anyhow::anyhow!("Cannot read {}: {}", file.display(), e))?;
    let doc: Value = serde_json::from_str(&raw)?;
    print!("{}", render_report(&doc));
    Ok(())
}
