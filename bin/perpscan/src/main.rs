use clap::{Parser, Subcommand};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use common::{Config, Settings};
use engine::Engine;

#[derive(Parser)]
#[command(name = "perpscan", about = "Futures-market signal engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the full engine: scheduler, strategies, tracker.
    Start,
    /// Refresh candle history, optionally one symbol over a horizon.
    Refresh {
        symbol: Option<String>,
        days: Option<i64>,
    },
    /// Print rate usage, universe size and active-signal counts.
    Health,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    let settings = match Settings::load(&config.settings_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("failed to load settings: {e}");
            std::process::exit(1);
        }
    };

    let pool = connect_database(&config.database_url).await;
    let engine = match Engine::bootstrap(&config, settings, pool) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("failed to bootstrap engine: {e}");
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Command::Start => {
            let shutdown = CancellationToken::new();
            let signal_token = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown signal received");
                    signal_token.cancel();
                }
            });
            engine.run(shutdown).await.map(|_| ())
        }
        Command::Refresh { symbol, days } => engine.refresh(symbol, days).await.map(|outcome| {
            println!(
                "refreshed: {} API calls, {} rows",
                outcome.api_calls, outcome.rows_upserted
            );
        }),
        Command::Health => engine.health().await.map(|report| {
            println!(
                "rate: {}/{} ({:.1}% of hard limit){}",
                report.rate.weight_used,
                report.rate.threshold,
                report.rate.percent_of_hard_limit(),
                if report.rate.banned { " BANNED" } else { "" },
            );
            println!("symbols tracked: {}", report.symbols_tracked);
            println!("active signals: {}", report.active_signals);
            println!("locks held: {}", report.locks_held);
            match report.last_cycle_at {
                Some(at) => println!("last cycle: {at}"),
                None => println!("last cycle: never"),
            }
        }),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn connect_database(database_url: &str) -> SqlitePool {
    let options: SqliteConnectOptions = database_url
        .parse::<SqliteConnectOptions>()
        .unwrap_or_else(|e| panic!("invalid DATABASE_URL '{database_url}': {e}"))
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
        .unwrap_or_else(|e| panic!("failed to connect to database: {e}"));

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .unwrap_or_else(|e| panic!("database migration failed: {e}"));
    info!("database ready");
    pool
}
