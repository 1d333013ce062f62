//! Cadence CLI
//!
//! Runs the activity classification engine and its local HTTP surface.

use anyhow::Context;
use cadence_engine::{server, CategoryStore, Config, Engine, Mode, VERSION};
use clap::{Parser, Subcommand};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cadence")]
#[command(version = VERSION)]
#[command(about = "Activity-aware productivity state engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the engine and its HTTP surface
    Start {
        /// Port for the HTTP surface (0 for a random port)
        #[arg(long, default_value = "5899")]
        port: u16,

        /// Run the engine without the HTTP surface
        #[arg(long)]
        no_server: bool,

        /// Initial mode (ghost, chill, study, coach); defaults to the
        /// persisted mode
        #[arg(long)]
        mode: Option<String>,
    },

    /// Check connectivity of the tracker and model endpoints
    Status,

    /// Set the persisted mode
    Mode {
        /// One of: ghost, chill, study, coach
        mode: String,
    },

    /// Show configuration
    Config,

    /// Inspect or edit the category store
    Categories {
        #[command(subcommand)]
        command: CategoryCommands,
    },
}

#[derive(Subcommand)]
enum CategoryCommands {
    /// List all stored categories
    List,

    /// Set the category for one app
    Set {
        /// App name (case-insensitive)
        app: String,
        /// Category, e.g. work, development, communication, entertainment
        category: String,
        /// Productivity score, 0-100
        score: u8,
        /// Optional subcategory
        #[arg(long)]
        subcategory: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence_engine=info,cadence=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            port,
            no_server,
            mode,
        } => cmd_start(port, no_server, mode).await,
        Commands::Status => cmd_status().await,
        Commands::Mode { mode } => cmd_mode(&mode),
        Commands::Config => cmd_config(),
        Commands::Categories { command } => cmd_categories(command).await,
    }
}

async fn cmd_start(port: u16, no_server: bool, mode: Option<String>) -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();
    config
        .ensure_directories()
        .context("could not create data directories")?;

    if let Some(raw) = mode {
        let mode: Mode = raw.parse()?;
        config.save_mode(mode)?;
    }

    let store = Arc::new(CategoryStore::with_defaults());
    let categories_path = config.categories_path();
    if categories_path.exists() {
        match store.load(&categories_path).await {
            Ok(count) => tracing::info!("loaded {count} categories from {categories_path:?}"),
            Err(e) => tracing::warn!("could not load categories: {e}"),
        }
    }

    println!("Cadence v{VERSION}");
    println!("  Tracker: {}", config.tracker_url());
    println!(
        "  Model: {} ({})",
        config.model_url(),
        config.model_name
    );

    let (engine, handle) = Engine::new(config, store.clone());
    println!("  Mode: {}", handle.current_mode().await);
    println!("  Instance: {}", handle.instance_id());

    let engine_task = tokio::spawn(engine.run());

    let server_shutdown = if no_server {
        println!("  HTTP surface: disabled");
        None
    } else {
        let (addr, shutdown_tx) = server::run(handle.clone(), port).await?;
        println!("  HTTP surface: http://{addr}");
        Some(shutdown_tx)
    };

    println!();
    println!("Press Ctrl+C to stop");

    tokio::signal::ctrl_c().await?;
    println!();
    println!("Shutting down...");

    if let Some(shutdown_tx) = server_shutdown {
        let _ = shutdown_tx.send(());
    }

    if let Err(e) = store.save(&categories_path).await {
        eprintln!("Warning: could not save categories: {e}");
    }

    drop(handle);
    let _ = engine_task.await;
    Ok(())
}

async fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();
    let store = Arc::new(CategoryStore::new());
    let (_engine, handle) = Engine::new(config.clone(), store);

    println!("Cadence Status");
    println!("==============");
    println!();

    let status = handle.check_connections().await;
    println!(
        "Activity tracker ({}): {}",
        config.tracker_url(),
        if status.tracker { "OK" } else { "unreachable" }
    );
    println!(
        "Model endpoint ({}): {}",
        config.model_url(),
        if status.model { "OK" } else { "unreachable" }
    );
    println!();
    println!(
        "Mode: {}",
        config.load_mode().unwrap_or(Mode::Coach)
    );
    println!("Config file: {:?}", Config::config_path());
    Ok(())
}

fn cmd_mode(raw: &str) -> anyhow::Result<()> {
    let mode: Mode = raw.parse()?;
    let config = Config::load().unwrap_or_default();
    config.save_mode(mode)?;
    println!("Mode set to {mode}. A running engine picks it up on restart;");
    println!("use POST /mode on the HTTP surface to switch a live engine.");
    Ok(())
}

fn cmd_config() -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

async fn cmd_categories(command: CategoryCommands) -> anyhow::Result<()> {
    let config = Config::load().unwrap_or_default();
    let store = CategoryStore::with_defaults();
    let path = config.categories_path();
    if path.exists() {
        store
            .load(&path)
            .await
            .context("could not load category store")?;
    }

    match command {
        CategoryCommands::List => {
            let records = store.all().await;
            if records.is_empty() {
                println!("No categories stored.");
                return Ok(());
            }
            for record in records {
                let subcategory = record
                    .subcategory
                    .map(|s| format!(":{s}"))
                    .unwrap_or_default();
                println!(
                    "{:<30} {}{} (score {})",
                    record.app_name, record.category, subcategory, record.productivity_score
                );
            }
        }
        CategoryCommands::Set {
            app,
            category,
            score,
            subcategory,
        } => {
            store
                .update(cadence_engine::Category {
                    app_name: app.clone(),
                    category,
                    subcategory,
                    productivity_score: score,
                })
                .await?;
            store.save(&path).await?;
            println!("Updated {app}.");
        }
    }
    Ok(())
}
