//! Binary entrypoint for the Sproutfarm CLI.
//!
//! Commands:
//! - `start` - run the game server, world tick and special-farm maintenance
//! - `init` - create a starter `config.toml` and seed special-farm accounts
//! - `maintain [--farm <name>] [--force]` - run special-farm maintenance now
//! - `inspect <account>` - print a player record as JSON
//! - `passwd <account>` - interactively set a player's password (argon2 hashed)
//! - `status` - print record count and special-farm maintenance state
//!
//! See the library crate docs for module‑level details: `sproutfarm::`.
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use log::{error, info, warn};

use sproutfarm::admin::{seed_special_farms, AdminApi};
use sproutfarm::auth::hash_password;
use sproutfarm::config::Config;
use sproutfarm::context::ServerContext;
use sproutfarm::engine::{AccountLocks, MaintenanceOutcome, MaintenanceScheduler, WorldTick};
use sproutfarm::metrics;
use sproutfarm::server::GameServer;
use sproutfarm::shutdown::{shutdown_channel, wait_for_signal};
use sproutfarm::storage::StorageGateway;

#[derive(Parser)]
#[command(name = "sproutfarm")]
#[command(about = "Multiplayer farming game server")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the game server
    Start,
    /// Write a default configuration and seed special-farm accounts
    Init,
    /// Run special-farm maintenance immediately
    Maintain {
        /// Farm name or account id (default: every farm scheduled today)
        #[arg(short, long)]
        farm: Option<String>,
        /// Replant even if already maintained today
        #[arg(long)]
        force: bool,
    },
    /// Print a player record as JSON
    Inspect {
        account: String,
    },
    /// Set or reset a player's password
    Passwd {
        account: String,
    },
    /// Show record count and special-farm status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init = cli.command {
        init_logging(None, cli.verbose);
        return init(&cli.config).await;
    }

    let config = Config::load(&cli.config).await?;
    init_logging(Some(&config), cli.verbose);

    match cli.command {
        Commands::Start => start(config).await?,
        // handled before the config is loaded
        Commands::Init => {}
        Commands::Maintain { farm, force } => {
            let storage = open_storage(&config)?;
            let mut scheduler = MaintenanceScheduler::detached(
                storage,
                std::sync::Arc::new(AccountLocks::new()),
                config.special_farms.clone(),
                config.crops.clone(),
                config.maintenance.clone(),
            );
            let now = Local::now().naive_local();
            let report = match farm {
                Some(name) => vec![(name.clone(), scheduler.maintain(&name, now, force).await)],
                None if force => {
                    let names: Vec<String> = scheduler.farms().iter().map(|f| f.name.clone()).collect();
                    let mut report = Vec::with_capacity(names.len());
                    for name in names {
                        let result = scheduler.maintain(&name, now, true).await;
                        report.push((name, result));
                    }
                    report
                }
                None => scheduler.run_all(now).await,
            };
            for (name, result) in report {
                match result {
                    Ok(MaintenanceOutcome::Planted { planted }) => println!("{name}: planted {planted} plot(s)"),
                    Ok(MaintenanceOutcome::AlreadyMaintained) => println!("{name}: already maintained today"),
                    Ok(MaintenanceOutcome::NotScheduledToday) => println!("{name}: not scheduled today"),
                    Err(e) => println!("{name}: failed: {e}"),
                }
            }
        }
        Commands::Inspect { account } => {
            let admin = AdminApi::new(open_storage(&config)?, std::sync::Arc::new(AccountLocks::new()));
            let record = admin.load_player_data(&account).await?;
            println!("{}", serde_json::to_string_pretty(&record)?);
        }
        Commands::Passwd { account } => {
            let admin = AdminApi::new(open_storage(&config)?, std::sync::Arc::new(AccountLocks::new()));
            let mut record = admin.load_player_data(&account).await?;
            println!("Setting password for '{}'.", account);
            // Prompt twice without echo
            let pass1 = rpassword::prompt_password("New password: ")?;
            if pass1.len() < 8 {
                println!("Error: password too short (min 8).");
                return Ok(());
            }
            if pass1.len() > 128 {
                println!("Error: password too long.");
                return Ok(());
            }
            let pass2 = rpassword::prompt_password("Confirm password: ")?;
            if pass1 != pass2 {
                println!("Error: passwords do not match.");
                return Ok(());
            }
            let hash = match hash_password(&pass1) {
                Ok(h) => h,
                Err(e) => {
                    println!("Hash error: {e}");
                    return Ok(());
                }
            };
            record.password_hash = Some(hash);
            admin.save_player_data(&account, record).await?;
            println!("Password updated for '{}'.", account);
        }
        Commands::Status => {
            let storage = open_storage(&config)?;
            let accounts = storage.list_account_ids().await?;
            println!("Sproutfarm v{}", env!("CARGO_PKG_VERSION"));
            println!("Listen address: {}", config.server.bind_addr());
            println!("Storage: {:?} at {}", config.storage.backend, config.storage.data_dir);
            println!("Player records: {}", accounts.len());
            let scheduler = MaintenanceScheduler::detached(
                storage,
                std::sync::Arc::new(AccountLocks::new()),
                config.special_farms.clone(),
                config.crops.clone(),
                config.maintenance.clone(),
            );
            println!("Special farms:");
            for farm in scheduler.status(Local::now().naive_local()).await {
                println!(
                    "  {:<16} {:<20} last: {:<19} today: {}",
                    farm.name,
                    farm.account_id,
                    farm.last_maintenance.as_deref().unwrap_or("never"),
                    if farm.scheduled_today { "yes" } else { "no" }
                );
            }
        }
    }

    Ok(())
}

async fn init(path: &str) -> Result<()> {
    info!("Initializing new Sproutfarm configuration");
    let config = if Path::new(path).exists() {
        info!("Keeping existing configuration at {}", path);
        Config::load(path).await?
    } else {
        Config::create_default(path).await?;
        info!("Configuration file created at {}", path);
        Config::default()
    };
    let storage = open_storage(&config)?;
    let created = seed_special_farms(&storage, &config, Utc::now()).await?;
    info!(
        "Seeded {} special farm account(s) under {}",
        created.len(),
        config.storage.data_dir
    );
    Ok(())
}

async fn start(config: Config) -> Result<()> {
    info!("Starting Sproutfarm v{}", env!("CARGO_PKG_VERSION"));
    let storage = open_storage(&config)?;
    let created = seed_special_farms(&storage, &config, Utc::now()).await?;
    if !created.is_empty() {
        info!("Seeded special farm accounts: {}", created.join(", "));
    }

    let ctx = ServerContext::new(config, storage);
    let server = GameServer::bind(ctx.clone()).await?;
    let (shutdown_tx, shutdown_rx) = shutdown_channel();

    let tick = tokio::spawn(WorldTick::new(&ctx).run(shutdown_tx.subscribe()));
    let maintenance = tokio::spawn(MaintenanceScheduler::new(&ctx).run(shutdown_tx.subscribe()));
    let listener = tokio::spawn(server.run(shutdown_rx));

    if let Err(e) = wait_for_signal().await {
        warn!("Signal handler failed ({}); shutting down", e);
    }
    shutdown_tx.trigger();

    let drain = async {
        match listener.await {
            Ok(Err(e)) => error!("Listener exited with error: {}", e),
            Err(e) => error!("Listener task failed: {}", e),
            Ok(Ok(())) => {}
        }
        let _ = tick.await;
        let _ = maintenance.await;
    };
    if tokio::time::timeout(Duration::from_secs(10), drain).await.is_err() {
        warn!("Shutdown timed out waiting for background tasks");
    }

    let m = metrics::snapshot();
    info!(
        "Stopped: {} connection(s) served, {} sweep(s), {} plot tick(s) accrued",
        m.connections_accepted, m.offline_sweeps, m.plots_accrued
    );
    Ok(())
}

fn open_storage(config: &Config) -> Result<StorageGateway> {
    StorageGateway::open(&config.storage)
        .map_err(|e| anyhow!("Failed to open storage at {}: {}", config.storage.data_dir, e))
}

fn init_logging(config: Option<&Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let configured = config
        .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(level);

    let log_file = config
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|file| std::fs::OpenOptions::new().create(true).append(true).open(file).ok());
    match log_file {
        Some(f) => {
            let write_mutex = std::sync::Arc::new(std::sync::Mutex::new(f));
            // Check if stdout is a terminal (TTY) - if so, write to both file and console
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                writeln!(fmt, "{} [{}] {}", ts, record.level(), record.args())
            });
        }
    }
    let _ = builder.try_init();
}
