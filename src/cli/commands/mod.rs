use crate::booking::SlotManager;
use crate::channels::{ChannelAdapter, VoiceAdapter, WhatsAppAdapter};
use crate::config::{Config, load_config};
use crate::conversation::ConversationEngine;
use crate::providers::resilient::ServiceGateway;
use crate::server::{self, ServerState};
use crate::store::Store;
use crate::sweeper::Sweeper;
use anyhow::Result;
use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

mod subcommands;

#[derive(Parser)]
#[command(name = "leadline")]
#[command(about = "Lead qualification and survey booking over WhatsApp and phone")]
#[command(version)]
pub struct Cli {
    /// Config file (defaults to ~/.leadline/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default config file
    Init {
        /// Replace an existing config
        #[arg(long)]
        force: bool,
    },
    /// Run the webhook server and the background sweeper
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Run one sweep: settle stale bookings and retry queued CRM updates
    Reconcile,
    /// Score an extracted-info JSON document
    Score {
        /// JSON object, or '-' to read stdin
        json: String,
    },
    /// Show store counts and missing credentials
    Status,
    /// Review flags raised for staff
    Flags {
        #[command(subcommand)]
        cmd: FlagsCommands,
    },
    /// Manage survey bookings
    Bookings {
        #[command(subcommand)]
        cmd: BookingsCommands,
    },
}

#[derive(Subcommand)]
enum FlagsCommands {
    /// List open flags
    List {
        /// Include resolved flags
        #[arg(long)]
        all: bool,
    },
    /// Mark a flag resolved
    Resolve { id: i64 },
}

#[derive(Subcommand)]
enum BookingsCommands {
    /// Move a booking and its calendar event to another slot
    Reschedule {
        id: String,
        /// YYYY-MM-DD
        date: NaiveDate,
        /// HH:MM, 24 hour
        #[arg(value_parser = parse_hh_mm)]
        time: NaiveTime,
    },
}

fn parse_hh_mm(value: &str) -> Result<NaiveTime, String> {
    NaiveTime::parse_from_str(value, "%H:%M").map_err(|e| format!("expected HH:MM: {}", e))
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { force } => subcommands::init_command(config_path, force)?,
        Commands::Serve { host, port } => serve(config_path, host, port).await?,
        Commands::Reconcile => subcommands::reconcile_command(config_path).await?,
        Commands::Score { json } => subcommands::score_command(config_path, &json)?,
        Commands::Status => subcommands::status_command(config_path)?,
        Commands::Flags { cmd } => subcommands::flags_command(config_path, cmd)?,
        Commands::Bookings { cmd } => subcommands::bookings_command(config_path, cmd).await?,
    }

    Ok(())
}

/// Everything the server and the sweeper share.
struct Runtime {
    store: Arc<Store>,
    gateway: Arc<ServiceGateway>,
    slots: Arc<SlotManager>,
    engine: Arc<ConversationEngine>,
}

impl Runtime {
    fn build(config: &Config) -> Result<Self> {
        let db_path = config.database_path();
        if let Some(parent) = db_path.parent() {
            crate::utils::ensure_dir(parent)?;
        }
        let store = Arc::new(Store::open(&db_path)?);
        info!("store opened at {}", db_path.display());

        let gateway = Arc::new(ServiceGateway::new(
            crate::providers::services_from_config(config),
            &config.resilience,
        ));
        let timezone: Tz = config
            .business
            .timezone
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid business timezone: {}", e))?;
        let slots = Arc::new(SlotManager::new(
            store.clone(),
            gateway.clone(),
            config.booking.clone(),
            timezone,
        ));
        let engine = Arc::new(ConversationEngine::new(
            store.clone(),
            gateway.clone(),
            slots.clone(),
            config,
        )?);
        Ok(Self {
            store,
            gateway,
            slots,
            engine,
        })
    }

    fn sweeper(&self) -> Sweeper {
        Sweeper::new(self.store.clone(), self.gateway.clone(), self.slots.clone())
    }

    fn adapters(&self, config: &Config) -> Vec<Arc<dyn ChannelAdapter>> {
        let mut adapters: Vec<Arc<dyn ChannelAdapter>> = Vec::new();
        if config.channels.whatsapp.enabled {
            adapters.push(Arc::new(WhatsAppAdapter::new(
                config,
                self.engine.clone(),
                self.gateway.clone(),
            )));
        }
        if config.channels.voice.enabled {
            adapters.push(Arc::new(VoiceAdapter::new(config, self.engine.clone())));
        }
        adapters
    }
}

async fn serve(config_path: Option<&Path>, host: Option<String>, port: Option<u16>) -> Result<()> {
    info!("Loading configuration...");
    let config = load_config(config_path)?;
    let missing = crate::config::credentials::missing_credentials(&config);
    if !missing.is_empty() {
        tracing::warn!("credentials not configured: {}", missing.join(", "));
    }

    let runtime = Runtime::build(&config)?;
    let adapters = runtime.adapters(&config);
    if adapters.is_empty() {
        tracing::warn!("no channels enabled, only the health endpoint will answer");
    }
    let names: Vec<&str> = adapters.iter().map(|a| a.name()).collect();
    info!("channels: [{}]", names.join(", "));

    let sweeper = runtime.sweeper();
    sweeper.start().await;

    let state = ServerState::new(runtime.store.clone(), runtime.gateway.clone(), adapters);
    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            println!("\nShutting down...");
        }
    };

    let result = server::serve(&host, port, state, shutdown).await;

    sweeper.stop().await;
    runtime.engine.drain_background().await;
    info!("shutdown complete");
    result
}
