use super::{BookingsCommands, FlagsCommands, Runtime};
use crate::booking::ReservationError;
use crate::config::{Config, ScoringConfig, load_config, save_config};
use crate::scoring::{ExtractedInfo, LeadScore, ScoringPolicy, score};
use crate::providers::base::Slot;
use crate::store::Store;
use anyhow::{Context, Result};
use std::io::Read;
use std::path::{Path, PathBuf};

fn resolve_config_path(config_path: Option<&Path>) -> Result<PathBuf> {
    match config_path {
        Some(path) => Ok(path.to_path_buf()),
        None => crate::config::get_config_path(),
    }
}

/// Write the default config unless one exists. Returns whether it wrote.
pub(super) fn write_default_config(path: &Path, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        crate::utils::ensure_dir(parent)?;
    }
    save_config(&Config::default(), Some(path))?;
    Ok(true)
}

pub(super) fn init_command(config_path: Option<&Path>, force: bool) -> Result<()> {
    let path = resolve_config_path(config_path)?;
    if write_default_config(&path, force)? {
        println!("\u{2713} Created config at {}", path.display());
        println!("\nNext steps:");
        println!("  1. Fill in vendor credentials, or export LEADLINE_* variables");
        println!("  2. Enable channels and set their webhook secrets");
        println!("  3. Run: leadline serve");
    } else {
        println!(
            "\u{26a0}\u{fe0f}  Config already exists at {} (use --force to overwrite)",
            path.display()
        );
    }
    Ok(())
}

pub(super) async fn reconcile_command(config_path: Option<&Path>) -> Result<()> {
    let config = load_config(config_path)?;
    let runtime = Runtime::build(&config)?;
    let report = runtime.sweeper().sweep_once().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Parse `json` as extracted lead fields and score it.
pub(super) fn score_json(scoring: &ScoringConfig, json: &str) -> Result<LeadScore> {
    let policy = ScoringPolicy::from_config(scoring)?;
    let info: ExtractedInfo =
        serde_json::from_str(json).context("expected an extracted-info JSON object")?;
    Ok(score(&info, &policy))
}

pub(super) fn score_command(config_path: Option<&Path>, json: &str) -> Result<()> {
    let config = load_config(config_path)?;
    let input = if json == "-" {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        json.to_string()
    };
    let result = score_json(&config.scoring, &input)?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

pub(super) fn status_command(config_path: Option<&Path>) -> Result<()> {
    let path = resolve_config_path(config_path)?;
    let config = load_config(config_path)?;

    println!("leadline {}\n", crate::VERSION);
    println!(
        "Config: {} {}",
        path.display(),
        if path.exists() { "\u{2713}" } else { "\u{2717}" }
    );

    let db_path = config.database_path();
    println!(
        "Database: {} {}",
        db_path.display(),
        if db_path.exists() { "\u{2713}" } else { "\u{2717}" }
    );
    println!(
        "Channels: whatsapp={} voice={}",
        config.channels.whatsapp.enabled, config.channels.voice.enabled
    );

    if db_path.exists() {
        let stats = Store::open(&db_path)?.stats()?;
        println!("Active conversations: {}", stats.active_conversations);
        println!("Pending bookings: {}", stats.pending_bookings);
        println!("Queued CRM updates: {}", stats.pending_side_effects);
        println!("Open review flags: {}", stats.open_review_flags);
    }

    let missing = crate::config::credentials::missing_credentials(&config);
    if missing.is_empty() {
        println!("Credentials: all set");
    } else {
        println!("Missing credentials: {}", missing.join(", "));
    }
    Ok(())
}

pub(super) fn flags_command(config_path: Option<&Path>, cmd: FlagsCommands) -> Result<()> {
    let config = load_config(config_path)?;
    let store = Store::open(config.database_path())?;
    match cmd {
        FlagsCommands::List { all } => {
            let flags = store.list_review_flags(all)?;
            if flags.is_empty() {
                println!("No review flags.");
            }
            for flag in flags {
                println!(
                    "#{} [{}] {} {}{}{}",
                    flag.id,
                    flag.urgency,
                    flag.created_at.format("%Y-%m-%d %H:%M"),
                    flag.reason,
                    flag.conversation_id
                        .map(|c| format!(" conversation={}", c))
                        .unwrap_or_default(),
                    if flag.resolved { " (resolved)" } else { "" },
                );
                if let Some(detail) = flag.detail {
                    println!("    {}", detail);
                }
            }
        }
        FlagsCommands::Resolve { id } => {
            if store.resolve_review_flag(id)? {
                println!("\u{2713} Resolved flag #{}", id);
            } else {
                anyhow::bail!("no review flag #{}", id);
            }
        }
    }
    Ok(())
}

pub(super) async fn bookings_command(config_path: Option<&Path>, cmd: BookingsCommands) -> Result<()> {
    let config = load_config(config_path)?;
    let runtime = Runtime::build(&config)?;
    match cmd {
        BookingsCommands::Reschedule { id, date, time } => {
            let slot = Slot::new(date, time, config.booking.duration_minutes);
            match runtime.slots.reschedule(&id, slot, None).await {
                Ok(booking) => {
                    println!(
                        "\u{2713} Booking {} moved to {} (new booking {})",
                        id,
                        booking.slot.label(),
                        booking.id
                    );
                }
                Err(ReservationError::SlotUnavailable { alternatives, .. }) => {
                    println!("{} is not available. Nearest free slots:", slot.label());
                    for alternative in alternatives {
                        println!("  {} {}", alternative.date, alternative.time.format("%H:%M"));
                    }
                    anyhow::bail!("booking {} not moved", id);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    Ok(())
}
