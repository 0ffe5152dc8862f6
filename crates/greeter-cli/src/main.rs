use anyhow::{Context, Result};
use chrono::Timelike;
use clap::{Parser, Subcommand};
use greeter_core::content::category;
use greeter_core::picker::Selection;
use greeter_core::{ContentPicker, ContentPools};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.greeter.Kiosk1",
    default_service = "org.greeter.Kiosk1",
    default_path = "/org/greeter/Kiosk1"
)]
trait Kiosk {
    async fn status(&self) -> zbus::Result<String>;
    async fn greeting_stats(&self) -> zbus::Result<String>;
    async fn touch(&self, kind: &str) -> zbus::Result<bool>;
    async fn reset(&self) -> zbus::Result<()>;
    async fn reload_content(&self) -> zbus::Result<u32>;
}

#[derive(Parser)]
#[command(name = "greeter", about = "Greeter kiosk CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show daemon status
    Status,
    /// Show greetings per day
    Stats,
    /// Trigger a touch animation
    Touch {
        /// Animation to play: "wave" or "fun"
        #[arg(default_value = "wave")]
        kind: String,
    },
    /// Clear presence and content history, return to idle
    Reset,
    /// Re-read the content file
    Reload,
    /// Validate a content file offline
    CheckContent {
        /// Content JSON file
        path: PathBuf,
        /// Directory to check audio clip references against
        #[arg(long)]
        assets: Option<PathBuf>,
    },
    /// Preview greetings the picker would choose from a content file
    Sample {
        /// Content JSON file
        path: PathBuf,
        /// Local hour to simulate (default: now)
        #[arg(long)]
        hour: Option<u32>,
        /// Number of people in view
        #[arg(long, default_value_t = 1)]
        people: usize,
        /// Simulate a lingering visitor
        #[arg(long)]
        long_dwell: bool,
        /// Category to request explicitly
        #[arg(long)]
        category: Option<String>,
        /// Number of greetings to draw
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,
        /// RNG seed for a repeatable preview
        #[arg(long)]
        seed: Option<u64>,
    },
}

async fn proxy() -> Result<KioskProxy<'static>> {
    let conn = zbus::Connection::session()
        .await
        .context("connecting to the session bus")?;
    tracing::debug!(unique_name = ?conn.unique_name(), "connected to session bus");
    KioskProxy::new(&conn)
        .await
        .context("greeterd is not reachable")
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value = serde_json::from_str(raw)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

/// Problems worth flagging in a content set. Empty means clean.
fn content_warnings(pools: &ContentPools, assets: Option<&Path>) -> Vec<String> {
    let mut warnings = Vec::new();
    let present: BTreeMap<&str, usize> = pools.categories().collect();

    for name in [
        category::MORNING,
        category::FRIDAY_AFTERNOON,
        category::GENERAL,
        category::GROUP,
        category::LONG_DWELL,
    ] {
        match present.get(name) {
            None => warnings.push(format!("category {name:?} is missing")),
            Some(0) => warnings.push(format!("category {name:?} is empty")),
            Some(_) => {}
        }
    }

    let mut seen = HashSet::new();
    for line in pools.all() {
        if line.text.trim().is_empty() {
            warnings.push("blank line".to_string());
        } else if !seen.insert(line.text.as_str()) {
            warnings.push(format!("duplicate line {:?}", line.text));
        }
        if let (Some(dir), Some(clip)) = (assets, &line.audio) {
            if !dir.join(clip).is_file() {
                warnings.push(format!("clip {clip:?} for {:?} not found", line.text));
            }
        }
    }
    warnings
}

fn check_content(path: &Path, assets: Option<&Path>) -> Result<()> {
    let pools = ContentPools::load(path)?;
    tracing::debug!(path = %path.display(), assets = ?assets, "checking content");
    println!("{}: {} lines", path.display(), pools.len());
    for (name, count) in pools.categories() {
        println!("  {name:<20} {count}");
    }
    let warnings = content_warnings(&pools, assets);
    for warning in &warnings {
        println!("warning: {warning}");
    }
    if !warnings.is_empty() {
        tracing::warn!(count = warnings.len(), "content has problems");
    }
    if warnings.is_empty() {
        println!("ok");
    }
    Ok(())
}

fn sample(
    path: &Path,
    selection: Selection<'_>,
    count: usize,
    seed: Option<u64>,
) -> Result<()> {
    let pools = ContentPools::load(path)?;
    let mut picker = match seed {
        Some(seed) => ContentPicker::seeded(pools, seed),
        None => ContentPicker::new(pools),
    };
    tracing::debug!(?seed, count, "sampling greetings");
    for _ in 0..count {
        let picked = picker.pick(&selection);
        let category = picked.category.as_deref().unwrap_or("any");
        match &picked.compliment.audio {
            Some(audio) => println!("[{category}] {} ({audio})", picked.compliment.text),
            None => println!("[{category}] {}", picked.compliment.text),
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Status => print_json(&proxy().await?.status().await?)?,
        Commands::Stats => {
            let raw = proxy().await?.greeting_stats().await?;
            let stats: BTreeMap<String, u64> = serde_json::from_str(&raw)?;
            if stats.is_empty() {
                println!("No greetings recorded");
            }
            for (day, count) in &stats {
                println!("{day}  {count:>6}");
            }
            if !stats.is_empty() {
                println!("total       {:>6}", stats.values().sum::<u64>());
            }
        }
        Commands::Touch { kind } => {
            if proxy().await?.touch(&kind).await? {
                println!("{kind}: started");
            } else {
                println!("{kind}: rejected (greeter busy or cooling down)");
            }
        }
        Commands::Reset => {
            proxy().await?.reset().await?;
            println!("Greeter reset");
        }
        Commands::Reload => {
            let categories = proxy().await?.reload_content().await?;
            if categories == 0 {
                println!("Content unavailable; greeter is using its fallback line");
            } else {
                println!("Loaded {categories} categories");
            }
        }
        Commands::CheckContent { path, assets } => check_content(&path, assets.as_deref())?,
        Commands::Sample {
            path,
            hour,
            people,
            long_dwell,
            category,
            count,
            seed,
        } => {
            let hour = hour.unwrap_or_else(|| chrono::Local::now().hour());
            let selection = Selection {
                explicit: category.as_deref(),
                valid_count: people,
                long_dwell,
                hour,
            };
            sample(&path, selection, count, seed)?;
        }
    }

    Ok(())
}
