use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rollcall_core::registry::{remove_stored, stored_identities};
use rollcall_core::{CaptureHandle, Config, Ledger, OnnxRecognizer, Registry};
use rollcall_hw::Camera;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall attendance administration")]
struct Cli {
    /// TOML config file; ROLLCALL_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a person from a reference photo
    Register {
        image: PathBuf,
        /// Identity name; suffixed with _1, _2, ... if already taken
        #[arg(short, long)]
        name: String,
    },
    /// Register every image in a directory, named by file stem
    Import {
        dir: PathBuf,
    },
    /// Remove a registered person and their reference image
    Remove {
        name: String,
    },
    /// List registered people
    List {
        #[arg(long)]
        json: bool,
    },
    /// Registered people with no attendance on a day
    Absent {
        /// Day as YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Print the attendance log for a day
    Log {
        /// Day as YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// Copy a day's attendance log to a new file
    Export {
        dest: PathBuf,
        /// Day as YYYY-MM-DD (default: today)
        #[arg(short, long)]
        date: Option<NaiveDate>,
    },
    /// List capture devices
    Devices {
        /// Grab one frame from each device
        #[arg(long)]
        probe: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    let today = chrono::Local::now().date_naive();

    match cli.command {
        Commands::Register { image, name } => {
            let (mut registry, mut recognizer) = load_registry(&config)?;
            let identity = registry
                .register(&name, &image, &mut recognizer)
                .with_context(|| format!("failed to register {name}"))?;
            if identity.name != name.trim() {
                println!("{name} already taken; registered as {}", identity.name);
            } else {
                println!("Registered {}", identity.name);
            }
            println!("  stored at {}", identity.image_path.display());
        }
        Commands::Import { dir } => {
            let (mut registry, mut recognizer) = load_registry(&config)?;
            let report = registry
                .import_dir(&dir, &mut recognizer)
                .with_context(|| format!("failed to import {}", dir.display()))?;
            for name in &report.registered {
                println!("registered  {name}");
            }
            for name in &report.skipped {
                println!("skipped     {name} (already registered)");
            }
            for failed in &report.failed {
                println!("failed      {}: {}", failed.path.display(), failed.error);
            }
            println!(
                "{} registered, {} skipped, {} failed",
                report.registered.len(),
                report.skipped.len(),
                report.failed.len()
            );
        }
        Commands::Remove { name } => {
            let path = remove_stored(&config.faces_dir, &name).with_context(|| format!("failed to remove {name}"))?;
            println!("Removed {name} ({})", path.display());
        }
        Commands::List { json } => {
            let stored = stored_identities(&config.faces_dir)
                .with_context(|| format!("failed to read {}", config.faces_dir.display()))?;
            if json {
                let entries: Vec<_> = stored
                    .iter()
                    .map(|(name, path)| serde_json::json!({ "name": name, "image": path }))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else if stored.is_empty() {
                println!("No one registered in {}", config.faces_dir.display());
            } else {
                println!("{:<24} IMAGE", "NAME");
                for (name, path) in &stored {
                    println!("{name:<24} {}", path.display());
                }
            }
        }
        Commands::Absent { date } => {
            let date = date.unwrap_or(today);
            let stored = stored_identities(&config.faces_dir)
                .with_context(|| format!("failed to read {}", config.faces_dir.display()))?;
            let ledger = open_ledger(&config.log_dir, date)?;
            let absent = ledger.absent(stored.iter().map(|(n, _)| n.as_str()));
            if absent.is_empty() {
                println!("Everyone registered is present on {date}");
            }
            for name in absent {
                println!("{name}");
            }
        }
        Commands::Log { date } => {
            let date = date.unwrap_or(today);
            let ledger = open_ledger(&config.log_dir, date)?;
            let records = ledger.records(date)?;
            if records.is_empty() {
                println!("No attendance recorded on {date}");
            }
            for r in records {
                println!("{:<24} {} {}", r.name, r.time.format("%H:%M:%S"), r.status.as_str());
            }
        }
        Commands::Export { dest, date } => {
            let date = date.unwrap_or(today);
            let ledger = open_ledger(&config.log_dir, date)?;
            let rows = ledger
                .export(date, &dest)
                .with_context(|| format!("failed to export {date}"))?;
            println!("Exported {rows} rows to {}", dest.display());
        }
        Commands::Devices { probe } => {
            let devices = rollcall_hw::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("[{}] {} ({}, {}, {})", dev.index, dev.path, dev.name, dev.driver, dev.bus);
                if probe {
                    match probe_device(dev.index, &config) {
                        Ok(summary) => println!("      {summary}"),
                        Err(e) => println!("      probe failed: {e:#}"),
                    }
                }
            }
        }
    }

    Ok(())
}

fn load_registry(config: &Config) -> Result<(Registry, OnnxRecognizer)> {
    let mut recognizer = OnnxRecognizer::load(&config.model_dir)
        .with_context(|| format!("failed to load models from {}", config.model_dir.display()))?;
    let (registry, skipped) = Registry::load(&config.faces_dir, &mut recognizer)
        .with_context(|| format!("failed to load faces from {}", config.faces_dir.display()))?;
    for s in skipped {
        eprintln!("warning: skipped {}: {}", s.path.display(), s.error);
    }
    Ok((registry, recognizer))
}

fn open_ledger(log_dir: &Path, date: NaiveDate) -> Result<Ledger> {
    if !log_dir.is_dir() {
        bail!("log directory {} does not exist", log_dir.display());
    }
    Ledger::open(log_dir, date).with_context(|| format!("failed to open attendance log in {}", log_dir.display()))
}

fn probe_device(index: u32, config: &Config) -> Result<String> {
    let mut camera = Camera::open(index)?;
    let settings = config.session_config().capture;
    if let Err(e) = camera.configure(&settings) {
        tracing::warn!(index, error = %e, "probe using device defaults");
    }
    let frame = camera.read()?;
    camera.release();
    let Some(frame) = frame else {
        bail!("device returned no frame");
    };
    Ok(format!(
        "{}x{} seq {} brightness {:.1}",
        frame.width(),
        frame.height(),
        frame.sequence,
        frame.avg_brightness()
    ))
}
