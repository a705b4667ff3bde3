//! # Impulse
//!
//! Self-triggering automation engine: fires scheduled triggers, acts on
//! detected opportunities and routes their impact into weighted streams.
//!
//! Usage:
//!   impulse run                      # Run the scheduler until Ctrl-C
//!   impulse cycle -n 5               # Run 5 cycles and print the report
//!   impulse fire revenue_maximizer   # Fire one trigger now
//!   impulse validate                 # Check the config
//!   impulse init                     # Write the default config

mod capabilities;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use impulse_core::ImpulseConfig;
use impulse_core::config::DEFAULT_CONFIG;
use impulse_scheduler::{Engine, Scheduler};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "impulse",
    version,
    about = "⚡ Impulse: self-triggering automation engine"
)]
struct Cli {
    /// Config file (default: ~/.impulse/config.toml, falling back to built-in)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the scheduler loop until Ctrl-C
    Run,
    /// Run cycles back to back and print the report as JSON
    Cycle {
        #[arg(short = 'n', long, default_value = "1")]
        count: u32,
    },
    /// Fire one trigger immediately
    Fire { trigger: String },
    /// Validate the config and exit
    Validate,
    /// Write the default config
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

fn load_config(path: Option<&str>) -> Result<ImpulseConfig> {
    let config = match path {
        Some(p) => ImpulseConfig::load_from(&expand_path(p))?,
        None => ImpulseConfig::load()?,
    };
    Ok(config)
}

fn build_engine(config: ImpulseConfig) -> Result<Engine> {
    let capabilities = capabilities::build_capabilities(&config);
    let engine = Engine::builder(config)
        .capabilities(capabilities)
        .build()
        .context("failed to build engine")?;
    Ok(engine)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "impulse=debug,impulse_scheduler=debug,impulse_core=debug"
    } else {
        "impulse=info,impulse_scheduler=info,impulse_core=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    match cli.command {
        Command::Init { force } => {
            let path = match cli.config.as_deref() {
                Some(p) => expand_path(p),
                None => ImpulseConfig::default_path(),
            };
            if path.exists() && !force {
                anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, DEFAULT_CONFIG)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("✅ Wrote default config to {}", path.display());
        }
        Command::Validate => {
            let config = load_config(cli.config.as_deref())?;
            build_engine(config)?;
            println!("✅ Config is valid");
        }
        Command::Cycle { count } => {
            let engine = build_engine(load_config(cli.config.as_deref())?)?;
            for _ in 0..count {
                if let Err(e) = engine.run_cycle().await {
                    tracing::error!("❌ Cycle abandoned: {}", e);
                }
            }
            println!("{}", serde_json::to_string_pretty(&engine.report().await)?);
        }
        Command::Fire { trigger } => {
            let engine = build_engine(load_config(cli.config.as_deref())?)?;
            let result = engine.fire_now(&trigger).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Command::Run => {
            let engine = Arc::new(build_engine(load_config(cli.config.as_deref())?)?);
            let scheduler = Scheduler::new(engine.clone());
            scheduler.start()?;
            tracing::info!("⚡ Impulse running, press Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            tracing::info!("👋 Shutting down...");
            scheduler.stop().await?;

            let totals = engine.report().await.totals;
            tracing::info!(
                "📊 Streams at {:.2} / {:.2} ({:.1}%)",
                totals.accumulated,
                totals.target,
                totals.efficiency_pct
            );
        }
    }

    Ok(())
}
