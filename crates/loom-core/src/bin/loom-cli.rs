use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use loom_core::{
    HeadlessBackend, LoomConfig, Studio,
    diagnostics::init_tracing,
    fixtures::{DEMO_TAKES, write_tone_take},
};

#[derive(Debug, Parser)]
#[command(name = "loom-cli")]
#[command(about = "Headless tools for Loom take and mixdown workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file; defaults to loom.config.toml discovery.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log to stderr only, without a JSON session log.
    #[arg(long, global = true)]
    no_log_file: bool,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a set of tone takes to bounce with.
    DemoTakes {
        #[arg(long, default_value = "data/takes")]
        output_dir: PathBuf,
    },
    /// Load takes into mixer slots in order, then bounce them.
    Bounce {
        #[arg(long = "take", required = true)]
        takes: Vec<PathBuf>,

        #[arg(long)]
        mute: Vec<usize>,

        /// SLOT=VOLUME, e.g. 1=0.5
        #[arg(long, value_parser = parse_slot_value)]
        volume: Vec<(usize, f32)>,

        /// SLOT=PAN, e.g. 0=-0.3
        #[arg(long, value_parser = parse_slot_value)]
        pan: Vec<(usize, f32)>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn parse_slot_value(raw: &str) -> Result<(usize, f32), String> {
    let (slot, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected SLOT=VALUE, got `{raw}`"))?;
    let slot = slot
        .trim()
        .parse::<usize>()
        .map_err(|error| format!("invalid slot `{slot}`: {error}"))?;
    let value = value
        .trim()
        .parse::<f32>()
        .map_err(|error| format!("invalid value `{value}`: {error}"))?;
    Ok((slot, value))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => LoomConfig::load_from(path)?,
        None => LoomConfig::load_or_default()?,
    };
    if cli.no_log_file {
        config.diagnostics.write_log_file = false;
    }
    let _telemetry = init_tracing(&config.diagnostics)?;

    match cli.command {
        Commands::DemoTakes { output_dir } => {
            for (name, seconds, frequency_hz) in DEMO_TAKES {
                let path = output_dir.join(name);
                write_tone_take(&path, seconds, frequency_hz, config.bounce.sample_rate)?;
                tracing::info!(path = %path.display(), seconds, "demo take written");
            }
        }
        Commands::Bounce {
            takes,
            mute,
            volume,
            pan,
            title,
            output_dir,
        } => {
            if let Some(output_dir) = output_dir {
                config.bounce.output_dir = output_dir;
            }
            let studio = Studio::new(&config, Arc::new(HeadlessBackend::new()));

            for take in &takes {
                let index = studio.assign_take(take)?;
                tracing::info!(index, path = %take.display(), "take loaded");
            }
            for index in mute {
                studio.set_mute(index, true)?;
            }
            for (index, value) in volume {
                studio.set_volume(index, value)?;
            }
            for (index, value) in pan {
                studio.set_pan(index, value)?;
            }

            let recording = studio.bounce(title).await?;
            println!("{}", serde_json::to_string_pretty(&recording)?);
            studio.reset_all();
        }
    }

    Ok(())
}
