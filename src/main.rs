//! Face landmark tracking command line tool.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use face_landmark_tracking::{
    config::{Config, EXAMPLE_CONFIG},
    replay::{self, Recording},
};
use log::info;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug output
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print an example configuration file
    ExampleConfig,

    /// Replay recorded detector output through the tracking pipeline
    Replay {
        /// Recording to replay (YAML format)
        #[arg(short, long)]
        input: PathBuf,

        /// Path to configuration file (YAML format)
        #[arg(short = 'C', long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.debug {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("debug"));
    } else {
        env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));
    }

    match args.command {
        Command::ExampleConfig => {
            print!("{EXAMPLE_CONFIG}");
        }
        Command::Replay { input, config } => {
            let config = match &config {
                Some(path) => {
                    info!("Loading configuration from: {}", path.display());
                    Config::from_file(path).with_context(|| format!("loading {}", path.display()))?
                }
                None => Config::default(),
            };
            config.validate()?;

            let recording =
                Recording::from_file(&input).with_context(|| format!("loading recording {}", input.display()))?;
            let reports = replay::run(recording, &config)?;

            let failed = reports.iter().filter(|r| r.error.is_some()).count();
            info!("Replayed {} frames, {failed} failed", reports.len());

            print!("{}", serde_yaml::to_string(&reports)?);
        }
    }

    Ok(())
}
