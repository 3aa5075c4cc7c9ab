use std::{fs, path::PathBuf};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use signet::{
    bail_assert,
    blueprint::Blueprint,
    experiment::{self, load_agents},
};
use tracing::level_filters::LevelFilter;

#[derive(Parser)]
#[clap(version)]
#[command(about = "🚦 Signet - Coevolutionary Traffic Signal Training 🚦")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new signet experiment in the current directory, or in a new one if a path is specified
    Init {
        /// Path to initialize in
        #[arg(default_value = ".")]
        path: PathBuf,
    },
    /// Validate a blueprint file
    Validate {
        /// Blueprint file
        #[arg(default_value = "signet.toml")]
        blueprint: PathBuf,
    },
    /// Train the signal controllers of an experiment
    Train {
        /// Path to signet project directory
        #[arg(default_value = ".")]
        path: PathBuf,
        /// Number of generations, overrides `neat.num_generations`
        #[arg(short('g'), long)]
        num_generations: Option<usize>,
    },
    /// Run one simulation round with the saved best controllers
    Replay {
        /// Path to signet project directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match std::env::var("SIGNET_LOG")
        .unwrap_or_else(|_| "INFO".to_string())
        .to_uppercase()
        .as_str()
    {
        "OFF" => LevelFilter::OFF,
        "ERROR" => LevelFilter::ERROR,
        "WARN" => LevelFilter::WARN,
        "INFO" => LevelFilter::INFO,
        "DEBUG" => LevelFilter::DEBUG,
        "TRACE" => LevelFilter::TRACE,
        x => {
            eprintln!("Invalid log level: {}", x);
            eprintln!("Using default log level: INFO");
            LevelFilter::INFO
        }
    };

    match args.command {
        Commands::Init { path } => {
            fs::create_dir_all(&path)?;
            fs::write(
                path.join("signet.toml"),
                include_bytes!("../templates/signet.toml"),
            )?;
            fs::write(
                path.join(".gitignore"),
                include_bytes!("../templates/template.gitignore"),
            )?;

            println!(
                "🚦 Initialized Signet project in {}",
                path.canonicalize()?.display()
            );
        }
        Commands::Validate { blueprint: bpath } => {
            let blueprint = Blueprint::load(&bpath)?;
            blueprint.validate()?;
            println!("✅ Blueprint `{}` is valid", bpath.display());
        }
        Commands::Train {
            path,
            num_generations,
        } => {
            bail_assert!(path.exists(), "No such file or directory: {:?}", &path);
            if num_generations.is_some_and(|g| g == 0) {
                bail!("`num_generations` must be greater than 0");
            }

            tracing_subscriber::fmt()
                .with_target(false)
                .with_max_level(log_level)
                .init();

            let blueprint = load_project(&path)?;
            experiment::train(&blueprint, num_generations)?;
        }
        Commands::Replay { path } => {
            bail_assert!(path.exists(), "No such file or directory: {:?}", &path);

            tracing_subscriber::fmt()
                .with_target(false)
                .with_max_level(log_level)
                .init();

            let blueprint = load_project(&path)?;
            blueprint.validate()?;
            let agents = load_agents(&blueprint.experiment.out_dir.join("agents"))?;
            experiment::replay(&blueprint, &agents)?;
        }
    }

    Ok(())
}

/// Loads `signet.toml` from a project directory, resolving `out_dir` against it
fn load_project(path: &std::path::Path) -> Result<Blueprint> {
    let mut blueprint = Blueprint::load(&path.join("signet.toml"))?;
    blueprint.experiment.out_dir = path.join(&blueprint.experiment.out_dir);
    Ok(blueprint)
}
