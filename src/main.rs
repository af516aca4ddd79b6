#![allow(clippy::multiple_crate_versions)]

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use opusmt::config::Config;
use opusmt::error::{OpusMtError, Result};
use opusmt::models::{InstallStatus, ModelDescriptor, ModelRepository};
use opusmt::worker::WorkerRegistry;
use opusmt::LanguagePair;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "opusmt")]
#[command(about = "OPUS-MT model management and machine translation", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.config/opusmt/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage translation models
    Models {
        #[command(subcommand)]
        command: ModelsCommand,
    },
    /// Translate stdin line by line
    Translate {
        /// Language pair, e.g. en-fi
        pair: LanguagePair,
    },
}

#[derive(Subcommand)]
enum ModelsCommand {
    /// List installed models
    Local,
    /// List models available for download
    Remote {
        /// Substring of the source languages
        #[arg(long, default_value = "")]
        source: String,
        /// Substring of the target languages
        #[arg(long, default_value = "")]
        target: String,
        /// Substring of the model name
        #[arg(long, default_value = "")]
        name: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show the directory of the newest installed model for a pair
    Latest { pair: LanguagePair },
    /// Check whether a newer model is available for a pair
    Check { pair: LanguagePair },
    /// Download and install a model, e.g. en-fi/opus-2021-02-19
    Install { key: String },
    /// Unpack a downloaded <pair>/<name>.zip archive
    Extract {
        archive: PathBuf,
        /// Delete the archive after a successful extraction
        #[arg(long)]
        delete: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match cli.command {
        Commands::Models { command } => run_models(&config, command).await,
        Commands::Translate { pair } => run_translate(config, &pair).await,
    }
}

async fn run_models(config: &Config, command: ModelsCommand) -> Result<()> {
    let repository = Arc::new(ModelRepository::new(&config.models)?);

    match command {
        ModelsCommand::Local => {
            let models = repository.local_models();
            if models.is_empty() {
                println!("No models installed in {}", repository.models_dir().display());
            }
            for model in models {
                let path = model.path.as_deref().unwrap_or(repository.models_dir());
                println!("{:<16} {:<40} {}", model.pair, model.name, path.display());
            }
        }
        ModelsCommand::Remote {
            source,
            target,
            name,
            json,
        } => {
            repository.discover_remote().await?;
            let models = repository.filter(&source, &target, &name);
            if json {
                let out = serde_json::to_string_pretty(&models)
                    .map_err(|e| OpusMtError::Other(format!("Failed to encode models: {e}")))?;
                println!("{out}");
            } else {
                print_table(&models);
            }
        }
        ModelsCommand::Latest { pair } => {
            let dir = repository
                .resolve_latest_local(&pair)
                .ok_or_else(|| OpusMtError::ModelMissing(pair.to_string()))?;
            println!("{}", dir.display());
        }
        ModelsCommand::Check { pair } => {
            repository.discover_remote().await?;
            match repository.has_newer_remote(&pair) {
                Some(model) => println!("Newer model available: {}", model.key()),
                None => println!("{pair} is up to date"),
            }
        }
        ModelsCommand::Install { key } => install(&repository, &key).await?,
        ModelsCommand::Extract { archive, delete } => {
            let dir = repository.extract(&archive, delete).await?;
            println!("Extracted to {}", dir.display());
        }
    }

    Ok(())
}

fn print_table(models: &[ModelDescriptor]) {
    for model in models {
        let status = match model.status {
            InstallStatus::Installed => "installed",
            InstallStatus::NotInstalled => "",
        };
        println!("{:<16} {:<40} {status}", model.pair, model.name);
    }
    println!("{} models", models.len());
}

async fn install(repository: &ModelRepository, key: &str) -> Result<()> {
    let descriptor = ModelDescriptor::from_key(key, None).ok_or_else(|| {
        OpusMtError::InvalidArgument(format!("Model '{key}' must look like 'en-fi/<name>'"))
    })?;

    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
        .map_err(|e| OpusMtError::Other(format!("Invalid progress template: {e}")))?
        .progress_chars("#>-");
    let pb = ProgressBar::new(0);
    pb.set_style(style);

    let bar = pb.clone();
    let dir = repository
        .install(&descriptor, move |progress| {
            if let Some(total) = progress.total {
                bar.set_length(total);
            }
            bar.set_position(progress.downloaded);
        })
        .await;

    match dir {
        Ok(dir) => {
            pb.finish_with_message(format!("Installed {}", descriptor.key()));
            println!("Installed {} to {}", descriptor.key(), dir.display());
            Ok(())
        }
        Err(e) => {
            pb.abandon();
            Err(e)
        }
    }
}

async fn run_translate(config: Config, pair: &LanguagePair) -> Result<()> {
    let repository = Arc::new(ModelRepository::new(&config.models)?);
    let registry = WorkerRegistry::new(repository, config.engine);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    let result = async {
        while let Some(line) = lines.next_line().await? {
            let worker = registry.get_or_start(pair).await?;
            let translated = worker.translate(&line).await?;
            stdout.write_all(translated.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
        Ok::<(), OpusMtError>(())
    }
    .await;

    registry.shutdown().await;
    result
}
