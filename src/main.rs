//! cryptostalker - flag newly written files that look encrypted
//!
//! # Usage
//!
//! ```bash
//! # Watch a tree, stop processes younger than 5s on detection
//! sudo cryptostalker --path /home --stop-age 5
//!
//! # Classify files once
//! cryptostalker scan suspicious.docx
//!
//! # Show the effective configuration
//! cryptostalker --config /etc/cryptostalker/config.yaml config
//! ```

use clap::{Parser, Subcommand};
use cryptostalker::detector::entropy;
use cryptostalker::{daemon, Classifier, Config};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "cryptostalker")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/cryptostalker/config.yaml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to watch (repeatable)
    #[arg(short, long = "path")]
    paths: Vec<PathBuf>,

    /// Milliseconds to sleep before inspecting each new file
    #[arg(long)]
    sleep: Option<u64>,

    /// Stop all processes created within the last N seconds on detection; 0 disables
    #[arg(long = "stop-age", alias = "stopAge")]
    stop_age: Option<u64>,

    /// Program called with the suspicious file's path as its only argument
    #[arg(long)]
    script: Option<PathBuf>,

    /// Flag a file once this percentage of its 4 KiB chunks is random; 0 disables
    #[arg(long = "fast-detect-pct", alias = "fast_detect_pct")]
    fast_detect_pct: Option<u8>,

    /// Random files within <window> that raise the outbreak alarm
    #[arg(long)]
    count: Option<u32>,

    /// Seconds within which <count> random files must be observed
    #[arg(long)]
    window: Option<u64>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch and respond (default)
    Run,

    /// Classify files once and print the verdicts
    Scan {
        /// Files to inspect
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show configuration
    Config,
}

impl Cli {
    /// Layer command-line options over the file configuration
    fn apply(&self, config: &mut Config) {
        if !self.paths.is_empty() {
            config.watch = self.paths.clone();
        }
        if let Some(sleep) = self.sleep {
            config.scheduler.sleep_ms = sleep;
        }
        if let Some(age) = self.stop_age {
            config.response.stop_age_secs = age;
        }
        if let Some(ref script) = self.script {
            config.response.script = Some(script.clone());
        }
        if let Some(pct) = self.fast_detect_pct {
            config.detection.fast_detect_pct = pct;
        }
        if let Some(count) = self.count {
            config.detection.count = count;
        }
        if let Some(window) = self.window {
            config.detection.window_secs = window;
        }
    }
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    // Load configuration
    let mut config = if cli.config.exists() {
        Config::load(&cli.config).unwrap_or_else(|e| {
            error!("Failed to load config: {:#}", e);
            std::process::exit(1);
        })
    } else {
        Config::default()
    };
    cli.apply(&mut config);

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            info!("Starting cryptostalker...");
            daemon::start(config).await?;
        }

        Commands::Scan { files } => {
            let classifier = Classifier::new(config.detection.fast_detect_pct);
            for file in files {
                let result = classifier.classify(&file);
                println!(
                    "{}\t{:.4}\t{:?}\t{}",
                    if result.is_random { "RANDOM" } else { "ok" },
                    result.entropy,
                    entropy::classify(result.entropy),
                    file.display()
                );
            }
        }

        Commands::Config => {
            println!("{}", serde_yaml::to_string(&config)?);
        }
    }

    Ok(())
}
