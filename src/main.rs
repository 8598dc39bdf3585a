//! app-bootstrap binary.
//!
//! Runs as master when started directly; the master re-executes this binary
//! with the same arguments for every worker.
//!
//! ```text
//!   master                                  worker × N
//!   ──────                                  ──────────
//!   config → logging                        config → logging
//!   pre-fork initializers                   pipeline → bind → ready ──┐
//!   spawn workers ───── stdin/stdout ─────▶ modules → start → gate    │
//!   supervise ◀──────── {"type":"ready"} ─────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use app_bootstrap::config::{load_layered, ServerConfig};
use app_bootstrap::observability::logging::init_logging;
use app_bootstrap::Bootstrap;

#[derive(Debug, Parser)]
#[command(name = "app-bootstrap")]
#[command(about = "Clustered HTTP application server", long_about = None)]
struct Cli {
    /// Configuration file; later files override earlier ones.
    #[arg(short, long = "config", value_name = "FILE")]
    config: Vec<PathBuf>,

    /// Log level (trace, debug, info, warn, error, none).
    #[arg(long)]
    log_level: Option<String>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    log_timestamps: Option<bool>,

    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    log_colorize: Option<bool>,

    /// Disable console logging.
    #[arg(long)]
    silent: bool,

    /// Worker count (0 = one per CPU).
    #[arg(short, long)]
    workers: Option<usize>,
}

impl Cli {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(timestamps) = self.log_timestamps {
            config.logging.timestamps = timestamps;
        }
        if let Some(colorize) = self.log_colorize {
            config.logging.colorize = colorize;
        }
        if self.silent {
            config.logging.silent = true;
        }
        if let Some(workers) = self.workers {
            config.server.workers = workers;
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match load_layered(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("app-bootstrap: {e}");
            std::process::exit(1);
        }
    };
    cli.apply(&mut config);

    if let Err(e) = init_logging(&config.logging) {
        eprintln!("app-bootstrap: {e}");
        std::process::exit(1);
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        "app-bootstrap starting"
    );

    let status = Bootstrap::new(config).run().await;
    // stdin readers would otherwise keep the runtime alive
    std::process::exit(status);
}
