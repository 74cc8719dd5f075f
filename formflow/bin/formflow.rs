//! Command-line entry point for the formflow dispatcher
//!
//! - `check`: validate the configuration and print what it routes where
//! - `submit`: dispatch the forms in a JSON file and print every outcome
//! - `serve`: dispatch newline-delimited JSON forms from stdin until it closes
//!   or the process is signalled

#[cfg(not(any(target_os = "macos", unix)))]
compile_error!("Only macos and unix are currently supported");

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use formflow::controller::{self, Formflow, SHUTDOWN_BROADCAST};
use formflow_common::{internal, logging};
use tokio::io::BufReader;

#[derive(Parser, Debug)]
#[command(name = "formflow")]
#[command(about = "Fan form submissions out to downstream endpoints", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (otherwise `FORMFLOW_CONFIG` or the default locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate the configuration without dispatching anything
    Check,
    /// Dispatch the submission (or array of submissions) in a JSON file
    Submit {
        form: PathBuf,

        /// Higher values are served first
        #[arg(short, long, default_value_t = 1)]
        priority: u32,
    },
    /// Dispatch newline-delimited JSON submissions read from stdin
    Serve {
        #[arg(short, long, default_value_t = 1)]
        priority: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => find_config_file()?,
    };
    let config_content = std::fs::read_to_string(&config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to read config from {}: {}",
            config_path.display(),
            e
        )
    })?;
    let formflow = Formflow::from_ron(&config_content)?;

    logging::init();

    match cli.command {
        Command::Check => {
            println!("{}", formflow.check()?);
        }
        Command::Submit { form, priority } => {
            let text = std::fs::read_to_string(&form)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", form.display()))?;
            let forms = controller::parse_forms(&text)?;

            let report = formflow.submit(forms, priority).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);

            anyhow::ensure!(
                report.is_success(),
                "{} of {} dispatches succeeded, {} submissions rejected",
                report.succeeded(),
                report.outcomes.len(),
                report.rejected.len()
            );
        }
        Command::Serve { priority } => {
            let shutdown = SHUTDOWN_BROADCAST.subscribe();
            tokio::spawn(async {
                if let Err(e) = controller::shutdown_on_signal().await {
                    tracing::error!("Signal handling failed: {e}");
                }
            });

            let report = formflow
                .serve(BufReader::new(tokio::io::stdin()), priority, shutdown)
                .await?;
            internal!(level = INFO, "Shutdown report: {report:?}");
        }
    }

    Ok(())
}

/// Find the configuration file using the following precedence:
/// 1. `FORMFLOW_CONFIG` environment variable
/// 2. ./formflow.config.ron (current working directory)
/// 3. /etc/formflow/formflow.config.ron (system-wide config)
fn find_config_file() -> anyhow::Result<PathBuf> {
    if let Ok(env_path) = std::env::var("FORMFLOW_CONFIG") {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        anyhow::bail!(
            "FORMFLOW_CONFIG points to non-existent file: {}",
            path.display()
        );
    }

    let default_paths = [
        PathBuf::from("./formflow.config.ron"),
        PathBuf::from("/etc/formflow/formflow.config.ron"),
    ];

    if let Some(path) = default_paths.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = default_paths
        .iter()
        .map(|p| format!("  - {}", p.display()))
        .collect::<Vec<_>>()
        .join("\n");

    anyhow::bail!(
        "No configuration file found. Tried:\n  - FORMFLOW_CONFIG environment variable\n{paths_tried}"
    )
}
