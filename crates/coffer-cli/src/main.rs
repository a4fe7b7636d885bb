//! `coffer` - scheduled, encrypted and verified backups.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use coffer_core::archive::{create_encrypted_archive, decrypt_archive};
use coffer_core::ports::Sqlite3Cli;
use coffer_core::verify::fingerprint_dir;
use coffer_core::{BackupApp, Config, Daemon};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "coffer", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Back up now, then every BACKUP_INTERVAL until stopped (default).
    Daemon,

    /// Run a single backup and exit.
    Once {
        /// Print the run report as JSON on stdout.
        #[arg(long)]
        json: bool,
    },

    /// Pack and encrypt a directory into one archive file.
    Archive {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long, env = "PASSWORD", hide_env_values = true)]
        password: String,
    },

    /// Decrypt and extract an archive.
    Restore {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[arg(short, long, env = "PASSWORD", hide_env_values = true)]
        password: String,

        /// Print the fingerprint of the restored tree.
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // RUST_LOG takes precedence over LOG_LEVEL
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()))
        }))
        .init();

    let cli = Cli::parse();
    let result = match cli.command.unwrap_or(Command::Daemon) {
        Command::Daemon => run_daemon().await,
        Command::Once { json } => run_once(json).await,
        Command::Archive {
            input,
            output,
            password,
        } => run_archive(input, output, password).await,
        Command::Restore {
            input,
            output,
            password,
            verbose,
        } => run_restore(input, output, password, verbose).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_app() -> anyhow::Result<BackupApp> {
    let config = Config::from_env()?;
    Ok(BackupApp::new(config, Arc::new(Sqlite3Cli::default())))
}

async fn run_daemon() -> anyhow::Result<()> {
    let app = load_app()?;
    let interval = app.config().interval;
    let daemon = Daemon::new(Arc::new(app), interval);
    daemon.run_until(shutdown_signal()).await;
    Ok(())
}

async fn run_once(json: bool) -> anyhow::Result<()> {
    let report = load_app()?.run().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.archive.display());
    }
    Ok(())
}

async fn run_archive(input: PathBuf, output: PathBuf, password: String) -> anyhow::Result<()> {
    let archive = tokio::task::spawn_blocking(move || {
        create_encrypted_archive(&input, &output, &password)
            .with_context(|| format!("failed to archive {}", input.display()))
    })
    .await??;
    info!(file = %archive.display(), "archive written");
    Ok(())
}

async fn run_restore(
    input: PathBuf,
    output: PathBuf,
    password: String,
    verbose: bool,
) -> anyhow::Result<()> {
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        decrypt_archive(&input, &password, &output)
            .with_context(|| format!("failed to restore {}", input.display()))?;
        info!(dest = %output.display(), "archive restored");
        if verbose {
            let fingerprint = fingerprint_dir(&output)
                .with_context(|| format!("failed to fingerprint {}", output.display()))?;
            println!("{fingerprint}");
        }
        Ok(())
    })
    .await?
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C"),
        _ = terminate => info!("received SIGTERM"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_daemon() {
        let cli = Cli::try_parse_from(["coffer"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn restore_flags_parse() {
        let args = [
            "coffer",
            "restore",
            "-i",
            "a.tar.gz.enc",
            "-o",
            "out",
            "-p",
            "pw",
            "-v",
        ];
        let cli = Cli::try_parse_from(args).unwrap();
        match cli.command {
            Some(Command::Restore {
                input,
                password,
                verbose,
                ..
            }) => {
                assert_eq!(input, PathBuf::from("a.tar.gz.enc"));
                assert_eq!(password, "pw");
                assert!(verbose);
            }
            _ => panic!("expected restore"),
        }
    }

    #[test]
    fn clap_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
