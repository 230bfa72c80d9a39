//! Shareline server binary
//!
//! NIST 800-53: AU-9 (Protection of Audit Information), AU-12 (Audit Generation)
//!
//! Run with: cargo run --bin shareline-server -- --root ./shared --users users.toml

use anyhow::Context;
use clap::Parser;
use shareline::{Config, LogFormat, Server, logging};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address
    #[arg(short, long)]
    bind: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Shared directory
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// User directory file (TOML)
    #[arg(short, long)]
    users: Option<PathBuf>,

    /// Number of session slots
    #[arg(long)]
    max_sessions: Option<usize>,

    /// INFO audit log path
    #[arg(long)]
    audit_log: Option<PathBuf>,

    /// Disable the INFO audit log
    #[arg(long, conflicts_with = "audit_log")]
    no_audit_log: bool,

    /// Verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Log format (json or text)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Log file path
    #[arg(long)]
    log_file: Option<PathBuf>,
}

impl Args {
    /// Config file values with command-line flags applied on top
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(root) = self.root {
            config.root_dir = root;
        }
        if let Some(users) = self.users {
            config.users_file = users;
        }
        if let Some(max_sessions) = self.max_sessions {
            config.max_sessions = max_sessions;
        }
        if let Some(audit_log) = self.audit_log {
            config.audit_log = Some(audit_log);
        }
        if self.no_audit_log {
            config.audit_log = None;
        }
        if let Some(log_format) = self.log_format {
            config.logging.format = log_format;
        }
        if let Some(log_file) = self.log_file {
            config.logging.file = Some(log_file);
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }

        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    let _log_guard = logging::init(&config.logging).context("Failed to initialize logging")?;

    info!(
        event = "server_starting",
        version = env!("CARGO_PKG_VERSION"),
        "Starting Shareline server"
    );

    info!(
        event = "server_configuration",
        bind_address = %config.bind_address,
        port = config.port,
        root_dir = ?config.root_dir,
        users_file = ?config.users_file,
        max_sessions = config.max_sessions,
        audit_log = ?config.audit_log,
        log_format = ?config.logging.format,
        log_file = ?config.logging.file,
        "Server configuration"
    );

    if let Err(e) = config.validate() {
        error!(
            event = "configuration_validation_failed",
            error = %e,
            "Configuration validation failed"
        );
        return Err(e.into());
    }

    let server = Server::from_config(config).await.context("Failed to create server")?;
    let listening = server.bind().await?;

    info!(
        event = "server_running",
        address = %listening.local_addr(),
        "Shareline server is accepting connections"
    );

    tokio::select! {
        result = listening.serve() => {
            if let Err(e) = &result {
                error!(event = "server_error", error = %e, "Server encountered an error");
            }
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!(event = "server_shutdown", "Shutdown requested");
        }
    }

    Ok(())
}
