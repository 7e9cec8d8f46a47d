//! Figma Preview CLI
//!
//! Runs the preview companion server and triggers scans on a running one.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use figpreview_core::AppConfig;
use figpreview_server::run_server;

const DEFAULT_SERVER_URL: &str = "http://localhost:8080";

#[derive(Parser)]
#[command(name = "figpreview")]
#[command(about = "Companion server for the Figma preview plugin")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the server (plugins connect to /ws)
    Serve {
        /// Extra config file applied after the default locations
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address to listen on, e.g. ":8080" or "127.0.0.1:9000"
        #[arg(short, long)]
        listen: Option<String>,

        /// Root directory for uploaded data
        #[arg(short, long)]
        data_root: Option<PathBuf>,
    },

    /// Show whether a server is running and how many plugins are connected
    Status {
        #[arg(long, default_value = DEFAULT_SERVER_URL)]
        server: String,
    },

    /// Ask connected plugins to re-export their assets
    ScanAssets {
        /// Re-export everything, not just what changed
        #[arg(short, long)]
        force: bool,

        #[arg(long, default_value = DEFAULT_SERVER_URL)]
        server: String,
    },

    /// Push changed localization files to connected plugins
    ScanLocalization {
        /// Push every file, changed or not
        #[arg(short, long)]
        force: bool,

        #[arg(long, default_value = DEFAULT_SERVER_URL)]
        server: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("figpreview=info".parse()?)
                .add_directive("figpreview_server=info".parse()?)
                .add_directive("figpreview_core=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            listen,
            data_root,
        } => {
            cmd_serve(config, listen, data_root).await?;
        }
        Commands::Status { server } => {
            cmd_status(&server).await?;
        }
        Commands::ScanAssets { force, server } => {
            cmd_api(&server, "scanAssets", force).await?;
        }
        Commands::ScanLocalization { force, server } => {
            cmd_api(&server, "scanLocalizationFiles", force).await?;
        }
    }

    Ok(())
}

/// Start the server
async fn cmd_serve(
    config_path: Option<PathBuf>,
    listen: Option<String>,
    data_root: Option<PathBuf>,
) -> Result<()> {
    let mut config = AppConfig::load().context("Failed to load configuration")?;
    if let Some(path) = config_path {
        config
            .apply_required_file(&path)
            .context("Failed to apply configuration")?;
    }
    if let Some(listen) = listen {
        config.listen_address = listen;
    }
    if let Some(data_root) = data_root {
        config.data_root = data_root;
    }

    println!("Starting preview server on {}...", config.bind_address());
    run_server(config).await
}

/// Show status
async fn cmd_status(server: &str) -> Result<()> {
    let client = reqwest::Client::new();

    match client.get(format!("{}/health", server)).send().await {
        Ok(response) => {
            let health: serde_json::Value = response.json().await?;
            println!("Server status: {}", serde_json::to_string_pretty(&health)?);
        }
        Err(_) => {
            println!("Server is not running.");
            println!("Start it with: figpreview serve");
        }
    }

    Ok(())
}

/// Trigger a control action and wait for the plugin round trip
async fn cmd_api(server: &str, action: &str, force: bool) -> Result<()> {
    let client = reqwest::Client::new();
    let force = if force { "1" } else { "0" };

    let response = client
        .post(format!("{}/api", server))
        .form(&[("action", action), ("force", force)])
        .send()
        .await
        .with_context(|| format!("Failed to reach server at {}", server))?;

    let result: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&result)?);

    if result.get("status").and_then(|s| s.as_str()) != Some("ok") {
        let message = result
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown error");
        bail!("{} failed: {}", action, message);
    }

    Ok(())
}
