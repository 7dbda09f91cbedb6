// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! gitwire server binary

use anyhow::Context;
use clap::Parser;
use gitwire_logging::CliLoggingArgs;
use gitwire_server::{Server, ServerConfig};
use std::path::PathBuf;

const COMPONENT: &str = "gitwire-server";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// First port to try; the next free port is used when it is busy
    #[arg(short, long, env = "PORT")]
    port: Option<u16>,

    /// Host name or address to bind
    #[arg(short = 'H', long, env = "HOST")]
    host: Option<String>,

    /// TOML configuration file
    #[arg(long, env = "GITWIRE_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    logging: CliLoggingArgs,
}

impl Args {
    /// Defaults, then the config file, then flags and environment
    fn server_config(&self) -> anyhow::Result<ServerConfig> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ServerConfig::default(),
        };
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        Ok(config)
    }
}

fn print_banner(server: &Server, log_path: Option<&std::path::Path>) {
    let divider = "=".repeat(50);
    let config = server.config();
    println!("{divider}");
    println!("Git Server Status");
    println!("{divider}");
    if server.port_changed() {
        println!(
            "Port {} was in use, switched to port {}",
            config.port,
            server.addr().port()
        );
    }
    println!("Local URL: http://{}:{}", config.host, server.addr().port());
    match log_path {
        Some(path) => println!("Log Path: {}", path.display()),
        None => println!("Log Path: (console only)"),
    }
    println!("{divider}");
    println!("Server started successfully\n");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let logging = args.logging.init(COMPONENT)?;
    let config = args.server_config()?;

    tracing::info!(host = %config.host, port = config.port, "Starting gitwire server");

    let server = Server::new(config).await.context("failed to start server")?;
    print_banner(&server, logging.log_dir());
    server.run_until(shutdown_signal()).await?;

    tracing::info!("Server stopped");
    Ok(())
}
