// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! `hostedcp` - create and destroy the cloud infrastructure of hosted clusters.
//!
//! ```text
//! hostedcp create infra powervs --base-domain example.com --resource-group rg \
//!     --infra-id demo-x7k2p --output-file infra.json
//! hostedcp destroy infra powervs --base-domain example.com --resource-group rg \
//!     --infra-id demo-x7k2p --infra-json infra.json
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use hostedcp::powervs::{create_infra, run_destroy, CreateOptions, DestroyOptions};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Hosted cluster infrastructure tooling
#[derive(Parser, Debug)]
#[command(name = "hostedcp", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create resources
    #[command(subcommand)]
    Create(CreateCommand),

    /// Destroy resources
    #[command(subcommand)]
    Destroy(DestroyCommand),
}

#[derive(Subcommand, Debug)]
enum CreateCommand {
    /// Create cloud infrastructure for a hosted cluster
    #[command(subcommand)]
    Infra(CreateInfra),
}

#[derive(Subcommand, Debug)]
enum CreateInfra {
    /// Create PowerVS and VPC infrastructure in IBM Cloud
    Powervs(CreateOptions),
}

#[derive(Subcommand, Debug)]
enum DestroyCommand {
    /// Destroy the cloud infrastructure of a hosted cluster
    #[command(subcommand)]
    Infra(DestroyInfra),
}

#[derive(Subcommand, Debug)]
enum DestroyInfra {
    /// Destroy PowerVS and VPC infrastructure in IBM Cloud
    Powervs(DestroyOptions),
}

fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    // Logs go to stderr so an infra record printed to stdout stays parseable
    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .compact()
                .init();
        }
    }
}

/// Cancel `token` on Ctrl-C so in-flight polls stop at their next check.
fn cancel_on_interrupt(token: &CancellationToken) {
    let token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

async fn create(options: CreateOptions) -> Result<()> {
    options.validate()?;
    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel);

    let (infra, result) = create_infra(&options, &cancel).await;
    // The record is written even for a failed run so destroy can find what
    // was created.
    infra.write_json(options.output_file.as_deref())?;
    result?;

    info!(infra_id = %options.infra_id, "Successfully created infrastructure");
    Ok(())
}

async fn destroy(options: DestroyOptions) -> Result<()> {
    options.validate()?;
    let cancel = CancellationToken::new();
    cancel_on_interrupt(&cancel);

    run_destroy(&options, &cancel).await?;

    info!(infra_id = %options.infra_id, "Successfully destroyed infrastructure");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Create(CreateCommand::Infra(CreateInfra::Powervs(options))) => {
            init_tracing(options.debug);
            create(options).await
        }
        Command::Destroy(DestroyCommand::Infra(DestroyInfra::Powervs(options))) => {
            init_tracing(options.debug);
            destroy(options).await
        }
    }
}
