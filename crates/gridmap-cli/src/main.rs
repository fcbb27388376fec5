// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of GridMap.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

mod args;
mod commands;
mod fetch;
mod output;

use anyhow::Result;
use clap::Parser;
use gridmap_ha::{HaClient, HaError};
use tracing_subscriber::FmtSubscriber;

use args::{Cli, Command};
use output::Console;

const EXIT_TRANSPORT: i32 = 1;
const EXIT_INVALID_INPUT: i32 = 2;

fn main() {
    // Respects the RUST_LOG environment variable.
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("WARN    Failed to install tracing subscriber");
    }

    let cli = Cli::parse();
    let console = Console::new();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            console.error(&format!("Failed to start runtime: {error}"));
            std::process::exit(EXIT_INVALID_INPUT);
        }
    };

    if let Err(error) = runtime.block_on(run(cli, &console)) {
        console.error(&format!("{error:#}"));
        let code = if error.downcast_ref::<HaError>().is_some() {
            EXIT_TRANSPORT
        } else {
            EXIT_INVALID_INPUT
        };
        std::process::exit(code);
    }
}

async fn run(cli: Cli, console: &Console) -> Result<()> {
    let mut client = HaClient::connect(&cli.url, &cli.token).await?;

    let result = match &cli.command {
        Command::Audit { format } => commands::audit::audit(&mut client, console, *format).await,
        Command::Areas {
            mapping,
            create_missing,
        } => {
            commands::areas::areas(
                &mut client,
                console,
                cli.dry_run,
                mapping.as_deref(),
                *create_missing,
            )
            .await
        }
        Command::Energy { topology } => {
            commands::energy::energy(&mut client, console, cli.dry_run, *topology).await
        }
        Command::EnergyTopology => {
            commands::energy::energy_topology_show(&mut client, console).await
        }
        Command::EnergyAudit { prune } => {
            commands::energy::energy_audit(&mut client, console, cli.dry_run, *prune).await
        }
        Command::LinkPanels { links } => {
            commands::panels::link_panels(&mut client, console, cli.dry_run, links).await
        }
        Command::Water { entity_ids } => {
            commands::water::water(&mut client, console, cli.dry_run, entity_ids).await
        }
    };

    client.close().await;
    result
}
