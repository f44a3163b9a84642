// SPDX-FileCopyrightText: © 2026 PrivKey LLC
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "keep-link")]
#[command(about = "Relay planning and connectivity tooling for FROST signers")]
#[command(version)]
pub(crate) struct Cli {
    #[arg(short, long, global = true, help = "Path to config.toml")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Print the relay plan for the given sources as JSON
    RelayPlan {
        #[arg(short, long = "relay")]
        relays: Vec<String>,
        #[arg(long, env = "KEEP_LINK_RELAY")]
        env_relay: Option<String>,
    },
    /// Print the effective configuration
    Config,
}
