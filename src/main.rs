// SPDX-FileCopyrightText: © 2026 PrivKey LLC
// SPDX-License-Identifier: AGPL-3.0-or-later

#![deny(unsafe_code)]

mod cli;

use clap::Parser;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

use keep_link::config::Config;
use keep_link::{compute_relay_plan, LinkError, RelayPlanOptions, Result};

use crate::cli::{Cli, Commands};

fn init_logging(default_level: &str) {
    let use_json = std::env::var("KEEP_LINK_LOG_JSON").is_ok();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    if use_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .without_time()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn config_path(cli: &Cli) -> Result<std::path::PathBuf> {
    match &cli.config {
        Some(p) => Ok(p.clone()),
        None => Config::default_path(),
    }
}

fn no_group_decoder(_: &str) -> Result<serde_json::Value> {
    Err(LinkError::Decode(
        "group credentials are not decoded by the CLI".into(),
    ))
}

fn run(cli: Cli, cfg: Config) -> Result<()> {
    match cli.command {
        Commands::RelayPlan { relays, env_relay } => {
            let mut options = RelayPlanOptions::default()
                .with_base_relays(cfg.base_relays())
                .with_explicit_relays(relays);
            if let Some(env) = env_relay {
                options = options.with_env_relay(&env);
            }
            let plan = compute_relay_plan(&options, &no_group_decoder);
            debug!(relays = plan.relays.len(), "computed plan");
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Commands::Config => {
            let rendered = toml::to_string_pretty(&cfg)
                .map_err(|e| LinkError::Config(format!("Failed to render config: {e}")))?;
            println!("{rendered}");
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    let path = match config_path(&cli) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };

    let loaded = if path.exists() {
        Config::from_file(&path)
    } else {
        Ok(Config::default())
    };
    let level = loaded
        .as_ref()
        .map(|cfg| cfg.log_level)
        .unwrap_or_default();
    init_logging(&level.to_string());

    let cfg = loaded.unwrap_or_else(|e| {
        warn!(path = %path.display(), error = %e, "Ignoring unreadable config, using defaults");
        Config::default()
    });

    if let Err(e) = run(cli, cfg) {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
