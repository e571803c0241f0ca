//! Copyright (c) 2025-2026, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了CLI命令行接口。

use crate::backend::RedisCacher;
use crate::config::{Config, MAX_LOCK_TTL_MS};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "oxlock")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Path to a TOML configuration file")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Redis URL, overrides the configuration file")]
    pub url: Option<String>,

    #[arg(long, global = true, default_value = "warn", help = "Log filter used when RUST_LOG is unset")]
    pub log: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[command(name = "probe", about = "Connect, register the CAS script and print its SHA")]
    Probe,

    #[command(name = "inspect", about = "Show what the cache holds for raw cache keys")]
    Inspect(InspectArgs),

    #[command(name = "invalidate", about = "Install lock markers on raw cache keys")]
    Invalidate(InvalidateArgs),

    #[command(name = "reload-script", about = "Re-register the CAS script after a script flush")]
    ReloadScript,
}

#[derive(Parser, Debug)]
pub struct InspectArgs {
    #[arg(required = true, help = "Raw cache keys")]
    pub keys: Vec<String>,

    #[arg(short, long, help = "Print entity payloads as UTF-8 where possible")]
    pub verbose: bool,
}

#[derive(Parser, Debug)]
pub struct InvalidateArgs {
    #[arg(required = true, help = "Raw cache keys")]
    pub keys: Vec<String>,

    #[arg(
        long,
        value_parser = clap::value_parser!(u64).range(1..=MAX_LOCK_TTL_MS),
        help = "Lock TTL in milliseconds, defaults to the configured lock_ttl_ms"
    )]
    pub ttl_ms: Option<u64>,
}

mod admin;
mod inspect;

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    crate::telemetry::init_tracing(&cli.log);

    let config = load_config(&cli)?;
    let cacher = RedisCacher::new(&config.redis, &config.limits)
        .await
        .context("Failed to connect to Redis")?;

    match &cli.command {
        Commands::Probe => admin::execute_probe(&cacher).await,
        Commands::Inspect(args) => inspect::execute(&cacher, args).await,
        Commands::Invalidate(args) => admin::execute_invalidate(&cacher, &config, args).await,
        Commands::ReloadScript => admin::execute_reload(&cacher).await,
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(url) = &cli.url {
        config.redis.connection_string = SecretString::new(url.clone().into());
    }
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("Invalid configuration")?;
    Ok(config)
}
