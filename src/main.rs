mod config;
mod crypto;
mod errors;
mod files;
mod logging;
mod security;
mod server;

use crate::config::Config;
use crate::logging::LogFormat;
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

/// Per-user file storage over HTTP, optionally encrypted at rest.
#[derive(Parser, Debug)]
#[command(name = "coffer", version, about)]
struct Cli {
    /// Path to the configuration file (TOML, or JSON by extension)
    #[arg(short, long, global = true, env = "COFFER_CONFIG", default_value = "coffer.toml")]
    config: PathBuf,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value = "json")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP server (default)
    Serve,
    /// Print a fresh base64 encryption key for the [encryption] section
    Keygen,
    /// Print the token_sha256 value for a user's bearer token
    HashToken {
        token: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Keygen => {
            println!("{}", crypto::generate_key());
            Ok(())
        }
        Command::HashToken { token } => {
            println!("{}", security::hash_token(&token));
            Ok(())
        }
        Command::Serve => {
            logging::init(cli.log_format);

            let cfg = Config::load(&cli.config)
                .with_context(|| format!("loading config {}", cli.config.display()))?;
            cfg.validate().context("validating config")?;
            cfg.provision_user_roots().context("creating user roots")?;

            info!(
                config = %cli.config.display(),
                users = cfg.auth.users.len(),
                data_dir = %cfg.storage.data_dir.display(),
                "coffer ready"
            );

            server::serve(cfg).await
        }
    }
}
