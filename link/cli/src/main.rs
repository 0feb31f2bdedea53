//! agent-link - Command-line client for agent servers
//!
//! Decodes pairing payloads, manages saved connection profiles and talks to
//! an agent server over WebSocket.
//!
//! # Usage
//!
//! ```bash
//! # Inspect a pairing payload (file or stdin)
//! agent-link decode pairing.json
//! cat pairing.json | agent-link decode -
//!
//! # Pair, save the profile and start chatting
//! agent-link pair pairing.json
//!
//! # Reconnect to the current profile, or a specific server
//! agent-link connect
//! agent-link connect --host 192.168.1.20 --port 8765
//!
//! # Saved profiles
//! agent-link profiles list
//! agent-link profiles remove 192.168.1.20 8765
//!
//! # One-shot message
//! agent-link send "/status"
//!
//! # Verbose logging
//! RUST_LOG=debug agent-link connect
//! ```

mod interactive;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use agent_link_core::{
    load_config_from_path, ConfigOverrides, ConnectionProfile, LinkConfig, LinkContext,
    PairingCodec, ProfileKey, WebSocketTransport,
};

/// agent-link - Pair with and talk to agent servers
#[derive(Parser, Debug)]
#[command(name = "agent-link")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "AGENT_LINK_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "AGENT_LINK_LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Profile store file (overrides config and environment)
    #[arg(long, value_name = "FILE")]
    profile_store: Option<PathBuf>,

    /// Handshake timeout in milliseconds (overrides config and environment)
    #[arg(long, value_name = "MS")]
    connect_timeout: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Decode a pairing payload and print the profile it describes
    Decode {
        /// Payload file, or `-` for stdin
        input: String,
    },

    /// Decode a pairing payload, connect and start an interactive session
    Pair {
        /// Payload file, or `-` for stdin
        input: String,

        /// Only save the profile, do not connect
        #[arg(long)]
        no_connect: bool,

        /// Print the canonical payload for the decoded profile
        #[arg(long)]
        emit: bool,
    },

    /// Connect and start an interactive session
    ///
    /// Uses the current profile unless a host and port are given.
    Connect {
        /// Server host
        #[arg(long, requires = "port")]
        host: Option<String>,

        /// Server port
        #[arg(long, requires = "host")]
        port: Option<u16>,

        /// WebSocket path
        #[arg(long)]
        path: Option<String>,
    },

    /// Manage saved profiles
    Profiles {
        #[command(subcommand)]
        action: ProfilesCommand,
    },

    /// Send one message to the current profile and exit
    Send {
        /// Message text; lines starting with `/` are sent as commands
        text: String,
    },
}

#[derive(Subcommand, Debug)]
enum ProfilesCommand {
    /// List saved profiles, most recently used first
    List,
    /// Remove a saved profile
    Remove {
        /// Server host
        host: String,
        /// Server port
        port: u16,
    },
    /// Remove every saved profile
    Clear,
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so command output stays clean.
fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("agent_link={level},agent_link_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

/// Load configuration, then apply CLI overrides
fn build_config(args: &Args) -> Result<LinkConfig> {
    let path = args
        .config
        .clone()
        .or_else(agent_link_core::default_config_path);
    let mut config = load_config_from_path(path).context("Failed to load configuration")?;

    let mut overrides = ConfigOverrides::new();
    if let Some(ms) = args.connect_timeout {
        overrides = overrides.with_connect_timeout_ms(ms);
    }
    if let Some(ref path) = args.profile_store {
        overrides = overrides.with_profile_store_path(path.clone());
    }
    overrides
        .apply(&mut config)
        .context("Invalid command-line override")?;

    debug!(source = %config.source(), "Configuration resolved");
    Ok(config)
}

/// Read a payload from a file, or stdin for `-`
async fn read_input(input: &str) -> Result<Vec<u8>> {
    if input == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("Failed to read payload from stdin")?;
        Ok(buf)
    } else {
        tokio::fs::read(input)
            .await
            .with_context(|| format!("Failed to read payload file: {input}"))
    }
}

fn print_profile(profile: &ConnectionProfile) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(profile)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let config = build_config(&args)?;

    // Decoding needs no context
    if let Command::Decode { ref input } = args.command {
        let payload = read_input(input).await?;
        let profile = PairingCodec::decode(&payload).context("Invalid pairing payload")?;
        return print_profile(&profile);
    }

    let storage = LinkContext::storage_for(&config);
    let ctx = LinkContext::init(config, Arc::new(WebSocketTransport::new()), storage);

    match args.command {
        Command::Decode { .. } => Ok(()),
        Command::Pair {
            input,
            no_connect,
            emit,
        } => {
            let payload = read_input(&input).await?;
            if no_connect || emit {
                let profile = PairingCodec::decode(&payload).context("Invalid pairing payload")?;
                if emit {
                    println!("{}", String::from_utf8_lossy(&PairingCodec::encode(&profile)));
                }
                if no_connect {
                    ctx.store.save(profile.clone());
                    info!(host = %profile.host, port = profile.port, "Profile saved");
                    println!("Saved {}", profile.label());
                    return Ok(());
                }
            }

            match ctx.session.connect_with_pairing(&payload).await {
                Ok(_) => interactive::run(&ctx).await,
                Err(e) => {
                    interactive::report_failure(&ctx).await;
                    Err(e).context("Pairing failed")
                }
            }
        }
        Command::Connect { host, port, path } => {
            let result = match (host, port) {
                (Some(host), Some(port)) => {
                    let mut profile = ConnectionProfile::new(host, port);
                    if let Some(path) = path {
                        profile = profile.with_path(path);
                    }
                    ctx.session.connect(profile).await
                }
                _ => {
                    if ctx.store.current().is_none() {
                        anyhow::bail!("No saved profile. Pair first or pass --host and --port");
                    }
                    ctx.session.reconnect().await
                }
            };

            if result.is_err() {
                interactive::report_failure(&ctx).await;
            }
            result.context("Connection failed")?;
            interactive::run(&ctx).await
        }
        Command::Profiles { action } => {
            match action {
                ProfilesCommand::List => {
                    let current = ctx.store.current().map(|p| p.key());
                    if ctx.store.is_empty() {
                        println!("No saved profiles");
                    }
                    for profile in ctx.store.profiles() {
                        let marker = if Some(profile.key()) == current { '*' } else { ' ' };
                        println!(
                            "{marker} {:<24} {}  (last used {})",
                            profile.label(),
                            profile.endpoint(),
                            profile.last_connected_at.format("%Y-%m-%d %H:%M")
                        );
                    }
                }
                ProfilesCommand::Remove { host, port } => {
                    let key = ProfileKey::new(host, port);
                    if ctx.store.get(&key).is_none() {
                        println!("No profile saved for {key}");
                    } else {
                        ctx.store.remove(&key);
                        println!("Removed {key}");
                    }
                }
                ProfilesCommand::Clear => {
                    ctx.store.clear();
                    println!("All profiles removed");
                }
            }
            if let Some(err) = ctx.store.last_persist_error() {
                anyhow::bail!("Profiles could not be saved: {err}");
            }
            Ok(())
        }
        Command::Send { text } => {
            if let Err(e) = ctx.session.reconnect().await {
                interactive::report_failure(&ctx).await;
                return Err(e).context("Connection failed");
            }
            let result = interactive::send_line(&ctx, &text).await;
            ctx.session.disconnect();
            result.context("Send failed")
        }
    }
}
