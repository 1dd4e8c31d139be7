// Parcel for Linux: file receiver daemon, file sender and connection probe.

mod client;
mod config;
mod server;

use std::net::IpAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use parcel_core::{CommunicationError, StatusCode};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "parcel", version, about = "Send and receive files over the parcel protocol")]
struct Cli {
    /// Config file (default: ~/.config/parcel/config.toml, then /etc/parcel/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Log debug output
    #[arg(long, global = true, conflicts_with = "quiet")]
    debug: bool,
    /// Log errors only
    #[arg(short, long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Receive files into the output directory
    Serve {
        #[arg(long)]
        bind: Option<IpAddr>,
        #[arg(short, long)]
        port: Option<u16>,
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// Send a file to a receiver
    Send {
        /// Receiver address, HOST or HOST:PORT
        addr: String,
        file: PathBuf,
    },
    /// Check that a receiver answers
    Ping {
        /// Receiver address, HOST or HOST:PORT
        addr: String,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    if let Err(e) = setup_tracing(cli.debug, cli.quiet) {
        eprintln!("parcel: {e:#}");
        return exit_code(StatusCode::GenericError);
    }
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            exit_code(status_of(&e))
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let mut cfg = config::load(cli.config.as_deref())?;
    match cli.command {
        Command::Serve {
            bind,
            port,
            output_dir,
        } => {
            if let Some(b) = bind {
                cfg.bind = b;
            }
            if let Some(p) = port {
                cfg.port = p;
            }
            if let Some(d) = output_dir {
                cfg.output_dir = d;
            }
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(server::run(cfg))
        }
        Command::Send { addr, file } => client::send(&cfg, &addr, &file),
        Command::Ping { addr } => client::ping(&cfg, &addr),
    }
}

/// RUST_LOG wins; otherwise log parcel crates at the level the flags ask for.
fn setup_tracing(debug: bool, quiet: bool) -> anyhow::Result<()> {
    let level = if debug {
        "debug"
    } else if quiet {
        "error"
    } else {
        "info"
    };
    let filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(e) if std::env::var(EnvFilter::DEFAULT_ENV).is_ok() => {
            anyhow::bail!("RUST_LOG (set in environment) was not understood: {e}")
        }
        Err(_) => EnvFilter::try_new(format!("parcel={level}"))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

fn status_of(e: &anyhow::Error) -> StatusCode {
    e.chain()
        .find_map(|cause| cause.downcast_ref::<CommunicationError>())
        .map_or(StatusCode::GenericError, CommunicationError::status_code)
}

fn exit_code(status: StatusCode) -> ExitCode {
    ExitCode::from(u8::try_from(status.code()).unwrap_or(1))
}
