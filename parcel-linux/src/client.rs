//! Sending side: push a file to a receiver, or probe one.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use parcel_core::{Connection, TcpTransport};

use crate::config::Config;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolve `addr`, which may omit the port.
fn resolve(addr: &str, default_port: u16) -> anyhow::Result<SocketAddr> {
    let mut candidates = match addr.parse::<SocketAddr>() {
        Ok(a) => vec![a],
        Err(_) if addr.contains(':') && !addr.contains("::") => addr
            .to_socket_addrs()
            .with_context(|| format!("resolving {addr}"))?
            .collect(),
        Err(_) => (addr.trim_matches(['[', ']']), default_port)
            .to_socket_addrs()
            .with_context(|| format!("resolving {addr}"))?
            .collect(),
    };
    if candidates.is_empty() {
        anyhow::bail!("{addr} did not resolve to any address");
    }
    Ok(candidates.swap_remove(0))
}

fn connect(cfg: &Config, addr: &str) -> anyhow::Result<Connection<TcpTransport>> {
    let addr = resolve(addr, cfg.port)?;
    tracing::debug!(%addr, "connecting");
    let transport = TcpTransport::connect_timeout(&addr, CONNECT_TIMEOUT)
        .with_context(|| format!("connecting to {addr}"))?;
    Ok(Connection::new(transport, cfg.protocol.clone()))
}

/// Send `file` to the receiver at `addr`.
pub fn send(cfg: &Config, addr: &str, file: &Path) -> anyhow::Result<()> {
    let mut conn = connect(cfg, addr)?;
    let sent = conn
        .send_local_file(file)
        .with_context(|| format!("sending {}", file.display()));
    if let Err(e) = conn.close() {
        tracing::warn!("{e}");
    }
    sent?;
    println!("sent {}", file.display());
    Ok(())
}

/// Check that a receiver at `addr` answers.
pub fn ping(cfg: &Config, addr: &str) -> anyhow::Result<()> {
    let mut conn = connect(cfg, addr)?;
    let checked = conn
        .check_connection()
        .with_context(|| format!("checking connection to {addr}"));
    if let Err(e) = conn.close() {
        tracing::warn!("{e}");
    }
    checked?;
    println!("{} is reachable", conn.transport().peer_addr());
    Ok(())
}
