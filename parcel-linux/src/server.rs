//! Receiving daemon: accept connections one at a time and store the files they carry.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use parcel_core::{
    CommunicationError, Connection, DirectorySink, FileReception, TcpTransport, ThreadSleep,
};
use tokio::net::TcpListener;
use tokio::task::JoinError;

use crate::config::Config;

/// Serve until Ctrl+C or SIGTERM. A running session is cancelled at its next retry delay.
pub async fn run(cfg: Config) -> anyhow::Result<()> {
    let addr = SocketAddr::new(cfg.bind, cfg.port);
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, output_dir = %cfg.output_dir.display(), "receiver listening");

    let cancel = Arc::new(AtomicBool::new(false));
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let (stream, peer) = tokio::select! {
            r = &mut shutdown => {
                r?;
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok(a) => a,
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    continue;
                }
            },
        };
        let stream = stream.into_std()?;
        let session_cfg = cfg.clone();
        let session_cancel = cancel.clone();
        let mut session = tokio::task::spawn_blocking(move || {
            serve_session(stream, peer, &session_cfg, session_cancel)
        });
        tokio::select! {
            r = &mut shutdown => {
                cancel.store(true, Ordering::Relaxed);
                session_finished(peer, (&mut session).await);
                r?;
                break;
            }
            joined = &mut session => {
                session_finished(peer, joined);
            }
        }
    }
    tracing::info!("receiver stopped");
    Ok(())
}

/// Report a session task that did not run to completion. True if it ended normally.
fn session_finished(peer: SocketAddr, joined: Result<(), JoinError>) -> bool {
    match joined {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(%peer, "session task failed: {e}");
            false
        }
    }
}

/// One connection: receive files until the peer leaves, goes quiet or breaks the protocol.
fn serve_session(
    stream: std::net::TcpStream,
    peer: SocketAddr,
    cfg: &Config,
    cancel: Arc<AtomicBool>,
) {
    tracing::info!(%peer, "session opened");
    let transport = match TcpTransport::from_stream(stream) {
        Ok(t) => t,
        Err(e) => {
            tracing::error!(%peer, "could not set up connection: {e}");
            return;
        }
    };
    let mut conn = Connection::with_delay(
        transport,
        cfg.protocol.clone(),
        ThreadSleep::with_cancel(cancel),
    );
    let mut reception = FileReception::new(DirectorySink::new(&cfg.output_dir));
    let mut received = 0u32;
    loop {
        match conn.receive_file(&mut reception) {
            Ok(file) => {
                received += 1;
                tracing::info!(
                    %peer,
                    name = %file.name,
                    size = file.size,
                    "stored {}",
                    file.location.display()
                );
            }
            Err(CommunicationError::Disconnected) => break,
            Err(CommunicationError::RetryExhausted { attempts, .. }) => {
                tracing::info!(%peer, attempts, "peer idle, closing session");
                break;
            }
            Err(CommunicationError::DelayInterrupted(_)) => {
                tracing::info!(%peer, "session cancelled");
                break;
            }
            Err(e) => {
                tracing::error!(%peer, "session failed: {e}");
                break;
            }
        }
    }
    if let Err(e) = conn.close() {
        tracing::warn!(%peer, "{e}");
    }
    tracing::info!(%peer, files = received, "session closed");
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).context("installing SIGTERM handler")?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    tracing::info!("shutdown requested");
    Ok(())
}
