// src/driver/socket.rs
//! Unix stream socket input, one JSON alert per line.
//!
//! Connections are served one after another. A line that is not valid
//! UTF-8 or JSON is counted and logged, and reading carries on with the
//! next line of the same connection.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use super::ConnectorContext;

/// Binds a Unix stream socket at `path`, replacing a stale socket file.
pub fn bind(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("removing stale socket {}", path.display()))?;
    }
    UnixListener::bind(path).with_context(|| format!("binding {}", path.display()))
}

/// Accepts connections one at a time; every line received is one alert.
pub async fn serve(listener: UnixListener, ctx: ConnectorContext) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(connector = ctx.name(), socket = ?addr, "listening on Unix socket");
    }
    loop {
        let (stream, _) = listener.accept().await.context("accepting connection")?;
        if let Err(e) = handle_connection(stream, &ctx).await {
            tracing::warn!(connector = ctx.name(), error = ?e, "connection dropped");
        }
    }
}

async fn handle_connection(stream: UnixStream, ctx: &ConnectorContext) -> Result<()> {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(());
        }
        let line = buf.trim_ascii();
        if !line.is_empty() {
            ctx.handle_raw(line).await;
        }
    }
}
