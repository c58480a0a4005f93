// src/driver/tail.rs
//! `tail -f` for JSON-lines log files.
//!
//! The file is polled for growth; new complete lines are handed over, a
//! trailing partial line is kept until its newline shows up. A shrinking
//! file or a new inode (log rotation) restarts reading from the top of the
//! new file.

use std::io::SeekFrom;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::ConnectorContext;

#[derive(Clone, Debug)]
pub struct TailCfg {
    pub path: PathBuf,
    /// How many times to look for a missing file before giving up.
    pub wait_retries: u32,
    pub wait_delay: Duration,
    pub poll_interval: Duration,
}

impl TailCfg {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            wait_retries: 20,
            wait_delay: Duration::from_secs(5),
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Waits until `path` is a readable regular file.
pub async fn wait_for_file(path: &Path, retries: u32, delay: Duration) -> Result<()> {
    for attempt in 0..=retries {
        if let Ok(meta) = tokio::fs::metadata(path).await {
            if meta.is_file() && File::open(path).await.is_ok() {
                return Ok(());
            }
        }
        if attempt < retries {
            tracing::debug!(path = %path.display(), attempt, "waiting for file");
            tokio::time::sleep(delay).await;
        }
    }
    bail!("cannot read file {}", path.display())
}

pub struct FileTail {
    path: PathBuf,
    file: File,
    pos: u64,
    inode: u64,
    partial: Vec<u8>,
}

impl FileTail {
    /// Opens `path` positioned at its current end: existing content is not
    /// replayed.
    pub async fn open_at_end(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut file = File::open(&path)
            .await
            .with_context(|| format!("opening {}", path.display()))?;
        let meta = file.metadata().await?;
        let pos = file.seek(SeekFrom::End(0)).await?;
        Ok(Self {
            path,
            file,
            pos,
            inode: meta.ino(),
            partial: Vec::new(),
        })
    }

    /// Complete lines appended since the last call, without their newline.
    pub async fn read_lines(&mut self) -> Result<Vec<Vec<u8>>> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(m) => m,
            // Mid-rotation: the new file is not there yet.
            Err(_) => return Ok(Vec::new()),
        };
        if meta.ino() != self.inode || meta.len() < self.pos {
            tracing::info!(path = %self.path.display(), "file truncated or rotated, reopening");
            self.file = File::open(&self.path)
                .await
                .with_context(|| format!("reopening {}", self.path.display()))?;
            self.inode = meta.ino();
            self.pos = 0;
            self.partial.clear();
        }

        self.file.seek(SeekFrom::Start(self.pos)).await?;
        let mut buf = Vec::new();
        let n = self.file.read_to_end(&mut buf).await?;
        self.pos += n as u64;
        self.partial.extend_from_slice(&buf);

        let mut lines = Vec::new();
        while let Some(nl) = self.partial.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.partial.drain(..=nl).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(line);
        }
        Ok(lines)
    }
}

/// Tails the configured file forever, one alert per non-blank line.
pub async fn run(ctx: ConnectorContext, cfg: TailCfg) -> Result<()> {
    wait_for_file(&cfg.path, cfg.wait_retries, cfg.wait_delay).await?;
    let mut tail = FileTail::open_at_end(&cfg.path).await?;
    tracing::info!(connector = ctx.name(), path = %cfg.path.display(), "tailing file");

    let mut ticker = tokio::time::interval(cfg.poll_interval);
    loop {
        ticker.tick().await;
        for line in tail.read_lines().await? {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            ctx.handle_raw(&line).await;
        }
    }
}
