//! Relay Engine

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::session::{DirectionEnd, RelaySession, RelayStats};
use crate::config::{ForwarderConfig, DEFAULT_BUFFER_SIZE};

/// Copies bytes both ways between two connected streams
#[derive(Debug, Clone, Copy)]
pub struct RelayEngine {
    buffer_size: usize,
}

impl RelayEngine {
    /// Create a relay engine with the default 64 KiB buffer per direction
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER_SIZE)
    }

    pub fn with_buffer_size(buffer_size: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn from_config(config: &ForwarderConfig) -> Self {
        Self::with_buffer_size(config.buffer_size)
    }

    /// Relay between `inbound` and `outbound` until both directions end.
    ///
    /// A direction that sees end-of-stream shuts down the write side of its
    /// destination and leaves the other direction running. A transport error
    /// in either direction stops the other one as well. Both streams are
    /// dropped, and therefore closed, before this returns.
    pub async fn relay<A, B>(&self, inbound: A, outbound: B) -> RelayStats
    where
        A: AsyncRead + AsyncWrite,
        B: AsyncRead + AsyncWrite,
    {
        let session = RelaySession::new();

        let (inbound_rx, inbound_tx) = tokio::io::split(inbound);
        let (outbound_rx, outbound_tx) = tokio::io::split(outbound);

        let upstream = copy_direction(inbound_rx, outbound_tx, self.buffer_size, session.up_counter());
        let downstream = copy_direction(outbound_rx, inbound_tx, self.buffer_size, session.down_counter());
        tokio::pin!(upstream, downstream);

        let (upstream_end, downstream_end) = tokio::select! {
            up = &mut upstream => {
                let down = if up.is_error() { DirectionEnd::Aborted } else { downstream.await };
                (up, down)
            }
            down = &mut downstream => {
                let up = if down.is_error() { DirectionEnd::Aborted } else { upstream.await };
                (up, down)
            }
        };

        let stats = session.finish(upstream_end, downstream_end);
        debug!(
            bytes_up = stats.bytes_up,
            bytes_down = stats.bytes_down,
            upstream = ?stats.upstream_end,
            downstream = ?stats.downstream_end,
            "Relay finished"
        );
        stats
    }
}

impl Default for RelayEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy `reader` into `writer` until EOF or error, then shut `writer` down.
async fn copy_direction<R, W>(mut reader: R, mut writer: W, buffer_size: usize, counter: &AtomicU64) -> DirectionEnd
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; buffer_size];

    let end = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break DirectionEnd::Eof,
            Ok(n) => n,
            Err(e) => {
                debug!(error = %e, "Relay read ended");
                break DirectionEnd::Error(e.kind());
            }
        };

        if let Err(e) = writer.write_all(&buf[..n]).await {
            debug!(error = %e, "Relay write ended");
            break DirectionEnd::Error(e.kind());
        }
        counter.fetch_add(n as u64, Ordering::Relaxed);
    };

    // Flushes, then half-closes the destination.
    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "Relay shutdown of destination failed");
    }

    end
}
