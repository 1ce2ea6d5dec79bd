//! Relay Session

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How one copy direction came to an end
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectionEnd {
    /// Source reached end-of-stream
    Eof,
    /// Transport error while reading or writing
    Error(io::ErrorKind),
    /// Stopped because the opposite direction hit a transport error
    Aborted,
}

impl DirectionEnd {
    pub fn is_error(&self) -> bool {
        matches!(self, DirectionEnd::Error(_))
    }
}

/// Byte counters for a relay in progress
#[derive(Debug)]
pub struct RelaySession {
    start_time: Instant,
    bytes_up: AtomicU64,
    bytes_down: AtomicU64,
}

/// Statistics for a completed relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayStats {
    /// Bytes copied from the inbound stream to the outbound stream
    pub bytes_up: u64,
    /// Bytes copied from the outbound stream to the inbound stream
    pub bytes_down: u64,
    pub duration: Duration,
    pub upstream_end: DirectionEnd,
    pub downstream_end: DirectionEnd,
}

impl RelaySession {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            bytes_up: AtomicU64::new(0),
            bytes_down: AtomicU64::new(0),
        }
    }

    pub fn bytes_up(&self) -> u64 {
        self.bytes_up.load(Ordering::Relaxed)
    }

    pub fn bytes_down(&self) -> u64 {
        self.bytes_down.load(Ordering::Relaxed)
    }

    pub fn duration(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub(crate) fn up_counter(&self) -> &AtomicU64 {
        &self.bytes_up
    }

    pub(crate) fn down_counter(&self) -> &AtomicU64 {
        &self.bytes_down
    }

    /// Freeze the counters into final statistics
    pub fn finish(&self, upstream_end: DirectionEnd, downstream_end: DirectionEnd) -> RelayStats {
        RelayStats {
            bytes_up: self.bytes_up(),
            bytes_down: self.bytes_down(),
            duration: self.duration(),
            upstream_end,
            downstream_end,
        }
    }
}

impl Default for RelaySession {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayStats {
    pub fn total_bytes(&self) -> u64 {
        self.bytes_up + self.bytes_down
    }
}
