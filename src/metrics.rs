//! Per-connection read/write statistics.
//!
//! Each [`Connection`](crate::connection::Connection) owns one collector, so
//! counts never leak between connections or between tests. Applications read
//! and reset them after each request for their own logging.

use std::time::Duration;

/// Counters collected by one connection.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionMetrics {
    /// Read calls made, failed ones included.
    pub reads: u64,
    /// Write calls made, failed ones included.
    pub writes: u64,
    /// Time spent in read calls, including retries and failed calls.
    pub read_latency: Duration,
    /// Time spent in write calls, including mutator open/close and failed
    /// calls.
    pub write_latency: Duration,
    /// Cells returned by queries.
    pub cells_read: u64,
    /// Cells handed to the store for writing, whether or not the write
    /// succeeded.
    pub cells_written: u64,
    /// Reconnects performed by the retry wrapper.
    pub reconnects: u64,
    /// Calls that still failed with a transient error after retrying.
    pub retries_exhausted: u64,
}

impl ConnectionMetrics {
    /// Record a read call, successful or not. `cells` is what it returned,
    /// zero for a failed call.
    pub fn record_read(&mut self, elapsed: Duration, cells: usize) {
        self.reads = self.reads.saturating_add(1);
        self.read_latency = self.read_latency.saturating_add(elapsed);
        self.cells_read = self.cells_read.saturating_add(cells as u64);
    }

    /// Record a write call, successful or not. `cells` is the batch size.
    pub fn record_write(&mut self, elapsed: Duration, cells: usize) {
        self.writes = self.writes.saturating_add(1);
        self.write_latency = self.write_latency.saturating_add(elapsed);
        self.cells_written = self.cells_written.saturating_add(cells as u64);
    }

    /// Record a reconnect.
    pub fn record_reconnect(&mut self) {
        self.reconnects = self.reconnects.saturating_add(1);
    }

    /// Record a call whose retries ran out.
    pub fn record_retry_exhausted(&mut self) {
        self.retries_exhausted = self.retries_exhausted.saturating_add(1);
    }

    /// `(read_latency, write_latency, cells_read)`.
    pub fn timing(&self) -> (Duration, Duration, u64) {
        (self.read_latency, self.write_latency, self.cells_read)
    }

    /// Zero every counter.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
