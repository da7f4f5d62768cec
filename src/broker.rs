//! The remote procedure surface of the store's broker.
//!
//! [`ThriftBroker`](crate::thrift::ThriftBroker) speaks it over the wire;
//! [`MemoryBroker`](crate::memory::MemoryBroker) implements it in process.
//! Implementations are single-owner: a broker is never shared between
//! concurrent callers, and `reconnect` replaces the transport in place.

use crate::{
    cell::Cell,
    error::Result,
    mutator::{CloseMode, MutateSpec, MutatorFlags, MutatorHandle},
    retry::Reconnect,
    scan::ScanSpec,
    scanner::ScannerHandle,
};

/// Outcome of an HQL statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HqlResult {
    /// Textual result lines (e.g. `SHOW TABLES`).
    pub results: Vec<String>,
    /// Cells returned by a `SELECT`.
    pub cells: Vec<Cell>,
    /// Scanner handle when the statement opened one.
    pub scanner: Option<ScannerHandle>,
    /// Mutator handle when the statement opened one.
    pub mutator: Option<MutatorHandle>,
}

/// Remote procedures used by the connection layer.
pub trait Broker: Reconnect {
    /// Execute an HQL statement.
    fn hql_query(&mut self, statement: &str) -> Result<HqlResult>;

    /// Fetch the cells matching `spec`, sorted by row key.
    fn get_cells(&mut self, table: &str, spec: &ScanSpec) -> Result<Vec<Cell>>;

    /// Open a server-side cursor over the cells matching `spec`.
    fn open_scanner(&mut self, table: &str, spec: &ScanSpec) -> Result<ScannerHandle>;

    /// Next batch of an open scanner, sorted by row key. An empty batch
    /// means the scan is exhausted.
    fn next_cells(&mut self, scanner: ScannerHandle) -> Result<Vec<Cell>>;

    /// Release a scanner.
    fn close_scanner(&mut self, scanner: ScannerHandle) -> Result<()>;

    /// Open a server-side write batch.
    fn open_mutator(
        &mut self,
        table: &str,
        flags: MutatorFlags,
        flush_interval: u32,
    ) -> Result<MutatorHandle>;

    /// Append cells to an open mutator.
    fn set_cells(&mut self, mutator: MutatorHandle, cells: &[Cell]) -> Result<()>;

    /// Make everything written to the mutator durable.
    fn flush_mutator(&mut self, mutator: MutatorHandle) -> Result<()>;

    /// Release a mutator.
    fn close_mutator(&mut self, mutator: MutatorHandle, mode: CloseMode) -> Result<()>;

    /// Fire-and-forget write that bypasses mutator handles.
    fn put_cells(&mut self, table: &str, spec: &MutateSpec, cells: &[Cell]) -> Result<()>;

    /// Schema-description document of a table.
    fn get_schema(&mut self, table: &str) -> Result<String>;

    /// Names of every table.
    fn get_tables(&mut self) -> Result<Vec<String>>;

    /// Drop a table.
    fn drop_table(&mut self, table: &str, if_exists: bool) -> Result<()>;
}
