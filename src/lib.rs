#![deny(missing_docs)]
//! Client core for a wide-column store reached through its Thrift broker.
//!
//! The crate turns finder options into scan specifications, groups the
//! row-sorted cell stream that comes back into per-row records, batches
//! writes through server-side mutators and retries calls once across a
//! dropped connection. Large reads can stream through a [`Scanner`] instead
//! of one buffered call. [`Connection`] is the surface an ORM adapter calls;
//! it runs over any [`Broker`], either the wire client [`ThriftBroker`] or
//! the in-process [`MemoryBroker`].
//!
//! ```no_run
//! use hypercell::{Connection, ConnectionConfig, FindOptions, Select};
//!
//! # fn main() -> hypercell::Result<()> {
//! let mut conn = Connection::connect(ConnectionConfig::default().host("broker-1"))?;
//! let rows = conn.find(
//!     "pages",
//!     &FindOptions::default()
//!         .row_keys(["page_1"])
//!         .select(Select::Text("name, url".into())),
//! )?;
//! for row in rows {
//!     println!("{} {:?}", row.key, row.scalar("name"));
//! }
//! # Ok(())
//! # }
//! ```

mod observability;

/// Row assembly from row-sorted cell streams.
pub mod assemble;
/// Remote procedure surface shared by every broker.
pub mod broker;
/// Cell data model.
pub mod cell;
/// ORM-facing connection.
pub mod connection;
/// Error types.
pub mod error;
/// In-process broker with fault injection.
pub mod memory;
/// Per-connection metrics.
pub mod metrics;
/// Mutator handles and the write path.
pub mod mutator;
/// Connection settings.
pub mod option;
/// Reconnect-and-retry wrapper.
pub mod retry;
/// Finder options and scan specifications.
pub mod scan;
/// Server-side scanners streaming a scan in batches.
pub mod scanner;
/// Table schemas and DDL statements.
pub mod schema;
/// Thrift wire client.
pub mod thrift;

pub use crate::{
    assemble::{assemble, AssembleOptions, ColumnValue, Row, RowAssembler, Rows},
    broker::{Broker, HqlResult},
    cell::{Cell, CellArray, CellFlag},
    connection::Connection,
    error::{HyperError, RemoteError, Result, TransportError},
    memory::MemoryBroker,
    metrics::ConnectionMetrics,
    mutator::{CloseMode, MutateSpec, MutatorFlags, MutatorHandle, WriteOptions},
    option::ConnectionConfig,
    retry::{Reconnect, RetryPolicy},
    scan::{CellInterval, Conditions, FindOptions, OptionValue, RowInterval, ScanSpec, Select},
    scanner::{ScanRows, Scanner, ScannerHandle},
    schema::{ColumnDefinition, TableDefinition, TableSchema},
    thrift::ThriftBroker,
};
