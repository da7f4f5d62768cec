//! Mutators: server-side write batches.
//!
//! A mutator is opened, written to any number of times, optionally flushed,
//! and closed exactly once. Writes become durable at flush or close. The
//! default write path opens a mutator for the duration of one call and
//! closes it with a flush on every exit path; a caller-supplied mutator
//! stays under the caller's control.

use std::{fmt, ops::BitOr};

use crate::{
    broker::Broker,
    cell::Cell,
    error::Result,
    observability::{log_debug, log_warn},
};

/// Application name sent with asynchronous writes.
pub const ASYNC_APPNAME: &str = "hypercell";

/// Opaque server-side mutator id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutatorHandle(i64);

impl MutatorHandle {
    /// Wrap an id received from the store.
    pub const fn from_raw(id: i64) -> Self {
        Self(id)
    }

    /// Raw id sent back to the store.
    pub const fn id(self) -> i64 {
        self.0
    }
}

impl fmt::Display for MutatorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mutator#{}", self.0)
    }
}

/// Mutator option bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MutatorFlags(u32);

impl MutatorFlags {
    /// No options.
    pub const NONE: Self = Self(0);
    /// Skip the commit-log sync on flush.
    pub const NO_LOG_SYNC: Self = Self(1);
    /// Drop cells for unknown column families instead of failing.
    pub const IGNORE_UNKNOWN_CFS: Self = Self(2);

    /// Raw bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Rebuild from raw bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Whether every bit of `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MutatorFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// What closing a mutator does with buffered cells.
///
/// `Flush` makes everything durable before the close returns and is what
/// the default write path uses. `NoFlush` leaves buffered cells to the
/// store's periodic flush, so they are not guaranteed durable on return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseMode {
    /// Flush, then release.
    #[default]
    Flush,
    /// Release without an explicit flush.
    NoFlush,
}

impl CloseMode {
    /// Wire value of the `flush` argument.
    pub const fn flushes(self) -> bool {
        matches!(self, CloseMode::Flush)
    }
}

/// Settings of an asynchronous write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutateSpec {
    /// Application name reported to the store.
    pub appname: String,
    /// Server-side flush interval in milliseconds.
    pub flush_interval: i32,
    /// Mutator option bits.
    pub flags: i32,
}

impl Default for MutateSpec {
    fn default() -> Self {
        Self {
            appname: String::new(),
            flush_interval: 1000,
            flags: MutatorFlags::IGNORE_UNKNOWN_CFS.bits() as i32,
        }
    }
}

impl MutateSpec {
    /// Spec used by the asynchronous write path.
    pub fn asynchronous() -> Self {
        Self {
            appname: ASYNC_APPNAME.to_owned(),
            ..Self::default()
        }
    }
}

/// How a batch of cells is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOptions {
    pub(crate) mutator: Option<MutatorHandle>,
    pub(crate) flags: MutatorFlags,
    pub(crate) flush_interval: u32,
    pub(crate) asynchronous: bool,
}

impl WriteOptions {
    /// Write through a caller-owned mutator. Durability then depends on the
    /// caller's next flush or close.
    pub fn mutator(self, mutator: MutatorHandle) -> Self {
        WriteOptions {
            mutator: Some(mutator),
            ..self
        }
    }

    /// Flags for a locally opened mutator.
    pub fn flags(self, flags: MutatorFlags) -> Self {
        WriteOptions { flags, ..self }
    }

    /// Flush interval for a locally opened mutator, in milliseconds.
    pub fn flush_interval(self, flush_interval: u32) -> Self {
        WriteOptions {
            flush_interval,
            ..self
        }
    }

    /// Fire-and-forget mode: no mutator, no flush, no durability guarantee.
    pub fn asynchronous(self, asynchronous: bool) -> Self {
        WriteOptions {
            asynchronous,
            ..self
        }
    }
}

/// Open a mutator, run `f` with it and close it with a flush, whatever `f`
/// returned. An error from `f` wins over an error from the close.
pub fn with_mutator<B, T, F>(
    broker: &mut B,
    table: &str,
    flags: MutatorFlags,
    flush_interval: u32,
    f: F,
) -> Result<T>
where
    B: Broker + ?Sized,
    F: FnOnce(&mut B, MutatorHandle) -> Result<T>,
{
    let handle = broker.open_mutator(table, flags, flush_interval)?;
    log_debug!(
        component = "mutator",
        event = "mutator_opened",
        table = table,
        mutator = handle.id(),
    );

    let outcome = f(broker, handle);
    let closed = broker.close_mutator(handle, CloseMode::Flush);

    match (outcome, closed) {
        (Ok(value), Ok(())) => {
            log_debug!(
                component = "mutator",
                event = "mutator_closed",
                table = table,
                mutator = handle.id(),
            );
            Ok(value)
        }
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup)) => {
            log_warn!(
                component = "mutator",
                event = "mutator_close_failed",
                table = table,
                mutator = handle.id(),
                error = %cleanup,
                "close failed after a write error; reporting the write error"
            );
            Err(err)
        }
    }
}

/// Write `cells` to `table` following `options`. An empty batch is a no-op.
pub fn write_cells<B>(
    broker: &mut B,
    table: &str,
    cells: &[Cell],
    options: &WriteOptions,
) -> Result<()>
where
    B: Broker + ?Sized,
{
    if cells.is_empty() {
        return Ok(());
    }
    if options.asynchronous {
        return broker.put_cells(table, &MutateSpec::asynchronous(), cells);
    }
    match options.mutator {
        Some(handle) => broker.set_cells(handle, cells),
        None => with_mutator(
            broker,
            table,
            options.flags,
            options.flush_interval,
            |broker, handle| broker.set_cells(handle, cells),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::HyperError,
        memory::{BrokerMethod, Fault, MemoryBroker},
        scan::ScanSpec,
    };

    fn broker() -> MemoryBroker {
        let mut broker = MemoryBroker::new();
        broker.create_table("pages", &["name", "url"]);
        broker
    }

    fn cells() -> Vec<Cell> {
        vec![
            Cell::insert("k1", "name", None, "A"),
            Cell::insert("k2", "name", None, "B"),
        ]
    }

    #[test]
    fn default_write_is_visible_and_closes_mutator() {
        let mut broker = broker();
        write_cells(&mut broker, "pages", &cells(), &WriteOptions::default()).unwrap();
        assert_eq!(broker.calls(BrokerMethod::OpenMutator), 1);
        assert_eq!(broker.calls(BrokerMethod::CloseMutator), 1);
        assert_eq!(broker.open_mutator_count(), 0);
        let read = broker.get_cells("pages", &ScanSpec::default()).unwrap();
        assert_eq!(read.len(), 2);
    }

    #[test]
    fn failed_write_still_closes_local_mutator() {
        let mut broker = broker();
        broker.inject(Fault::remote(BrokerMethod::SetCells, 5));
        let err = write_cells(&mut broker, "pages", &cells(), &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, HyperError::Remote(ref e) if e.code == 5));
        assert_eq!(broker.calls(BrokerMethod::CloseMutator), 1);
        assert_eq!(broker.open_mutator_count(), 0);
    }

    #[test]
    fn write_error_wins_over_close_error() {
        let mut broker = broker();
        broker.inject(Fault::remote(BrokerMethod::SetCells, 5));
        broker.inject(Fault::remote(BrokerMethod::CloseMutator, 9));
        let err = write_cells(&mut broker, "pages", &cells(), &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, HyperError::Remote(ref e) if e.code == 5));
        assert_eq!(broker.calls(BrokerMethod::CloseMutator), 1);
    }

    #[test]
    fn close_error_surfaces_when_write_succeeded() {
        let mut broker = broker();
        broker.inject(Fault::remote(BrokerMethod::CloseMutator, 9));
        let err = write_cells(&mut broker, "pages", &cells(), &WriteOptions::default())
            .unwrap_err();
        assert!(matches!(err, HyperError::Remote(ref e) if e.code == 9));
    }

    #[test]
    fn caller_mutator_is_left_open_until_flushed() {
        let mut broker = broker();
        let handle = broker
            .open_mutator("pages", MutatorFlags::NO_LOG_SYNC, 0)
            .unwrap();
        write_cells(
            &mut broker,
            "pages",
            &cells(),
            &WriteOptions::default().mutator(handle),
        )
        .unwrap();
        assert_eq!(broker.calls(BrokerMethod::CloseMutator), 0);
        assert!(broker
            .get_cells("pages", &ScanSpec::default())
            .unwrap()
            .is_empty());

        broker.flush_mutator(handle).unwrap();
        assert_eq!(broker.get_cells("pages", &ScanSpec::default()).unwrap().len(), 2);
        broker.close_mutator(handle, CloseMode::NoFlush).unwrap();
        assert_eq!(broker.open_mutator_count(), 0);
    }

    #[test]
    fn asynchronous_write_skips_mutators() {
        let mut broker = broker();
        write_cells(
            &mut broker,
            "pages",
            &cells(),
            &WriteOptions::default().asynchronous(true),
        )
        .unwrap();
        assert_eq!(broker.calls(BrokerMethod::OpenMutator), 0);
        assert_eq!(broker.calls(BrokerMethod::PutCells), 1);
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let mut broker = broker();
        write_cells(&mut broker, "pages", &[], &WriteOptions::default()).unwrap();
        assert_eq!(broker.calls(BrokerMethod::OpenMutator), 0);
    }

    #[test]
    fn flags_combine() {
        let flags = MutatorFlags::NO_LOG_SYNC | MutatorFlags::IGNORE_UNKNOWN_CFS;
        assert_eq!(flags.bits(), 3);
        assert!(flags.contains(MutatorFlags::NO_LOG_SYNC));
        assert!(!MutatorFlags::NONE.contains(MutatorFlags::NO_LOG_SYNC));
        assert_eq!(MutateSpec::asynchronous().flags, 2);
        assert!(CloseMode::default().flushes());
    }
}
