//! Scanners: server-side cursors over one scan.
//!
//! A scanner is opened with a [`ScanSpec`], drained batch by batch until the
//! store returns an empty batch, and closed exactly once. [`with_scanner`]
//! closes it on every exit path, the way
//! [`with_mutator`](crate::mutator::with_mutator) does for writes. Unlike a
//! single `get_cells` call, a scanner never holds the whole result in memory.

use std::{fmt, vec};

use crate::{
    assemble::{AssembleOptions, Row, RowAssembler},
    broker::Broker,
    cell::{Cell, CellArray},
    error::Result,
    observability::{log_debug, log_warn},
    scan::ScanSpec,
};

/// Opaque server-side scanner id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScannerHandle(i64);

impl ScannerHandle {
    /// Wrap an id received from the store.
    pub const fn from_raw(id: i64) -> Self {
        Self(id)
    }

    /// Raw id sent back to the store.
    pub const fn id(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ScannerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scanner#{}", self.0)
    }
}

/// An open scanner bound to the broker it was opened on.
///
/// Iterating yields single cells; [`Scanner::rows`] groups them into rows
/// even when a row spans several batches.
pub struct Scanner<'b, B: ?Sized> {
    broker: &'b mut B,
    handle: ScannerHandle,
    batch: vec::IntoIter<Cell>,
    exhausted: bool,
    cells_read: usize,
}

impl<B: ?Sized> fmt::Debug for Scanner<'_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scanner")
            .field("handle", &self.handle)
            .field("buffered", &self.batch.len())
            .field("exhausted", &self.exhausted)
            .field("cells_read", &self.cells_read)
            .finish()
    }
}

impl<'b, B: Broker + ?Sized> Scanner<'b, B> {
    fn new(broker: &'b mut B, handle: ScannerHandle) -> Self {
        Self {
            broker,
            handle,
            batch: Vec::new().into_iter(),
            exhausted: false,
            cells_read: 0,
        }
    }

    /// Store-side handle.
    pub fn handle(&self) -> ScannerHandle {
        self.handle
    }

    /// Cells received from the store so far.
    pub fn cells_read(&self) -> usize {
        self.cells_read
    }

    /// Next batch of cells, `None` once the scan is exhausted. Cells
    /// buffered by [`Scanner::next_cell`] are returned first.
    pub fn next_batch(&mut self) -> Result<Option<Vec<Cell>>> {
        if self.batch.len() > 0 {
            return Ok(Some(self.batch.by_ref().collect()));
        }
        if self.exhausted {
            return Ok(None);
        }
        let cells = self.broker.next_cells(self.handle)?;
        if cells.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }
        self.cells_read += cells.len();
        Ok(Some(cells))
    }

    /// Next single cell.
    pub fn next_cell(&mut self) -> Result<Option<Cell>> {
        loop {
            if let Some(cell) = self.batch.next() {
                return Ok(Some(cell));
            }
            match self.next_batch()? {
                Some(cells) => self.batch = cells.into_iter(),
                None => return Ok(None),
            }
        }
    }

    /// Next cell in native array form.
    pub fn next_array(&mut self) -> Result<Option<CellArray>> {
        Ok(self.next_cell()?.map(|cell| cell.to_native()))
    }

    /// Rows assembled from the remaining cells.
    pub fn rows<'s, 'o>(&'s mut self, options: AssembleOptions<'o>) -> ScanRows<'s, 'b, 'o, B> {
        ScanRows {
            scanner: self,
            assembler: RowAssembler::new(options),
            done: false,
        }
    }
}

impl<B: Broker + ?Sized> Iterator for Scanner<'_, B> {
    type Item = Result<Cell>;

    fn next(&mut self) -> Option<Result<Cell>> {
        match self.next_cell() {
            Ok(cell) => cell.map(Ok),
            Err(err) => {
                self.exhausted = true;
                Some(Err(err))
            }
        }
    }
}

/// Rows read through a scanner. Stops after the first error.
pub struct ScanRows<'s, 'b, 'o, B: ?Sized> {
    scanner: &'s mut Scanner<'b, B>,
    assembler: RowAssembler<'o>,
    done: bool,
}

impl<B: ?Sized> fmt::Debug for ScanRows<'_, '_, '_, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanRows")
            .field("scanner", &self.scanner)
            .field("done", &self.done)
            .finish()
    }
}

impl<B: Broker + ?Sized> Iterator for ScanRows<'_, '_, '_, B> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Result<Row>> {
        if self.done {
            return None;
        }
        loop {
            match self.scanner.next_cell() {
                Ok(Some(cell)) => {
                    if let Some(row) = self.assembler.push(cell) {
                        return Some(Ok(row));
                    }
                }
                Ok(None) => {
                    self.done = true;
                    return self.assembler.finish().map(Ok);
                }
                Err(err) => {
                    self.done = true;
                    return Some(Err(err));
                }
            }
        }
    }
}

/// Open a scanner, run `f` with it and close it, whatever `f` returned. An
/// error from `f` wins over an error from the close.
pub fn with_scanner<B, T, F>(broker: &mut B, table: &str, spec: &ScanSpec, f: F) -> Result<T>
where
    B: Broker + ?Sized,
    F: FnOnce(&mut Scanner<'_, B>) -> Result<T>,
{
    let handle = broker.open_scanner(table, spec)?;
    log_debug!(
        component = "scanner",
        event = "scanner_opened",
        table = table,
        scanner = handle.id(),
    );

    let mut scanner = Scanner::new(broker, handle);
    let outcome = f(&mut scanner);
    let cells_read = scanner.cells_read;
    let closed = scanner.broker.close_scanner(handle);

    match (outcome, closed) {
        (Ok(value), Ok(())) => {
            log_debug!(
                component = "scanner",
                event = "scanner_closed",
                table = table,
                scanner = handle.id(),
                cells = cells_read,
            );
            Ok(value)
        }
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup)) => {
            log_warn!(
                component = "scanner",
                event = "scanner_close_failed",
                table = table,
                scanner = handle.id(),
                error = %cleanup,
                "close failed after a read error; reporting the read error"
            );
            Err(err)
        }
    }
}
