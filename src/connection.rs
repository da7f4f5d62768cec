//! The adapter surface the ORM layer calls.
//!
//! A [`Connection`] owns one broker and everything that is per-connection:
//! settings, metrics and the schema cache. Every remote call runs inside
//! [`with_reconnect`], with its own attempt counter, except calls on a
//! server-side handle (mutator or scanner) that a reconnect would invalidate.

use std::{
    collections::{hash_map::Entry, BTreeMap, HashMap},
    time::Instant,
};

use crate::{
    assemble::{assemble, AssembleOptions, Row},
    broker::{Broker, HqlResult},
    cell::{split_qualified_name, Cell},
    error::{HyperError, Result},
    metrics::ConnectionMetrics,
    mutator::{self, CloseMode, MutatorFlags, MutatorHandle, WriteOptions},
    observability::{log_debug, log_info},
    option::ConnectionConfig,
    retry::with_reconnect,
    scan::{FindOptions, ScanSpec},
    scanner::{self, Scanner, ScannerHandle},
    schema::{add_column_hql, drop_column_hql, ColumnDefinition, TableDefinition, TableSchema},
    thrift::ThriftBroker,
};

/// A connection to the store.
#[derive(Debug)]
pub struct Connection<B> {
    config: ConnectionConfig,
    broker: B,
    metrics: ConnectionMetrics,
    schemas: HashMap<String, TableSchema>,
    qualified: HashMap<String, BTreeMap<String, Vec<String>>>,
}

impl Connection<ThriftBroker> {
    /// Connect to the broker described by `config`.
    pub fn connect(config: ConnectionConfig) -> Result<Self> {
        let broker = ThriftBroker::connect(config.clone())?;
        Ok(Self::new(broker, config))
    }
}

impl<B: Broker> Connection<B> {
    /// Wrap an already connected broker.
    pub fn new(broker: B, config: ConnectionConfig) -> Self {
        Self {
            config,
            broker,
            metrics: ConnectionMetrics::default(),
            schemas: HashMap::new(),
            qualified: HashMap::new(),
        }
    }

    /// Connection settings.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The underlying broker.
    pub fn broker(&self) -> &B {
        &self.broker
    }

    /// The underlying broker, mutably.
    pub fn broker_mut(&mut self) -> &mut B {
        &mut self.broker
    }

    /// Timings and counters collected so far.
    pub fn metrics(&self) -> &ConnectionMetrics {
        &self.metrics
    }

    /// Zero all metrics.
    pub fn reset_metrics(&mut self) {
        self.metrics.reset();
    }

    fn retry<T>(&mut self, method: &str, op: impl FnMut(&mut B) -> Result<T>) -> Result<T> {
        with_reconnect(
            &self.config.retry,
            &mut self.broker,
            &mut self.metrics,
            method,
            op,
        )
    }

    /// Run an HQL statement.
    pub fn execute(&mut self, hql: &str) -> Result<HqlResult> {
        self.retry("hql_query", |broker| broker.hql_query(hql))
    }

    /// Cells matching `options`, in row-key order.
    ///
    /// Option errors are reported before anything is sent.
    pub fn get_cells(&mut self, table: &str, options: &FindOptions) -> Result<Vec<Cell>> {
        let spec = ScanSpec::from_options(options)?;
        self.scan(table, &spec)
    }

    fn scan(&mut self, table: &str, spec: &ScanSpec) -> Result<Vec<Cell>> {
        let started = Instant::now();
        let result = self.retry("get_cells", |broker| broker.get_cells(table, spec));
        self.metrics
            .record_read(started.elapsed(), result.as_ref().map_or(0, Vec::len));
        let cells = result?;
        log_debug!(
            component = "connection",
            event = "cells_read",
            table = table,
            cells = cells.len(),
        );
        Ok(cells)
    }

    /// Rows matching `options`.
    ///
    /// Families declared for the table but absent from a row are backfilled;
    /// with `instantiate_only_requested_columns` only selected families are.
    pub fn find(&mut self, table: &str, options: &FindOptions) -> Result<Vec<Row>> {
        let spec = ScanSpec::from_options(options)?;
        let cells = self.scan(table, &spec)?;
        if !self.schemas.contains_key(table) {
            self.columns(table)?;
        }
        let requested = if options.instantiate_only_requested_columns {
            options.selected_families()
        } else {
            None
        };
        let schema = self.schemas.get(table);
        Ok(assemble(
            cells,
            AssembleOptions {
                schema,
                requested: requested.as_deref(),
            },
        ))
    }

    /// Stream the rows matching `options` to `f` through a scanner, one
    /// batch at a time, and return how many rows were seen. The scanner is
    /// closed on every exit path, including an error from `f`.
    pub fn each_row<F>(&mut self, table: &str, options: &FindOptions, mut f: F) -> Result<usize>
    where
        F: FnMut(Row) -> Result<()>,
    {
        let spec = ScanSpec::from_options(options)?;
        if !self.schemas.contains_key(table) {
            self.columns(table)?;
        }
        let requested = if options.instantiate_only_requested_columns {
            options.selected_families()
        } else {
            None
        };
        let schema = self.schemas.get(table);

        let started = Instant::now();
        let mut cells_read = 0;
        let mut rows = 0;
        let outcome = scanner::with_scanner(&mut self.broker, table, &spec, |scanner| {
            let assembly = AssembleOptions {
                schema,
                requested: requested.as_deref(),
            };
            let outcome = scanner.rows(assembly).try_for_each(|row: Result<Row>| {
                let row = row?;
                rows += 1;
                f(row)
            });
            cells_read = scanner.cells_read();
            outcome
        });
        self.metrics.record_read(started.elapsed(), cells_read);
        log_debug!(
            component = "connection",
            event = "rows_streamed",
            table = table,
            rows = rows,
            cells = cells_read,
        );
        outcome.map(|()| rows)
    }

    /// Run `f` with a scanner over the cells matching `options`. The
    /// scanner is closed afterwards, whatever `f` returned.
    pub fn with_scanner<T, F>(&mut self, table: &str, options: &FindOptions, f: F) -> Result<T>
    where
        F: FnOnce(&mut Scanner<'_, B>) -> Result<T>,
    {
        let spec = ScanSpec::from_options(options)?;
        let started = Instant::now();
        let mut cells_read = 0;
        let outcome = scanner::with_scanner(&mut self.broker, table, &spec, |scanner| {
            let outcome = f(scanner);
            cells_read = scanner.cells_read();
            outcome
        });
        self.metrics.record_read(started.elapsed(), cells_read);
        outcome
    }

    /// Open a scanner the caller is responsible for closing.
    pub fn open_scanner(&mut self, table: &str, options: &FindOptions) -> Result<ScannerHandle> {
        let spec = ScanSpec::from_options(options)?;
        self.retry("open_scanner", |broker| broker.open_scanner(table, &spec))
    }

    /// Next batch of a caller scanner, empty once the scan is exhausted.
    /// Scanners do not survive a reconnect, so this is never retried.
    pub fn next_cells(&mut self, scanner: ScannerHandle) -> Result<Vec<Cell>> {
        let started = Instant::now();
        let result = self.broker.next_cells(scanner);
        self.metrics
            .record_read(started.elapsed(), result.as_ref().map_or(0, Vec::len));
        result
    }

    /// Close a caller scanner. Never retried.
    pub fn close_scanner(&mut self, scanner: ScannerHandle) -> Result<()> {
        self.broker.close_scanner(scanner)
    }

    /// The row stored under `row`.
    pub fn find_one(&mut self, table: &str, row: &str) -> Result<Row> {
        let options = FindOptions::default().row_keys([row]);
        self.find(table, &options)?
            .into_iter()
            .next()
            .ok_or_else(|| HyperError::NotFound {
                table: table.to_owned(),
                row: row.to_owned(),
            })
    }

    /// Whether any cell is stored under `row`.
    pub fn exists(&mut self, table: &str, row: &str) -> Result<bool> {
        let options = FindOptions::default()
            .row_keys([row])
            .keys_only(true)
            .cell_limit(1);
        Ok(!self.get_cells(table, &options)?.is_empty())
    }

    /// Write `cells` to `table`.
    ///
    /// Without a caller mutator the open, write and close sequence is retried
    /// as a whole. Writes through a caller mutator are never retried, since
    /// its handle does not survive a reconnect.
    pub fn write_cells(&mut self, table: &str, cells: &[Cell], options: &WriteOptions) -> Result<()> {
        if cells.is_empty() {
            return Ok(());
        }
        let started = Instant::now();
        let result = if options.mutator.is_some() && !options.asynchronous {
            mutator::write_cells(&mut self.broker, table, cells, options)
        } else {
            self.retry("write_cells", |broker| {
                mutator::write_cells(broker, table, cells, options)
            })
        };
        self.metrics.record_write(started.elapsed(), cells.len());
        result
    }

    /// Delete single cells, each given as a row key and a column name
    /// (`family` or `family:qualifier`).
    pub fn delete_cells<R, C>(&mut self, table: &str, targets: &[(R, C)]) -> Result<()>
    where
        R: AsRef<str>,
        C: AsRef<str>,
    {
        let cells: Vec<Cell> = targets
            .iter()
            .map(|(row, column)| {
                let (family, qualifier) = split_qualified_name(column.as_ref());
                Cell::delete_cell(row.as_ref(), family, qualifier)
            })
            .collect();
        self.write_cells(table, &cells, &WriteOptions::default())
    }

    /// Delete whole rows.
    pub fn delete_rows<R: AsRef<str>>(&mut self, table: &str, rows: &[R]) -> Result<()> {
        let cells: Vec<Cell> = rows.iter().map(|row| Cell::delete_row(row.as_ref())).collect();
        self.write_cells(table, &cells, &WriteOptions::default())
    }

    /// Open a mutator the caller is responsible for closing.
    pub fn open_mutator(
        &mut self,
        table: &str,
        flags: MutatorFlags,
        flush_interval: u32,
    ) -> Result<MutatorHandle> {
        self.retry("open_mutator", |broker| {
            broker.open_mutator(table, flags, flush_interval)
        })
    }

    /// Flush a caller mutator. Handles do not survive a reconnect, so this
    /// is never retried.
    pub fn flush_mutator(&mut self, mutator: MutatorHandle) -> Result<()> {
        self.broker.flush_mutator(mutator)
    }

    /// Close a caller mutator. Never retried.
    pub fn close_mutator(&mut self, mutator: MutatorHandle, mode: CloseMode) -> Result<()> {
        self.broker.close_mutator(mutator, mode)
    }

    /// Run `f` with a fresh mutator that is closed with a flush afterwards,
    /// whatever `f` returned.
    pub fn with_mutator<T, F>(&mut self, table: &str, f: F) -> Result<T>
    where
        F: FnOnce(&mut B, MutatorHandle) -> Result<T>,
    {
        mutator::with_mutator(&mut self.broker, table, MutatorFlags::NONE, 0, f)
    }

    /// Raw schema-description document.
    pub fn describe_table(&mut self, table: &str) -> Result<String> {
        self.retry("get_schema", |broker| broker.get_schema(table))
    }

    /// Declare a qualified family for `table`. Applied on the next schema
    /// load; the store itself does not record which families are qualified.
    pub fn declare_qualified<I, S>(&mut self, table: &str, family: &str, qualifiers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.qualified
            .entry(table.to_owned())
            .or_default()
            .insert(family.to_owned(), qualifiers.into_iter().map(Into::into).collect());
        self.schemas.remove(table);
    }

    /// Load the families of `table` and refresh its column name map.
    pub fn columns(&mut self, table: &str) -> Result<&TableSchema> {
        let document = self.describe_table(table)?;
        let mut schema = TableSchema::parse(table, &document)?;
        if let Some(declared) = self.qualified.get(table) {
            for (family, qualifiers) in declared {
                schema = schema.with_qualified(family, qualifiers.iter().cloned());
            }
        }
        log_debug!(
            component = "connection",
            event = "schema_refreshed",
            table = table,
            columns = schema.columns().len(),
        );
        Ok(match self.schemas.entry(table.to_owned()) {
            Entry::Occupied(mut entry) => {
                entry.insert(schema);
                entry.into_mut()
            }
            Entry::Vacant(entry) => entry.insert(schema),
        })
    }

    /// Original store name of an attribute, falling back to `attribute`
    /// itself when no family of `table` maps to it. Loads the schema when it
    /// is not cached yet.
    pub fn column_name(&mut self, table: &str, attribute: &str) -> Result<String> {
        Ok(self
            .declared_column_name(table, attribute)?
            .unwrap_or_else(|| attribute.to_owned()))
    }

    /// Original store name of an attribute, `None` when no family of
    /// `table` maps to it.
    pub fn declared_column_name(&mut self, table: &str, attribute: &str) -> Result<Option<String>> {
        if !self.schemas.contains_key(table) {
            self.columns(table)?;
        }
        Ok(self
            .schemas
            .get(table)
            .and_then(|schema| schema.names().original(attribute))
            .map(str::to_owned))
    }

    /// Names of every table.
    pub fn tables(&mut self) -> Result<Vec<String>> {
        self.retry("get_tables", |broker| broker.get_tables())
    }

    /// Whether `table` exists.
    pub fn table_exists(&mut self, table: &str) -> Result<bool> {
        Ok(self.tables()?.iter().any(|t| t == table))
    }

    /// Drop `table`. With `if_exists` a missing table is not an error.
    pub fn drop_table(&mut self, table: &str, if_exists: bool) -> Result<()> {
        self.retry("drop_table", |broker| broker.drop_table(table, if_exists))?;
        self.schemas.remove(table);
        self.qualified.remove(table);
        log_info!(component = "connection", event = "table_dropped", table = table);
        Ok(())
    }

    /// Create a table; qualified families are remembered for later schema
    /// loads. A forced definition replaces an existing table.
    pub fn create_table(&mut self, definition: &TableDefinition) -> Result<()> {
        if definition.force {
            self.drop_table(&definition.name, true)?;
        }
        self.execute(&definition.to_hql())?;
        for column in definition.columns.iter().filter(|c| c.qualified) {
            self.declare_qualified(&definition.name, &column.name, column.qualifiers.iter().cloned());
        }
        self.schemas.remove(&definition.name);
        log_info!(
            component = "connection",
            event = "table_created",
            table = definition.name.as_str(),
            columns = definition.columns.len(),
        );
        Ok(())
    }

    /// Add a column family.
    pub fn add_column(&mut self, table: &str, column: &ColumnDefinition) -> Result<()> {
        self.execute(&add_column_hql(table, column))?;
        if let Some(schema) = self.schemas.get_mut(table) {
            schema.add_column(column.clone());
        }
        log_info!(
            component = "connection",
            event = "column_added",
            table = table,
            column = column.name.as_str(),
        );
        Ok(())
    }

    /// Drop a column family.
    pub fn remove_column(&mut self, table: &str, column: &str) -> Result<()> {
        self.execute(&drop_column_hql(table, column))?;
        if let Some(schema) = self.schemas.get_mut(table) {
            schema.remove_column(column);
        }
        log_info!(
            component = "connection",
            event = "column_removed",
            table = table,
            column = column,
        );
        Ok(())
    }

    /// Not supported by the store.
    pub fn rename_table(&mut self, _from: &str, _to: &str) -> Result<()> {
        Err(HyperError::Unsupported("rename_table"))
    }

    /// Not supported by the store.
    pub fn rename_column(&mut self, _table: &str, _from: &str, _to: &str) -> Result<()> {
        Err(HyperError::Unsupported("rename_column"))
    }

    /// Not supported by the store.
    pub fn change_column(&mut self, _table: &str, _column: &str, _kind: &str) -> Result<()> {
        Err(HyperError::Unsupported("change_column"))
    }

    /// Not supported by the store.
    pub fn change_column_default(
        &mut self,
        _table: &str,
        _column: &str,
        _default: Option<&str>,
    ) -> Result<()> {
        Err(HyperError::Unsupported("change_column_default"))
    }

    /// Not supported by the store.
    pub fn change_column_null(&mut self, _table: &str, _column: &str, _null: bool) -> Result<()> {
        Err(HyperError::Unsupported("change_column_null"))
    }
}
