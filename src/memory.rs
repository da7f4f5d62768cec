//! In-process broker.
//!
//! [`MemoryBroker`] honours the same contract as the wire client: cells come
//! back sorted by row key, scanners hand out a snapshot in fixed-size
//! batches, mutators buffer writes until flush or close,
//! dropped column families linger in the schema document marked deleted.
//! It also records call counts and can inject faults, which is what the
//! retry and mutator tests are built on.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io,
};

use bytes::Bytes;

use crate::{
    broker::{Broker, HqlResult},
    cell::{Cell, CellFlag},
    error::{HyperError, RemoteError, Result, TransportError},
    mutator::{CloseMode, MutateSpec, MutatorFlags, MutatorHandle},
    retry::Reconnect,
    scan::ScanSpec,
    scanner::ScannerHandle,
};

/// Store error code: table does not exist.
pub const ERR_TABLE_NOT_FOUND: i32 = 1;
/// Store error code: table already exists.
pub const ERR_TABLE_EXISTS: i32 = 2;
/// Store error code: mutator id is not open.
pub const ERR_BAD_MUTATOR: i32 = 3;
/// Store error code: column family not declared.
pub const ERR_UNKNOWN_FAMILY: i32 = 4;
/// Store error code: statement not understood.
pub const ERR_BAD_STATEMENT: i32 = 5;
/// Store error code: scanner id is not open.
pub const ERR_BAD_SCANNER: i32 = 6;

/// Cells a scanner returns per batch unless configured otherwise.
pub const DEFAULT_SCANNER_BATCH: usize = 1024;

/// Broker procedures, for call counting and fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BrokerMethod {
    /// [`Broker::hql_query`]
    HqlQuery,
    /// [`Broker::get_cells`]
    GetCells,
    /// [`Broker::open_scanner`]
    OpenScanner,
    /// [`Broker::next_cells`]
    NextCells,
    /// [`Broker::close_scanner`]
    CloseScanner,
    /// [`Broker::open_mutator`]
    OpenMutator,
    /// [`Broker::set_cells`]
    SetCells,
    /// [`Broker::flush_mutator`]
    FlushMutator,
    /// [`Broker::close_mutator`]
    CloseMutator,
    /// [`Broker::put_cells`]
    PutCells,
    /// [`Broker::get_schema`]
    GetSchema,
    /// [`Broker::get_tables`]
    GetTables,
    /// [`Broker::drop_table`]
    DropTable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FaultKind {
    Transient,
    Remote(i32),
}

/// A failure injected into the next call of one procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fault {
    method: BrokerMethod,
    kind: FaultKind,
}

impl Fault {
    /// Fail with a dropped connection.
    pub fn transient(method: BrokerMethod) -> Self {
        Self {
            method,
            kind: FaultKind::Transient,
        }
    }

    /// Fail with a store exception carrying `code`.
    pub fn remote(method: BrokerMethod, code: i32) -> Self {
        Self {
            method,
            kind: FaultKind::Remote(code),
        }
    }

    fn into_error(self) -> HyperError {
        match self.kind {
            FaultKind::Transient => TransportError::Io(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "injected connection reset",
            ))
            .into(),
            FaultKind::Remote(code) => {
                RemoteError::new(code, Some(format!("injected {:?} failure", self.method))).into()
            }
        }
    }
}

#[derive(Debug, Clone)]
struct Family {
    name: String,
    max_versions: Option<u32>,
    deleted: bool,
}

#[derive(Debug, Clone)]
struct StoredCell {
    family: String,
    qualifier: Option<String>,
    value: Bytes,
    timestamp: i64,
    revision: i64,
}

impl StoredCell {
    fn column(&self) -> String {
        crate::cell::qualified_column_name(&self.family, self.qualifier.as_deref())
    }
}

#[derive(Debug, Clone, Default)]
struct Table {
    families: Vec<Family>,
    rows: BTreeMap<String, Vec<StoredCell>>,
}

impl Table {
    fn family(&self, name: &str) -> Option<&Family> {
        self.families.iter().find(|f| f.name == name && !f.deleted)
    }
}

#[derive(Debug)]
struct OpenMutator {
    table: String,
    flags: MutatorFlags,
    pending: Vec<Cell>,
}

/// In-memory implementation of [`Broker`].
#[derive(Debug, Default)]
pub struct MemoryBroker {
    tables: BTreeMap<String, Table>,
    mutators: HashMap<i64, OpenMutator>,
    next_mutator: i64,
    scanners: HashMap<i64, VecDeque<Cell>>,
    next_scanner: i64,
    scanner_batch: Option<usize>,
    clock: i64,
    faults: VecDeque<Fault>,
    calls: HashMap<BrokerMethod, usize>,
    reconnects: usize,
    statements: Vec<String>,
}

impl MemoryBroker {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a table with scalar families and no version limit.
    pub fn create_table(&mut self, name: &str, families: &[&str]) {
        let table = Table {
            families: families
                .iter()
                .map(|f| Family {
                    name: (*f).to_owned(),
                    max_versions: None,
                    deleted: false,
                })
                .collect(),
            rows: BTreeMap::new(),
        };
        self.tables.insert(name.to_owned(), table);
    }

    /// Queue a fault; it fires on the next call of its procedure.
    pub fn inject(&mut self, fault: Fault) {
        self.faults.push_back(fault);
    }

    /// Number of calls made to `method`, including failed ones.
    pub fn calls(&self, method: BrokerMethod) -> usize {
        self.calls.get(&method).copied().unwrap_or(0)
    }

    /// Number of reconnects performed.
    pub fn reconnects(&self) -> usize {
        self.reconnects
    }

    /// Mutators opened and not yet closed.
    pub fn open_mutator_count(&self) -> usize {
        self.mutators.len()
    }

    /// Scanners opened and not yet closed.
    pub fn open_scanner_count(&self) -> usize {
        self.scanners.len()
    }

    /// Cells returned per scanner batch. Zero restores
    /// [`DEFAULT_SCANNER_BATCH`].
    pub fn set_scanner_batch(&mut self, cells: usize) {
        self.scanner_batch = (cells > 0).then_some(cells);
    }

    /// HQL statements received, in order.
    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    fn enter(&mut self, method: BrokerMethod) -> Result<()> {
        *self.calls.entry(method).or_insert(0) += 1;
        if let Some(pos) = self.faults.iter().position(|f| f.method == method) {
            if let Some(fault) = self.faults.remove(pos) {
                return Err(fault.into_error());
            }
        }
        Ok(())
    }

    fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_else(|| table_not_found(name))
    }

    fn tick(&mut self) -> i64 {
        self.clock += 1;
        self.clock
    }

    fn apply(&mut self, table_name: &str, flags: MutatorFlags, cells: &[Cell]) -> Result<()> {
        let mut revisions = Vec::with_capacity(cells.len());
        for _ in cells {
            revisions.push(self.tick());
        }
        let table = self
            .tables
            .get_mut(table_name)
            .ok_or_else(|| table_not_found(table_name))?;

        for (cell, revision) in cells.iter().zip(revisions) {
            match cell.flag {
                CellFlag::DeleteRow => {
                    table.rows.remove(&cell.row);
                }
                CellFlag::DeleteCf => {
                    if let Some(row) = table.rows.get_mut(&cell.row) {
                        row.retain(|c| c.family != cell.family);
                    }
                }
                CellFlag::DeleteCell => {
                    if let Some(row) = table.rows.get_mut(&cell.row) {
                        row.retain(|c| !(c.family == cell.family && c.qualifier == cell.qualifier));
                    }
                }
                CellFlag::Insert => {
                    let Some(family) = table.family(&cell.family) else {
                        if flags.contains(MutatorFlags::IGNORE_UNKNOWN_CFS) {
                            continue;
                        }
                        return Err(RemoteError::new(
                            ERR_UNKNOWN_FAMILY,
                            Some(format!("unknown column family {:?}", cell.family)),
                        )
                        .into());
                    };
                    let max_versions = family.max_versions;
                    let row = table.rows.entry(cell.row.clone()).or_default();
                    row.push(StoredCell {
                        family: cell.family.clone(),
                        qualifier: cell.qualifier.clone(),
                        value: cell.value.clone(),
                        timestamp: cell.timestamp.unwrap_or(revision),
                        revision,
                    });
                    if let Some(max) = max_versions {
                        trim_versions(row, &cell.family, cell.qualifier.as_deref(), max as usize);
                    }
                }
            }
        }
        table.rows.retain(|_, cells| !cells.is_empty());
        Ok(())
    }

    /// Cells matching `spec`, as both `get_cells` and a scanner see them.
    fn select(&self, table: &str, spec: &ScanSpec) -> Result<Vec<Cell>> {
        let table = self.table(table)?;
        let mut out = Vec::new();
        let mut rows_emitted = 0u32;

        for (row_key, stored) in &table.rows {
            if let Some(limit) = spec.row_limit.filter(|l| *l > 0) {
                if rows_emitted >= limit {
                    break;
                }
            }
            if !spec.row_intervals.is_empty()
                && !spec.row_intervals.iter().any(|ri| ri.contains(row_key))
            {
                continue;
            }

            // Newest first within each column, columns in name order.
            let mut by_column: BTreeMap<String, Vec<&StoredCell>> = BTreeMap::new();
            for cell in stored {
                if !spec.columns.is_empty() && !spec.columns.iter().any(|f| *f == cell.family) {
                    continue;
                }
                if spec.start_time.is_some_and(|start| cell.timestamp < start)
                    || spec.end_time.is_some_and(|end| cell.timestamp >= end)
                {
                    continue;
                }
                let column = cell.column();
                if !spec.cell_intervals.is_empty()
                    && !spec
                        .cell_intervals
                        .iter()
                        .any(|ci| ci.contains(row_key, &column))
                {
                    continue;
                }
                by_column.entry(column).or_default().push(cell);
            }
            if by_column.is_empty() {
                continue;
            }

            let mut per_family: HashMap<&str, u32> = HashMap::new();
            for versions in by_column.values_mut() {
                versions.sort_by(|a, b| b.revision.cmp(&a.revision));
                let keep = if spec.revs == 0 {
                    versions.len()
                } else {
                    versions.len().min(spec.revs as usize)
                };
                for cell in &versions[..keep] {
                    if let Some(limit) = spec.cell_limit.filter(|l| *l > 0) {
                        let seen = per_family.entry(cell.family.as_str()).or_insert(0);
                        if *seen >= limit {
                            continue;
                        }
                        *seen += 1;
                    }
                    out.push(Cell {
                        row: row_key.clone(),
                        family: cell.family.clone(),
                        qualifier: cell.qualifier.clone(),
                        value: if spec.keys_only {
                            Bytes::new()
                        } else {
                            cell.value.clone()
                        },
                        timestamp: Some(cell.timestamp),
                        revision: Some(cell.revision),
                        flag: CellFlag::Insert,
                    });
                }
            }
            rows_emitted += 1;
        }
        Ok(out)
    }

    fn render_schema(table: &Table) -> String {
        let mut doc = String::from("<Schema generation=\"1\">\n  <AccessGroup name=\"default\">\n");
        for (id, family) in table.families.iter().enumerate() {
            doc.push_str(&format!("    <ColumnFamily id=\"{}\">\n", id + 1));
            doc.push_str("      <Generation>1</Generation>\n");
            doc.push_str(&format!(
                "      <Name>{}</Name>\n",
                quick_xml::escape::escape(family.name.as_str())
            ));
            if let Some(max) = family.max_versions {
                doc.push_str(&format!("      <MaxVersions>{max}</MaxVersions>\n"));
            }
            doc.push_str(&format!("      <deleted>{}</deleted>\n", family.deleted));
            doc.push_str("    </ColumnFamily>\n");
        }
        doc.push_str("  </AccessGroup>\n</Schema>\n");
        doc
    }

    fn execute(&mut self, statement: &str) -> Result<HqlResult> {
        let upper = statement.trim().to_ascii_uppercase();
        if upper == "SHOW TABLES" {
            return Ok(HqlResult {
                results: self.tables.keys().cloned().collect(),
                ..HqlResult::default()
            });
        }
        if upper.starts_with("CREATE TABLE") {
            let (name, families) = parse_create(statement)?;
            if self.tables.contains_key(&name) {
                return Err(RemoteError::new(
                    ERR_TABLE_EXISTS,
                    Some(format!("table {name:?} already exists")),
                )
                .into());
            }
            self.tables.insert(
                name,
                Table {
                    families,
                    rows: BTreeMap::new(),
                },
            );
            return Ok(HqlResult::default());
        }
        if upper.starts_with("ALTER TABLE") {
            let names = quoted_names(statement);
            let Some((name, columns)) = names.split_first() else {
                return Err(bad_statement(statement));
            };
            let table = self
                .tables
                .get_mut(name)
                .ok_or_else(|| table_not_found(name))?;
            if upper.contains(" ADD") {
                for family in parse_families(statement)? {
                    table.families.retain(|f| f.name != family.name);
                    table.families.push(family);
                }
            } else if upper.contains(" DROP") {
                for column in columns {
                    for family in table.families.iter_mut().filter(|f| &f.name == column) {
                        family.deleted = true;
                    }
                    for cells in table.rows.values_mut() {
                        cells.retain(|c| &c.family != column);
                    }
                }
                table.rows.retain(|_, cells| !cells.is_empty());
            } else {
                return Err(bad_statement(statement));
            }
            return Ok(HqlResult::default());
        }
        if upper.starts_with("DROP TABLE") {
            let if_exists = upper.contains("IF EXISTS");
            let names = quoted_names(statement);
            let Some(name) = names.first() else {
                return Err(bad_statement(statement));
            };
            if self.tables.remove(name).is_none() && !if_exists {
                return Err(table_not_found(name));
            }
            return Ok(HqlResult::default());
        }
        Err(bad_statement(statement))
    }
}

impl Reconnect for MemoryBroker {
    fn reconnect(&mut self) -> Result<()> {
        self.reconnects += 1;
        Ok(())
    }
}

impl Broker for MemoryBroker {
    fn hql_query(&mut self, statement: &str) -> Result<HqlResult> {
        self.enter(BrokerMethod::HqlQuery)?;
        self.statements.push(statement.to_owned());
        self.execute(statement)
    }

    fn get_cells(&mut self, table: &str, spec: &ScanSpec) -> Result<Vec<Cell>> {
        self.enter(BrokerMethod::GetCells)?;
        self.select(table, spec)
    }

    fn open_scanner(&mut self, table: &str, spec: &ScanSpec) -> Result<ScannerHandle> {
        self.enter(BrokerMethod::OpenScanner)?;
        let cells = self.select(table, spec)?;
        self.next_scanner += 1;
        let id = self.next_scanner;
        self.scanners.insert(id, cells.into());
        Ok(ScannerHandle::from_raw(id))
    }

    fn next_cells(&mut self, scanner: ScannerHandle) -> Result<Vec<Cell>> {
        self.enter(BrokerMethod::NextCells)?;
        let batch = self.scanner_batch.unwrap_or(DEFAULT_SCANNER_BATCH);
        let pending = self
            .scanners
            .get_mut(&scanner.id())
            .ok_or_else(|| bad_scanner(scanner))?;
        let take = batch.min(pending.len());
        Ok(pending.drain(..take).collect())
    }

    fn close_scanner(&mut self, scanner: ScannerHandle) -> Result<()> {
        self.enter(BrokerMethod::CloseScanner)?;
        self.scanners
            .remove(&scanner.id())
            .map(drop)
            .ok_or_else(|| bad_scanner(scanner))
    }

    fn open_mutator(
        &mut self,
        table: &str,
        flags: MutatorFlags,
        _flush_interval: u32,
    ) -> Result<MutatorHandle> {
        self.enter(BrokerMethod::OpenMutator)?;
        self.table(table)?;
        self.next_mutator += 1;
        let id = self.next_mutator;
        self.mutators.insert(
            id,
            OpenMutator {
                table: table.to_owned(),
                flags,
                pending: Vec::new(),
            },
        );
        Ok(MutatorHandle::from_raw(id))
    }

    fn set_cells(&mut self, mutator: MutatorHandle, cells: &[Cell]) -> Result<()> {
        self.enter(BrokerMethod::SetCells)?;
        let open = self
            .mutators
            .get_mut(&mutator.id())
            .ok_or_else(|| bad_mutator(mutator))?;
        open.pending.extend_from_slice(cells);
        Ok(())
    }

    fn flush_mutator(&mut self, mutator: MutatorHandle) -> Result<()> {
        self.enter(BrokerMethod::FlushMutator)?;
        let open = self
            .mutators
            .get_mut(&mutator.id())
            .ok_or_else(|| bad_mutator(mutator))?;
        let pending = std::mem::take(&mut open.pending);
        let (table, flags) = (open.table.clone(), open.flags);
        self.apply(&table, flags, &pending)
    }

    fn close_mutator(&mut self, mutator: MutatorHandle, _mode: CloseMode) -> Result<()> {
        self.enter(BrokerMethod::CloseMutator)?;
        let open = self
            .mutators
            .remove(&mutator.id())
            .ok_or_else(|| bad_mutator(mutator))?;
        // The store flushes buffered cells when a mutator is destroyed, with
        // or without an explicit flush request.
        self.apply(&open.table, open.flags, &open.pending)
    }

    fn put_cells(&mut self, table: &str, spec: &MutateSpec, cells: &[Cell]) -> Result<()> {
        self.enter(BrokerMethod::PutCells)?;
        self.apply(table, MutatorFlags::from_bits(spec.flags as u32), cells)
    }

    fn get_schema(&mut self, table: &str) -> Result<String> {
        self.enter(BrokerMethod::GetSchema)?;
        Ok(Self::render_schema(self.table(table)?))
    }

    fn get_tables(&mut self) -> Result<Vec<String>> {
        self.enter(BrokerMethod::GetTables)?;
        Ok(self.tables.keys().cloned().collect())
    }

    fn drop_table(&mut self, table: &str, if_exists: bool) -> Result<()> {
        self.enter(BrokerMethod::DropTable)?;
        if self.tables.remove(table).is_none() && !if_exists {
            return Err(table_not_found(table));
        }
        Ok(())
    }
}

fn trim_versions(row: &mut Vec<StoredCell>, family: &str, qualifier: Option<&str>, max: usize) {
    let same_column = |c: &StoredCell| c.family == family && c.qualifier.as_deref() == qualifier;
    let mut versions: Vec<i64> = row.iter().filter(|c| same_column(c)).map(|c| c.revision).collect();
    if max == 0 || versions.len() <= max {
        return;
    }
    versions.sort_unstable_by(|a, b| b.cmp(a));
    let oldest_kept = versions[max - 1];
    row.retain(|c| !same_column(c) || c.revision >= oldest_kept);
}

fn table_not_found(name: &str) -> HyperError {
    RemoteError::new(ERR_TABLE_NOT_FOUND, Some(format!("table {name:?} not found"))).into()
}

fn bad_mutator(mutator: MutatorHandle) -> HyperError {
    RemoteError::new(ERR_BAD_MUTATOR, Some(format!("{mutator} is not open"))).into()
}

fn bad_scanner(scanner: ScannerHandle) -> HyperError {
    RemoteError::new(ERR_BAD_SCANNER, Some(format!("{scanner} is not open"))).into()
}

fn bad_statement(statement: &str) -> HyperError {
    RemoteError::new(
        ERR_BAD_STATEMENT,
        Some(format!("unsupported statement: {statement}")),
    )
    .into()
}

fn quoted_names(statement: &str) -> Vec<String> {
    statement
        .split('\'')
        .skip(1)
        .step_by(2)
        .map(str::to_owned)
        .collect()
}

fn parse_families(statement: &str) -> Result<Vec<Family>> {
    let (Some(open), Some(close)) = (statement.find('('), statement.rfind(')')) else {
        return Err(bad_statement(statement));
    };
    if close < open {
        return Err(bad_statement(statement));
    }
    let mut families = Vec::new();
    for segment in statement[open + 1..close].split(',') {
        let Some(name) = quoted_names(segment).into_iter().next() else {
            continue;
        };
        let max_versions = segment
            .split_whitespace()
            .find_map(|token| token.strip_prefix("MAX_VERSIONS="))
            .map(|n| n.parse::<u32>().map_err(|_| bad_statement(statement)))
            .transpose()?;
        families.push(Family {
            name,
            max_versions,
            deleted: false,
        });
    }
    Ok(families)
}

fn parse_create(statement: &str) -> Result<(String, Vec<Family>)> {
    let head = statement.split('(').next().unwrap_or_default();
    let Some(name) = quoted_names(head).into_iter().next() else {
        return Err(bad_statement(statement));
    };
    Ok((name, parse_families(statement)?))
}
