//! Row assembly: group a row-key ordered cell stream into per-row records.
//!
//! The store returns cells sorted by row key; assembly relies on that and
//! never re-sorts. A row is emitted as soon as a cell with a different key
//! arrives, so the whole pass is single and streaming.

use std::collections::{BTreeMap, BTreeSet};

use bytes::Bytes;

use crate::{
    cell::{sanitize_column_name, Cell},
    scan::project_families,
    schema::TableSchema,
};

/// Value of one column family within a row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnValue {
    /// Unqualified family. `None` when backfilled.
    Scalar(Option<Bytes>),
    /// Qualified family: qualifier to value.
    Qualified(BTreeMap<String, Bytes>),
}

/// All cells sharing one row key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// Row key.
    pub key: String,
    /// Column values keyed by attribute name.
    pub columns: BTreeMap<String, ColumnValue>,
    /// Cells in arrival order.
    pub cells: Vec<Cell>,
}

impl Row {
    fn new(key: String) -> Self {
        Self {
            key,
            columns: BTreeMap::new(),
            cells: Vec::new(),
        }
    }

    /// Column value by attribute name.
    pub fn get(&self, attribute: &str) -> Option<&ColumnValue> {
        self.columns.get(attribute)
    }

    /// Scalar value of an unqualified family.
    pub fn scalar(&self, attribute: &str) -> Option<&Bytes> {
        match self.columns.get(attribute) {
            Some(ColumnValue::Scalar(value)) => value.as_ref(),
            _ => None,
        }
    }

    /// Qualifier map of a qualified family.
    pub fn qualified(&self, attribute: &str) -> Option<&BTreeMap<String, Bytes>> {
        match self.columns.get(attribute) {
            Some(ColumnValue::Qualified(map)) => Some(map),
            _ => None,
        }
    }

    fn merge(&mut self, cell: Cell) {
        let attribute = sanitize_column_name(&cell.family);
        match &cell.qualifier {
            Some(qualifier) => {
                let entry = self
                    .columns
                    .entry(attribute)
                    .or_insert_with(|| ColumnValue::Qualified(BTreeMap::new()));
                if matches!(*entry, ColumnValue::Scalar(_)) {
                    *entry = ColumnValue::Qualified(BTreeMap::new());
                }
                if let ColumnValue::Qualified(map) = entry {
                    map.insert(qualifier.clone(), cell.value.clone());
                }
            }
            None => {
                self.columns
                    .insert(attribute, ColumnValue::Scalar(Some(cell.value.clone())));
            }
        }
        self.cells.push(cell);
    }
}

/// Backfill settings.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssembleOptions<'a> {
    /// Declared families; missing ones are backfilled in every row.
    pub schema: Option<&'a TableSchema>,
    /// When set, only these columns are backfilled.
    pub requested: Option<&'a [String]>,
}

/// Streaming row assembler.
#[derive(Debug)]
pub struct RowAssembler<'a> {
    options: AssembleOptions<'a>,
    requested: Option<BTreeSet<String>>,
    current: Option<Row>,
}

impl<'a> RowAssembler<'a> {
    /// Create an assembler.
    pub fn new(options: AssembleOptions<'a>) -> Self {
        let requested = options.requested.map(|columns| {
            project_families(columns)
                .iter()
                .map(|family| sanitize_column_name(family))
                .collect()
        });
        Self {
            options,
            requested,
            current: None,
        }
    }

    /// Feed the next cell; returns the previous row once it is complete.
    pub fn push(&mut self, cell: Cell) -> Option<Row> {
        if let Some(row) = self.current.as_mut() {
            if row.key == cell.row {
                row.merge(cell);
                return None;
            }
        }
        let mut next = Row::new(cell.row.clone());
        next.merge(cell);
        self.current
            .replace(next)
            .map(|completed| self.backfill(completed))
    }

    /// Flush the row still being accumulated.
    pub fn finish(&mut self) -> Option<Row> {
        self.current.take().map(|row| self.backfill(row))
    }

    fn backfill(&self, mut row: Row) -> Row {
        let Some(schema) = self.options.schema else {
            return row;
        };
        for column in schema.columns() {
            let attribute = column.attribute_name();
            if let Some(requested) = &self.requested {
                if !requested.contains(&attribute) {
                    continue;
                }
            }
            row.columns.entry(attribute).or_insert_with(|| {
                if column.qualified {
                    ColumnValue::Qualified(BTreeMap::new())
                } else {
                    ColumnValue::Scalar(None)
                }
            });
        }
        row
    }
}

/// Iterator adaptor yielding assembled rows.
#[derive(Debug)]
pub struct Rows<'a, I> {
    cells: I,
    assembler: RowAssembler<'a>,
    done: bool,
}

impl<'a, I> Rows<'a, I>
where
    I: Iterator<Item = Cell>,
{
    /// Wrap a row-key ordered cell iterator.
    pub fn new(cells: I, options: AssembleOptions<'a>) -> Self {
        Self {
            cells,
            assembler: RowAssembler::new(options),
            done: false,
        }
    }
}

impl<I> Iterator for Rows<'_, I>
where
    I: Iterator<Item = Cell>,
{
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        if self.done {
            return None;
        }
        for cell in self.cells.by_ref() {
            if let Some(row) = self.assembler.push(cell) {
                return Some(row);
            }
        }
        self.done = true;
        self.assembler.finish()
    }
}

/// Assemble a complete, row-key ordered cell sequence.
pub fn assemble<I>(cells: I, options: AssembleOptions<'_>) -> Vec<Row>
where
    I: IntoIterator<Item = Cell>,
{
    Rows::new(cells.into_iter(), options).collect()
}
