//! Scan specifications: the canonical request structure sent to the store.
//!
//! [`ScanSpec::from_options`] turns caller-supplied [`FindOptions`] into a
//! spec. Only row-key based selection is supported; the store has no
//! secondary indexes, so value conditions are rejected up front.

mod options;

pub use options::{Conditions, FindOptions, OptionValue, Select};

use crate::{
    cell::split_qualified_name,
    error::{HyperError, Result},
};

/// Revisions returned per cell unless the caller asks otherwise. Tables are
/// expected to be declared with `MAX_VERSIONS=1` so this matches storage.
pub const DEFAULT_REVS: u32 = 1;

/// A range of rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowInterval {
    /// First row; `None` scans from the beginning of the table.
    pub start_row: Option<String>,
    /// Whether `start_row` itself is included.
    pub start_inclusive: bool,
    /// Last row; `None` scans to the end of the table.
    pub end_row: Option<String>,
    /// Whether `end_row` itself is included.
    pub end_inclusive: bool,
}

impl RowInterval {
    /// An interval matching exactly one row key.
    pub fn single(row: impl Into<String>) -> Self {
        let row = row.into();
        Self {
            start_row: Some(row.clone()),
            start_inclusive: true,
            end_row: Some(row),
            end_inclusive: true,
        }
    }

    /// Whether `row` falls inside the interval.
    pub fn contains(&self, row: &str) -> bool {
        let after_start = match &self.start_row {
            None => true,
            Some(start) if self.start_inclusive => row >= start.as_str(),
            Some(start) => row > start.as_str(),
        };
        let before_end = match &self.end_row {
            None => true,
            Some(end) if self.end_inclusive => row <= end.as_str(),
            Some(end) => row < end.as_str(),
        };
        after_start && before_end
    }
}

/// A range bounded by row and column.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CellInterval {
    /// First row.
    pub start_row: Option<String>,
    /// First column (`family` or `family:qualifier`) within `start_row`.
    pub start_column: Option<String>,
    /// Whether the start cell is included.
    pub start_inclusive: bool,
    /// Last row.
    pub end_row: Option<String>,
    /// Last column within `end_row`.
    pub end_column: Option<String>,
    /// Whether the end cell is included.
    pub end_inclusive: bool,
}

impl CellInterval {
    /// Whether the cell at `(row, column)` falls inside the interval.
    /// Cells order by row, then by column name.
    pub fn contains(&self, row: &str, column: &str) -> bool {
        let position = (row, column);
        let after_start = match &self.start_row {
            None => true,
            Some(start_row) => {
                let start = (start_row.as_str(), self.start_column.as_deref().unwrap_or(""));
                if self.start_inclusive {
                    position >= start
                } else {
                    position > start
                }
            }
        };
        let before_end = match &self.end_row {
            None => true,
            Some(end_row) => match &self.end_column {
                Some(end_column) => {
                    let end = (end_row.as_str(), end_column.as_str());
                    if self.end_inclusive {
                        position <= end
                    } else {
                        position < end
                    }
                }
                // No end column bounds the whole end row.
                None => row <= end_row.as_str(),
            },
        };
        after_start && before_end
    }
}

/// Canonical query request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSpec {
    /// Row ranges; mutually exclusive with `cell_intervals`.
    pub row_intervals: Vec<RowInterval>,
    /// Row-and-column ranges; mutually exclusive with `row_intervals`.
    pub cell_intervals: Vec<CellInterval>,
    /// Projected column families. Empty means every family.
    pub columns: Vec<String>,
    /// Maximum revisions per cell.
    pub revs: u32,
    /// Maximum rows returned.
    pub row_limit: Option<u32>,
    /// Maximum cells returned per column family.
    pub cell_limit: Option<u32>,
    /// Lower timestamp bound, nanoseconds.
    pub start_time: Option<i64>,
    /// Upper timestamp bound, nanoseconds.
    pub end_time: Option<i64>,
    /// Include delete markers not yet purged.
    pub return_deletes: bool,
    /// Return keys without values.
    pub keys_only: bool,
}

impl Default for ScanSpec {
    fn default() -> Self {
        Self {
            row_intervals: Vec::new(),
            cell_intervals: Vec::new(),
            columns: Vec::new(),
            revs: DEFAULT_REVS,
            row_limit: None,
            cell_limit: None,
            start_time: None,
            end_time: None,
            return_deletes: false,
            keys_only: false,
        }
    }
}

impl ScanSpec {
    /// Build a spec from finder options.
    ///
    /// Row selection takes the first of: explicit row keys, row intervals, a
    /// single start/end pair. Fails with [`HyperError::Configuration`] for
    /// value conditions, a half-specified range, or row selection combined
    /// with cell intervals.
    pub fn from_options(options: &FindOptions) -> Result<Self> {
        reject_conditions(options.conditions.as_ref())?;

        let start_inclusive = options.start_inclusive.unwrap_or(true);
        let end_inclusive = options.end_inclusive.unwrap_or(true);
        let interval = |start: &str, end: &str| RowInterval {
            start_row: Some(start.to_owned()),
            start_inclusive,
            end_row: Some(end.to_owned()),
            end_inclusive,
        };

        let row_intervals: Vec<RowInterval> = if let Some(keys) = &options.row_keys {
            keys.iter().map(|key| interval(key, key)).collect()
        } else if let Some(pairs) = &options.row_intervals {
            pairs.iter().map(|(start, end)| interval(start, end)).collect()
        } else {
            match (&options.start_row, &options.end_row) {
                (Some(start), Some(end)) => vec![interval(start, end)],
                (Some(_), None) => {
                    return Err(HyperError::configuration("start_row given without end_row"))
                }
                (None, Some(_)) => {
                    return Err(HyperError::configuration("end_row given without start_row"))
                }
                (None, None) => Vec::new(),
            }
        };

        let cell_intervals = options.cell_intervals.clone().unwrap_or_default();
        if !row_intervals.is_empty() && !cell_intervals.is_empty() {
            return Err(HyperError::configuration(
                "row selection and cell_intervals cannot be combined",
            ));
        }

        let columns = options
            .select
            .as_ref()
            .map(|select| project_families(&select.requested()))
            .unwrap_or_default();

        Ok(Self {
            row_intervals,
            cell_intervals,
            columns,
            revs: options.revs.unwrap_or(DEFAULT_REVS),
            row_limit: options.limit,
            cell_limit: options.cell_limit,
            start_time: options.start_time,
            end_time: options.end_time,
            return_deletes: options.return_deletes.unwrap_or(false),
            keys_only: options.keys_only.unwrap_or(false),
        })
    }

    /// Finder options that rebuild this spec. Row intervals come back as
    /// explicit pairs; open bounds become empty strings.
    pub fn to_options(&self) -> FindOptions {
        let mut options = FindOptions::default()
            .revs(self.revs)
            .return_deletes(self.return_deletes)
            .keys_only(self.keys_only);

        if let Some(first) = self.row_intervals.first() {
            options = options
                .row_intervals(self.row_intervals.iter().map(|ri| {
                    (
                        ri.start_row.clone().unwrap_or_default(),
                        ri.end_row.clone().unwrap_or_default(),
                    )
                }))
                .start_inclusive(first.start_inclusive)
                .end_inclusive(first.end_inclusive);
        }
        if !self.cell_intervals.is_empty() {
            options = options.cell_intervals(self.cell_intervals.clone());
        }
        if !self.columns.is_empty() {
            options = options.select(Select::Columns(self.columns.clone()));
        }
        if let Some(limit) = self.row_limit {
            options = options.limit(limit);
        }
        if let Some(limit) = self.cell_limit {
            options = options.cell_limit(limit);
        }
        if let Some(nanos) = self.start_time {
            options = options.start_time(nanos);
        }
        if let Some(nanos) = self.end_time {
            options = options.end_time(nanos);
        }
        options
    }
}

fn reject_conditions(conditions: Option<&Conditions>) -> Result<()> {
    match conditions {
        None => Ok(()),
        Some(Conditions::Structured(map)) if map.is_empty() => Ok(()),
        Some(Conditions::Structured(_)) => Err(HyperError::configuration(
            "conditions on cell values are not supported; select rows by key",
        )),
        Some(Conditions::Text(_)) => Err(HyperError::configuration(
            "only structured conditions are recognized",
        )),
    }
}

/// Reduce column names to their families, dropping duplicates while keeping
/// first-appearance order. Servers project at family granularity.
pub(crate) fn project_families(columns: &[String]) -> Vec<String> {
    let mut families: Vec<String> = Vec::with_capacity(columns.len());
    for column in columns {
        let (family, _) = split_qualified_name(column);
        if !families.iter().any(|f| f == family) {
            families.push(family.to_owned());
        }
    }
    families
}
