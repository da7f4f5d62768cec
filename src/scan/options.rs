//! Finder options: the declarative query description handed down by the
//! model layer before it is turned into a [`ScanSpec`](super::ScanSpec).

use std::collections::BTreeMap;

use crate::{
    error::{HyperError, Result},
    scan::CellInterval,
};

/// Column projection requested by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Select {
    /// Every column; no projection is sent to the store.
    All,
    /// Comma separated column names; `*` means [`Select::All`].
    Text(String),
    /// Explicit column names, `family` or `family:qualifier`.
    Columns(Vec<String>),
}

impl Select {
    /// Column names as the caller wrote them, before family projection.
    /// Empty when every column is selected.
    pub fn requested(&self) -> Vec<String> {
        match self {
            Select::All => Vec::new(),
            Select::Text(text) if text.trim() == "*" => Vec::new(),
            Select::Text(text) => text
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect(),
            Select::Columns(columns) => columns.clone(),
        }
    }
}

/// Filter conditions. The store cannot query by cell value, so only an
/// absent or empty structured map is ever accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conditions {
    /// Attribute name to expected value.
    Structured(BTreeMap<String, String>),
    /// Free-form condition text.
    Text(String),
}

/// Loosely typed option value for [`FindOptions::from_pairs`].
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    /// Boolean switch.
    Bool(bool),
    /// Integer setting.
    Int(i64),
    /// Single string.
    Text(String),
    /// List of strings.
    List(Vec<String>),
    /// List of `(start, end)` pairs.
    Pairs(Vec<(String, String)>),
    /// Prebuilt cell intervals.
    CellIntervals(Vec<CellInterval>),
    /// String map.
    Map(BTreeMap<String, String>),
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Text(value.to_owned())
    }
}

impl From<String> for OptionValue {
    fn from(value: String) -> Self {
        OptionValue::Text(value)
    }
}

impl From<Vec<String>> for OptionValue {
    fn from(value: Vec<String>) -> Self {
        OptionValue::List(value)
    }
}

impl From<Vec<&str>> for OptionValue {
    fn from(value: Vec<&str>) -> Self {
        OptionValue::List(value.into_iter().map(str::to_owned).collect())
    }
}

impl From<Vec<(String, String)>> for OptionValue {
    fn from(value: Vec<(String, String)>) -> Self {
        OptionValue::Pairs(value)
    }
}

impl From<Vec<CellInterval>> for OptionValue {
    fn from(value: Vec<CellInterval>) -> Self {
        OptionValue::CellIntervals(value)
    }
}

impl From<BTreeMap<String, String>> for OptionValue {
    fn from(value: BTreeMap<String, String>) -> Self {
        OptionValue::Map(value)
    }
}

/// Keys accepted by [`FindOptions::from_pairs`] that do not influence the
/// scan spec.
const IGNORED_KEYS: &[&str] = &["table_name", "include", "readonly", "columns", "scan_spec"];

/// Query description understood by the scan spec builder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub(crate) row_keys: Option<Vec<String>>,
    pub(crate) row_intervals: Option<Vec<(String, String)>>,
    pub(crate) start_row: Option<String>,
    pub(crate) end_row: Option<String>,
    pub(crate) start_inclusive: Option<bool>,
    pub(crate) end_inclusive: Option<bool>,
    pub(crate) cell_intervals: Option<Vec<CellInterval>>,
    pub(crate) select: Option<Select>,
    pub(crate) limit: Option<u32>,
    pub(crate) cell_limit: Option<u32>,
    pub(crate) revs: Option<u32>,
    pub(crate) start_time: Option<i64>,
    pub(crate) end_time: Option<i64>,
    pub(crate) return_deletes: Option<bool>,
    pub(crate) keys_only: Option<bool>,
    pub(crate) conditions: Option<Conditions>,
    pub(crate) instantiate_only_requested_columns: bool,
}

impl FindOptions {
    /// Select rows by exact key.
    pub fn row_keys<I, S>(self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        FindOptions {
            row_keys: Some(keys.into_iter().map(Into::into).collect()),
            ..self
        }
    }

    /// Select rows by a list of `(start, end)` key ranges.
    pub fn row_intervals<I, S>(self, intervals: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        FindOptions {
            row_intervals: Some(
                intervals
                    .into_iter()
                    .map(|(start, end)| (start.into(), end.into()))
                    .collect(),
            ),
            ..self
        }
    }

    /// First row of a single range. Requires [`FindOptions::end_row`].
    pub fn start_row(self, row: impl Into<String>) -> Self {
        FindOptions {
            start_row: Some(row.into()),
            ..self
        }
    }

    /// Last row of a single range. Requires [`FindOptions::start_row`].
    pub fn end_row(self, row: impl Into<String>) -> Self {
        FindOptions {
            end_row: Some(row.into()),
            ..self
        }
    }

    /// Whether range starts are inclusive (default `true`).
    pub fn start_inclusive(self, inclusive: bool) -> Self {
        FindOptions {
            start_inclusive: Some(inclusive),
            ..self
        }
    }

    /// Whether range ends are inclusive (default `true`).
    pub fn end_inclusive(self, inclusive: bool) -> Self {
        FindOptions {
            end_inclusive: Some(inclusive),
            ..self
        }
    }

    /// Column-bounded intervals. Cannot be combined with row selection.
    pub fn cell_intervals(self, intervals: Vec<CellInterval>) -> Self {
        FindOptions {
            cell_intervals: Some(intervals),
            ..self
        }
    }

    /// Column projection.
    pub fn select(self, select: Select) -> Self {
        FindOptions {
            select: Some(select),
            ..self
        }
    }

    /// Maximum number of rows returned.
    pub fn limit(self, limit: u32) -> Self {
        FindOptions {
            limit: Some(limit),
            ..self
        }
    }

    /// Maximum number of cells returned per column family.
    pub fn cell_limit(self, limit: u32) -> Self {
        FindOptions {
            cell_limit: Some(limit),
            ..self
        }
    }

    /// Maximum revisions returned per cell (default 1).
    pub fn revs(self, revs: u32) -> Self {
        FindOptions {
            revs: Some(revs),
            ..self
        }
    }

    /// Lower timestamp bound in nanoseconds.
    pub fn start_time(self, nanos: i64) -> Self {
        FindOptions {
            start_time: Some(nanos),
            ..self
        }
    }

    /// Upper timestamp bound in nanoseconds.
    pub fn end_time(self, nanos: i64) -> Self {
        FindOptions {
            end_time: Some(nanos),
            ..self
        }
    }

    /// Also return cells marked deleted but not yet purged (default `false`).
    pub fn return_deletes(self, return_deletes: bool) -> Self {
        FindOptions {
            return_deletes: Some(return_deletes),
            ..self
        }
    }

    /// Return keys without values.
    pub fn keys_only(self, keys_only: bool) -> Self {
        FindOptions {
            keys_only: Some(keys_only),
            ..self
        }
    }

    /// Filter conditions. Anything but an empty structured map is rejected
    /// when the scan spec is built.
    pub fn conditions(self, conditions: Conditions) -> Self {
        FindOptions {
            conditions: Some(conditions),
            ..self
        }
    }

    /// Only backfill columns that were part of the projection.
    pub fn instantiate_only_requested_columns(self, only_requested: bool) -> Self {
        FindOptions {
            instantiate_only_requested_columns: only_requested,
            ..self
        }
    }

    /// Build options from loosely typed key/value pairs.
    ///
    /// This is a strict allow-list: an unknown key, or a known key with a
    /// value of the wrong shape, fails with [`HyperError::Configuration`]
    /// naming the key.
    pub fn from_pairs<I, K>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, OptionValue)>,
        K: AsRef<str>,
    {
        let mut options = FindOptions::default();
        for (key, value) in pairs {
            let key = key.as_ref();
            match key {
                "row_keys" => {
                    options.row_keys = Some(match value {
                        OptionValue::Text(key) => vec![key],
                        OptionValue::List(keys) => keys,
                        other => return Err(mismatch(key, "a string list", &other)),
                    })
                }
                "row_intervals" => {
                    options.row_intervals = Some(match value {
                        OptionValue::Pairs(pairs) => pairs,
                        other => return Err(mismatch(key, "a list of pairs", &other)),
                    })
                }
                "start_row" => options.start_row = Some(text(key, value)?),
                "end_row" => options.end_row = Some(text(key, value)?),
                "start_inclusive" => options.start_inclusive = Some(flag(key, value)?),
                "end_inclusive" => options.end_inclusive = Some(flag(key, value)?),
                "cell_intervals" => {
                    options.cell_intervals = Some(match value {
                        OptionValue::CellIntervals(intervals) => intervals,
                        other => return Err(mismatch(key, "cell intervals", &other)),
                    })
                }
                "select" => {
                    options.select = Some(match value {
                        OptionValue::Text(text) => Select::Text(text),
                        OptionValue::List(columns) => Select::Columns(columns),
                        other => return Err(mismatch(key, "a string or string list", &other)),
                    })
                }
                "limit" => options.limit = Some(count(key, value)?),
                "cell_limit" => options.cell_limit = Some(count(key, value)?),
                "revs" => options.revs = Some(count(key, value)?),
                "start_time" => options.start_time = Some(int(key, value)?),
                "end_time" => options.end_time = Some(int(key, value)?),
                "return_deletes" => options.return_deletes = Some(flag(key, value)?),
                "keys_only" => options.keys_only = Some(flag(key, value)?),
                "conditions" => {
                    options.conditions = Some(match value {
                        OptionValue::Map(map) => Conditions::Structured(map),
                        OptionValue::Text(text) => Conditions::Text(text),
                        other => return Err(mismatch(key, "a map or string", &other)),
                    })
                }
                "instantiate_only_requested_columns" => {
                    options.instantiate_only_requested_columns = flag(key, value)?
                }
                ignored if IGNORED_KEYS.contains(&ignored) => {}
                unknown => {
                    return Err(HyperError::configuration(format!(
                        "unrecognized scan spec option: {unknown}"
                    )))
                }
            }
        }
        Ok(options)
    }

    pub(crate) fn selected_families(&self) -> Option<Vec<String>> {
        let requested = self.select.as_ref()?.requested();
        if requested.is_empty() {
            return None;
        }
        Some(requested)
    }
}

fn mismatch(key: &str, expected: &str, got: &OptionValue) -> HyperError {
    HyperError::configuration(format!(
        "scan spec option {key} expects {expected}, got {got:?}"
    ))
}

fn text(key: &str, value: OptionValue) -> Result<String> {
    match value {
        OptionValue::Text(text) => Ok(text),
        other => Err(mismatch(key, "a string", &other)),
    }
}

fn flag(key: &str, value: OptionValue) -> Result<bool> {
    match value {
        OptionValue::Bool(flag) => Ok(flag),
        other => Err(mismatch(key, "a boolean", &other)),
    }
}

fn int(key: &str, value: OptionValue) -> Result<i64> {
    match value {
        OptionValue::Int(n) => Ok(n),
        other => Err(mismatch(key, "an integer", &other)),
    }
}

fn count(key: &str, value: OptionValue) -> Result<u32> {
    match value {
        OptionValue::Int(n) => u32::try_from(n).map_err(|_| {
            HyperError::configuration(format!("scan spec option {key} out of range: {n}"))
        }),
        other => Err(mismatch(key, "a non-negative integer", &other)),
    }
}
