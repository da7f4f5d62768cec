//! Cell data model and the native array form cells travel in.
//!
//! Reads and most writes move cells as flat arrays of byte strings
//! (`[row, family, qualifier, value, timestamp?]`), which is far cheaper to
//! decode than the structured form. Deletes need the structured form because
//! arrays cannot carry a flag.

use std::fmt;

use bytes::Bytes;

use crate::error::TransportError;

/// Flag attached to every cell written to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CellFlag {
    /// Delete every cell of the row.
    DeleteRow,
    /// Delete every cell of one column family.
    DeleteCf,
    /// Delete one cell.
    DeleteCell,
    /// Regular insert.
    #[default]
    Insert,
}

impl CellFlag {
    /// Wire discriminant.
    pub const fn as_i16(self) -> i16 {
        match self {
            CellFlag::DeleteRow => 0,
            CellFlag::DeleteCf => 1,
            CellFlag::DeleteCell => 2,
            CellFlag::Insert => 255,
        }
    }

    /// Whether the flag marks a deletion.
    pub const fn is_delete(self) -> bool {
        !matches!(self, CellFlag::Insert)
    }
}

impl TryFrom<i16> for CellFlag {
    type Error = TransportError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(CellFlag::DeleteRow),
            1 => Ok(CellFlag::DeleteCf),
            2 => Ok(CellFlag::DeleteCell),
            255 => Ok(CellFlag::Insert),
            other => Err(TransportError::protocol(format!(
                "unknown cell flag {other}"
            ))),
        }
    }
}

/// Native array form of a cell: row, family, qualifier, value and an
/// optional decimal timestamp.
pub type CellArray = Vec<Bytes>;

/// A single data point of the store.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Cell {
    /// Row key.
    pub row: String,
    /// Column family. Empty for row deletes.
    pub family: String,
    /// Column qualifier; `None` for unqualified families.
    pub qualifier: Option<String>,
    /// Raw cell value.
    pub value: Bytes,
    /// Store timestamp in nanoseconds, if known or requested.
    pub timestamp: Option<i64>,
    /// Store revision, if known.
    pub revision: Option<i64>,
    /// Insert or delete marker.
    pub flag: CellFlag,
}

impl Cell {
    /// A cell to insert. An empty qualifier means "unqualified".
    pub fn insert(
        row: impl Into<String>,
        family: impl Into<String>,
        qualifier: Option<&str>,
        value: impl Into<Bytes>,
    ) -> Self {
        Self {
            row: row.into(),
            family: family.into(),
            qualifier: normalize_qualifier(qualifier.map(str::to_owned)),
            value: value.into(),
            ..Self::default()
        }
    }

    /// Attach a timestamp.
    pub fn with_timestamp(self, timestamp: i64) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..self
        }
    }

    /// Marker deleting a single cell.
    pub fn delete_cell(
        row: impl Into<String>,
        family: impl Into<String>,
        qualifier: Option<&str>,
    ) -> Self {
        Self {
            flag: CellFlag::DeleteCell,
            ..Self::insert(row, family, qualifier, Bytes::new())
        }
    }

    /// Marker deleting a whole row.
    pub fn delete_row(row: impl Into<String>) -> Self {
        Self {
            row: row.into(),
            flag: CellFlag::DeleteRow,
            ..Self::default()
        }
    }

    /// Decode the native array form received from the store.
    pub fn from_native(array: CellArray) -> Result<Self, TransportError> {
        if array.len() < 4 {
            return Err(TransportError::protocol(format!(
                "native cell array has {} elements, expected at least 4",
                array.len()
            )));
        }
        let mut parts = array.into_iter();
        let row = utf8(parts.next(), "row")?;
        let family = utf8(parts.next(), "column family")?;
        let qualifier = normalize_qualifier(Some(utf8(parts.next(), "column qualifier")?));
        let value = parts.next().unwrap_or_default();
        let timestamp = match parts.next() {
            Some(raw) if !raw.is_empty() => {
                let text = std::str::from_utf8(&raw)
                    .map_err(|_| TransportError::protocol("timestamp is not utf-8"))?;
                Some(text.parse::<i64>().map_err(|_| {
                    TransportError::protocol(format!("invalid cell timestamp {text:?}"))
                })?)
            }
            _ => None,
        };

        Ok(Self {
            row,
            family,
            qualifier,
            value,
            timestamp,
            ..Self::default()
        })
    }

    /// Encode into the native array form. Always four elements, plus the
    /// timestamp when present.
    pub fn to_native(&self) -> CellArray {
        let mut array = Vec::with_capacity(5);
        array.push(Bytes::copy_from_slice(self.row.as_bytes()));
        array.push(Bytes::copy_from_slice(self.family.as_bytes()));
        array.push(match &self.qualifier {
            Some(q) => Bytes::copy_from_slice(q.as_bytes()),
            None => Bytes::new(),
        });
        array.push(self.value.clone());
        if let Some(ts) = self.timestamp {
            array.push(Bytes::from(ts.to_string()));
        }
        array
    }

    /// `family` or `family:qualifier`.
    pub fn column_name(&self) -> String {
        qualified_column_name(&self.family, self.qualifier.as_deref())
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("row", &self.row)
            .field("column", &self.column_name())
            .field("value_len", &self.value.len())
            .field("timestamp", &self.timestamp)
            .field("flag", &self.flag)
            .finish()
    }
}

fn utf8(raw: Option<Bytes>, what: &str) -> Result<String, TransportError> {
    let raw = raw.unwrap_or_default();
    String::from_utf8(raw.to_vec())
        .map_err(|_| TransportError::protocol(format!("{what} is not utf-8")))
}

fn normalize_qualifier(qualifier: Option<String>) -> Option<String> {
    qualifier.filter(|q| !q.is_empty())
}

/// Split `family:qualifier` at the first colon.
pub fn split_qualified_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once(':') {
        Some((family, qualifier)) => (family, Some(qualifier)),
        None => (name, None),
    }
}

/// Join a family and an optional qualifier with a colon.
pub fn qualified_column_name(family: &str, qualifier: Option<&str>) -> String {
    match qualifier {
        Some(q) => format!("{family}:{q}"),
        None => family.to_owned(),
    }
}

/// Map a store column name to an identifier-safe attribute name: every run
/// of dashes becomes a single underscore.
pub fn sanitize_column_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_dashes = false;
    for ch in name.chars() {
        if ch == '-' {
            if !in_dashes {
                out.push('_');
            }
            in_dashes = true;
        } else {
            out.push(ch);
            in_dashes = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn native(parts: &[&str]) -> CellArray {
        parts
            .iter()
            .map(|p| Bytes::copy_from_slice(p.as_bytes()))
            .collect()
    }

    #[test]
    fn decodes_four_and_five_element_arrays() {
        let cell = Cell::from_native(native(&["page_1", "name", "", "LOLcats"])).unwrap();
        assert_eq!(cell.row, "page_1");
        assert_eq!(cell.family, "name");
        assert_eq!(cell.qualifier, None);
        assert_eq!(cell.value, Bytes::from_static(b"LOLcats"));
        assert_eq!(cell.timestamp, None);
        assert_eq!(cell.flag, CellFlag::Insert);

        let cell = Cell::from_native(native(&[
            "page_1",
            "misc",
            "color",
            "red",
            "1237331693147619001",
        ]))
        .unwrap();
        assert_eq!(cell.qualifier.as_deref(), Some("color"));
        assert_eq!(cell.timestamp, Some(1_237_331_693_147_619_001));
    }

    #[test]
    fn rejects_short_or_malformed_arrays() {
        assert!(Cell::from_native(native(&["k", "f", ""])).is_err());
        assert!(Cell::from_native(native(&["k", "f", "", "v", "soon"])).is_err());
    }

    #[test]
    fn native_form_keeps_empty_qualifier_slot() {
        let cell = Cell::insert("k1", "name", None, "A");
        let array = cell.to_native();
        assert_eq!(array.len(), 4);
        assert!(array[2].is_empty());
        assert_eq!(Cell::from_native(array).unwrap(), cell);

        let cell = Cell::insert("k1", "misc", Some("size"), "M").with_timestamp(9);
        assert_eq!(cell.to_native().len(), 5);
        assert_eq!(Cell::from_native(cell.to_native()).unwrap(), cell);
    }

    #[test]
    fn empty_qualifier_means_unqualified() {
        let cell = Cell::insert("k1", "name", Some(""), "A");
        assert_eq!(cell.qualifier, None);
        assert_eq!(cell.column_name(), "name");
    }

    #[test]
    fn delete_markers_carry_flags() {
        assert_eq!(Cell::delete_row("k1").flag, CellFlag::DeleteRow);
        let cell = Cell::delete_cell("k1", "misc", Some("color"));
        assert_eq!(cell.flag, CellFlag::DeleteCell);
        assert!(cell.flag.is_delete());
        assert_eq!(cell.column_name(), "misc:color");
    }

    #[test]
    fn flag_wire_values() {
        for flag in [
            CellFlag::DeleteRow,
            CellFlag::DeleteCf,
            CellFlag::DeleteCell,
            CellFlag::Insert,
        ] {
            assert_eq!(CellFlag::try_from(flag.as_i16()).unwrap(), flag);
        }
        assert!(CellFlag::try_from(7).is_err());
    }

    #[test]
    fn column_name_helpers() {
        assert_eq!(split_qualified_name("misc:color"), ("misc", Some("color")));
        assert_eq!(split_qualified_name("misc:a:b"), ("misc", Some("a:b")));
        assert_eq!(split_qualified_name("name"), ("name", None));
        assert_eq!(qualified_column_name("misc", Some("x")), "misc:x");
        assert_eq!(sanitize_column_name("page--view-count"), "page_view_count");
        assert_eq!(sanitize_column_name("plain"), "plain");
    }
}
