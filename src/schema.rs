//! Table schemas: declared column families, the schema-description document
//! returned by the store, and the attribute-name mapping table.
//!
//! Store column names may contain dashes, which are not valid identifiers
//! in the model layer. [`NameMap`] keeps the sanitized attribute name next to
//! the original family name and is built once per schema.

use std::collections::{BTreeMap, BTreeSet};

use quick_xml::{events::Event, Reader};

use crate::{
    cell::{qualified_column_name, sanitize_column_name},
    error::{HyperError, Result},
};

/// Declaration of one column family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    /// Family name as stored.
    pub name: String,
    /// Revisions kept per cell; `None` uses the store default.
    pub max_versions: Option<u32>,
    /// Whether the family holds a qualifier to value map.
    pub qualified: bool,
    /// Qualifiers known in advance for a qualified family.
    pub qualifiers: BTreeSet<String>,
}

impl ColumnDefinition {
    /// A scalar family.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_versions: None,
            qualified: false,
            qualifiers: BTreeSet::new(),
        }
    }

    /// A qualified family with its known qualifiers.
    pub fn qualified<I, S>(name: impl Into<String>, qualifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            qualified: true,
            qualifiers: qualifiers.into_iter().map(Into::into).collect(),
            ..Self::new(name)
        }
    }

    /// Set `MAX_VERSIONS`.
    pub fn max_versions(self, max_versions: u32) -> Self {
        Self {
            max_versions: Some(max_versions),
            ..self
        }
    }

    /// Identifier-safe attribute name.
    pub fn attribute_name(&self) -> String {
        sanitize_column_name(&self.name)
    }
}

/// Mapping between attribute names and original column names of one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameMap {
    by_attribute: BTreeMap<String, String>,
}

impl NameMap {
    /// Register a store column name.
    pub fn insert(&mut self, original: &str) {
        self.by_attribute
            .insert(sanitize_column_name(original), original.to_owned());
    }

    /// Forget a store column name.
    pub fn remove(&mut self, original: &str) {
        self.by_attribute.remove(&sanitize_column_name(original));
    }

    /// Original column name for an attribute name, if declared.
    pub fn original(&self, attribute: &str) -> Option<&str> {
        self.by_attribute.get(attribute).map(String::as_str)
    }

    /// Number of mapped names.
    pub fn len(&self) -> usize {
        self.by_attribute.len()
    }

    /// Whether nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.by_attribute.is_empty()
    }
}

/// Column families declared for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableSchema {
    table: String,
    columns: Vec<ColumnDefinition>,
    names: NameMap,
}

impl TableSchema {
    /// Build a schema from declarations.
    pub fn new(table: impl Into<String>, columns: Vec<ColumnDefinition>) -> Self {
        let mut schema = Self {
            table: table.into(),
            columns: Vec::with_capacity(columns.len()),
            names: NameMap::default(),
        };
        for column in columns {
            schema.push(column);
        }
        schema
    }

    /// Parse the store's schema-description document.
    ///
    /// ```text
    /// <Schema generation="2">
    ///   <AccessGroup name="default">
    ///     <ColumnFamily id="1">
    ///       <Generation>1</Generation>
    ///       <Name>date</Name>
    ///       <deleted>false</deleted>
    ///     </ColumnFamily>
    ///   </AccessGroup>
    /// </Schema>
    /// ```
    ///
    /// Families are deleted lazily and may still be listed with
    /// `<deleted>true</deleted>`; those are skipped.
    pub fn parse(table: impl Into<String>, document: &str) -> Result<Self> {
        let mut reader = Reader::from_str(document);
        let mut path: Vec<String> = Vec::new();
        let mut columns = Vec::new();
        let mut current: Option<PendingFamily> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(element)) => {
                    let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
                    path.push(name);
                    if is_column_family(&path) {
                        current = Some(PendingFamily::default());
                    }
                }
                Ok(Event::End(_)) => {
                    if is_column_family(&path) {
                        if let Some(family) = current.take() {
                            if let Some(column) = family.finish()? {
                                columns.push(column);
                            }
                        }
                    }
                    path.pop();
                }
                Ok(Event::Text(text)) => {
                    let Some(family) = current.as_mut() else {
                        continue;
                    };
                    if path.len() != 4 {
                        continue;
                    }
                    let value = text
                        .unescape()
                        .map_err(|err| HyperError::Schema(err.to_string()))?
                        .trim()
                        .to_owned();
                    match path[3].as_str() {
                        "Name" => family.name = Some(value),
                        "deleted" => family.deleted = value == "true",
                        "MaxVersions" => family.max_versions = Some(value),
                        _ => {}
                    }
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(err) => {
                    return Err(HyperError::Schema(format!(
                        "malformed schema document at byte {}: {err}",
                        reader.buffer_position()
                    )))
                }
            }
        }

        Ok(Self::new(table, columns))
    }

    /// Mark a family as qualified, declaring it if the store did not list it.
    pub fn with_qualified<I, S>(mut self, family: &str, qualifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let qualifiers: BTreeSet<String> = qualifiers.into_iter().map(Into::into).collect();
        for qualifier in &qualifiers {
            self.names
                .insert(&qualified_column_name(family, Some(qualifier)));
        }
        match self.columns.iter().position(|c| c.name == family) {
            Some(idx) => {
                let column = &mut self.columns[idx];
                column.qualified = true;
                column.qualifiers.extend(qualifiers);
            }
            None => self.push(ColumnDefinition::qualified(family, qualifiers)),
        }
        self
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Declared families in declaration order.
    pub fn columns(&self) -> &[ColumnDefinition] {
        &self.columns
    }

    /// Declared family by attribute name.
    pub fn column(&self, attribute: &str) -> Option<&ColumnDefinition> {
        self.columns
            .iter()
            .find(|c| c.attribute_name() == attribute)
    }

    /// Attribute name to original name mapping.
    pub fn names(&self) -> &NameMap {
        &self.names
    }

    /// Register a newly added family.
    pub fn add_column(&mut self, column: ColumnDefinition) {
        self.push(column);
    }

    /// Forget a dropped family.
    pub fn remove_column(&mut self, name: &str) {
        self.columns.retain(|c| c.name != name);
        self.names.remove(name);
    }

    fn push(&mut self, column: ColumnDefinition) {
        self.names.insert(&column.name);
        for qualifier in &column.qualifiers {
            self.names
                .insert(&qualified_column_name(&column.name, Some(qualifier)));
        }
        self.columns.push(column);
    }
}

fn is_column_family(path: &[String]) -> bool {
    path.len() == 3 && path[0] == "Schema" && path[1] == "AccessGroup" && path[2] == "ColumnFamily"
}

#[derive(Default)]
struct PendingFamily {
    name: Option<String>,
    deleted: bool,
    max_versions: Option<String>,
}

impl PendingFamily {
    fn finish(self) -> Result<Option<ColumnDefinition>> {
        if self.deleted {
            return Ok(None);
        }
        let name = self
            .name
            .filter(|n| !n.is_empty())
            .ok_or_else(|| HyperError::Schema("column family without a name".into()))?;
        let mut column = ColumnDefinition::new(name);
        if let Some(raw) = self.max_versions {
            let max_versions = raw
                .parse()
                .map_err(|_| HyperError::Schema(format!("invalid MaxVersions {raw:?}")))?;
            column = column.max_versions(max_versions);
        }
        Ok(Some(column))
    }
}

/// Table declaration rendered to a `CREATE TABLE` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    /// Table name.
    pub name: String,
    /// Column families.
    pub columns: Vec<ColumnDefinition>,
    /// Trailing table options appended verbatim.
    pub options: Option<String>,
    /// Drop an existing table of the same name before creating this one.
    pub force: bool,
}

impl TableDefinition {
    /// A table with no columns yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            options: None,
            force: false,
        }
    }

    /// Add a column family.
    pub fn column(mut self, column: ColumnDefinition) -> Self {
        self.columns.push(column);
        self
    }

    /// Append table options.
    pub fn options(self, options: impl Into<String>) -> Self {
        Self {
            options: Some(options.into()),
            ..self
        }
    }

    /// Replace an existing table instead of failing on it.
    pub fn force(self, force: bool) -> Self {
        Self { force, ..self }
    }

    /// `CREATE TABLE 'name' ('col' MAX_VERSIONS=n, ...) options`
    pub fn to_hql(&self) -> String {
        let columns = self
            .columns
            .iter()
            .map(column_hql)
            .collect::<Vec<_>>()
            .join(", ");
        let mut hql = format!("CREATE TABLE {} ({columns})", quote_name(&self.name));
        if let Some(options) = self.options.as_deref().filter(|o| !o.trim().is_empty()) {
            hql.push(' ');
            hql.push_str(options.trim());
        }
        hql
    }
}

/// `ALTER TABLE 'table' ADD ('col' MAX_VERSIONS=n)`
pub fn add_column_hql(table: &str, column: &ColumnDefinition) -> String {
    format!("ALTER TABLE {} ADD ({})", quote_name(table), column_hql(column))
}

/// `ALTER TABLE 'table' DROP ('col')`
pub fn drop_column_hql(table: &str, column: &str) -> String {
    format!("ALTER TABLE {} DROP ({})", quote_name(table), quote_name(column))
}

/// Quote a table or column name.
pub fn quote_name(name: &str) -> String {
    format!("'{name}'")
}

fn column_hql(column: &ColumnDefinition) -> String {
    match column.max_versions {
        Some(n) => format!("{} MAX_VERSIONS={n}", quote_name(&column.name)),
        None => quote_name(&column.name),
    }
}
