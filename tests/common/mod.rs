//! Common test utilities for integration tests.

#![allow(dead_code)]

use hypercell::{
    Cell, ColumnDefinition, Connection, ConnectionConfig, MemoryBroker, TableDefinition,
    WriteOptions,
};

/// Install a test-writer subscriber once; `RUST_LOG=hypercell=debug` shows
/// the crate's events.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Connection over an empty in-process store.
pub fn memory_connection() -> Connection<MemoryBroker> {
    init_tracing();
    Connection::new(MemoryBroker::new(), ConnectionConfig::default())
}

/// `pages (name, url, misc:{color,size})`, empty.
pub fn pages_connection() -> Connection<MemoryBroker> {
    let mut conn = memory_connection();
    let pages = TableDefinition::new("pages")
        .column(ColumnDefinition::new("name").max_versions(1))
        .column(ColumnDefinition::new("url"))
        .column(ColumnDefinition::qualified("misc", ["color", "size"]));
    conn.create_table(&pages).expect("create pages");
    conn
}

/// Write cells through the default mutator path.
pub fn seed(conn: &mut Connection<MemoryBroker>, table: &str, cells: &[Cell]) {
    conn.write_cells(table, cells, &WriteOptions::default())
        .expect("seed cells");
}

/// Cell with an optional qualifier given as "" for none.
pub fn cell(row: &str, family: &str, qualifier: &str, value: &str) -> Cell {
    Cell::insert(row, family, Some(qualifier), value.to_owned())
}

/// Random lowercase row key of `len` characters.
pub fn random_key(len: usize) -> String {
    (0..len).map(|_| fastrand::lowercase()).collect()
}
