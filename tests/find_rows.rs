mod common;

use bytes::Bytes;
use common::{cell, pages_connection, random_key, seed};
use hypercell::{
    CellInterval, ColumnValue, Conditions, FindOptions, HyperError, OptionValue, RowInterval,
    ScanSpec, Select,
};

#[test]
fn scalar_families_assemble_per_row() {
    let mut conn = pages_connection();
    seed(
        &mut conn,
        "pages",
        &[
            cell("k1", "name", "", "A"),
            cell("k1", "url", "", "http://a"),
            cell("k2", "name", "", "B"),
        ],
    );

    let rows = conn.find("pages", &FindOptions::default()).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].key, "k1");
    assert_eq!(rows[0].scalar("name"), Some(&Bytes::from_static(b"A")));
    assert_eq!(rows[0].scalar("url"), Some(&Bytes::from_static(b"http://a")));
    assert_eq!(rows[1].key, "k2");
    assert_eq!(rows[1].scalar("name"), Some(&Bytes::from_static(b"B")));
    // Declared but absent families are backfilled.
    assert_eq!(rows[1].get("url"), Some(&ColumnValue::Scalar(None)));
    assert_eq!(rows[1].qualified("misc").map(|m| m.len()), Some(0));
}

#[test]
fn qualified_family_collects_a_map() {
    let mut conn = pages_connection();
    seed(
        &mut conn,
        "pages",
        &[cell("k1", "misc", "color", "red"), cell("k1", "misc", "size", "M")],
    );

    let rows = conn.find("pages", &FindOptions::default()).unwrap();
    assert_eq!(rows.len(), 1);
    let misc = rows[0].qualified("misc").unwrap();
    assert_eq!(misc.get("color"), Some(&Bytes::from_static(b"red")));
    assert_eq!(misc.get("size"), Some(&Bytes::from_static(b"M")));
}

#[test]
fn row_keys_become_degenerate_intervals() {
    let spec = ScanSpec::from_options(&FindOptions::default().row_keys(["a", "b"])).unwrap();
    assert_eq!(
        spec.row_intervals,
        vec![RowInterval::single("a"), RowInterval::single("b")]
    );
    assert!(spec.row_intervals.iter().all(|ri| ri.start_inclusive && ri.end_inclusive));
    assert_eq!(spec.revs, 1);
    assert!(!spec.return_deletes);
}

#[test]
fn half_open_range_is_rejected_before_the_call() {
    let mut conn = pages_connection();
    let err = conn
        .find("pages", &FindOptions::default().start_row("a"))
        .unwrap_err();
    assert!(matches!(err, HyperError::Configuration(_)));
    assert_eq!(conn.metrics().cells_read, 0);
}

#[test]
fn structured_conditions_are_rejected() {
    let mut conditions = std::collections::BTreeMap::new();
    conditions.insert("name".to_owned(), "x".to_owned());
    let options = FindOptions::default().conditions(Conditions::Structured(conditions));
    assert!(matches!(
        ScanSpec::from_options(&options),
        Err(HyperError::Configuration(_))
    ));

    let options = FindOptions::default().conditions(Conditions::Structured(Default::default()));
    assert!(ScanSpec::from_options(&options).is_ok());
}

#[test]
fn unknown_option_keys_are_rejected() {
    let err = FindOptions::from_pairs([
        ("limit", OptionValue::from(3i64)),
        ("order", OptionValue::from("name")),
    ])
    .unwrap_err();
    assert!(err.to_string().contains("order"));

    let options = FindOptions::from_pairs([
        ("limit", OptionValue::from(3i64)),
        ("readonly", OptionValue::from(true)),
    ])
    .unwrap();
    assert_eq!(ScanSpec::from_options(&options).unwrap().row_limit, Some(3));
}

#[test]
fn projection_limits_families_and_backfill() {
    let mut conn = pages_connection();
    seed(
        &mut conn,
        "pages",
        &[
            cell("k1", "name", "", "A"),
            cell("k1", "url", "", "http://a"),
            cell("k1", "misc", "color", "red"),
        ],
    );

    let options = FindOptions::default()
        .select(Select::Text("name, misc:color".into()))
        .instantiate_only_requested_columns(true);
    let rows = conn.find("pages", &options).unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].get("url").is_none());
    assert!(rows[0].scalar("name").is_some());
    assert!(rows[0].qualified("misc").is_some());

    let rows = conn
        .find("pages", &FindOptions::default().select(Select::All))
        .unwrap();
    assert!(rows[0].scalar("url").is_some());
}

#[test]
fn find_one_and_exists() {
    let mut conn = pages_connection();
    seed(&mut conn, "pages", &[cell("k1", "name", "", "A")]);

    let row = conn.find_one("pages", "k1").unwrap();
    assert_eq!(row.scalar("name"), Some(&Bytes::from_static(b"A")));
    assert!(matches!(
        conn.find_one("pages", "nope"),
        Err(HyperError::NotFound { ref row, .. }) if row == "nope"
    ));
    assert!(conn.exists("pages", "k1").unwrap());
    assert!(!conn.exists("pages", "k2").unwrap());
}

#[test]
fn ranges_limits_and_cell_intervals() {
    let mut conn = pages_connection();
    let mut keys: Vec<String> = (0..20).map(|_| random_key(8)).collect();
    keys.sort();
    keys.dedup();
    let cells: Vec<_> = keys.iter().map(|k| cell(k, "name", "", k)).collect();
    seed(&mut conn, "pages", &cells);

    let rows = conn.find("pages", &FindOptions::default()).unwrap();
    let returned: Vec<_> = rows.iter().map(|r| r.key.clone()).collect();
    assert_eq!(returned, keys);

    let rows = conn.find("pages", &FindOptions::default().limit(3)).unwrap();
    assert_eq!(rows.len(), 3);

    let (start, end) = (keys[2].clone(), keys[5].clone());
    let rows = conn
        .find(
            "pages",
            &FindOptions::default()
                .start_row(start.clone())
                .end_row(end.clone())
                .start_inclusive(false),
        )
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].key, keys[3]);

    let interval = CellInterval {
        start_row: Some(start),
        start_column: Some("name".into()),
        start_inclusive: true,
        end_row: Some(end),
        end_column: Some("name".into()),
        end_inclusive: true,
    };
    let cells = conn
        .get_cells(
            "pages",
            &FindOptions::default().cell_intervals(vec![interval.clone()]),
        )
        .unwrap();
    assert_eq!(cells.len(), 4);

    let mixed = FindOptions::default()
        .row_keys([keys[0].as_str()])
        .cell_intervals(vec![interval]);
    assert!(matches!(
        conn.get_cells("pages", &mixed),
        Err(HyperError::Configuration(_))
    ));
}

#[test]
fn revisions_and_keys_only() {
    let mut conn = pages_connection();
    seed(&mut conn, "pages", &[cell("k1", "url", "", "v1")]);
    seed(&mut conn, "pages", &[cell("k1", "url", "", "v2")]);

    let cells = conn.get_cells("pages", &FindOptions::default()).unwrap();
    assert_eq!(cells.len(), 1);
    assert_eq!(cells[0].value, Bytes::from_static(b"v2"));

    let cells = conn
        .get_cells("pages", &FindOptions::default().revs(0))
        .unwrap();
    assert_eq!(cells.len(), 2);

    let cells = conn
        .get_cells("pages", &FindOptions::default().keys_only(true))
        .unwrap();
    assert!(cells[0].value.is_empty());
}
