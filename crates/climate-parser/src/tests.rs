use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::NaiveDate;

use crate::errors::ParserError;
use crate::table::DelimitedTable;
use crate::values::{
    parse_optional_date, parse_optional_f64, parse_optional_i32, parse_optional_i64,
    parse_optional_text,
};

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/data")
        .join(name)
}

#[test]
fn reads_permit_fixture_by_column_name() {
    let table = DelimitedTable::from_path(&fixture_path("set1_sample.csv"))
        .expect("fixture should parse");

    assert_eq!(table.len(), 3);
    assert_eq!(table.malformed_rows(), 0);

    let id = table.require_column(&["approval_id"]).unwrap();
    let lat = table.column(&["LAT_JOB"]);
    let valuation = table.column(&["APPROVAL_VALUATION"]);

    let rows: Vec<_> = table.rows().collect();
    assert_eq!(rows[0].get(Some(id)), Some("A-100"));
    assert_eq!(parse_optional_f64(rows[0].get(lat)), Some(32.71));
    assert_eq!(parse_optional_f64(rows[1].get(lat)), None);
    assert_eq!(parse_optional_f64(rows[2].get(valuation)), None);
    assert_eq!(parse_optional_f64(rows[0].get(valuation)), Some(12000.0));
}

#[test]
fn absent_columns_read_as_null() {
    let content = "APPROVAL_ID,APPROVAL_TYPE\nA-1,Solar\n";
    let table = DelimitedTable::from_reader("inline", content.as_bytes()).unwrap();

    let missing = table.column(&["DATE_APPROVAL_CLOSE"]);
    assert!(missing.is_none());
    let row = table.rows().next().unwrap();
    assert_eq!(row.get(missing), None);
}

#[test]
fn require_column_reports_missing_name() {
    let content = "PROJECT_ID\nP-1\n";
    let table = DelimitedTable::from_reader("inline.csv", content.as_bytes()).unwrap();

    match table.require_column(&["APPROVAL_ID"]) {
        Err(ParserError::MissingColumn { file, column }) => {
            assert_eq!(file, "inline.csv");
            assert_eq!(column, "APPROVAL_ID");
        }
        other => panic!("expected MissingColumn, got {other:?}"),
    }
}

#[test]
fn empty_file_has_no_header() {
    let err = DelimitedTable::from_reader("empty.csv", "".as_bytes()).unwrap_err();
    assert!(matches!(err, ParserError::MissingHeader { .. }));
}

#[test]
fn short_rows_are_kept_and_invalid_utf8_is_counted() {
    let mut bytes = b"ZipCode,Month,Year\n92101,1,2020\n92102,2\n".to_vec();
    bytes.extend_from_slice(b"92103,\xff\xfe,2020\n");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("extract.csv");
    let mut file = fs::File::create(&path).unwrap();
    file.write_all(&bytes).unwrap();

    let table = DelimitedTable::from_path(&path).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(table.malformed_rows(), 1);

    let year = table.column(&["Year"]);
    let rows: Vec<_> = table.rows().collect();
    assert_eq!(parse_optional_i32(rows[1].get(year)), None);
}

#[test]
fn header_bom_and_case_are_ignored() {
    let content = "\u{feff}ZipCode,totalkwh\n92101,10\n";
    let table = DelimitedTable::from_reader("bom", content.as_bytes()).unwrap();
    assert!(table.column(&["zipcode"]).is_some());
    assert!(table.column(&["TotalkWh"]).is_some());
}

#[test]
fn missing_file_is_io_error() {
    let err = DelimitedTable::from_path(&fixture_path("does_not_exist.csv")).unwrap_err();
    assert!(matches!(err, ParserError::Io { .. }));
}

#[test]
fn value_coercions_are_permissive() {
    assert_eq!(parse_optional_text(Some("  Issued ")), Some("Issued".to_string()));
    assert_eq!(parse_optional_text(Some("   ")), None);

    assert_eq!(parse_optional_f64(Some("NaN")), None);
    assert_eq!(parse_optional_f64(Some("inf")), None);
    assert_eq!(parse_optional_f64(Some("-117.2")), Some(-117.2));

    assert_eq!(parse_optional_i64(Some("12.0")), Some(12));
    assert_eq!(parse_optional_i64(Some("12.5")), None);
    assert_eq!(parse_optional_i32(Some("99999999999")), None);

    let expected = NaiveDate::from_ymd_opt(2021, 3, 10);
    assert_eq!(parse_optional_date(Some("2021-03-10")), expected);
    assert_eq!(parse_optional_date(Some("03/10/2021")), expected);
    assert_eq!(parse_optional_date(Some("2021-03-10 14:22:00")), expected);
    assert_eq!(parse_optional_date(Some("2021-03-10T14:22:00.000")), expected);
    assert_eq!(parse_optional_date(Some("March 10")), None);
}

#[test]
fn zoned_timestamps_keep_their_written_date() {
    let expected = NaiveDate::from_ymd_opt(2021, 3, 10);
    assert_eq!(parse_optional_date(Some("2021-03-10T14:22:00Z")), expected);
    assert_eq!(parse_optional_date(Some("2021-03-10T14:22:00.000Z")), expected);
    assert_eq!(parse_optional_date(Some("2021-03-10 14:22:00+00")), expected);
    assert_eq!(parse_optional_date(Some("2021-03-10 14:22:00.5+0000")), expected);
    assert_eq!(parse_optional_date(Some("2021-03-10T14:22:00-08:00")), expected);
    assert_eq!(parse_optional_date(Some("2021-03-10T23:30:00+05:30")), expected);
    assert_eq!(parse_optional_date(None), None);
}
