use std::fs;

use assert_matches::assert_matches;

use dye_plate_view::collection::ReadingCollection;
use dye_plate_view::domain::{Intensity, ROX};
use dye_plate_view::error::PlateError;
use dye_plate_view::parser::RecordParser;

const PLATE: &str = "Dye,ROX\n<>,1,2,3\nA,100,200,300\nB,110,200,310\n\nDye,VIC\n<>,1,2,3\nA,5000,5100,5200\n\nDye,FAM\n<>,1,2,3\nA,50,60,70\nP,1,2,3\n";

#[test]
fn parse_scenario_file() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("20230615101500_X_Y_ARR7.csv");
    fs::write(&path, "Dye,ROX\nA,100,200\n\nDye,FAM\nA,50,60\n").unwrap();

    let reading = RecordParser::parse(&path).unwrap();
    assert_eq!(reading.array_label(), "ARR7");
    let rox = reading.values(ROX).unwrap();
    assert_eq!(
        rox.iter().copied().collect::<Vec<_>>(),
        vec![Intensity::new(100.0), Intensity::new(200.0)]
    );
    assert_eq!(reading.grid(ROX).unwrap().at('A', 1), Some(100.0));
}

#[test]
fn value_and_grid_keys_match() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("20230615101500_run-7_plate_ARR7.csv");
    fs::write(&path, PLATE).unwrap();

    let reading = RecordParser::parse(&path).unwrap();
    let value_keys = reading.dye_values().keys().collect::<Vec<_>>();
    let grid_keys = reading.dye_grid().keys().collect::<Vec<_>>();
    assert_eq!(value_keys, grid_keys);
    assert_eq!(value_keys, vec!["FAM", "ROX", "VIC"]);
    assert_eq!(reading.values(ROX).unwrap().len(), 5);
    assert_eq!(reading.grid("FAM").unwrap().at('P', 3), Some(3.0));
}

#[test]
fn reparse_is_deterministic() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("20230615101500_X_Y_ARR7.csv");
    fs::write(&path, PLATE).unwrap();

    let first = RecordParser::parse(&path).unwrap();
    let second = RecordParser::parse(&path).unwrap();
    assert_eq!(first.dye_values(), second.dye_values());
    assert_eq!(first.dye_grid(), second.dye_grid());
    assert_eq!(first, second);
}

#[test]
fn unreadable_file_is_malformed() {
    let temp = tempfile::tempdir().unwrap();
    let err = RecordParser::parse(&temp.path().join("20230615101500_X_Y_ARR7.csv")).unwrap_err();
    assert_matches!(err, PlateError::MalformedRecord { .. });
}

#[test]
fn bad_file_left_out_of_scan() {
    let temp = tempfile::tempdir().unwrap();
    let good = temp.path().join("20230615101500_X_Y_GOOD.csv");
    let bad = temp.path().join("20230615111500_X_Y_BAD.csv");
    let unnamed = temp.path().join("export.csv");
    fs::write(&good, PLATE).unwrap();
    fs::write(&bad, "B,10\n").unwrap();
    fs::write(&unnamed, PLATE).unwrap();

    let err = RecordParser::parse(&bad).unwrap_err();
    assert_matches!(err, PlateError::SectionState { .. });

    let collection = ReadingCollection::scan(temp.path(), "csv").unwrap();
    assert_eq!(collection.len(), 1);
    let labels = collection
        .ordered_by_time()
        .map(|r| r.array_label().to_string())
        .collect::<Vec<_>>();
    assert_eq!(labels, vec!["GOOD"]);
}
