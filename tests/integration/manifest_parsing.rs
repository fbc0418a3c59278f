//! Manifest files as users write them

use std::io::Cursor;
use tempfile::TempDir;

use amplitude_events_downloader::manifest::{ManifestError, ManifestReader};

use crate::support::{date, write_manifest};

#[test]
fn test_mixed_date_formats_and_noise() {
    let body = "\u{feff}# exported from the CRM\n\
                alice|2024-01-01|2024-01-31\n\
                \n\
                bob | January 5, 2024 | February 1, 2024\n\
                carol|Mar 01, 2024|Mar 31, 2024\n\
                dave|March 1, 2024 12:00:00.000 AM GMT+0000 (Coordinated Universal Time)|March 2, 2024 11:59:59.999 PM GMT+0000\n";
    let entries: Vec<_> = ManifestReader::from_reader(Cursor::new(body))
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(entries.len(), 4);
    assert_eq!(entries[0].line, 2);
    assert_eq!(entries[1].user_id, "bob");
    assert_eq!(entries[1].range_start, date(2024, 1, 5));
    assert_eq!(entries[1].range_end, date(2024, 2, 1));
    assert_eq!(entries[2].range_start, date(2024, 3, 1));
    assert_eq!(entries[3].range_start, date(2024, 3, 1));
    assert_eq!(entries[3].range_end, date(2024, 3, 2));
    assert_eq!(entries[3].line, 6);
}

#[test]
fn test_malformed_lines_carry_line_numbers() {
    let body = "alice|2024-01-01\n|2024-01-01|2024-01-31\nbob|2024-13-01|2024-01-31\ncarol|2024-02-01|2024-01-01\nok|2024-01-01|2024-01-01\n";
    let results: Vec<_> = ManifestReader::from_reader(Cursor::new(body)).collect();

    assert_eq!(results.len(), 5);
    let bad_lines: Vec<usize> = results
        .iter()
        .filter_map(|r| match r {
            Err(ManifestError::MalformedEntry { line, .. }) => Some(*line),
            _ => None,
        })
        .collect();
    assert_eq!(bad_lines, vec![1, 2, 3, 4]);
    assert!(results[4].is_ok());
}

#[test]
fn test_single_day_range_is_valid() {
    let temp = TempDir::new().unwrap();
    let path = write_manifest(temp.path(), "alice|2024-02-29|2024-02-29");

    let entries: Vec<_> = ManifestReader::open(&path)
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].range_start, entries[0].range_end);
}

#[test]
fn test_missing_file_is_unreadable() {
    let temp = TempDir::new().unwrap();
    match ManifestReader::open(temp.path().join("nope.txt")) {
        Err(ManifestError::Unreadable { source_name, .. }) => {
            assert!(source_name.ends_with("nope.txt"));
        }
        Ok(_) => panic!("expected an unreadable manifest"),
        Err(other) => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_empty_manifest_yields_nothing() {
    let entries: Vec<_> = ManifestReader::from_reader(Cursor::new("# nothing yet\n\n")).collect();
    assert!(entries.is_empty());
}
