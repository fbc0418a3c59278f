//! Unit tests for result file naming

use std::path::PathBuf;

use amplitude_events_downloader::output::{
    decode_user_id, encode_user_id, parse_result_file_name, result_file_name, OutputPathBuilder,
};
use amplitude_events_downloader::EntryKey;

use crate::support::date;

#[test]
fn test_name_round_trips_through_parser() {
    let key = EntryKey::new("user_with_events_in_name", date(2023, 12, 1), date(2024, 2, 29));
    let name = result_file_name(&key);
    assert_eq!(
        name,
        "user_user_with_events_in_name_events_20231201_to_20240229.json"
    );

    assert_eq!(parse_result_file_name(&name), Some(key));
}

#[test]
fn test_foreign_names_are_rejected() {
    assert!(parse_result_file_name(".staging-x1y2").is_none());
    assert!(parse_result_file_name("user__events_20240101_to_20240131.json").is_none());
    assert!(parse_result_file_name("user_a_events_2024_to_20240131.json").is_none());
    assert!(parse_result_file_name("notes.txt").is_none());
}

#[test]
fn test_user_id_encoding() {
    assert_eq!(encode_user_id("alice@example.com"), "alice@example.com");
    assert_eq!(encode_user_id("C:\\Users\\x"), "C%3A%5CUsers%5Cx");
    assert_eq!(encode_user_id("a/b"), "a%2Fb");
    assert_eq!(encode_user_id("../../x"), "..%2F..%2Fx");
    assert_eq!(decode_user_id("C%3A%5CUsers%5Cx").as_deref(), Some("C:\\Users\\x"));
}

#[test]
fn test_escaped_user_round_trips_through_file_name() {
    for user in ["a/b", "a_b", "a%2Fb", "x:y_events_z"] {
        let key = EntryKey::new(user, date(2024, 1, 1), date(2024, 1, 31));
        assert_eq!(parse_result_file_name(&result_file_name(&key)), Some(key));
    }
}

#[test]
fn test_builder_requires_range_and_user() {
    assert!(OutputPathBuilder::new(PathBuf::from("out"), "alice").build().is_err());
    assert!(OutputPathBuilder::new(PathBuf::from("out"), "  ")
        .with_range(date(2024, 1, 1), date(2024, 1, 2))
        .build()
        .is_err());
}

#[test]
fn test_distinct_ranges_get_distinct_files() {
    let a = EntryKey::new("alice", date(2024, 1, 1), date(2024, 1, 31));
    let b = EntryKey::new("alice", date(2024, 2, 1), date(2024, 2, 29));
    let root = PathBuf::from("userData/raw");

    let pa = OutputPathBuilder::for_key(root.clone(), &a).build().unwrap();
    let pb = OutputPathBuilder::for_key(root, &b).build().unwrap();
    assert_ne!(pa, pb);
}
