//! Integration tests for the call façade
//!
//! These run the test guest in `fixtures/gram_guest.wat` through every
//! public operation.

mod common;

use common::{codec, counter, table_live};
use gram_codec_wasm::{BindingError, ErrorKind, HostValue, ParseSummary};

#[test]
fn test_validate_scenarios() {
    let codec = codec();
    assert!(codec.validate("(hello)").unwrap());
    assert!(!codec.validate("(unclosed").unwrap());
    assert!(!codec.validate("").unwrap());
    assert!(!codec.validate("hello)").unwrap());
    assert!(codec.validate("(a {name: \"Zoë\"})").unwrap());
}

#[test]
fn test_parse_reports_patterns_in_source_order() {
    let codec = codec();
    let result = codec.parse("(alice) (bob) (charlie)").unwrap();

    assert_eq!(result.pattern_count().unwrap(), 3);
    assert_eq!(
        result.identifiers().unwrap(),
        vec!["alice", "bob", "charlie"]
    );
    assert_eq!(table_live(&codec), 0);

    result.release().unwrap();
}

#[test]
fn test_parse_error_carries_guest_message() {
    let codec = codec();
    let err = codec.parse("(a {key: })").unwrap_err();

    assert_eq!(err.kind(), ErrorKind::GuestRaised);
    assert!(err.to_string().contains("property value"));
    match err {
        BindingError::Guest { value, .. } => assert!(matches!(value, HostValue::Error(_))),
        other => panic!("unexpected error: {other}"),
    }

    // The error slot was taken and no resource was handed out
    assert_eq!(table_live(&codec), 0);
    let live = codec
        .with_guest(|guest| Ok(guest.live_resources()))
        .unwrap();
    assert_eq!(live, 0);
}

#[test]
fn test_parse_rejects_empty_input() {
    let codec = codec();
    let err = codec.parse("   ").unwrap_err();
    assert_eq!(err.to_string(), "Parse error: unbalanced delimiters");
}

#[test]
fn test_round_trip_output_revalidates() {
    let codec = codec();
    for text in ["(hello)", "(alice) (bob) (charlie)", "[team | (alice), (bob)]"] {
        let output = codec.round_trip(text).unwrap();
        assert!(codec.validate(&output).unwrap(), "{output} should validate");
    }
}

#[test]
fn test_round_trip_multibyte() {
    let codec = codec();
    let text = "(café {drink: \"☕\"}) [𝄞 日本語]";
    assert_eq!(codec.round_trip(text).unwrap(), text);
}

#[test]
fn test_round_trip_frees_output_buffer() {
    let codec = codec();
    let before = counter(&codec, "free_calls");

    codec.round_trip("(alice)").unwrap();

    assert_eq!(counter(&codec, "free_calls"), before + 1);
    assert_eq!(counter(&codec, "last_free_size"), 7);
}

#[test]
fn test_round_trip_error_frees_nothing() {
    let codec = codec();
    let before = counter(&codec, "free_calls");

    let err = codec.round_trip("(unclosed").unwrap_err();

    assert_eq!(err.kind(), ErrorKind::GuestRaised);
    assert_eq!(err.to_string(), "Parse error: unbalanced delimiters");
    assert_eq!(counter(&codec, "free_calls"), before);
    assert_eq!(table_live(&codec), 0);
}

#[test]
fn test_version() {
    let codec = codec();
    let before = counter(&codec, "free_calls");

    assert_eq!(codec.version().unwrap(), "0.1.0");
    assert_eq!(codec.version().unwrap(), "0.1.0");

    assert_eq!(counter(&codec, "free_calls"), before + 2);
    assert_eq!(counter(&codec, "last_free_size"), 5);
}

#[test]
fn test_identifiers_release_slots_and_array() {
    let codec = codec();
    let result = codec.parse("(alice) (bob) (charlie)").unwrap();
    let before = counter(&codec, "free_calls");

    result.identifiers().unwrap();

    assert_eq!(counter(&codec, "free_calls"), before + 1);
    assert_eq!(counter(&codec, "last_free_size"), 12);
    assert_eq!(table_live(&codec), 0);
}

#[test]
fn test_groups_without_identifiers() {
    let codec = codec();
    let result = codec.parse("[a] ( ) (bob)").unwrap();
    assert_eq!(result.pattern_count().unwrap(), 3);
    assert_eq!(result.identifiers().unwrap(), vec!["bob"]);
}

#[test]
fn test_summary_serializes() {
    let codec = codec();
    let summary = codec.parse("(alice) (bob)").unwrap().summary().unwrap();

    assert_eq!(
        summary,
        ParseSummary {
            pattern_count: 2,
            identifiers: vec!["alice".to_string(), "bob".to_string()],
        }
    );
    assert_eq!(
        serde_json::to_value(&summary).unwrap(),
        serde_json::json!({ "pattern_count": 2, "identifiers": ["alice", "bob"] })
    );
}

#[test]
fn test_codec_clones_share_guest() {
    let codec = codec();
    let clone = codec.clone();
    assert!(codec.ptr_eq(&clone));

    clone.version().unwrap();
    let thread_codec = codec.clone();
    let valid = std::thread::spawn(move || thread_codec.validate("(hello)").unwrap())
        .join()
        .unwrap();
    assert!(valid);
}
