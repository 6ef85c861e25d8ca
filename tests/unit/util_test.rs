//! Tests for utility functions

use chrono::Utc;
use workcell_scheduler::util::{now_utc, Priority};

#[test]
fn test_clock_is_utc_now() {
    let before = Utc::now();
    let now = now_utc();
    assert!(now >= before);
    assert!((Utc::now() - now).num_seconds() < 1);
}

#[test]
fn test_priority_ordering() {
    assert!(Priority::Normal < Priority::High);
    assert_eq!(Priority::default(), Priority::Normal);
    assert_eq!(
        [Priority::Normal, Priority::High, Priority::Normal].into_iter().max(),
        Some(Priority::High)
    );
}

#[test]
fn test_priority_serialization() {
    let json = serde_json::to_string(&Priority::High).unwrap();
    assert_eq!(json, "\"high\"");
    let back: Priority = serde_json::from_str("\"normal\"").unwrap();
    assert_eq!(back, Priority::Normal);
    assert!(serde_json::from_str::<Priority>("\"critical\"").is_err());
}
