use super::*;

#[test]
fn clamp_level_bounds_and_nan() {
    assert!((clamp_level(-5.0) - 0.0).abs() < f64::EPSILON);
    assert!((clamp_level(105.0) - 100.0).abs() < f64::EPSILON);
    assert!((clamp_level(42.5) - 42.5).abs() < f64::EPSILON);
    assert!((clamp_level(f64::NAN) - 0.0).abs() < f64::EPSILON);
}

#[test]
fn fresh_document_uses_welcome_and_today() {
    let doc = RoomDocument::fresh("2026-10-18", DEFAULT_WELCOME_MESSAGE);
    assert!((doc.water_level - 0.0).abs() < f64::EPSILON);
    assert!(!doc.has_unread_message);
    assert_eq!(doc.last_message, DEFAULT_WELCOME_MESSAGE);
    assert_eq!(doc.last_reset_date, "2026-10-18");
}

#[test]
fn from_fields_defaults_missing_and_mistyped_values() {
    let fields = serde_json::json!({
        "waterLevel": "lots",
        "lastMessage": 7,
    });
    let doc = RoomDocument::from_fields(fields.as_object().expect("object"));
    assert!((doc.water_level - 0.0).abs() < f64::EPSILON);
    assert!(!doc.has_unread_message);
    assert_eq!(doc.last_message, "");
    assert_eq!(doc.last_reset_date, "");
}

#[test]
fn from_fields_clamps_out_of_range_level() {
    let fields = serde_json::json!({"waterLevel": 140, "lastResetDate": "2026-10-18"});
    let doc = RoomDocument::from_fields(fields.as_object().expect("object"));
    assert!((doc.water_level - 100.0).abs() < f64::EPSILON);
}

#[test]
fn to_fields_uses_camel_case_wire_keys() {
    let doc = RoomDocument::fresh("2026-10-18", "hi");
    let fields = doc.to_fields();
    assert_eq!(fields.get("waterLevel"), Some(&serde_json::json!(0.0)));
    assert_eq!(fields.get("hasUnreadMessage"), Some(&serde_json::json!(false)));
    assert_eq!(fields.get("lastMessage"), Some(&serde_json::json!("hi")));
    assert_eq!(fields.get("lastResetDate"), Some(&serde_json::json!("2026-10-18")));
    assert_eq!(RoomDocument::from_fields(&fields), doc);
}

#[test]
fn serde_matches_wire_keys() {
    let doc = RoomDocument::fresh("2026-10-18", "hi");
    let json = serde_json::to_value(&doc).expect("serialize");
    assert_eq!(json, Value::Object(doc.to_fields()));
}

#[test]
fn day_status_detects_rollover() {
    let doc = RoomDocument::fresh("2026-10-17", "hi");
    assert_eq!(DayStatus::classify(&doc, "2026-10-17"), DayStatus::Fresh);
    assert_eq!(
        DayStatus::classify(&doc, "2026-10-18"),
        DayStatus::Stale { last_reset_date: "2026-10-17".into() }
    );
}

#[test]
fn missing_reset_date_is_stale() {
    let doc = RoomDocument::from_fields(&Map::new());
    assert!(matches!(DayStatus::classify(&doc, "2026-10-18"), DayStatus::Stale { .. }));
}

#[test]
fn daily_reset_patch_leaves_messages_alone() {
    let mut doc = RoomDocument {
        water_level: 70.0,
        has_unread_message: true,
        last_message: "drink up".into(),
        last_reset_date: "2026-10-17".into(),
    };
    let patch = RoomPatch::daily_reset("2026-10-18");
    assert_eq!(patch.fields(), vec![Field::WaterLevel, Field::LastResetDate]);

    patch.apply_to(&mut doc);
    assert!((doc.water_level - 0.0).abs() < f64::EPSILON);
    assert_eq!(doc.last_reset_date, "2026-10-18");
    assert!(doc.has_unread_message);
    assert_eq!(doc.last_message, "drink up");
}

#[test]
fn note_and_acknowledge_patches() {
    let mut doc = RoomDocument::fresh("2026-10-18", "hi");
    RoomPatch::note("hello").apply_to(&mut doc);
    assert_eq!(doc.last_message, "hello");
    assert!(doc.has_unread_message);

    RoomPatch::acknowledge().apply_to(&mut doc);
    assert_eq!(doc.last_message, "hello");
    assert!(!doc.has_unread_message);
}

#[test]
fn patch_to_fields_only_carries_set_fields() {
    let fields = RoomPatch::acknowledge().to_fields();
    assert_eq!(fields.len(), 1);
    assert_eq!(fields.get("hasUnreadMessage"), Some(&serde_json::json!(false)));
    assert!(RoomPatch::default().is_empty());
}
