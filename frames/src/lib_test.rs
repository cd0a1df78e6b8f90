use super::*;

fn sample_frame() -> Frame {
    Frame {
        id: "id-1".to_owned(),
        parent_id: Some("parent-1".to_owned()),
        ts: 42,
        room_id: Some("our-special-place".to_owned()),
        from: Some("client-1".to_owned()),
        syscall: "doc:update".to_owned(),
        status: Status::Done,
        data: serde_json::json!({
            "fields": {"waterLevel": 40.0, "hasUnreadMessage": true},
            "ok": true,
            "tags": ["a", "b"],
            "nil": null
        }),
    }
}

#[test]
fn status_numeric_mapping_matches_wire_enum() {
    assert_eq!(Status::Request.as_i32(), 0);
    assert_eq!(Status::Done.as_i32(), 1);
    assert_eq!(Status::Error.as_i32(), 2);
    assert_eq!(Status::Cancel.as_i32(), 3);
    assert_eq!(Status::Item.as_i32(), 4);
    assert_eq!(Status::Bulk.as_i32(), 5);
}

#[test]
fn status_from_wire_rejects_out_of_range_value() {
    let err = Status::from_i32(99).expect_err("status should be invalid");
    assert!(matches!(err, CodecError::InvalidStatus(99)));
}

#[test]
fn terminal_statuses() {
    assert!(Status::Done.is_terminal());
    assert!(Status::Error.is_terminal());
    assert!(Status::Cancel.is_terminal());
    assert!(!Status::Request.is_terminal());
    assert!(!Status::Item.is_terminal());
    assert!(!Status::Bulk.is_terminal());
}

#[test]
fn encode_decode_round_trip_preserves_frame() {
    let frame = sample_frame();
    let bytes = encode_frame(&frame);
    let decoded = decode_frame(&bytes).expect("decode should succeed");
    assert_eq!(decoded, frame);
}

#[test]
fn decode_frame_rejects_malformed_bytes() {
    let err = decode_frame(&[0xff, 0x00, 0x01]).expect_err("bytes should fail");
    assert!(matches!(err, CodecError::Decode(_)));
}

#[test]
fn decode_frame_rejects_invalid_wire_status() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        room_id: None,
        from: None,
        syscall: "doc:get".to_owned(),
        status: 77,
        data: Some(json_to_proto_value(&serde_json::json!({}))),
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let err = decode_frame(&bytes).expect_err("status should fail");
    assert!(matches!(err, CodecError::InvalidStatus(77)));
}

#[test]
fn decode_frame_defaults_missing_data_to_empty_object() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        room_id: None,
        from: None,
        syscall: "doc:get".to_owned(),
        status: Status::Request.as_i32(),
        data: None,
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.data, serde_json::json!({}));
}

#[test]
fn decode_frame_converts_nan_number_to_json_null() {
    let wire = WireFrame {
        id: "id-1".to_owned(),
        parent_id: None,
        ts: 1,
        room_id: None,
        from: None,
        syscall: "doc:get".to_owned(),
        status: Status::Request.as_i32(),
        data: Some(prost_types::Value {
            kind: Some(prost_types::value::Kind::NumberValue(f64::NAN)),
        }),
    };
    let mut bytes = Vec::new();
    wire.encode(&mut bytes).expect("encode");

    let frame = decode_frame(&bytes).expect("decode");
    assert_eq!(frame.data, Value::Null);
}

#[test]
fn integer_json_numbers_are_normalized_to_float_numbers() {
    let frame = Frame::request("doc:get", serde_json::json!({"version": 2}));

    let decoded = decode_frame(&encode_frame(&frame)).expect("decode");
    assert_eq!(decoded.data.get("version"), Some(&serde_json::json!(2.0)));
    assert_eq!(data_u64(&decoded.data, "version"), Some(2));
}

#[test]
fn data_u64_rejects_fractional_and_negative_numbers() {
    let data = serde_json::json!({"a": 1.5, "b": -3.0, "c": "7", "d": 9});
    assert_eq!(data_u64(&data, "a"), None);
    assert_eq!(data_u64(&data, "b"), None);
    assert_eq!(data_u64(&data, "c"), None);
    assert_eq!(data_u64(&data, "d"), Some(9));
    assert_eq!(data_u64(&data, "missing"), None);
}

#[test]
fn request_sets_fields() {
    let frame = Frame::request("doc:subscribe", serde_json::json!({}));
    assert_eq!(frame.syscall, "doc:subscribe");
    assert_eq!(frame.status, Status::Request);
    assert!(frame.parent_id.is_none());
    assert!(frame.room_id.is_none());
    assert!(frame.ts > 0);
    assert!(!frame.id.is_empty());
}

#[test]
fn reply_inherits_context() {
    let req = Frame::request("doc:update", serde_json::json!({})).with_room_id("room-a");
    let done = req.done_with(serde_json::json!({"version": 4}));

    assert_eq!(done.parent_id.as_deref(), Some(req.id.as_str()));
    assert_eq!(done.room_id.as_deref(), Some("room-a"));
    assert_eq!(done.syscall, "doc:update");
    assert_eq!(done.status, Status::Done);
    assert_ne!(done.id, req.id);
}

#[test]
fn with_data_promotes_non_object_payload() {
    let frame = Frame::request("session:connected", Value::Null).with_data("client_id", "c-1");
    assert_eq!(frame.data, serde_json::json!({"client_id": "c-1"}));
}

#[test]
fn prefix_extraction() {
    let frame = Frame::request("doc:update", serde_json::json!({}));
    assert_eq!(frame.prefix(), "doc");

    let frame = Frame::request("noseparator", serde_json::json!({}));
    assert_eq!(frame.prefix(), "noseparator");
}

#[test]
fn error_from_typed() {
    #[derive(Debug, thiserror::Error)]
    #[error("document not found")]
    struct NotFound;

    impl ErrorCode for NotFound {
        fn error_code(&self) -> &'static str {
            "E_DOC_NOT_FOUND"
        }
    }

    let req = Frame::request("doc:update", serde_json::json!({}));
    let err = req.error_from(&NotFound);

    assert_eq!(err.status, Status::Error);
    assert_eq!(err.error_code(), Some("E_DOC_NOT_FOUND"));
    assert_eq!(err.error_message(), Some("document not found"));
    assert_eq!(
        err.data.get(FRAME_RETRYABLE).and_then(Value::as_bool),
        Some(false)
    );
}

#[test]
fn status_serializes_as_lowercase_json() {
    assert_eq!(
        serde_json::to_string(&Status::Request).expect("serialize"),
        "\"request\""
    );
    assert_eq!(
        serde_json::from_str::<Status>("\"error\"").expect("deserialize"),
        Status::Error
    );
    assert!(serde_json::from_str::<Status>("\"Error\"").is_err());
}
