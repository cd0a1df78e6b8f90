use super::*;

#[test]
fn ws_url_maps_http_schemes() {
    assert_eq!(ws_url("http://127.0.0.1:3000").expect("http"), "ws://127.0.0.1:3000/api/ws");
    assert_eq!(ws_url("https://example.test/").expect("https"), "wss://example.test/api/ws");
    assert!(matches!(ws_url("ftp://nope"), Err(CliError::InvalidBaseUrl(_))));
}

#[test]
fn events_render_as_single_lines() {
    assert_eq!(describe_event(&SyncEvent::SnapshotAdopted { version: 3 }), "snapshot v3 adopted");
    assert_eq!(
        describe_event(&SyncEvent::ResetIssued { stale_date: "2026-10-17".into(), today: "2026-10-18".into() }),
        "new day 2026-10-18; reset from 2026-10-17"
    );
    assert_eq!(
        describe_event(&SyncEvent::WriteFailed { kind: WriteKind::AddWater, error: StoreError::Timeout }),
        format!("sip failed: {}", StoreError::Timeout)
    );
    assert_eq!(describe_event(&SyncEvent::SubscriptionEnded { error: None }), "subscription ended");
}

#[test]
fn cli_parses_sip_count_and_room() {
    let cli = Cli::try_parse_from(["sanctuary-cli", "--room", "elsewhere", "sip", "--count", "3"]).expect("parse");
    assert_eq!(cli.room.as_deref(), Some("elsewhere"));
    assert!(matches!(cli.command, Command::Sip { count: 3 }));
}
