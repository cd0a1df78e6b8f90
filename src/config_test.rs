use std::collections::HashMap;

use super::*;

fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn defaults_when_nothing_is_set() {
    let config = SanctuaryConfig::from_lookup(lookup_from(&[])).expect("config");
    assert_eq!(config, SanctuaryConfig::default());
    assert_eq!(config.room_id, "our-special-place");
    assert!((config.sip_increment - 10.0).abs() < f64::EPSILON);
    assert_eq!(config.unlock_taps, 3);
    assert_eq!(config.daily_goal_ml, 3000);
}

#[test]
fn variant_build_values_are_accepted() {
    let config = SanctuaryConfig::from_lookup(lookup_from(&[
        ("SANCTUARY_SIP_INCREMENT", "12.5"),
        ("SANCTUARY_UNLOCK_TAPS", "2"),
        ("SANCTUARY_ROOM_ID", "porch"),
        ("SANCTUARY_WELCOME_MESSAGE", "hi there"),
    ]))
    .expect("config");
    assert!((config.sip_increment - 12.5).abs() < f64::EPSILON);
    assert_eq!(config.unlock_taps, 2);
    assert_eq!(config.room_id, "porch");
    assert_eq!(config.welcome_message, "hi there");
}

#[test]
fn unparseable_value_is_rejected() {
    let err = SanctuaryConfig::from_lookup(lookup_from(&[("SANCTUARY_UNLOCK_TAPS", "three")]))
        .expect_err("should reject");
    assert_eq!(
        err,
        ConfigError::InvalidValue { key: "SANCTUARY_UNLOCK_TAPS", value: "three".into() }
    );
}

#[test]
fn out_of_range_increment_is_rejected() {
    for raw in ["0", "-1", "150", "NaN"] {
        let err = SanctuaryConfig::from_lookup(lookup_from(&[("SANCTUARY_SIP_INCREMENT", raw)]))
            .expect_err("should reject");
        assert!(matches!(err, ConfigError::SipIncrement(_)), "{raw}: {err}");
    }
}

#[test]
fn zero_taps_and_blank_room_are_rejected() {
    let err = SanctuaryConfig::from_lookup(lookup_from(&[("SANCTUARY_UNLOCK_TAPS", "0")]))
        .expect_err("should reject");
    assert_eq!(err, ConfigError::UnlockTaps);

    let err = SanctuaryConfig::from_lookup(lookup_from(&[("SANCTUARY_ROOM_ID", "  ")]))
        .expect_err("should reject");
    assert_eq!(err, ConfigError::EmptyRoomId);
}
