//! Sanctuary configuration parsed from environment variables.
//!
//! The sip increment and the hidden-gesture tap threshold are parameters.
//! Deployed rooms use either 10 or 12.5 for the increment.

use crate::error::ConfigError;
use crate::room::{DEFAULT_WELCOME_MESSAGE, MAX_WATER_LEVEL};

pub const DEFAULT_ROOM_ID: &str = "our-special-place";
pub const DEFAULT_SIP_INCREMENT: f64 = 10.0;
pub const DEFAULT_UNLOCK_TAPS: u32 = 3;
pub const DEFAULT_DAILY_GOAL_ML: u32 = 3000;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct SanctuaryConfig {
    /// Fixed room identifier shared by both viewers.
    pub room_id: String,
    /// Percentage added by one sip.
    pub sip_increment: f64,
    /// Taps already counted before the unlocking tap of the hidden gesture.
    pub unlock_taps: u32,
    /// Note seeded into a newly created room.
    pub welcome_message: String,
    /// Volume represented by a full bottle, for display.
    pub daily_goal_ml: u32,
    /// Per-request timeout for remote store calls.
    pub request_timeout_ms: u64,
}

impl Default for SanctuaryConfig {
    fn default() -> Self {
        Self {
            room_id: DEFAULT_ROOM_ID.to_owned(),
            sip_increment: DEFAULT_SIP_INCREMENT,
            unlock_taps: DEFAULT_UNLOCK_TAPS,
            welcome_message: DEFAULT_WELCOME_MESSAGE.to_owned(),
            daily_goal_ml: DEFAULT_DAILY_GOAL_ML,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

impl SanctuaryConfig {
    /// Build typed config from environment variables.
    ///
    /// Optional:
    /// - `SANCTUARY_ROOM_ID`: default `our-special-place`
    /// - `SANCTUARY_SIP_INCREMENT`: default 10
    /// - `SANCTUARY_UNLOCK_TAPS`: default 3
    /// - `SANCTUARY_WELCOME_MESSAGE`
    /// - `SANCTUARY_DAILY_GOAL_ML`: default 3000
    /// - `SANCTUARY_REQUEST_TIMEOUT_MS`: default 10000
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when a variable is present but unparseable
    /// or out of range.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`], reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            room_id: lookup("SANCTUARY_ROOM_ID").unwrap_or(defaults.room_id),
            sip_increment: parse_var(&lookup, "SANCTUARY_SIP_INCREMENT", defaults.sip_increment)?,
            unlock_taps: parse_var(&lookup, "SANCTUARY_UNLOCK_TAPS", defaults.unlock_taps)?,
            welcome_message: lookup("SANCTUARY_WELCOME_MESSAGE").unwrap_or(defaults.welcome_message),
            daily_goal_ml: parse_var(&lookup, "SANCTUARY_DAILY_GOAL_ML", defaults.daily_goal_ml)?,
            request_timeout_ms: parse_var(&lookup, "SANCTUARY_REQUEST_TIMEOUT_MS", defaults.request_timeout_ms)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns a [`ConfigError`] for an empty room id, a sip increment outside
    /// `(0, 100]`, or a zero tap threshold.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.room_id.trim().is_empty() {
            return Err(ConfigError::EmptyRoomId);
        }
        if !(self.sip_increment > 0.0 && self.sip_increment <= MAX_WATER_LEVEL) {
            return Err(ConfigError::SipIncrement(self.sip_increment));
        }
        if self.unlock_taps == 0 {
            return Err(ConfigError::UnlockTaps);
        }
        Ok(())
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    raw.trim()
        .parse::<T>()
        .map_err(|_| ConfigError::InvalidValue { key, value: raw })
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
