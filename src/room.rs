//! Room document model.
//!
//! DESIGN
//! ======
//! The room document is the single shared record of a sanctuary. On the wire
//! it is a flat JSON object with camelCase keys. Reads are lenient: missing or
//! mistyped fields fall back to their zero value, so a partially written
//! document still mirrors cleanly. Writes go through [`RoomPatch`], which only
//! carries the fields it touches.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Upper bound of the fill percentage.
pub const MAX_WATER_LEVEL: f64 = 100.0;

/// Note seeded into a freshly created room.
pub const DEFAULT_WELCOME_MESSAGE: &str = "Welcome to your sanctuary. ✨";

// =============================================================================
// FIELDS
// =============================================================================

/// One field of the room document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    WaterLevel,
    HasUnreadMessage,
    LastMessage,
    LastResetDate,
}

impl Field {
    /// Wire key for this field.
    #[must_use]
    pub fn key(self) -> &'static str {
        match self {
            Self::WaterLevel => "waterLevel",
            Self::HasUnreadMessage => "hasUnreadMessage",
            Self::LastMessage => "lastMessage",
            Self::LastResetDate => "lastResetDate",
        }
    }
}

/// Clamp a fill percentage into `[0, 100]`. NaN reads as empty.
#[must_use]
pub fn clamp_level(level: f64) -> f64 {
    if level.is_nan() {
        return 0.0;
    }
    level.clamp(0.0, MAX_WATER_LEVEL)
}

// =============================================================================
// DOCUMENT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomDocument {
    /// Fill percentage, always within `[0, 100]`.
    pub water_level: f64,
    pub has_unread_message: bool,
    pub last_message: String,
    /// Calendar date (`YYYY-MM-DD`) of the last daily reset.
    pub last_reset_date: String,
}

impl RoomDocument {
    /// Default document written when a room is first opened.
    #[must_use]
    pub fn fresh(today: &str, welcome_message: &str) -> Self {
        Self {
            water_level: 0.0,
            has_unread_message: false,
            last_message: welcome_message.to_owned(),
            last_reset_date: today.to_owned(),
        }
    }

    /// Read a document from a wire field map, defaulting whatever is missing.
    #[must_use]
    pub fn from_fields(fields: &Map<String, Value>) -> Self {
        Self {
            water_level: clamp_level(
                fields
                    .get(Field::WaterLevel.key())
                    .and_then(Value::as_f64)
                    .unwrap_or(0.0),
            ),
            has_unread_message: fields
                .get(Field::HasUnreadMessage.key())
                .and_then(Value::as_bool)
                .unwrap_or(false),
            last_message: string_field(fields, Field::LastMessage),
            last_reset_date: string_field(fields, Field::LastResetDate),
        }
    }

    /// Render the full document as a wire field map.
    #[must_use]
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(Field::WaterLevel.key().into(), Value::from(self.water_level));
        fields.insert(Field::HasUnreadMessage.key().into(), Value::Bool(self.has_unread_message));
        fields.insert(Field::LastMessage.key().into(), Value::String(self.last_message.clone()));
        fields.insert(Field::LastResetDate.key().into(), Value::String(self.last_reset_date.clone()));
        fields
    }
}

fn string_field(fields: &Map<String, Value>, field: Field) -> String {
    fields
        .get(field.key())
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned()
}

// =============================================================================
// DAILY CYCLE
// =============================================================================

/// Where a document sits in the daily cycle relative to "today".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayStatus {
    /// `lastResetDate` is today; the document's fields are valid.
    Fresh,
    /// `lastResetDate` is some other day; the document must be reset.
    Stale { last_reset_date: String },
}

impl DayStatus {
    #[must_use]
    pub fn classify(document: &RoomDocument, today: &str) -> Self {
        if document.last_reset_date == today {
            Self::Fresh
        } else {
            Self::Stale { last_reset_date: document.last_reset_date.clone() }
        }
    }
}

// =============================================================================
// PATCH
// =============================================================================

/// Partial document update. Unset fields are left untouched by the store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomPatch {
    pub water_level: Option<f64>,
    pub has_unread_message: Option<bool>,
    pub last_message: Option<String>,
    pub last_reset_date: Option<String>,
}

impl RoomPatch {
    #[must_use]
    pub fn water_level(level: f64) -> Self {
        Self { water_level: Some(clamp_level(level)), ..Self::default() }
    }

    /// Leave a new unread note.
    #[must_use]
    pub fn note(text: impl Into<String>) -> Self {
        Self { last_message: Some(text.into()), has_unread_message: Some(true), ..Self::default() }
    }

    /// Mark the current note as read.
    #[must_use]
    pub fn acknowledge() -> Self {
        Self { has_unread_message: Some(false), ..Self::default() }
    }

    /// Zero the bottle and stamp today's date. Message fields are untouched.
    #[must_use]
    pub fn daily_reset(today: &str) -> Self {
        Self { water_level: Some(0.0), last_reset_date: Some(today.to_owned()), ..Self::default() }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Fields this patch writes.
    #[must_use]
    pub fn fields(&self) -> Vec<Field> {
        let mut out = Vec::with_capacity(4);
        if self.water_level.is_some() {
            out.push(Field::WaterLevel);
        }
        if self.has_unread_message.is_some() {
            out.push(Field::HasUnreadMessage);
        }
        if self.last_message.is_some() {
            out.push(Field::LastMessage);
        }
        if self.last_reset_date.is_some() {
            out.push(Field::LastResetDate);
        }
        out
    }

    /// Merge this patch into a document, last write wins per field.
    pub fn apply_to(&self, document: &mut RoomDocument) {
        if let Some(level) = self.water_level {
            document.water_level = clamp_level(level);
        }
        if let Some(unread) = self.has_unread_message {
            document.has_unread_message = unread;
        }
        if let Some(message) = &self.last_message {
            document.last_message.clone_from(message);
        }
        if let Some(date) = &self.last_reset_date {
            document.last_reset_date.clone_from(date);
        }
    }

    /// Render only the set fields as a wire field map.
    #[must_use]
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(level) = self.water_level {
            fields.insert(Field::WaterLevel.key().into(), Value::from(level));
        }
        if let Some(unread) = self.has_unread_message {
            fields.insert(Field::HasUnreadMessage.key().into(), Value::Bool(unread));
        }
        if let Some(message) = &self.last_message {
            fields.insert(Field::LastMessage.key().into(), Value::String(message.clone()));
        }
        if let Some(date) = &self.last_reset_date {
            fields.insert(Field::LastResetDate.key().into(), Value::String(date.clone()));
        }
        fields
    }
}

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;
