//! Domain services behind the websocket and HTTP routes.

pub mod document;
pub mod persistence;
