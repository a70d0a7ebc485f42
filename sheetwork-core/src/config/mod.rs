//! Configuration module for Sheetwork.
//!
//! Manages update settings stored in SQLite.

mod settings;

pub use settings::{
    UpdateSettings, APP_NAME, DEFAULT_MANIFEST_URL, DEFAULT_RELEASE_BASE_URL, SETTINGS_KEY,
};
