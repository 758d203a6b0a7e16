//! Display formatting helpers.

pub mod format;

pub use format::{age_display, truncate_string};
