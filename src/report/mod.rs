//! Reporting utilities: tables, records and summaries of propagated
//! uncertainties.

pub mod format;

pub use format::{format_ascii, format_json, format_summary};
