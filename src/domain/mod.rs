//! Domain layer types and invariants.

pub mod access_keys;
pub mod error;
pub mod generation_logs;
pub mod page_format;
pub mod templates;
