//! Shared helpers.

pub mod json_extraction;

pub use json_extraction::{extract_json_object, find_matching_brace, JsonExtractionError};
