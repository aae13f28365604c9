//! Blocked fuzzy duplicate detection over a single table column, with
//! reviewable match pairs and audited merging.
pub mod engine;
pub mod matching;
pub mod models;
pub mod utils;
