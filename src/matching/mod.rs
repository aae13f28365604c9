// src/matching/mod.rs
pub mod audit;
pub mod blocking;
pub mod curator;
pub mod merge;
pub mod phonetic;
pub mod processor;
pub mod similarity;
