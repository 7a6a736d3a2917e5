//! Core domain types for Tally

pub mod cluster;
pub mod identity;
pub mod property;
pub mod quantity;
pub mod sample;
