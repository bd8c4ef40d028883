//! Binary-facing use cases built on the query client.

pub mod commands;
pub mod error;
