//! Client-side query and mutation cache for the Aequitas finance API.

pub mod application;
pub mod cache;
pub mod config;
pub mod hooks;
pub mod infra;
pub mod params;
