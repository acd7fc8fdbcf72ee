//! Shared components - common types, errors, and utilities

pub mod config;
pub mod errors;
pub mod logging;
pub mod network;
pub mod retry;
pub mod types;
pub mod utils;
