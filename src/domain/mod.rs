//! Domain layer - core business logic and entities

pub mod arbitrage;
pub mod capital;
pub mod cost;
pub mod execution;
pub mod lending;
pub mod market;
pub mod protection;
