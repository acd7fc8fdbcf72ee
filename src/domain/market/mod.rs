//! Market domain - venues, quotes and the token graph

mod market_graph;
mod venue;

pub use market_graph::{Edge, GraphSnapshot, MarketGraph, MarketGraphConfig, RefreshReport};
pub use venue::{QuoteLevel, QuoteResponse, Venue, VenueAdapter};
