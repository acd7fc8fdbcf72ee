//! Infrastructure layer - concrete adapters behind the domain traits

pub mod paper;
pub mod relay_client;

pub use paper::PaperStack;
pub use relay_client::RelayClient;
