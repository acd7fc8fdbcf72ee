//! Paper trading adapters driven by the configuration tables

mod channel;
mod lender;
mod treasury;
mod venue;

pub use channel::{PaperChannel, QuietMempool};
pub use lender::StaticLender;
pub use treasury::{LocalSigner, StaticTreasury};
pub use venue::{PaperBook, PaperLedger, PaperPool, PaperVenue, SwapPayload};

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::shared::config::EngineConfig;

/// Every adapter the engine needs, sharing one paper book
pub struct PaperStack {
    pub book: PaperBook,
    pub venues: Vec<Arc<PaperVenue>>,
    pub lenders: Vec<Arc<StaticLender>>,
    pub treasury: Arc<StaticTreasury>,
    pub channel: Arc<PaperChannel>,
    pub mempool: Arc<QuietMempool>,
}

impl PaperStack {
    pub fn from_config(config: &EngineConfig) -> Self {
        let book = PaperBook::from_config(&config.venues);
        let exchanges: BTreeSet<&str> = config.venues.iter().map(|v| v.exchange.as_str()).collect();
        Self {
            venues: exchanges
                .into_iter()
                .map(|exchange| Arc::new(PaperVenue::new(exchange, book.clone())))
                .collect(),
            lenders: config
                .lenders
                .iter()
                .map(|l| Arc::new(StaticLender::from_config(l)))
                .collect(),
            treasury: Arc::new(StaticTreasury::from_config(&config.treasury)),
            channel: Arc::new(PaperChannel::new(book.clone(), config.paper.clone())),
            mempool: Arc::new(QuietMempool),
            book,
        }
    }
}
