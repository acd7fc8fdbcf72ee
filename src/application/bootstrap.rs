//! Wires configuration into a ready-to-run engine

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::application::control::ControlHandle;
use crate::application::coordinator::{Coordinator, EngineParts};
use crate::domain::capital::TreasuryProvider;
use crate::domain::cost::CostModel;
use crate::domain::execution::NonceAllocator;
use crate::domain::lending::{LenderAdapter, LoanOrchestrator};
use crate::domain::market::{MarketGraph, Venue, VenueAdapter};
use crate::domain::protection::{MempoolObserver, ProtectionOptimizer, SubmissionChannel};
use crate::infrastructure::{PaperStack, RelayClient};
use crate::shared::config::EngineConfig;
use crate::shared::errors::{AppError, EngineError};

/// Assembled engine plus the paper adapters behind it
pub struct Engine {
    pub coordinator: Arc<Coordinator>,
    pub control: ControlHandle,
    pub paper: PaperStack,
}

/// Load persisted statistics when the store exists, start cold otherwise
pub fn load_cost_model(config: &EngineConfig) -> Result<CostModel, AppError> {
    match &config.cost_model.store_path {
        Some(path) if Path::new(path).exists() => {
            let model = CostModel::load(config.cost_model.clone(), path)?;
            info!(path = %path, keys = model.records().len(), "cost model restored");
            Ok(model)
        }
        _ => Ok(CostModel::new(config.cost_model.clone())),
    }
}

/// Build every component. Paper submission is used when `paper` is set or no relay is configured.
pub async fn build(config: &EngineConfig, paper: bool) -> Result<Engine, AppError> {
    config.validate()?;

    let gate = config.network.gate();
    let cost_model = Arc::new(load_cost_model(config)?);
    let stack = PaperStack::from_config(config);

    let graph = Arc::new(MarketGraph::new(config.market.clone(), gate.clone()));
    for venue in &stack.venues {
        graph.register_adapter(venue.clone() as Arc<dyn VenueAdapter>);
    }
    for token in &config.tokens {
        graph.add_token(token.clone());
    }
    for venue in &config.venues {
        let admitted = graph
            .register_venue(Venue::new(
                venue.id.as_str(),
                venue.exchange.as_str(),
                venue.token_a.as_str(),
                venue.token_b.as_str(),
                venue.fee_bps,
            ))
            .await?;
        if !admitted {
            warn!(venue = %venue.id, "venue not admitted");
        }
    }

    let lenders: Vec<Arc<dyn LenderAdapter>> = stack
        .lenders
        .iter()
        .map(|l| l.clone() as Arc<dyn LenderAdapter>)
        .collect();
    let lending = Arc::new(LoanOrchestrator::new(
        lenders,
        gate.clone(),
        Arc::clone(&cost_model),
        config.lending.clone(),
    ));

    let treasury: Arc<dyn TreasuryProvider> = stack.treasury.clone();
    let signer = treasury.signer();
    let nonces = Arc::new(NonceAllocator::new());
    nonces.seed(signer.identity(), config.treasury.start_nonce).await;

    let channel: Arc<dyn SubmissionChannel> = match (&config.network.relay_url, paper) {
        (Some(url), false) => {
            info!(relay = %url, "submitting through private relay");
            Arc::new(
                RelayClient::new(
                    url.as_str(),
                    Arc::clone(&signer),
                    Duration::from_millis(config.network.request_timeout_ms),
                )
                .map_err(EngineError::from)?,
            ) as Arc<dyn SubmissionChannel>
        }
        _ => {
            info!("📝 paper trading mode");
            stack.channel.clone() as Arc<dyn SubmissionChannel>
        }
    };
    let mempool: Arc<dyn MempoolObserver> = stack.mempool.clone();

    let optimizer = Arc::new(ProtectionOptimizer::new(
        channel,
        Some(mempool),
        signer,
        nonces,
        Arc::clone(&cost_model),
        gate.clone(),
        config.protection.optimizer.clone(),
    )?);

    let control = ControlHandle::new(
        config.search.clone(),
        config.allocation.clone(),
        config.protection.slippage_bps,
        Arc::clone(&optimizer),
    );

    let coordinator = Arc::new(Coordinator::new(EngineParts {
        graph,
        cost_model,
        lending,
        optimizer,
        treasury,
        gate,
        control: control.clone(),
        config: config.coordinator.clone(),
    }));

    Ok(Engine {
        coordinator,
        control,
        paper: stack,
    })
}
