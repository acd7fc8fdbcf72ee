//! In-memory graph of tokens and venues with refreshed quotes

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::venue::{QuoteLevel, Venue, VenueAdapter};
use crate::shared::errors::EngineError;
use crate::shared::network::NetworkGate;
use crate::shared::types::{Token, TokenId, VenueId};
use crate::shared::utils::cmp_f64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketGraphConfig {
    /// Consecutive failed refreshes before a venue is taken out of the graph
    pub exclude_after_failures: u32,
    pub exclusion_cooldown_ms: u64,
    /// Venues refreshed concurrently within one refresh pass
    pub refresh_concurrency: usize,
}

impl Default for MarketGraphConfig {
    fn default() -> Self {
        Self {
            exclude_after_failures: 3,
            exclusion_cooldown_ms: 30_000,
            refresh_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Default)]
struct VenueHealth {
    consecutive_failures: u32,
    excluded_until: Option<Instant>,
}

#[derive(Debug, Clone)]
struct VenueState {
    forward: Option<QuoteLevel>,
    reverse: Option<QuoteLevel>,
}

/// Outcome of one refresh pass
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub quoted: usize,
    pub unavailable: Vec<(VenueId, String)>,
    pub excluded: Vec<VenueId>,
}

/// Directed, quoted edge of a snapshot
#[derive(Debug, Clone)]
pub struct Edge {
    pub venue: Venue,
    pub token_in: TokenId,
    pub token_out: TokenId,
    pub level: QuoteLevel,
}

/// Immutable view of the graph used by path search
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    tokens: HashMap<TokenId, Token>,
    edges: HashMap<TokenId, Vec<Edge>>,
    pub taken_at: Instant,
}

impl GraphSnapshot {
    pub fn new(tokens: impl IntoIterator<Item = Token>) -> Self {
        Self {
            tokens: tokens.into_iter().map(|t| (t.id.clone(), t)).collect(),
            edges: HashMap::new(),
            taken_at: Instant::now(),
        }
    }

    /// Add the quoted directions of a venue
    pub fn insert_quotes(&mut self, venue: &Venue, forward: Option<QuoteLevel>, reverse: Option<QuoteLevel>) {
        if let Some(level) = forward {
            self.push_edge(venue, &venue.token_a, &venue.token_b, level);
        }
        if let Some(level) = reverse {
            self.push_edge(venue, &venue.token_b, &venue.token_a, level);
        }
    }

    fn push_edge(&mut self, venue: &Venue, token_in: &str, token_out: &str, level: QuoteLevel) {
        if level.amount_in <= 0.0 || level.amount_out <= 0.0 {
            return;
        }
        self.edges.entry(token_in.to_string()).or_default().push(Edge {
            venue: venue.clone(),
            token_in: token_in.to_string(),
            token_out: token_out.to_string(),
            level,
        });
    }

    pub fn token(&self, id: &str) -> Option<&Token> {
        self.tokens.get(id)
    }

    pub fn edges_from(&self, token: &str) -> &[Edge] {
        self.edges.get(token).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tokens with at least one outgoing edge, sorted
    pub fn token_ids(&self) -> Vec<TokenId> {
        let mut ids: Vec<TokenId> = self.edges.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Edge quoted by `venue_id` in the `token_in -> token_out` direction
    pub fn edge_for(&self, venue_id: &str, token_in: &str, token_out: &str) -> Option<&Edge> {
        self.edges_from(token_in)
            .iter()
            .find(|e| e.venue.id == venue_id && e.token_out == token_out)
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// Tokens reachable in one hop from `token`, deduplicated
    pub fn neighbors(&self, token: &str) -> Vec<TokenId> {
        let mut out: Vec<TokenId> = self.edges_from(token).iter().map(|e| e.token_out.clone()).collect();
        out.sort();
        out.dedup();
        out
    }

    /// Best venue for `token_in -> token_out` at `amount_in`.
    /// Larger output wins; equal output prefers the lower fee tier.
    pub fn best_edge(&self, token_in: &str, token_out: &str, amount_in: f64) -> Option<(&Edge, f64)> {
        self.edges_from(token_in)
            .iter()
            .filter(|e| e.token_out == token_out)
            .map(|e| (e, e.level.output_for(amount_in)))
            .filter(|(_, out)| out.is_finite() && *out > 0.0)
            .max_by(|(a, out_a), (b, out_b)| {
                cmp_f64(*out_a, *out_b)
                    .then_with(|| b.venue.fee_bps.cmp(&a.venue.fee_bps))
                    .then_with(|| b.venue.id.cmp(&a.venue.id))
            })
    }

    /// Best zero-size rate for a direct edge
    pub fn best_marginal_rate(&self, token_in: &str, token_out: &str) -> Option<f64> {
        self.edges_from(token_in)
            .iter()
            .filter(|e| e.token_out == token_out)
            .map(|e| e.level.marginal_rate())
            .max_by(|a, b| cmp_f64(*a, *b))
    }

    /// Conversion rate between two tokens via a direct edge; 1.0 for the same token
    pub fn spot_rate(&self, from: &str, to: &str) -> Option<f64> {
        if from == to {
            return Some(1.0);
        }
        self.best_marginal_rate(from, to)
    }
}

/// Graph of tokens (nodes) and venues (edges). Owns the quoted venue state.
pub struct MarketGraph {
    config: MarketGraphConfig,
    gate: NetworkGate,
    adapters: RwLock<HashMap<String, Arc<dyn VenueAdapter>>>,
    tokens: RwLock<HashMap<TokenId, Token>>,
    venues: RwLock<Vec<Venue>>,
    states: RwLock<HashMap<VenueId, VenueState>>,
    health: RwLock<HashMap<VenueId, VenueHealth>>,
}

impl MarketGraph {
    pub fn new(config: MarketGraphConfig, gate: NetworkGate) -> Self {
        Self {
            config,
            gate,
            adapters: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            venues: RwLock::new(Vec::new()),
            states: RwLock::new(HashMap::new()),
            health: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_adapter(&self, adapter: Arc<dyn VenueAdapter>) {
        self.adapters.write().insert(adapter.exchange().to_string(), adapter);
    }

    /// Withdraw an exchange; its venues fail to quote from the next refresh on
    pub fn remove_adapter(&self, exchange: &str) -> Option<Arc<dyn VenueAdapter>> {
        self.adapters.write().remove(exchange)
    }

    pub fn adapter(&self, exchange: &str) -> Option<Arc<dyn VenueAdapter>> {
        self.adapters.read().get(exchange).cloned()
    }

    /// Tokens are immutable once registered; re-adding keeps the first definition
    pub fn add_token(&self, token: Token) {
        self.tokens.write().entry(token.id.clone()).or_insert(token);
    }

    pub fn token(&self, id: &str) -> Option<Token> {
        self.tokens.read().get(id).cloned()
    }

    pub fn venues(&self) -> Vec<Venue> {
        self.venues.read().clone()
    }

    pub fn venue(&self, id: &str) -> Option<Venue> {
        self.venues.read().iter().find(|v| v.id == id).cloned()
    }

    /// Admit a venue if its adapter confirms the market exists
    pub async fn register_venue(&self, venue: Venue) -> Result<bool, EngineError> {
        if self.token(&venue.token_a).is_none() || self.token(&venue.token_b).is_none() {
            return Err(EngineError::FatalConfiguration(format!(
                "venue {} references unknown token",
                venue.id
            )));
        }
        let adapter = self.adapter(&venue.exchange).ok_or_else(|| {
            EngineError::FatalConfiguration(format!("no adapter for exchange {}", venue.exchange))
        })?;

        let exists = self.gate.call(|| adapter.check_exists(&venue)).await?;
        if !exists {
            warn!(venue = %venue.id, exchange = %venue.exchange, "venue does not exist, skipping");
            return Ok(false);
        }

        let mut venues = self.venues.write();
        if !venues.iter().any(|v| v.id == venue.id) {
            debug!(venue = %venue.id, "venue registered");
            venues.push(venue);
        }
        Ok(true)
    }

    pub fn is_excluded(&self, venue_id: &str, now: Instant) -> bool {
        self.health
            .read()
            .get(venue_id)
            .and_then(|h| h.excluded_until)
            .map(|until| until > now)
            .unwrap_or(false)
    }

    fn record_success(&self, venue_id: &str) {
        let mut health = self.health.write();
        let entry = health.entry(venue_id.to_string()).or_default();
        entry.consecutive_failures = 0;
        entry.excluded_until = None;
    }

    /// Returns true when the venue just became excluded
    fn record_failure(&self, venue_id: &str, now: Instant) -> bool {
        let mut health = self.health.write();
        let entry = health.entry(venue_id.to_string()).or_default();
        entry.consecutive_failures += 1;
        if entry.consecutive_failures >= self.config.exclude_after_failures {
            entry.excluded_until = Some(now + Duration::from_millis(self.config.exclusion_cooldown_ms));
            entry.consecutive_failures = 0;
            return true;
        }
        false
    }

    async fn quote_direction(
        &self,
        adapter: &Arc<dyn VenueAdapter>,
        venue: &Venue,
        token_in: &Token,
        token_out: &Token,
    ) -> Result<Option<QuoteLevel>, EngineError> {
        let amount_in = token_in.quote_size;
        let result = self
            .gate
            .call(|| adapter.quote(venue, token_in, token_out, amount_in))
            .await;
        match result {
            Ok(resp) if resp.amount_out > 0.0 && resp.amount_out.is_finite() => {
                Ok(Some(QuoteLevel::new(amount_in, resp.amount_out, resp.depth_in)))
            }
            Ok(_) => Ok(None),
            // a drained side is not a venue fault
            Err(EngineError::Infeasible(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn refresh_venue(&self, venue: Venue) -> Result<VenueState, (VenueId, String)> {
        let (adapter, token_a, token_b) = {
            let tokens = self.tokens.read();
            (
                self.adapter(&venue.exchange),
                tokens.get(&venue.token_a).cloned(),
                tokens.get(&venue.token_b).cloned(),
            )
        };
        let (Some(adapter), Some(token_a), Some(token_b)) = (adapter, token_a, token_b) else {
            return Err((venue.id.clone(), "adapter or token missing".to_string()));
        };

        let forward = self.quote_direction(&adapter, &venue, &token_a, &token_b).await;
        let reverse = self.quote_direction(&adapter, &venue, &token_b, &token_a).await;
        match (forward, reverse) {
            (Ok(forward), Ok(reverse)) => Ok(VenueState { forward, reverse }),
            (Err(e), _) | (_, Err(e)) => Err((venue.id.clone(), e.to_string())),
        }
    }

    /// Re-quote every admitted venue. A failing venue drops out for this cycle only.
    pub async fn refresh(&self) -> RefreshReport {
        let now = Instant::now();
        let venues: Vec<Venue> = self
            .venues()
            .into_iter()
            .filter(|v| !self.is_excluded(&v.id, now))
            .collect();

        let results: Vec<Result<(VenueId, VenueState), (VenueId, String)>> = stream::iter(venues)
            .map(|venue| async move {
                let id = venue.id.clone();
                self.refresh_venue(venue).await.map(|state| (id, state))
            })
            .buffer_unordered(self.config.refresh_concurrency.max(1))
            .collect()
            .await;

        let mut report = RefreshReport::default();
        let mut fresh = HashMap::new();
        for result in results {
            match result {
                Ok((id, state)) => {
                    self.record_success(&id);
                    fresh.insert(id, state);
                    report.quoted += 1;
                }
                Err((id, reason)) => {
                    let quote_err = EngineError::QuoteUnavailable {
                        venue: id.clone(),
                        reason: reason.clone(),
                    };
                    warn!(venue = %id, error = %quote_err, "venue removed for this cycle");
                    if self.record_failure(&id, Instant::now()) {
                        warn!(venue = %id, cooldown_ms = self.config.exclusion_cooldown_ms, "venue excluded after repeated failures");
                        report.excluded.push(id.clone());
                    }
                    report.unavailable.push((id, reason));
                }
            }
        }
        *self.states.write() = fresh;

        info!(
            quoted = report.quoted,
            unavailable = report.unavailable.len(),
            excluded = report.excluded.len(),
            "market graph refreshed"
        );
        report
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        let now = Instant::now();
        let tokens = self.tokens.read().values().cloned().collect::<Vec<_>>();
        let mut snapshot = GraphSnapshot::new(tokens);
        let venues = self.venues.read();
        let states = self.states.read();
        for venue in venues.iter() {
            if self.is_excluded(&venue.id, now) {
                continue;
            }
            if let Some(state) = states.get(&venue.id) {
                snapshot.insert_quotes(venue, state.forward, state.reverse);
            }
        }
        snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::arbitrage::Hop;
    use crate::domain::execution::Operation;
    use crate::domain::market::QuoteResponse;
    use crate::shared::errors::AdapterError;
    use crate::shared::retry::BackoffPolicy;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FixedRateAdapter {
        failing: AtomicBool,
    }

    #[async_trait]
    impl VenueAdapter for FixedRateAdapter {
        fn exchange(&self) -> &str {
            "fixed"
        }

        async fn quote(&self, venue: &Venue, token_in: &Token, _token_out: &Token, amount_in: f64) -> Result<QuoteResponse, AdapterError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AdapterError::Rejected("upstream 500".into()));
            }
            let rate = if venue.is_forward(&token_in.id) { 2.0 } else { 0.5 };
            Ok(QuoteResponse {
                amount_out: amount_in * rate,
                depth_in: None,
            })
        }

        async fn check_exists(&self, venue: &Venue) -> Result<bool, AdapterError> {
            Ok(venue.id != "ghost")
        }

        fn build_hop(&self, _hop: &Hop, _token_in: &Token, _token_out: &Token, _min_out: f64) -> Result<Operation, AdapterError> {
            Err(AdapterError::Unsupported("build".into()))
        }
    }

    fn graph(failing: bool) -> MarketGraph {
        let graph = MarketGraph::new(
            MarketGraphConfig {
                exclude_after_failures: 2,
                exclusion_cooldown_ms: 60_000,
                refresh_concurrency: 4,
            },
            NetworkGate::new(4, Duration::from_secs(1), BackoffPolicy::no_retry()),
        );
        graph.register_adapter(Arc::new(FixedRateAdapter {
            failing: AtomicBool::new(failing),
        }));
        graph.add_token(Token::new("a", "A", 18));
        graph.add_token(Token::new("b", "B", 6));
        graph
    }

    #[tokio::test]
    async fn test_register_checks_existence() {
        let graph = graph(false);
        assert!(graph.register_venue(Venue::new("v1", "fixed", "a", "b", 30)).await.unwrap());
        assert!(!graph.register_venue(Venue::new("ghost", "fixed", "a", "b", 30)).await.unwrap());
        assert_eq!(graph.venues().len(), 1);

        let unknown_exchange = graph.register_venue(Venue::new("v2", "nope", "a", "b", 30)).await;
        assert!(matches!(unknown_exchange, Err(EngineError::FatalConfiguration(_))));
    }

    #[tokio::test]
    async fn test_refresh_builds_both_directions() {
        let graph = graph(false);
        graph.register_venue(Venue::new("v1", "fixed", "a", "b", 30)).await.unwrap();
        let report = graph.refresh().await;
        assert_eq!(report.quoted, 1);

        let snapshot = graph.snapshot();
        assert_eq!(snapshot.edge_count(), 2);
        assert_eq!(snapshot.spot_rate("a", "b"), Some(2.0));
        assert_eq!(snapshot.spot_rate("b", "a"), Some(0.5));
        assert_eq!(snapshot.spot_rate("a", "a"), Some(1.0));
    }

    #[tokio::test]
    async fn test_removed_exchange_stops_quoting() {
        let graph = graph(false);
        graph.register_venue(Venue::new("v1", "fixed", "a", "b", 30)).await.unwrap();
        assert!(graph.remove_adapter("fixed").is_some());
        assert!(graph.adapter("fixed").is_none());
        assert!(graph.remove_adapter("fixed").is_none());

        let report = graph.refresh().await;
        assert_eq!(report.quoted, 0);
        assert_eq!(report.unavailable.len(), 1);
        assert_eq!(graph.snapshot().edge_count(), 0);
    }

    #[tokio::test]
    async fn test_repeated_failures_exclude_venue() {
        let graph = graph(true);
        graph.register_venue(Venue::new("v1", "fixed", "a", "b", 30)).await.unwrap();

        let first = graph.refresh().await;
        assert_eq!(first.unavailable.len(), 1);
        assert!(first.excluded.is_empty());
        assert!(graph.snapshot().edges_from("a").is_empty());

        let second = graph.refresh().await;
        assert_eq!(second.excluded, vec!["v1".to_string()]);
        assert!(graph.is_excluded("v1", Instant::now()));

        // excluded venues are not even attempted
        let third = graph.refresh().await;
        assert_eq!(third.quoted + third.unavailable.len(), 0);
    }

    #[test]
    fn test_best_edge_prefers_lower_fee_on_tie() {
        let mut snapshot = GraphSnapshot::new(vec![Token::new("a", "A", 18), Token::new("b", "B", 18)]);
        let low = Venue::new("tier-5", "uni", "a", "b", 5);
        let high = Venue::new("tier-30", "uni", "a", "b", 30);
        let better = Venue::new("tier-100", "uni", "a", "b", 100);
        snapshot.insert_quotes(&high, Some(QuoteLevel::new(1.0, 2.0, None)), None);
        snapshot.insert_quotes(&low, Some(QuoteLevel::new(1.0, 2.0, None)), None);
        let (edge, out) = snapshot.best_edge("a", "b", 1.0).unwrap();
        assert_eq!(edge.venue.id, "tier-5");
        assert_eq!(out, 2.0);

        snapshot.insert_quotes(&better, Some(QuoteLevel::new(1.0, 2.1, None)), None);
        assert_eq!(snapshot.best_edge("a", "b", 1.0).unwrap().0.venue.id, "tier-100");
    }
}
