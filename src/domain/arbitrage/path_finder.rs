//! Cost-aware multi-hop cycle search over a graph snapshot

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CostBreakdown, Hop, Opportunity, Path};
use crate::domain::cost::{CostEstimate, CostModel, OperationType, BUNDLE_VENUE};
use crate::domain::market::GraphSnapshot;
use crate::shared::errors::EngineError;
use crate::shared::types::TokenId;
use crate::shared::utils::{cmp_f64, generate_id};

/// Search bounds and thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchPolicy {
    pub start_tokens: Vec<TokenId>,
    /// Allowed intermediate tokens; empty allows every token
    pub bridge_tokens: Vec<TokenId>,
    pub max_hops: usize,
    pub max_candidates: usize,
    /// Minimum net profit, in accounting-token units
    pub min_profit: f64,
    pub staleness_ms: u64,
    /// Expansion budget for paths deeper than one bridge hop
    pub max_expansions: usize,
    pub time_budget_ms: u64,
    /// Unit costs are denominated in; `None` means each start token
    pub accounting_token: Option<TokenId>,
}

impl Default for SearchPolicy {
    fn default() -> Self {
        Self {
            start_tokens: Vec::new(),
            bridge_tokens: Vec::new(),
            max_hops: 3,
            max_candidates: 5,
            min_profit: 0.0,
            staleness_ms: 3_000,
            max_expansions: 50_000,
            time_budget_ms: 200,
            accounting_token: None,
        }
    }
}

/// Counters reported by one search
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchStats {
    pub start_token: TokenId,
    pub max_depth_searched: usize,
    pub expansions: usize,
    pub pruned: usize,
    pub candidates: usize,
    pub budget_exhausted: bool,
    pub elapsed_us: u64,
}

struct SearchContext<'a> {
    snapshot: &'a GraphSnapshot,
    start: &'a str,
    start_amount: f64,
    threshold: f64,
    cost_rate: f64,
    submission: CostEstimate,
    /// upper[k][t]: best marginal multiplier from t back to start in exactly k hops
    upper: Vec<HashMap<TokenId, f64>>,
    started: Instant,
    budgeted: bool,
    stats: SearchStats,
    found: Vec<Opportunity>,
}

/// Finds profitable cycles; CPU-bound and never suspends
pub struct PathFinder {
    cost_model: Arc<CostModel>,
    policy: SearchPolicy,
}

impl PathFinder {
    pub fn new(cost_model: Arc<CostModel>, policy: SearchPolicy) -> Self {
        Self { cost_model, policy }
    }

    pub fn policy(&self) -> &SearchPolicy {
        &self.policy
    }

    /// Ranked opportunities starting and ending at `start_token`
    pub fn search(
        &self,
        snapshot: &GraphSnapshot,
        start_token: &str,
        max_hops: usize,
        max_candidates: usize,
    ) -> Vec<Opportunity> {
        self.search_with_stats(snapshot, start_token, max_hops, max_candidates).0
    }

    pub fn search_with_stats(
        &self,
        snapshot: &GraphSnapshot,
        start_token: &str,
        max_hops: usize,
        max_candidates: usize,
    ) -> (Vec<Opportunity>, SearchStats) {
        let started = Instant::now();
        let mut stats = SearchStats {
            start_token: start_token.to_string(),
            ..SearchStats::default()
        };

        let Some(token) = snapshot.token(start_token) else {
            warn!(token = start_token, "start token not in graph");
            return (Vec::new(), stats);
        };
        let Some(cost_rate) = self.cost_rate(snapshot, start_token) else {
            warn!(token = start_token, "no rate to convert costs into start token, skipping search");
            return (Vec::new(), stats);
        };
        if max_hops < 2 || max_candidates == 0 {
            return (Vec::new(), stats);
        }

        let mut ctx = SearchContext {
            snapshot,
            start: start_token,
            start_amount: token.quote_size,
            threshold: self.policy.min_profit * cost_rate,
            cost_rate,
            submission: self
                .cost_model
                .estimate(BUNDLE_VENUE, OperationType::Submission)
                .scaled(cost_rate),
            upper: self.upper_bounds(snapshot, start_token, max_hops),
            started,
            budgeted: false,
            stats: SearchStats::default(),
            found: Vec::new(),
        };

        let start_amount = ctx.start_amount;
        // direct and one-bridge cycles are always searched in full
        for depth in 2..=max_hops {
            ctx.budgeted = depth > 3;
            if ctx.budgeted && self.exhausted(&ctx) {
                ctx.stats.budget_exhausted = true;
                break;
            }
            ctx.stats.max_depth_searched = depth;
            let mut hops = Vec::with_capacity(depth);
            self.expand(&mut ctx, start_token, start_amount, CostEstimate::zero(), depth, &mut hops);
        }

        let mut found = std::mem::take(&mut ctx.found);
        rank(&mut found);
        found.truncate(max_candidates);

        stats.max_depth_searched = ctx.stats.max_depth_searched;
        stats.expansions = ctx.stats.expansions;
        stats.pruned = ctx.stats.pruned;
        stats.candidates = ctx.stats.candidates;
        stats.budget_exhausted = ctx.stats.budget_exhausted;
        stats.elapsed_us = started.elapsed().as_micros() as u64;

        debug!(
            token = start_token,
            depth = stats.max_depth_searched,
            expansions = stats.expansions,
            pruned = stats.pruned,
            candidates = stats.candidates,
            kept = found.len(),
            "path search finished"
        );
        (found, stats)
    }

    /// Re-price an opportunity's path at a new input amount against a fresh snapshot
    pub fn reprice(
        &self,
        opportunity: &Opportunity,
        amount_in: f64,
        snapshot: &GraphSnapshot,
    ) -> Result<Opportunity, EngineError> {
        if !amount_in.is_finite() || amount_in <= 0.0 {
            return Err(EngineError::Infeasible(format!("invalid trade size {amount_in}")));
        }

        let mut amount = amount_in;
        let mut hops = Vec::with_capacity(opportunity.hop_count());
        for hop in opportunity.path.hops() {
            let edge = snapshot
                .edge_for(&hop.venue_id, &hop.token_in, &hop.token_out)
                .ok_or_else(|| EngineError::QuoteUnavailable {
                    venue: hop.venue_id.clone(),
                    reason: "venue missing from current snapshot".to_string(),
                })?;
            let out = edge.level.output_for(amount);
            if !out.is_finite() || out <= 0.0 {
                return Err(EngineError::Infeasible(format!("venue {} returns nothing", hop.venue_id)));
            }
            hops.push(Hop {
                amount_in: amount,
                expected_out: out,
                ..hop.clone()
            });
            amount = out;
        }

        let rate = self
            .cost_rate(snapshot, opportunity.start_token())
            .unwrap_or(opportunity.accounting_rate);
        let swaps = hops.iter().fold(CostEstimate::zero(), |acc, h| {
            acc + self.cost_model.estimate(&h.venue_id, OperationType::Swap).scaled(rate)
        });
        let submission = self
            .cost_model
            .estimate(BUNDLE_VENUE, OperationType::Submission)
            .scaled(rate);

        let path = Path::new(hops, swaps + submission)?;
        let mut repriced = Opportunity::new(
            opportunity.id.clone(),
            path,
            CostBreakdown::new(swaps, submission),
            rate,
            0,
        );
        repriced.discovered_at = opportunity.discovered_at;
        repriced.deadline = opportunity.deadline;
        Ok(repriced)
    }

    fn is_bridge(&self, token: &str) -> bool {
        self.policy.bridge_tokens.is_empty() || self.policy.bridge_tokens.iter().any(|t| t == token)
    }

    /// Start-token units per accounting-token unit
    fn cost_rate(&self, snapshot: &GraphSnapshot, start_token: &str) -> Option<f64> {
        match &self.policy.accounting_token {
            None => Some(1.0),
            Some(accounting) => snapshot.spot_rate(accounting, start_token),
        }
    }

    fn exhausted(&self, ctx: &SearchContext<'_>) -> bool {
        ctx.stats.expansions >= self.policy.max_expansions
            || ctx.started.elapsed() >= Duration::from_millis(self.policy.time_budget_ms)
    }

    fn upper_bounds(&self, snapshot: &GraphSnapshot, start: &str, max_hops: usize) -> Vec<HashMap<TokenId, f64>> {
        let tokens = snapshot.token_ids();
        let mut upper: Vec<HashMap<TokenId, f64>> = vec![HashMap::new(); max_hops + 1];
        upper[0].insert(start.to_string(), 1.0);

        for k in 1..=max_hops {
            let mut level = HashMap::new();
            for token in &tokens {
                let mut best = 0.0_f64;
                for next in snapshot.neighbors(token) {
                    let allowed = if k == 1 {
                        next == start
                    } else {
                        next != start && self.is_bridge(&next)
                    };
                    if !allowed {
                        continue;
                    }
                    let tail = upper[k - 1].get(&next).copied().unwrap_or(0.0);
                    if tail <= 0.0 {
                        continue;
                    }
                    if let Some(rate) = snapshot.best_marginal_rate(token, &next) {
                        best = best.max(rate * tail);
                    }
                }
                if best > 0.0 {
                    level.insert(token.clone(), best);
                }
            }
            upper[k] = level;
        }
        upper
    }

    fn expand(
        &self,
        ctx: &mut SearchContext<'_>,
        current: &str,
        amount: f64,
        swap_cost: CostEstimate,
        remaining: usize,
        hops: &mut Vec<Hop>,
    ) {
        let snapshot = ctx.snapshot;
        for next in snapshot.neighbors(current) {
            if ctx.budgeted && self.exhausted(ctx) {
                ctx.stats.budget_exhausted = true;
                return;
            }

            let closing = remaining == 1;
            if closing != (next == ctx.start) {
                continue;
            }
            if !closing && (!self.is_bridge(&next) || hops.iter().any(|h| h.token_in == next)) {
                continue;
            }
            let Some((edge, out)) = snapshot.best_edge(current, &next, amount) else {
                continue;
            };
            ctx.stats.expansions += 1;

            let cost = swap_cost
                + self
                    .cost_model
                    .estimate(&edge.venue.id, OperationType::Swap)
                    .scaled(ctx.cost_rate);
            hops.push(Hop {
                venue_id: edge.venue.id.clone(),
                exchange: edge.venue.exchange.clone(),
                fee_bps: edge.venue.fee_bps,
                token_in: current.to_string(),
                token_out: next.clone(),
                amount_in: amount,
                expected_out: out,
            });

            if closing {
                self.record_candidate(ctx, hops, cost);
            } else {
                let bound = ctx.upper[remaining - 1].get(&next).copied().unwrap_or(0.0);
                let best_case = out * bound - ctx.start_amount - cost.total() - ctx.submission.total();
                if best_case <= ctx.threshold {
                    ctx.stats.pruned += 1;
                } else {
                    self.expand(ctx, &next, out, cost, remaining - 1, hops);
                }
            }
            hops.pop();
        }
    }

    fn record_candidate(&self, ctx: &mut SearchContext<'_>, hops: &[Hop], swaps: CostEstimate) {
        let path = match Path::new(hops.to_vec(), swaps + ctx.submission) {
            Ok(path) => path,
            Err(e) => {
                debug!(error = %e, "discarding malformed path");
                return;
            }
        };
        let opportunity = Opportunity::new(
            generate_id(),
            path,
            CostBreakdown::new(swaps, ctx.submission),
            ctx.cost_rate,
            self.policy.staleness_ms,
        );
        if opportunity.net_profit > ctx.threshold {
            debug!(
                route = %opportunity.path.describe(),
                net_profit = opportunity.net_profit,
                "profitable cycle found"
            );
            ctx.stats.candidates += 1;
            ctx.found.push(opportunity);
        }
    }
}

/// Net profit desc, then fewer hops, then lower cost
fn rank(opportunities: &mut [Opportunity]) {
    opportunities.sort_by(|a, b| {
        cmp_f64(b.net_profit, a.net_profit)
            .then_with(|| a.hop_count().cmp(&b.hop_count()))
            .then_with(|| cmp_f64(a.costs.total(), b.costs.total()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cost::{BaseCosts, CostModelConfig};
    use crate::domain::market::{QuoteLevel, Venue};
    use crate::shared::types::Token;

    fn level(rate: f64) -> Option<QuoteLevel> {
        Some(QuoteLevel::new(1.0, rate, None))
    }

    /// weth -> usdc -> dai -> weth returns 1.02, the reverse cycle loses
    fn triangle() -> GraphSnapshot {
        let mut snapshot = GraphSnapshot::new(vec![
            Token::new("weth", "WETH", 18),
            Token::new("usdc", "USDC", 6),
            Token::new("dai", "DAI", 18),
        ]);
        snapshot.insert_quotes(&Venue::new("v1", "uni", "weth", "usdc", 5), level(1.0), level(1.0));
        snapshot.insert_quotes(&Venue::new("v2", "uni", "usdc", "dai", 5), level(1.0), level(1.0));
        snapshot.insert_quotes(&Venue::new("v3", "uni", "dai", "weth", 30), level(1.02), level(0.98));
        snapshot
    }

    fn finder(policy: SearchPolicy) -> PathFinder {
        PathFinder::new(Arc::new(CostModel::new(CostModelConfig::default())), policy)
    }

    #[test]
    fn test_finds_triangle() {
        let finder = finder(SearchPolicy::default());
        let (found, stats) = finder.search_with_stats(&triangle(), "weth", 3, 5);
        assert_eq!(found.len(), 1);
        let best = &found[0];
        assert!(best.path.is_cycle());
        assert_eq!(best.path.describe(), "weth -> usdc -> dai -> weth");
        assert!((best.net_profit - 0.02).abs() < 1e-9);
        assert_eq!(stats.max_depth_searched, 3);
        assert!(stats.expansions > 0);
    }

    #[test]
    fn test_bridge_allow_list_restricts_intermediates() {
        let finder = finder(SearchPolicy {
            bridge_tokens: vec!["usdc".to_string()],
            ..SearchPolicy::default()
        });
        assert!(finder.search(&triangle(), "weth", 3, 5).is_empty());
    }

    #[test]
    fn test_threshold_prunes_partial_paths() {
        let finder = finder(SearchPolicy {
            min_profit: 0.05,
            ..SearchPolicy::default()
        });
        let (found, stats) = finder.search_with_stats(&triangle(), "weth", 3, 5);
        assert!(found.is_empty());
        assert!(stats.pruned > 0);
    }

    #[test]
    fn test_costs_reject_thin_cycles() {
        let model = CostModel::new(CostModelConfig {
            base_costs: BaseCosts {
                swap: 0.01,
                ..BaseCosts::default()
            },
            cold_start_margin_ratio: 0.0,
            ..CostModelConfig::default()
        });
        let finder = PathFinder::new(Arc::new(model), SearchPolicy::default());
        assert!(finder.search(&triangle(), "weth", 3, 5).is_empty());
    }

    #[test]
    fn test_fewer_hops_win_ties() {
        let mut snapshot = triangle();
        snapshot.insert_quotes(&Venue::new("v4", "uni", "weth", "dai", 5), level(1.0), level(0.5));
        let found = finder(SearchPolicy::default()).search(&snapshot, "weth", 3, 5);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].hop_count(), 2);
        assert_eq!(found[1].hop_count(), 3);
        assert_eq!(found[0].net_profit, found[1].net_profit);
    }

    #[test]
    fn test_max_candidates_and_hops_bound_results() {
        let finder = finder(SearchPolicy::default());
        assert!(finder.search(&triangle(), "weth", 2, 5).is_empty());
        assert!(finder.search(&triangle(), "weth", 3, 0).is_empty());
        assert!(finder.search(&triangle(), "unknown", 3, 5).is_empty());
    }

    #[test]
    fn test_accounting_token_converts_costs() {
        // 1 weth = 2 usdc, so 0.01 usdc per swap costs 0.005 weth
        let mut snapshot = GraphSnapshot::new(vec![
            Token::new("weth", "WETH", 18),
            Token::new("usdc", "USDC", 6),
            Token::new("dai", "DAI", 18),
        ]);
        snapshot.insert_quotes(&Venue::new("v1", "uni", "weth", "usdc", 5), level(2.0), level(0.5));
        snapshot.insert_quotes(&Venue::new("v2", "uni", "usdc", "dai", 5), level(1.0), level(1.0));
        snapshot.insert_quotes(&Venue::new("v3", "uni", "dai", "weth", 30), level(0.51), level(1.9));

        let model = CostModel::new(CostModelConfig {
            base_costs: BaseCosts {
                swap: 0.01,
                ..BaseCosts::default()
            },
            cold_start_margin_ratio: 0.0,
            ..CostModelConfig::default()
        });
        let finder = PathFinder::new(
            Arc::new(model),
            SearchPolicy {
                accounting_token: Some("usdc".to_string()),
                ..SearchPolicy::default()
            },
        );
        let found = finder.search(&snapshot, "weth", 3, 5);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].path.describe(), "weth -> usdc -> dai -> weth");
        assert_eq!(found[0].accounting_rate, 0.5);
        assert!((found[0].costs.total() - 0.015).abs() < 1e-12);
        assert!((found[0].net_profit - 0.005).abs() < 1e-9);
    }

    #[test]
    fn test_reprice_applies_price_impact() {
        let mut snapshot = GraphSnapshot::new(vec![Token::new("a", "A", 18), Token::new("b", "B", 18)]);
        let out_ab = 1.1 * 100.0 / 101.0;
        let out_ba = 100.0 / 101.0;
        snapshot.insert_quotes(
            &Venue::new("deep", "uni", "a", "b", 5),
            Some(QuoteLevel::new(1.0, out_ab, Some(100.0))),
            Some(QuoteLevel::new(1.0, out_ba, Some(100.0))),
        );
        let finder = finder(SearchPolicy::default());
        let found = finder.search(&snapshot, "a", 2, 5);
        assert_eq!(found.len(), 1);

        let small = finder.reprice(&found[0], 1.0, &snapshot).unwrap();
        let large = finder.reprice(&found[0], 50.0, &snapshot).unwrap();
        assert_eq!(small.id, found[0].id);
        assert_eq!(small.deadline, found[0].deadline);
        assert!(large.expected_output / large.amount_in < small.expected_output / small.amount_in);
        assert_eq!(large.path.hops()[1].amount_in, large.path.hops()[0].expected_out);
    }

    #[test]
    fn test_reprice_fails_when_venue_disappears() {
        let finder = finder(SearchPolicy::default());
        let found = finder.search(&triangle(), "weth", 3, 5);
        let empty = GraphSnapshot::new(Vec::new());
        let result = finder.reprice(&found[0], 1.0, &empty);
        assert!(matches!(result, Err(EngineError::QuoteUnavailable { .. })));
    }
}
