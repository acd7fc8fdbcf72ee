//! Private relay submission channel over JSON-RPC

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::domain::execution::{OperationKind, Signer};
use crate::domain::protection::{
    BlockRange, Bundle, BundleStatus, NetworkConditions, SimResult, SubmissionChannel, SubmissionHandle,
};
use crate::shared::errors::AdapterError;

const SIGNATURE_HEADER: &str = "X-Relay-Signature";
const FEE_HISTORY_BLOCKS: u64 = 5;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallBundleResult {
    results: Vec<CallResult>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallResult {
    error: Option<String>,
    revert: Option<String>,
    amount_out: Option<f64>,
    /// Execution cost, accounting units
    cost: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BundleStatusResult {
    status: String,
    block_number: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeeHistory {
    gas_used_ratio: Vec<f64>,
}

pub struct RelayClient {
    client: Client,
    url: String,
    signer: Arc<dyn Signer>,
    timeout_ms: u64,
    next_id: AtomicU64,
}

impl RelayClient {
    pub fn new(url: impl Into<String>, signer: Arc<dyn Signer>, timeout: Duration) -> Result<Self, AdapterError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AdapterError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
            signer,
            timeout_ms: timeout.as_millis() as u64,
            next_id: AtomicU64::new(1),
        })
    }

    async fn rpc<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, AdapterError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let bytes = serde_json::to_vec(&body).map_err(|e| AdapterError::Rejected(e.to_string()))?;
        let signature = format!("{}:0x{}", self.signer.identity(), hex::encode(self.signer.sign(&bytes)?));

        let resp = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(bytes)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AdapterError::Timeout(self.timeout_ms)
                } else {
                    AdapterError::Transport(format!("{method} POST failed: {e}"))
                }
            })?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if status.is_server_error() {
            return Err(AdapterError::Transport(format!("{method}: relay returned {status}")));
        }
        if !status.is_success() {
            return Err(AdapterError::Rejected(format!("{method}: {status} body={text}")));
        }
        parse_response(method, &text)
    }
}

fn parse_response<T: DeserializeOwned>(method: &str, text: &str) -> Result<T, AdapterError> {
    let parsed: RpcResponse<T> = serde_json::from_str(text)
        .map_err(|e| AdapterError::Rejected(format!("{method}: malformed response: {e}")))?;
    if let Some(err) = parsed.error {
        return Err(AdapterError::Rejected(format!("{method}: {} ({})", err.message, err.code)));
    }
    parsed
        .result
        .ok_or_else(|| AdapterError::Rejected(format!("{method}: empty result")))
}

/// Hex quantity ("0x1b4") to integer
fn parse_quantity(value: &str) -> Result<u64, AdapterError> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16)
        .map_err(|e| AdapterError::Rejected(format!("bad quantity {value}: {e}")))
}

fn quantity(value: u64) -> String {
    format!("0x{value:x}")
}

/// Each operation hex-encoded, followed by the bundle signature
fn encode_bundle(bundle: &Bundle) -> Result<Vec<String>, AdapterError> {
    let mut txs = Vec::with_capacity(bundle.plan.len() + 1);
    for op in bundle.plan.operations() {
        let bytes = serde_json::to_vec(op).map_err(|e| AdapterError::Rejected(e.to_string()))?;
        txs.push(format!("0x{}", hex::encode(bytes)));
    }
    txs.push(format!("0x{}", hex::encode(&bundle.signature)));
    Ok(txs)
}

/// Relays answer with a bare hash or an object naming it
fn extract_bundle_id(result: &Value) -> Option<String> {
    if let Some(s) = result.as_str() {
        return Some(s.to_string());
    }
    ["bundleHash", "bundleId", "uuid"]
        .iter()
        .find_map(|key| result.get(key).and_then(Value::as_str).map(str::to_string))
}

fn to_sim_result(bundle: &Bundle, call: CallBundleResult) -> SimResult {
    if let Some(reason) = call.results.iter().find_map(|r| r.revert.clone().or_else(|| r.error.clone())) {
        return SimResult::reverted(reason);
    }
    let mut swap_outputs = Vec::new();
    for (op, result) in bundle.plan.operations().iter().zip(&call.results) {
        if op.kind == OperationKind::Swap {
            swap_outputs.push(result.amount_out.unwrap_or(0.0));
        }
    }
    let operation_costs = if call.results.iter().all(|r| r.cost.is_some()) {
        call.results.iter().filter_map(|r| r.cost).collect()
    } else {
        Vec::new()
    };
    SimResult {
        success: true,
        revert_reason: None,
        swap_outputs,
        operation_costs,
    }
}

fn to_bundle_status(result: BundleStatusResult) -> Result<BundleStatus, AdapterError> {
    match result.status.as_str() {
        "included" | "landed" => {
            let block = result
                .block_number
                .as_deref()
                .map(parse_quantity)
                .transpose()?
                .unwrap_or(0);
            Ok(BundleStatus::Included { block })
        }
        "pending" | "received" | "simulated" => Ok(BundleStatus::Pending),
        "expired" => Ok(BundleStatus::Expired),
        "dropped" | "failed" | "rejected" => Ok(BundleStatus::Dropped),
        other => Err(AdapterError::Rejected(format!("unknown bundle status {other}"))),
    }
}

#[async_trait]
impl SubmissionChannel for RelayClient {
    fn name(&self) -> &str {
        &self.url
    }

    fn is_private(&self) -> bool {
        true
    }

    async fn current_block(&self) -> Result<u64, AdapterError> {
        let head: String = self.rpc("eth_blockNumber", json!([])).await?;
        parse_quantity(&head)
    }

    async fn network_conditions(&self) -> Result<NetworkConditions, AdapterError> {
        let history: FeeHistory = self
            .rpc("eth_feeHistory", json!([quantity(FEE_HISTORY_BLOCKS), "latest", []]))
            .await?;
        if history.gas_used_ratio.is_empty() {
            return Ok(NetworkConditions::default());
        }
        let congestion = history.gas_used_ratio.iter().sum::<f64>() / history.gas_used_ratio.len() as f64;
        Ok(NetworkConditions {
            congestion: congestion.max(0.0).min(1.0),
        })
    }

    async fn simulate(&self, bundle: &Bundle) -> Result<SimResult, AdapterError> {
        let head = self.current_block().await?;
        let params = json!([{
            "txs": encode_bundle(bundle)?,
            "blockNumber": quantity(head + 1),
            "stateBlockNumber": "latest",
        }]);
        let call: CallBundleResult = self.rpc("eth_callBundle", params).await?;
        debug!(bundle = %bundle.id, results = call.results.len(), "relay simulation returned");
        Ok(to_sim_result(bundle, call))
    }

    async fn submit(&self, bundle: &Bundle, target: BlockRange) -> Result<SubmissionHandle, AdapterError> {
        let params = json!([{
            "txs": encode_bundle(bundle)?,
            "blockNumber": quantity(target.start),
            "maxBlockNumber": quantity(target.end),
            "replacementUuid": bundle.id,
        }]);
        let result: Value = self.rpc("eth_sendBundle", params).await?;
        let reference = extract_bundle_id(&result).unwrap_or_else(|| {
            warn!(bundle = %bundle.id, "relay returned no bundle hash, tracking by id");
            bundle.id.clone()
        });
        Ok(SubmissionHandle {
            bundle_id: bundle.id.clone(),
            reference,
        })
    }

    async fn status(&self, handle: &SubmissionHandle) -> Result<BundleStatus, AdapterError> {
        let result: BundleStatusResult = self
            .rpc("relay_bundleStatus", json!([{ "bundleHash": handle.reference }]))
            .await?;
        to_bundle_status(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::execution::{AtomicPlan, Operation};

    fn bundle() -> Bundle {
        let plan = AtomicPlan::direct(vec![
            Operation::new(OperationKind::Swap, "v1", "usdc", 1.0).with_min_out(1_990.0),
            Operation::new(OperationKind::Swap, "v2", "weth", 2_000.0).with_min_out(1.0),
        ])
        .unwrap();
        Bundle::new("opp", plan, "searcher", 3)
    }

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x1b4").unwrap(), 436);
        assert_eq!(quantity(436), "0x1b4");
        assert!(parse_quantity("0xzz").is_err());
    }

    #[test]
    fn test_extract_bundle_id_accepts_string_and_object_results() {
        assert_eq!(extract_bundle_id(&json!("0xabc")).as_deref(), Some("0xabc"));
        assert_eq!(extract_bundle_id(&json!({"bundleHash": "0xdef"})).as_deref(), Some("0xdef"));
        assert_eq!(extract_bundle_id(&json!({"uuid": "u-1"})).as_deref(), Some("u-1"));
        assert_eq!(extract_bundle_id(&json!({"other": 1})), None);
    }

    #[test]
    fn test_rpc_error_is_rejected() {
        let text = r#"{"jsonrpc":"2.0","id":1,"error":{"code":-32000,"message":"bundle too large"}}"#;
        let err = parse_response::<Value>("eth_sendBundle", text).unwrap_err();
        assert!(matches!(err, AdapterError::Rejected(msg) if msg.contains("bundle too large")));
    }

    #[test]
    fn test_call_bundle_maps_to_sim_result() {
        let text = r#"{"jsonrpc":"2.0","id":1,"result":{"results":[
            {"amountOut": 1998.5, "cost": 0.001},
            {"amountOut": 1.021, "cost": 0.0012}
        ]}}"#;
        let call: CallBundleResult = parse_response("eth_callBundle", text).unwrap();
        let sim = to_sim_result(&bundle(), call);
        assert!(sim.success);
        assert_eq!(sim.swap_outputs, vec![1998.5, 1.021]);
        assert_eq!(sim.operation_costs, vec![0.001, 0.0012]);

        let reverted: CallBundleResult =
            serde_json::from_str(r#"{"results":[{"revert":"INSUFFICIENT_OUTPUT"},{}]}"#).unwrap();
        let sim = to_sim_result(&bundle(), reverted);
        assert!(!sim.success);
        assert_eq!(sim.revert_reason.as_deref(), Some("INSUFFICIENT_OUTPUT"));
    }

    #[test]
    fn test_bundle_status_mapping() {
        let status = |s: &str, block: Option<&str>| {
            to_bundle_status(BundleStatusResult {
                status: s.to_string(),
                block_number: block.map(str::to_string),
            })
        };
        assert_eq!(status("included", Some("0x10")).unwrap(), BundleStatus::Included { block: 16 });
        assert_eq!(status("pending", None).unwrap(), BundleStatus::Pending);
        assert_eq!(status("expired", None).unwrap(), BundleStatus::Expired);
        assert_eq!(status("dropped", None).unwrap(), BundleStatus::Dropped);
        assert!(status("weird", None).is_err());
    }

    #[test]
    fn test_encoded_bundle_carries_signature() {
        let mut bundle = bundle();
        bundle.signature = vec![0xab, 0xcd];
        let txs = encode_bundle(&bundle).unwrap();
        assert_eq!(txs.len(), 3);
        assert_eq!(txs[2], "0xabcd");
        assert!(txs.iter().all(|t| t.starts_with("0x")));
    }
}
