//! `JsonRpcClient` against an in-process JSON-RPC node.
//!
//! The node mines every transaction in the next block and advances its head by
//! one each time `eth_blockNumber` is asked.
//! Run with: cargo test --test json_rpc_test

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use alloy_core::primitives::{Address, B256, Bytes};
use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use chainmig_deploy::{
    ArtifactStore, ContractArtifact, FailureReason, FileLedger, GasParams, JsonRpcClient,
    LedgerStore, MemoryLedger, NetworkClient, NetworkId, NetworkProfile, Orchestrator,
    OrchestratorError, ParameterSet, Step, StepStatus,
};
use serde_json::{Value, json};
use tempdir::TempDir;
use tokio::net::TcpListener;
use url::Url;

const NETWORK_ID: u64 = 3;
const ACCOUNT: Address = Address::repeat_byte(0xaa);
const GAS: GasParams = GasParams {
    gas: 4_700_000,
    gas_price: 1,
};

/// Scripted behaviour and observed traffic of the mock node.
#[derive(Debug, Default)]
struct NodeState {
    head: u64,
    receipts: HashMap<B256, Value>,
    /// Transactions sent, in order.
    sent: Vec<Value>,
    /// Method names received, in order.
    calls: Vec<String>,
    /// Mine the next transaction with a failed status.
    revert_next: bool,
    /// Answer this many `eth_blockNumber` requests with a 502.
    block_number_outages: usize,
    /// Return receipts whose block number is not a hex string.
    malformed_receipts: bool,
}

type Node = Arc<Mutex<NodeState>>;

fn result(request: &Value, result: Value) -> Response {
    Json(json!({ "jsonrpc": "2.0", "id": request["id"], "result": result })).into_response()
}

fn hex(value: u64) -> String {
    format!("0x{value:x}")
}

async fn handle(State(node): State<Node>, Json(request): Json<Value>) -> Response {
    let mut node = node.lock().unwrap_or_else(|e| e.into_inner());
    let method = request["method"].as_str().unwrap_or_default().to_string();
    node.calls.push(method.clone());

    match method.as_str() {
        "net_version" => result(&request, json!(NETWORK_ID.to_string())),
        "eth_accounts" => result(&request, json!([ACCOUNT])),
        "eth_blockNumber" => {
            if node.block_number_outages > 0 {
                node.block_number_outages -= 1;
                return (StatusCode::BAD_GATEWAY, "upstream unavailable").into_response();
            }
            let head = node.head;
            node.head += 1;
            result(&request, json!(hex(head)))
        }
        "eth_sendTransaction" => {
            let tx = request["params"][0].clone();
            node.sent.push(tx.clone());
            let index = node.sent.len() as u8;

            let tx_hash = B256::repeat_byte(index);
            node.head += 1;
            let contract_address = tx.get("to").is_none().then(|| Address::repeat_byte(index));
            let status = if std::mem::take(&mut node.revert_next) { "0x0" } else { "0x1" };
            let receipt = json!({
                "transactionHash": tx_hash,
                "blockNumber": hex(node.head),
                "contractAddress": contract_address,
                "status": status,
            });
            node.receipts.insert(tx_hash, receipt);
            result(&request, json!(tx_hash))
        }
        "eth_getTransactionReceipt" => {
            let mut receipt = serde_json::from_value::<B256>(request["params"][0].clone())
                .ok()
                .and_then(|hash| node.receipts.get(&hash).cloned())
                .unwrap_or(Value::Null);
            if node.malformed_receipts && receipt.is_object() {
                receipt["blockNumber"] = json!(7);
            }
            result(&request, receipt)
        }
        _ => Json(json!({
            "jsonrpc": "2.0",
            "id": request["id"],
            "error": { "code": -32601, "message": format!("method {method} not found") }
        }))
        .into_response(),
    }
}

/// A running mock node and a client pointed at it.
struct TestNode {
    state: Node,
    port: u16,
}

impl TestNode {
    async fn start() -> Result<Self> {
        let state = Node::default();
        let app = Router::new().route("/", post(handle)).with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("Failed to bind mock node")?;
        let port = listener.local_addr()?.port();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { state, port })
    }

    fn client(&self, from: Option<Address>) -> Result<JsonRpcClient> {
        let url = Url::parse(&format!("http://127.0.0.1:{}", self.port))?;
        Ok(JsonRpcClient::new(url, from)?.with_poll_interval(Duration::from_millis(10)))
    }

    fn profile(&self) -> NetworkProfile {
        let mut profile = NetworkProfile::local(self.port);
        profile.network_id = NetworkId::Id(NETWORK_ID);
        profile.timeout = Some(5);
        profile
    }

    fn node(&self) -> std::sync::MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn count(&self, method: &str) -> usize {
        self.node().calls.iter().filter(|call| *call == method).count()
    }
}

fn artifacts() -> Result<ArtifactStore> {
    let mut artifacts = ArtifactStore::new("build/contracts");
    artifacts.insert(serde_json::from_value::<ContractArtifact>(json!({
        "contractName": "DinngoToken",
        "abi": [],
        "bytecode": "0x6080",
    }))?);
    Ok(artifacts)
}

#[tokio::test]
async fn test_waits_for_confirmation_depth() -> Result<()> {
    let node = TestNode::start().await?;
    let client = node.client(Some(ACCOUNT))?;

    let tx_hash = client
        .deploy_contract(Bytes::from_static(&[0x60, 0x80]), GAS)
        .await?;
    let receipt = client.await_confirmation(tx_hash, 3).await?;

    assert_eq!(receipt.tx_hash, tx_hash);
    assert_eq!(receipt.block_number, 1);
    assert!(receipt.status);
    assert_eq!(receipt.contract_address, Some(Address::repeat_byte(1)));
    // Heads 1 and 2 are too shallow; head 3 gives three confirmations.
    assert_eq!(node.count("eth_blockNumber"), 3);
    Ok(())
}

#[tokio::test]
async fn test_failed_status_is_a_revert() -> Result<()> {
    let node = TestNode::start().await?;
    node.node().revert_next = true;
    let client = node.client(Some(ACCOUNT))?;

    let tx_hash = client
        .call_method(Address::repeat_byte(0x11), Bytes::new(), GAS)
        .await?;
    let receipt = client.await_confirmation(tx_hash, 1).await?;

    assert!(!receipt.status);
    assert_eq!(receipt.contract_address, None);

    node.node().revert_next = true;
    let mut orchestrator = Orchestrator::new(
        client,
        MemoryLedger::new(),
        artifacts()?,
        ParameterSet::default(),
    );
    let report = orchestrator
        .run(vec![Step::deploy("token", "DinngoToken")], &node.profile())
        .await?;
    assert!(matches!(
        &report.first_failure,
        Some((id, FailureReason::RevertedByContract(_))) if id.as_str() == "token"
    ));
    assert_eq!(orchestrator.registry().store().read_all(NETWORK_ID)?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_sender_falls_back_to_first_node_account() -> Result<()> {
    let node = TestNode::start().await?;
    let client = node.client(None)?;

    client.deploy_contract(Bytes::new(), GAS).await?;

    assert_eq!(node.count("eth_accounts"), 1);
    let sent = node.node().sent.clone();
    let from: Address = serde_json::from_value(sent[0]["from"].clone())?;
    assert_eq!(from, ACCOUNT);
    assert_eq!(sent[0]["gas"], json!("0x47b760"));
    assert!(sent[0].get("to").is_none());
    Ok(())
}

#[tokio::test]
async fn test_block_number_outage_is_waited_out() -> Result<()> {
    let node = TestNode::start().await?;
    node.node().block_number_outages = 1;
    let client = node.client(Some(ACCOUNT))?;

    let tx_hash = client.deploy_contract(Bytes::new(), GAS).await?;
    let receipt = client.await_confirmation(tx_hash, 1).await?;

    assert!(receipt.status);
    assert_eq!(node.count("eth_blockNumber"), 2);
    Ok(())
}

#[tokio::test]
async fn test_mined_deployment_is_recorded_despite_outage() -> Result<()> {
    let temp_dir = TempDir::new("chainmig-test").context("Failed to create temp dir")?;
    let ledger_path = temp_dir.path().join("ledger.jsonl");
    let node = TestNode::start().await?;
    node.node().block_number_outages = 1;
    let steps = vec![Step::deploy("token", "DinngoToken")];

    {
        let mut orchestrator = Orchestrator::new(
            node.client(Some(ACCOUNT))?,
            FileLedger::open(&ledger_path)?,
            artifacts()?,
            ParameterSet::default(),
        );
        let report = orchestrator.run(steps.clone(), &node.profile()).await?;
        assert!(report.is_success(), "run failed: {:?}", report.first_failure);
    }

    let mut orchestrator = Orchestrator::new(
        node.client(Some(ACCOUNT))?,
        FileLedger::open(&ledger_path)?,
        artifacts()?,
        ParameterSet::default(),
    );
    let report = orchestrator.run(steps, &node.profile()).await?;

    assert!(matches!(
        report.status(&"token".into()),
        Some(StepStatus::Skipped { .. })
    ));
    assert_eq!(node.count("eth_sendTransaction"), 1);
    Ok(())
}

#[tokio::test]
async fn test_undecodable_receipt_after_submission_is_a_timeout() -> Result<()> {
    let node = TestNode::start().await?;
    node.node().malformed_receipts = true;

    let mut orchestrator = Orchestrator::new(
        node.client(Some(ACCOUNT))?,
        MemoryLedger::new(),
        artifacts()?,
        ParameterSet::default(),
    );
    let report = orchestrator
        .run(vec![Step::deploy("token", "DinngoToken")], &node.profile())
        .await?;

    assert!(matches!(
        &report.first_failure,
        Some((id, FailureReason::Timeout(detail)))
            if id.as_str() == "token" && detail.contains("eth_getTransactionReceipt")
    ));
    assert_eq!(node.count("eth_sendTransaction"), 1);
    Ok(())
}

#[tokio::test]
async fn test_network_mismatch_against_node() -> Result<()> {
    let node = TestNode::start().await?;
    let mut profile = node.profile();
    profile.network_id = NetworkId::Id(1);

    let mut orchestrator = Orchestrator::new(
        node.client(Some(ACCOUNT))?,
        MemoryLedger::new(),
        artifacts()?,
        ParameterSet::default(),
    );
    let result = orchestrator
        .run(vec![Step::deploy("token", "DinngoToken")], &profile)
        .await;

    assert!(matches!(
        result,
        Err(OrchestratorError::NetworkMismatch {
            expected: 1,
            actual: NETWORK_ID
        })
    ));
    assert_eq!(node.count("eth_sendTransaction"), 0);
    Ok(())
}
