//! Shared fixtures for integration tests: an in-memory JSON-RPC node.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use alloy::primitives::{keccak256, Address, Bytes, TxHash};
use async_trait::async_trait;
use serde_json::{json, Value};

use tx_lifecycle::router::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use tx_lifecycle::router::{Endpoint, EndpointRouter, SwitchMode, Transport, TransportError};
use tx_lifecycle::{TxConfig, TxManager};

/// Anvil's first account.
pub const TEST_PRIVATE_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Scripted failure for the next broadcast.
#[derive(Debug, Clone)]
pub enum SendFailure {
    Rpc(i64, String),
    Transport,
}

/// Mutable chain state behind a [`FakeNode`].
#[derive(Debug)]
pub struct NodeState {
    pub chain_id: u64,
    pub block: u64,
    /// Added to `block` after every `eth_blockNumber` call.
    pub block_step: u64,
    pub gas_price: u128,
    pub gas_estimate: u64,
    pub nonces: HashMap<Address, u64>,
    pub receipts: HashMap<TxHash, Value>,
    /// Mine every accepted broadcast immediately with this status.
    pub auto_mine: Option<bool>,
    /// Still store the receipt when a scripted transport failure fires.
    pub mine_on_transport_failure: bool,
    pub send_failures: VecDeque<SendFailure>,
    pub sent: Vec<Bytes>,
    pub calls: HashMap<String, u32>,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            chain_id: 1,
            block: 100,
            block_step: 0,
            gas_price: 1_000_000_000,
            gas_estimate: 21_000,
            nonces: HashMap::new(),
            receipts: HashMap::new(),
            auto_mine: Some(true),
            mine_on_transport_failure: false,
            send_failures: VecDeque::new(),
            sent: Vec::new(),
            calls: HashMap::new(),
        }
    }
}

/// In-memory node answering the JSON-RPC methods the lifecycle uses.
#[derive(Debug, Default)]
pub struct FakeNode {
    pub state: Mutex<NodeState>,
}

impl FakeNode {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut NodeState) -> R) -> R {
        let mut state = self.state.lock().unwrap();
        f(&mut state)
    }

    pub fn calls(&self, method: &str) -> u32 {
        self.with(|s| s.calls.get(method).copied().unwrap_or(0))
    }

    pub fn set_nonce(&self, account: Address, nonce: u64) {
        self.with(|s| {
            s.nonces.insert(account, nonce);
        });
    }

    /// Store a receipt for `hash` one block ahead of the current head.
    pub fn mine(&self, hash: TxHash, status: bool) {
        self.with(|s| {
            let block = s.block + 1;
            s.receipts.insert(hash, Self::receipt(hash, block, status));
        });
    }

    pub fn endpoint(self: &Arc<Self>, name: &str, priority: u32) -> Endpoint {
        Endpoint::new(name, priority, self.clone())
    }

    fn receipt(hash: TxHash, block: u64, status: bool) -> Value {
        json!({
            "transactionHash": hash,
            "blockHash": keccak256(block.to_be_bytes()),
            "blockNumber": format!("{:#x}", block),
            "status": if status { "0x1" } else { "0x0" },
            "gasUsed": "0x5208",
            "logs": [],
        })
    }

    fn handle(&self, request: &JsonRpcRequest) -> Result<Result<Value, (i64, String)>, TransportError> {
        let mut s = self.state.lock().unwrap();
        *s.calls.entry(request.method.clone()).or_default() += 1;

        let result = match request.method.as_str() {
            "eth_chainId" => json!(format!("{:#x}", s.chain_id)),
            "eth_blockNumber" => {
                let block = s.block;
                s.block += s.block_step;
                json!(format!("{:#x}", block))
            }
            "eth_gasPrice" => json!(format!("{:#x}", s.gas_price)),
            "eth_estimateGas" => json!(format!("{:#x}", s.gas_estimate)),
            "eth_accounts" => json!([Address::repeat_byte(0x11)]),
            "eth_getTransactionCount" => {
                let account: Address = serde_json::from_value(request.params[0].clone()).unwrap();
                json!(format!("{:#x}", s.nonces.get(&account).copied().unwrap_or(0)))
            }
            "eth_getTransactionReceipt" => {
                let hash: TxHash = serde_json::from_value(request.params[0].clone()).unwrap();
                s.receipts.get(&hash).cloned().unwrap_or(Value::Null)
            }
            "eth_sendRawTransaction" | "eth_sendTransaction" => {
                let raw = match request.params[0].as_str() {
                    Some(hex) => hex.parse::<Bytes>().unwrap(),
                    None => Bytes::from(serde_json::to_vec(&request.params[0]).unwrap()),
                };
                let hash = keccak256(&raw);
                match s.send_failures.pop_front() {
                    Some(SendFailure::Rpc(code, message)) => return Ok(Err((code, message))),
                    Some(SendFailure::Transport) => {
                        if s.mine_on_transport_failure {
                            let block = s.block + 1;
                            s.receipts.insert(hash, Self::receipt(hash, block, true));
                        }
                        return Err(TransportError::Connection("connection reset".into()));
                    }
                    None => {}
                }
                s.sent.push(raw);
                if let Some(status) = s.auto_mine {
                    let block = s.block + 1;
                    s.receipts.insert(hash, Self::receipt(hash, block, status));
                }
                json!(hash)
            }
            other => return Ok(Err((-32601, format!("the method {} does not exist", other)))),
        };
        Ok(Ok(result))
    }
}

#[async_trait]
impl Transport for FakeNode {
    async fn send(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, TransportError> {
        Ok(match self.handle(&request)? {
            Ok(value) => JsonRpcResponse::success(request.id, value),
            Err((code, message)) => JsonRpcResponse::failure(request.id, code, message, None),
        })
    }
}

/// Config with fast polling for tests.
pub fn test_config() -> TxConfig {
    let mut config = TxConfig::default();
    config.chain.gas_price_cache_secs = 0;
    config.confirm.poll_interval_ms = 100;
    config.queue.retry_delay_ms = 100;
    config.queue.max_retry_delay_ms = 1_000;
    config.queue.idle_poll_ms = 100;
    config
}

pub fn manager(node: &Arc<FakeNode>, config: &TxConfig) -> TxManager {
    let router = EndpointRouter::new(vec![node.endpoint("fake://node", 1)], SwitchMode::Random).unwrap();
    TxManager::new(Arc::new(router), config)
}
