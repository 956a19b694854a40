//! Chain-specific types.

use alloy::primitives::{hex, Address, Bytes, TxHash, B256, U128, U256, U64};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Chain ID type for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChainId(pub u64);

impl From<u64> for ChainId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChainId> for u64 {
    fn from(id: ChainId) -> Self {
        id.0
    }
}

/// Receipt of a mined transaction, as returned by `eth_getTransactionReceipt`.
///
/// Only the fields the lifecycle needs are typed; logs stay raw for the
/// ABI codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxReceipt {
    pub transaction_hash: TxHash,
    #[serde(default)]
    pub block_hash: Option<B256>,
    #[serde(default)]
    pub block_number: Option<U64>,
    #[serde(default)]
    pub status: Option<U64>,
    #[serde(default)]
    pub gas_used: Option<U64>,
    #[serde(default)]
    pub effective_gas_price: Option<U128>,
    #[serde(default)]
    pub contract_address: Option<Address>,
    #[serde(default)]
    pub logs: Vec<Value>,
}

impl TxReceipt {
    /// True once the receipt belongs to a block.
    pub fn is_mined(&self) -> bool {
        self.block_hash.is_some()
    }

    /// Receipt status flag. Pre-Byzantium receipts carry no status and
    /// count as successful.
    pub fn succeeded(&self) -> bool {
        self.status.map_or(true, |s| s == U64::from(1))
    }

    pub fn block(&self) -> Option<u64> {
        self.block_number.map(|n| n.to::<u64>())
    }
}

/// Transaction skeleton before defaults are filled in and it is signed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxSkeleton {
    pub from: Option<Address>,
    /// `None` deploys a contract.
    pub to: Option<Address>,
    pub value: Option<U256>,
    pub data: Option<Bytes>,
    pub nonce: Option<u64>,
    /// Gas limit.
    pub gas: Option<u64>,
    pub gas_price: Option<u128>,
    pub chain_id: Option<u64>,
}

impl TxSkeleton {
    pub fn new(to: Address) -> Self {
        Self {
            to: Some(to),
            ..Default::default()
        }
    }

    pub fn from(mut self, from: Address) -> Self {
        self.from = Some(from);
        self
    }

    pub fn value(mut self, value: U256) -> Self {
        self.value = Some(value);
        self
    }

    pub fn data(mut self, data: Bytes) -> Self {
        self.data = Some(data);
        self
    }

    pub fn gas(mut self, gas: u64) -> Self {
        self.gas = Some(gas);
        self
    }

    pub fn gas_price(mut self, gas_price: u128) -> Self {
        self.gas_price = Some(gas_price);
        self
    }

    /// JSON object for `eth_estimateGas` / `eth_sendTransaction`, quantities hex encoded.
    pub fn to_rpc_value(&self) -> Value {
        let mut map = Map::new();
        if let Some(from) = self.from {
            map.insert("from".into(), Value::String(from.to_string()));
        }
        if let Some(to) = self.to {
            map.insert("to".into(), Value::String(to.to_string()));
        }
        if let Some(value) = self.value {
            map.insert("value".into(), Value::String(format!("{:#x}", value)));
        }
        if let Some(data) = &self.data {
            map.insert("data".into(), Value::String(hex::encode_prefixed(data)));
        }
        if let Some(nonce) = self.nonce {
            map.insert("nonce".into(), Value::String(format!("{:#x}", nonce)));
        }
        if let Some(gas) = self.gas {
            map.insert("gas".into(), Value::String(format!("{:#x}", gas)));
        }
        if let Some(gas_price) = self.gas_price {
            map.insert("gasPrice".into(), Value::String(format!("{:#x}", gas_price)));
        }
        if let Some(chain_id) = self.chain_id {
            map.insert("chainId".into(), Value::String(format!("{:#x}", chain_id)));
        }
        Value::Object(map)
    }
}

/// A signed, RLP encoded transaction ready for `eth_sendRawTransaction`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTx {
    pub raw: Bytes,
    pub hash: TxHash,
}
