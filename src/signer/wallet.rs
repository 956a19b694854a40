//! Local private-key signer.
//!
//! # Security
//! - Keys come from configuration or the `TXL_PRIVATE_KEY` environment variable
//! - Keys are never logged or serialized

use alloy::primitives::{Address, B256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer as _;
use async_trait::async_trait;

use crate::chain::error::{TxError, TxResult};
use crate::signer::{RecoverableSignature, Signer};

/// Environment variable name for the private key.
pub const PRIVATE_KEY_ENV_VAR: &str = "TXL_PRIVATE_KEY";

/// Signs for a single account held in memory.
#[derive(Debug, Clone)]
pub struct LocalWallet {
    signer: PrivateKeySigner,
}

impl LocalWallet {
    /// Create a wallet from a hex-encoded private key string.
    ///
    /// Accepts the key with or without a `0x` prefix.
    pub fn from_private_key(private_key_hex: &str) -> TxResult<Self> {
        let key_hex = private_key_hex.trim();
        let key_hex = key_hex.strip_prefix("0x").unwrap_or(key_hex);

        let signer: PrivateKeySigner = key_hex
            .parse()
            .map_err(|e| TxError::Config(format!("Invalid private key format: {}", e)))?;

        tracing::info!(address = %signer.address(), "Local wallet initialized");

        Ok(Self { signer })
    }

    /// Load the key from `TXL_PRIVATE_KEY`.
    pub fn from_env() -> TxResult<Self> {
        let private_key = std::env::var(PRIVATE_KEY_ENV_VAR).map_err(|_| {
            TxError::Config(format!(
                "Environment variable {} not set",
                PRIVATE_KEY_ENV_VAR
            ))
        })?;

        Self::from_private_key(&private_key)
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

#[async_trait]
impl Signer for LocalWallet {
    async fn sign(&self, message: B256, account: Address) -> TxResult<RecoverableSignature> {
        if account != self.address() {
            return Err(TxError::Signing(format!("no key held for {}", account)));
        }
        let signature = self
            .signer
            .sign_hash(&message)
            .await
            .map_err(|e| TxError::Signing(e.to_string()))?;
        Ok(RecoverableSignature::from(signature))
    }

    fn accounts(&self) -> Vec<Address> {
        vec![self.address()]
    }
}
