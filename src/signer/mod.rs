//! Signing capability.
//!
//! The lifecycle never holds keys itself. It hands a 32-byte signing hash
//! and the sender to a [`Signer`] and assembles the raw transaction from
//! the returned signature.

pub mod wallet;

use alloy::primitives::{Address, Signature, B256, U256};
use async_trait::async_trait;

use crate::chain::error::{TxError, TxResult};

pub use wallet::LocalWallet;

/// 64-byte compact signature plus recovery id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoverableSignature {
    /// `r || s`, big endian.
    pub signature: [u8; 64],
    /// 0/1, or the legacy 27/28 form.
    pub recovery: u8,
}

impl RecoverableSignature {
    pub fn y_parity(&self) -> TxResult<bool> {
        match self.recovery {
            0 | 27 => Ok(false),
            1 | 28 => Ok(true),
            other => Err(TxError::Signing(format!("invalid recovery id {}", other))),
        }
    }

    pub fn to_signature(&self) -> TxResult<Signature> {
        let r = U256::from_be_slice(&self.signature[..32]);
        let s = U256::from_be_slice(&self.signature[32..]);
        Ok(Signature::new(r, s, self.y_parity()?))
    }
}

impl From<Signature> for RecoverableSignature {
    fn from(sig: Signature) -> Self {
        let mut signature = [0u8; 64];
        signature[..32].copy_from_slice(&sig.r().to_be_bytes::<32>());
        signature[32..].copy_from_slice(&sig.s().to_be_bytes::<32>());
        Self {
            signature,
            recovery: sig.v() as u8,
        }
    }
}

/// Produces signatures for the accounts it holds.
#[async_trait]
pub trait Signer: Send + Sync {
    /// Sign `message` (already hashed) on behalf of `account`.
    async fn sign(&self, message: B256, account: Address) -> TxResult<RecoverableSignature>;

    /// Accounts this signer can sign for.
    fn accounts(&self) -> Vec<Address>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_recovery_ids() {
        let mut sig = RecoverableSignature {
            signature: [1u8; 64],
            recovery: 27,
        };
        assert!(!sig.y_parity().unwrap());
        sig.recovery = 28;
        assert!(sig.y_parity().unwrap());
        sig.recovery = 1;
        assert!(sig.y_parity().unwrap());
        sig.recovery = 5;
        assert!(sig.y_parity().is_err());
    }

    #[test]
    fn test_alloy_signature_conversion() {
        let original = Signature::new(U256::from(7), U256::from(9), true);
        let compact = RecoverableSignature::from(original);
        assert_eq!(compact.recovery, 1);
        assert_eq!(compact.to_signature().unwrap(), original);
    }
}
