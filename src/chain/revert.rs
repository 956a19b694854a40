//! Revert payload decoding.
//!
//! Standard `Error(string)` and `Panic(uint256)` payloads are decoded here;
//! contract-specific custom errors need the ABI codec, which plugs in
//! through [`RevertDecoder`].

/// Decodes revert data into a human readable reason.
pub trait RevertDecoder: Send + Sync {
    fn decode(&self, data: &[u8]) -> Option<String>;
}

/// Decoder that understands only the built-in Solidity error types.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardRevertDecoder;

impl RevertDecoder for StandardRevertDecoder {
    fn decode(&self, data: &[u8]) -> Option<String> {
        decode_revert_reason(data)
    }
}

/// Decode `Error(string)` / `Panic(uint256)` revert data.
pub fn decode_revert_reason(data: &[u8]) -> Option<String> {
    let reason = alloy::sol_types::decode_revert_reason(data)?;
    match reason.strip_prefix("revert: ") {
        Some(stripped) => Some(stripped.to_string()),
        None => Some(reason),
    }
}
