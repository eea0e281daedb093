//! Attestations for destination bridge contracts
//!
//! The destination contracts recover the relayer address from an EIP-191
//! personal-message signature over
//! `keccak256(abi.encodePacked(...))` of six fields. The field order differs
//! between the two EVM legs, so each layout is spelled out byte by byte.
//!
//! Packed encoding: `address` is 20 bytes, `uint256` is a 32-byte big-endian
//! word, with no padding between fields.

use alloy::primitives::{keccak256, Address, Bytes, B256, U256};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use thiserror::Error;

/// Total packed length: 2 addresses + 4 uint256 words
pub const PACKED_LEN: usize = 20 + 32 * 4 + 20;

#[derive(Debug, Error)]
pub enum AttestationError {
    #[error("relayer signing key is not configured")]
    Unconfigured,
    #[error("relayer signing key is invalid")]
    InvalidKey,
    #[error("failed to sign attestation: {0}")]
    Signing(String),
}

/// Inputs bound into every attestation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationRequest {
    pub recipient: Address,
    pub amount: U256,
    pub source_nonce: u64,
    pub source_chain_id: u64,
    pub destination_chain_id: u64,
    pub destination_contract: Address,
}

/// Field order expected by each destination entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestLayout {
    /// BSC `release`: to, amount, srcNonce, srcChainId, destChainId, destBridge
    Release,
    /// X Layer `bridgeIn`: to, amount, srcChainId, srcNonce, destChainId, destBridge
    BridgeIn,
}

impl DigestLayout {
    /// Tightly packed encoding of the six fields
    pub fn packed(&self, request: &AttestationRequest) -> [u8; PACKED_LEN] {
        let (word_a, word_b) = match self {
            DigestLayout::Release => (request.source_nonce, request.source_chain_id),
            DigestLayout::BridgeIn => (request.source_chain_id, request.source_nonce),
        };

        let mut data = [0u8; PACKED_LEN];

        // address recipient
        data[0..20].copy_from_slice(request.recipient.as_slice());

        // uint256 amount
        data[20..52].copy_from_slice(&request.amount.to_be_bytes::<32>());

        // uint256, uint256: nonce/chain id in layout order
        data[52..84].copy_from_slice(&U256::from(word_a).to_be_bytes::<32>());
        data[84..116].copy_from_slice(&U256::from(word_b).to_be_bytes::<32>());

        // uint256 destination chain id
        let destination_chain_id = U256::from(request.destination_chain_id);
        data[116..148].copy_from_slice(&destination_chain_id.to_be_bytes::<32>());

        // address destination contract
        data[148..168].copy_from_slice(request.destination_contract.as_slice());

        data
    }

    pub fn digest(&self, request: &AttestationRequest) -> B256 {
        keccak256(self.packed(request))
    }
}

/// Process-wide attestation signer, loaded once at start
pub struct AttestationSigner {
    signer: PrivateKeySigner,
}

impl AttestationSigner {
    /// Build from the configured key. A missing key is a hard error.
    pub fn from_private_key(private_key: Option<&str>) -> Result<Self, AttestationError> {
        let key = private_key
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .ok_or(AttestationError::Unconfigured)?;
        let signer: PrivateKeySigner = key.parse().map_err(|_| AttestationError::InvalidKey)?;
        Ok(Self { signer })
    }

    /// Address the destination contracts must recognise
    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// 65-byte `r || s || v` signature over the layout's digest.
    /// Deterministic (RFC 6979) for identical inputs.
    pub fn sign(
        &self,
        layout: DigestLayout,
        request: &AttestationRequest,
    ) -> Result<Bytes, AttestationError> {
        let digest = layout.digest(request);
        let signature = self
            .signer
            .sign_message_sync(digest.as_slice())
            .map_err(|e| AttestationError::Signing(e.to_string()))?;
        Ok(Bytes::from(signature.as_bytes().to_vec()))
    }
}

impl std::fmt::Debug for AttestationSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttestationSigner")
            .field("address", &self.signer.address())
            .finish()
    }
}
