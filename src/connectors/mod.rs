//! Thin per-chain clients
//!
//! Each connector wraps one RPC endpoint behind a trait so the synchronizers
//! and executors can be driven by fakes in tests.

pub mod evm;
pub mod solana;

pub use evm::{EvmConnector, EvmRpcConnector};
pub use solana::{SolanaConnector, SolanaRpcConnector};
