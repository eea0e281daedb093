//! EAGLE bridge relayer - library interface
//!
//! Re-exports internal modules for use in integration tests.

pub mod api;
pub mod attestation;
pub mod config;
pub mod confirmation;
pub mod connectors;
pub mod contracts;
pub mod db;
pub mod events;
pub mod executors;
pub mod metrics;
pub mod processor;
pub mod recovery;
pub mod retry;
pub mod service;
pub mod types;
pub mod watchers;
