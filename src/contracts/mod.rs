//! Contract bindings for the EVM bridge deployments

pub mod bridge;

pub use bridge::{BscBridge, XLayerBridge};
