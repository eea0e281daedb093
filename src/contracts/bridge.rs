//! EVM bridge contract ABI definitions
//!
//! Uses alloy's sol! macro to generate type-safe bindings. The two deployments
//! expose different entry points and event shapes, so each gets its own
//! interface.

#![allow(clippy::too_many_arguments)]

use alloy::sol;

sol! {
    /// Bridge deployed on X Layer
    contract XLayerBridge {
        /// Emitted when a user locks tokens for another EVM chain
        event BridgeOut(
            address indexed from,
            address indexed to,
            uint256 amount,
            uint256 fee,
            uint256 indexed destChainId,
            uint256 nonce,
            uint256 timestamp
        );

        /// Emitted when a user locks tokens for a Solana recipient
        event BridgeToSolana(
            address indexed from,
            bytes32 indexed recipient,
            uint256 amount,
            uint256 fee,
            uint256 indexed nonce,
            uint256 timestamp
        );

        /// Credit a transfer that originated on BSC
        ///
        /// The signature covers
        /// `keccak256(to, amount, srcChainId, srcNonce, block.chainid, address(this))`.
        function bridgeIn(
            address to,
            uint256 amount,
            uint256 srcChainId,
            uint256 srcNonce,
            bytes signature
        ) external;
    }
}

sol! {
    /// Bridge deployed on BSC
    contract BscBridge {
        /// Emitted when a user locks tokens for X Layer
        event BridgeInitiated(
            address indexed from,
            address indexed to,
            uint256 amount,
            uint256 fee,
            uint256 indexed nonce,
            uint256 timestamp
        );

        event BridgeToSolana(
            address indexed from,
            bytes32 indexed recipient,
            uint256 amount,
            uint256 fee,
            uint256 indexed nonce,
            uint256 timestamp
        );

        /// Release a transfer that originated on X Layer
        ///
        /// The signature covers
        /// `keccak256(to, amount, srcNonce, srcChainId, block.chainid, address(this))`.
        function release(
            address to,
            uint256 amount,
            uint256 srcNonce,
            uint256 srcChainId,
            bytes signature
        ) external;
    }
}
