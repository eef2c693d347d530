//! Network Configuration
//!
//! Per-network settings for a historical sync run. Every orchestrator handles
//! exactly one network; defaults for well-known chains live in a static map
//! so callers only override what they need.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Fallback `eth_getLogs` range for chains without a tuned default.
pub const DEFAULT_MAX_BLOCK_RANGE: u64 = 10_000;

/// Default cap on concurrently in-flight historical sync tasks.
pub const DEFAULT_MAX_TASK_CONCURRENCY: usize = 20;

/// Known-chain `eth_getLogs` range limits. Providers for these chains cap log
/// queries well below the generic default.
static CHAIN_MAX_BLOCK_RANGES: Lazy<HashMap<u64, u64>> = Lazy::new(|| {
    let mut m = HashMap::new();

    // Ethereum mainnet and testnets
    m.insert(1, 2_000);
    m.insert(11155111, 2_000);

    // Optimism
    m.insert(10, 50_000);

    // Polygon
    m.insert(137, 50_000);

    // Arbitrum
    m.insert(42161, 50_000);

    // Base
    m.insert(8453, 10_000);

    m
});

/// Configuration for the network a sync run targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Network {
    /// Network name, used as a metrics label and in logs.
    pub name: String,
    pub chain_id: u64,
    /// Default `eth_getLogs` span; sources may override per-source.
    pub default_max_block_range: u64,
    /// Cap on concurrently in-flight sync tasks.
    pub max_task_concurrency: usize,
}

impl Network {
    /// Builds a network with chain-appropriate defaults.
    pub fn new(name: impl Into<String>, chain_id: u64) -> Self {
        let default_max_block_range = CHAIN_MAX_BLOCK_RANGES
            .get(&chain_id)
            .copied()
            .unwrap_or(DEFAULT_MAX_BLOCK_RANGE);
        Self {
            name: name.into(),
            chain_id,
            default_max_block_range,
            max_task_concurrency: DEFAULT_MAX_TASK_CONCURRENCY,
        }
    }

    pub fn with_max_block_range(mut self, max_block_range: u64) -> Self {
        self.default_max_block_range = max_block_range;
        self
    }

    pub fn with_max_task_concurrency(mut self, max_task_concurrency: usize) -> Self {
        self.max_task_concurrency = max_task_concurrency;
        self
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (chain {})", self.name, self.chain_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_chain_gets_tuned_range() {
        let network = Network::new("mainnet", 1);
        assert_eq!(network.default_max_block_range, 2_000);
    }

    #[test]
    fn unknown_chain_falls_back() {
        let network = Network::new("devnet", 31337);
        assert_eq!(network.default_max_block_range, DEFAULT_MAX_BLOCK_RANGE);
        assert_eq!(network.max_task_concurrency, DEFAULT_MAX_TASK_CONCURRENCY);
    }
}
