//! Event Source Definitions
//!
//! This module defines the user-declared source descriptors the orchestrator
//! syncs: plain log filters, factory-generated child contract log filters,
//! block-interval filters and function-call trace filters, together with the
//! filter criteria each kind carries.

use crate::types::Log;
use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// Positional topic filters: up to four entries, each either a wildcard
/// (`None`) or a list of accepted values.
pub type Topics = Vec<Option<Vec<B256>>>;

/// Where a factory's creation event carries the child contract address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChildAddressLocation {
    /// An indexed topic (1 through 3).
    Topic(usize),
    /// A byte offset into the (unindexed) event data.
    Offset(usize),
}

impl ChildAddressLocation {
    /// Decodes the child contract address out of a creation event log.
    /// Addresses are ABI-encoded as the low 20 bytes of a 32-byte word.
    pub fn extract(&self, log: &Log) -> Option<Address> {
        let word: &[u8] = match self {
            Self::Topic(index) => log.topics.get(*index)?.as_slice(),
            Self::Offset(offset) => log.data.get(*offset..*offset + 32)?,
        };
        Some(Address::from_slice(&word[12..]))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogFilterCriteria {
    /// Contract addresses to match, or `None` for any address.
    pub address: Option<Vec<Address>>,
    pub topics: Topics,
    pub include_transaction_receipts: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoryCriteria {
    /// The factory (parent) contract.
    pub address: Address,
    /// Topic0 of the factory's child-creation event.
    pub event_selector: B256,
    pub child_address_location: ChildAddressLocation,
    /// Topic filters applied to the child contracts' logs.
    pub topics: Topics,
    pub include_transaction_receipts: bool,
}

/// Matches blocks whose number satisfies `(n - offset) % interval == 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockFilterCriteria {
    pub interval: u64,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceFilterCriteria {
    pub from_address: Option<Vec<Address>>,
    pub to_address: Option<Vec<Address>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSource {
    pub id: String,
    pub contract_name: String,
    pub chain_id: u64,
    pub start_block: u64,
    pub end_block: Option<u64>,
    pub criteria: LogFilterCriteria,
    pub max_block_range: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorySource {
    pub id: String,
    pub contract_name: String,
    pub chain_id: u64,
    pub start_block: u64,
    pub end_block: Option<u64>,
    pub criteria: FactoryCriteria,
    pub max_block_range: Option<u64>,
}

impl FactorySource {
    /// The synthetic log filter under which child-address discovery progress
    /// is cached: the factory address with the creation event selector as the
    /// only topic. Re-running discovery over a range the store already has
    /// under this key is a no-op.
    pub fn child_address_criteria(&self) -> LogFilterCriteria {
        LogFilterCriteria {
            address: Some(vec![self.criteria.address]),
            topics: vec![Some(vec![self.criteria.event_selector])],
            include_transaction_receipts: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockSource {
    pub id: String,
    pub source_name: String,
    pub chain_id: u64,
    pub start_block: u64,
    pub end_block: Option<u64>,
    pub criteria: BlockFilterCriteria,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSource {
    pub id: String,
    pub contract_name: String,
    pub chain_id: u64,
    pub start_block: u64,
    pub end_block: Option<u64>,
    pub criteria: TraceFilterCriteria,
    pub max_block_range: Option<u64>,
}

/// A user-declared event source of any kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventSource {
    Log(LogSource),
    Factory(FactorySource),
    Block(BlockSource),
    Trace(TraceSource),
}

impl EventSource {
    pub fn id(&self) -> &str {
        match self {
            Self::Log(s) => &s.id,
            Self::Factory(s) => &s.id,
            Self::Block(s) => &s.id,
            Self::Trace(s) => &s.id,
        }
    }

    /// Human-readable name used in logs and progress display.
    pub fn name(&self) -> &str {
        match self {
            Self::Log(s) => &s.contract_name,
            Self::Factory(s) => &s.contract_name,
            Self::Block(s) => &s.source_name,
            Self::Trace(s) => &s.contract_name,
        }
    }

    pub fn chain_id(&self) -> u64 {
        match self {
            Self::Log(s) => s.chain_id,
            Self::Factory(s) => s.chain_id,
            Self::Block(s) => s.chain_id,
            Self::Trace(s) => s.chain_id,
        }
    }

    pub fn start_block(&self) -> u64 {
        match self {
            Self::Log(s) => s.start_block,
            Self::Factory(s) => s.start_block,
            Self::Block(s) => s.start_block,
            Self::Trace(s) => s.start_block,
        }
    }

    pub fn end_block(&self) -> Option<u64> {
        match self {
            Self::Log(s) => s.end_block,
            Self::Factory(s) => s.end_block,
            Self::Block(s) => s.end_block,
            Self::Trace(s) => s.end_block,
        }
    }

    /// Per-source `eth_getLogs` range cap, if the source overrides the
    /// network default. Block sources never fetch logs.
    pub fn max_block_range(&self) -> Option<u64> {
        match self {
            Self::Log(s) => s.max_block_range,
            Self::Factory(s) => s.max_block_range,
            Self::Block(_) => None,
            Self::Trace(s) => s.max_block_range,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{b256, Bytes, B256};

    fn creation_log(topics: Vec<B256>, data: Vec<u8>) -> Log {
        Log {
            address: Address::repeat_byte(0xfa),
            topics,
            data: Bytes::from(data),
            block_number: 1,
            block_hash: B256::repeat_byte(1),
            transaction_hash: B256::repeat_byte(2),
            transaction_index: 0,
            log_index: 0,
        }
    }

    #[test]
    fn extracts_child_address_from_topic() {
        let child = Address::repeat_byte(0xcc);
        let topic = B256::left_padding_from(child.as_slice());
        let log = creation_log(vec![b256!("00000000000000000000000000000000000000000000000000000000000000aa"), topic], vec![]);

        let location = ChildAddressLocation::Topic(1);
        assert_eq!(location.extract(&log), Some(child));
    }

    #[test]
    fn extracts_child_address_from_data_offset() {
        let child = Address::repeat_byte(0xdd);
        let mut data = vec![0u8; 96];
        data[32 + 12..64].copy_from_slice(child.as_slice());
        let log = creation_log(vec![], data);

        let location = ChildAddressLocation::Offset(32);
        assert_eq!(location.extract(&log), Some(child));
    }

    #[test]
    fn extract_out_of_bounds_is_none() {
        let log = creation_log(vec![], vec![0u8; 16]);
        assert_eq!(ChildAddressLocation::Topic(1).extract(&log), None);
        assert_eq!(ChildAddressLocation::Offset(0).extract(&log), None);
    }

    #[test]
    fn child_address_criteria_pins_selector() {
        let selector = B256::repeat_byte(0xee);
        let source = FactorySource {
            id: "factory_Pair".into(),
            contract_name: "Pair".into(),
            chain_id: 1,
            start_block: 0,
            end_block: None,
            criteria: FactoryCriteria {
                address: Address::repeat_byte(0xfa),
                event_selector: selector,
                child_address_location: ChildAddressLocation::Topic(1),
                topics: vec![],
                include_transaction_receipts: true,
            },
            max_block_range: None,
        };

        let criteria = source.child_address_criteria();
        assert_eq!(criteria.address, Some(vec![source.criteria.address]));
        assert_eq!(criteria.topics, vec![Some(vec![selector])]);
        assert!(!criteria.include_transaction_receipts);
    }
}
