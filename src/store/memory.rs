//! In-Memory Sync Store
//!
//! A reference [`SyncStore`] used by the integration tests and the demo
//! binary. Interval sets are unioned per serialized criteria key, so repeated
//! inserts for the same `(chain_id, criteria, interval)` are no-ops, and
//! every insert call is recorded for inspection.

use crate::errors::StoreError;
use crate::intervals::{self, Interval};
use crate::sources::{BlockFilterCriteria, FactoryCriteria, LogFilterCriteria, TraceFilterCriteria};
use crate::store::{AddressBatchStream, SyncStore};
use crate::types::{Block, Log, Transaction, TransactionReceipt};
use alloy_primitives::Address;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

const CHILD_ADDRESS_BATCH_SIZE: usize = 100;

/// A recorded log-interval insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedInterval {
    pub interval: Interval,
    pub block_number: u64,
    pub log_count: usize,
    pub transaction_count: usize,
    pub receipt_count: usize,
}

/// A recorded block-filter interval insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedBlockInterval {
    pub interval: Interval,
    /// The block that carried the insert, when one was fetched.
    pub block_number: Option<u64>,
}

#[derive(Default)]
struct StoreData {
    intervals: HashMap<String, Vec<Interval>>,
    blocks: HashMap<(u64, u64), Block>,
    // Keyed by (block number, log index) per chain: insertion order becomes
    // creation order and replays dedupe naturally.
    child_address_logs: HashMap<u64, BTreeMap<(u64, u64), Log>>,
    interval_inserts: HashMap<String, Vec<InsertedInterval>>,
    block_filter_inserts: HashMap<String, Vec<InsertedBlockInterval>>,
}

#[derive(Default)]
pub struct InMemorySyncStore {
    data: Mutex<StoreData>,
}

fn criteria_key<C: Serialize>(kind: &str, chain_id: u64, criteria: &C) -> Result<String, StoreError> {
    let serialized = serde_json::to_string(criteria)
        .map_err(|err| StoreError::Serialization(err.to_string()))?;
    Ok(format!("{kind}:{chain_id}:{serialized}"))
}

impl InMemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a block, as if a previous run had fetched it.
    pub fn seed_block(&self, chain_id: u64, block: Block) {
        let mut data = self.lock();
        data.blocks.insert((chain_id, block.number), block);
    }

    /// Seeds completed intervals for a log filter, as if a previous run had
    /// synced them.
    pub fn seed_log_filter_intervals(
        &self,
        chain_id: u64,
        filter: &LogFilterCriteria,
        seeded: Vec<Interval>,
    ) -> Result<(), StoreError> {
        let key = criteria_key("log", chain_id, filter)?;
        let mut data = self.lock();
        let existing = data.intervals.entry(key).or_default();
        *existing = intervals::union(existing, &intervals::canonicalize(seeded));
        Ok(())
    }

    /// Recorded `insert_log_filter_interval` calls for a filter, in call
    /// order.
    pub fn log_filter_inserts(
        &self,
        chain_id: u64,
        filter: &LogFilterCriteria,
    ) -> Vec<InsertedInterval> {
        let key = criteria_key("log", chain_id, filter).expect("serializable criteria");
        self.lock().interval_inserts.get(&key).cloned().unwrap_or_default()
    }

    /// Recorded `insert_factory_log_filter_interval` calls for a factory.
    pub fn factory_log_filter_inserts(
        &self,
        chain_id: u64,
        factory: &FactoryCriteria,
    ) -> Vec<InsertedInterval> {
        let key = criteria_key("factory", chain_id, factory).expect("serializable criteria");
        self.lock().interval_inserts.get(&key).cloned().unwrap_or_default()
    }

    /// Recorded `insert_block_filter_interval` calls for a block filter.
    pub fn block_filter_insert_records(
        &self,
        chain_id: u64,
        filter: &BlockFilterCriteria,
    ) -> Vec<InsertedBlockInterval> {
        let key = criteria_key("block", chain_id, filter).expect("serializable criteria");
        self.lock()
            .block_filter_inserts
            .get(&key)
            .cloned()
            .unwrap_or_default()
    }

    pub fn child_address_log_count(&self, chain_id: u64) -> usize {
        self.lock()
            .child_address_logs
            .get(&chain_id)
            .map_or(0, BTreeMap::len)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreData> {
        self.data.lock().expect("store lock poisoned")
    }

    fn get_intervals(&self, key: String) -> Vec<Interval> {
        self.lock().intervals.get(&key).cloned().unwrap_or_default()
    }

    fn insert_interval_record(
        &self,
        key: String,
        block: &Block,
        transactions: &[Transaction],
        receipts: &[TransactionReceipt],
        logs: &[Log],
        interval: Interval,
        chain_id: u64,
    ) {
        let mut data = self.lock();
        let existing = data.intervals.entry(key.clone()).or_default();
        *existing = intervals::union(existing, &[interval]);
        data.blocks.insert((chain_id, block.number), block.clone());
        data.interval_inserts.entry(key).or_default().push(InsertedInterval {
            interval,
            block_number: block.number,
            log_count: logs.len(),
            transaction_count: transactions.len(),
            receipt_count: receipts.len(),
        });
    }
}

#[async_trait]
impl SyncStore for InMemorySyncStore {
    async fn get_log_filter_intervals(
        &self,
        chain_id: u64,
        filter: &LogFilterCriteria,
    ) -> Result<Vec<Interval>, StoreError> {
        Ok(self.get_intervals(criteria_key("log", chain_id, filter)?))
    }

    async fn get_factory_log_filter_intervals(
        &self,
        chain_id: u64,
        factory: &FactoryCriteria,
    ) -> Result<Vec<Interval>, StoreError> {
        Ok(self.get_intervals(criteria_key("factory", chain_id, factory)?))
    }

    async fn get_block_filter_intervals(
        &self,
        chain_id: u64,
        filter: &BlockFilterCriteria,
    ) -> Result<Vec<Interval>, StoreError> {
        Ok(self.get_intervals(criteria_key("block", chain_id, filter)?))
    }

    async fn get_trace_filter_intervals(
        &self,
        chain_id: u64,
        filter: &TraceFilterCriteria,
    ) -> Result<Vec<Interval>, StoreError> {
        Ok(self.get_intervals(criteria_key("trace", chain_id, filter)?))
    }

    async fn insert_log_filter_interval(
        &self,
        chain_id: u64,
        filter: &LogFilterCriteria,
        block: &Block,
        transactions: &[Transaction],
        transaction_receipts: &[TransactionReceipt],
        logs: &[Log],
        interval: Interval,
    ) -> Result<(), StoreError> {
        let key = criteria_key("log", chain_id, filter)?;
        self.insert_interval_record(
            key,
            block,
            transactions,
            transaction_receipts,
            logs,
            interval,
            chain_id,
        );
        Ok(())
    }

    async fn insert_factory_child_address_logs(
        &self,
        chain_id: u64,
        logs: &[Log],
    ) -> Result<(), StoreError> {
        let mut data = self.lock();
        let stored = data.child_address_logs.entry(chain_id).or_default();
        for log in logs {
            stored.insert((log.block_number, log.log_index), log.clone());
        }
        Ok(())
    }

    async fn insert_factory_log_filter_interval(
        &self,
        chain_id: u64,
        factory: &FactoryCriteria,
        block: &Block,
        transactions: &[Transaction],
        transaction_receipts: &[TransactionReceipt],
        logs: &[Log],
        interval: Interval,
    ) -> Result<(), StoreError> {
        let key = criteria_key("factory", chain_id, factory)?;
        self.insert_interval_record(
            key,
            block,
            transactions,
            transaction_receipts,
            logs,
            interval,
            chain_id,
        );
        Ok(())
    }

    async fn insert_block_filter_interval(
        &self,
        chain_id: u64,
        filter: &BlockFilterCriteria,
        block: Option<&Block>,
        interval: Interval,
    ) -> Result<(), StoreError> {
        let key = criteria_key("block", chain_id, filter)?;
        let mut data = self.lock();
        let existing = data.intervals.entry(key.clone()).or_default();
        *existing = intervals::union(existing, &[interval]);
        if let Some(block) = block {
            data.blocks.insert((chain_id, block.number), block.clone());
        }
        data.block_filter_inserts
            .entry(key)
            .or_default()
            .push(InsertedBlockInterval {
                interval,
                block_number: block.map(|b| b.number),
            });
        Ok(())
    }

    fn get_factory_child_addresses(
        &self,
        chain_id: u64,
        factory: &FactoryCriteria,
        from_block: u64,
        to_block: u64,
    ) -> AddressBatchStream<'_> {
        let data = self.lock();
        let addresses: Vec<Address> = data
            .child_address_logs
            .get(&chain_id)
            .into_iter()
            .flat_map(BTreeMap::values)
            .filter(|log| {
                log.address == factory.address
                    && log.topics.first() == Some(&factory.event_selector)
                    && log.block_number >= from_block
                    && log.block_number <= to_block
            })
            .filter_map(|log| factory.child_address_location.extract(log))
            .collect();

        let batches: Vec<Vec<Address>> = addresses
            .chunks(CHILD_ADDRESS_BATCH_SIZE)
            .map(<[Address]>::to_vec)
            .collect();
        stream::iter(batches.into_iter().map(Ok)).boxed()
    }

    async fn has_block(&self, chain_id: u64, block_number: u64) -> Result<bool, StoreError> {
        Ok(self.lock().blocks.contains_key(&(chain_id, block_number)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::ChildAddressLocation;
    use alloy_primitives::{Bytes, B256};

    fn block(number: u64) -> Block {
        Block {
            number,
            hash: B256::with_last_byte(number as u8),
            parent_hash: B256::with_last_byte(number.wrapping_sub(1) as u8),
            timestamp: 1_000 + number,
            transactions: vec![],
        }
    }

    fn log_filter() -> LogFilterCriteria {
        LogFilterCriteria {
            address: Some(vec![Address::repeat_byte(0xaa)]),
            topics: vec![],
            include_transaction_receipts: false,
        }
    }

    #[tokio::test]
    async fn interval_inserts_are_idempotent() {
        let store = InMemorySyncStore::new();
        let filter = log_filter();
        let interval = Interval::new(0, 10);

        for _ in 0..2 {
            store
                .insert_log_filter_interval(1, &filter, &block(10), &[], &[], &[], interval)
                .await
                .unwrap();
        }

        assert_eq!(
            store.get_log_filter_intervals(1, &filter).await.unwrap(),
            vec![interval]
        );
        assert!(store.has_block(1, 10).await.unwrap());
    }

    #[tokio::test]
    async fn distinct_criteria_do_not_share_intervals() {
        let store = InMemorySyncStore::new();
        let a = log_filter();
        let mut b = log_filter();
        b.address = Some(vec![Address::repeat_byte(0xbb)]);

        store
            .insert_log_filter_interval(1, &a, &block(5), &[], &[], &[], Interval::new(0, 5))
            .await
            .unwrap();

        assert!(store.get_log_filter_intervals(1, &b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn streams_child_addresses_in_creation_order() {
        let store = InMemorySyncStore::new();
        let factory = FactoryCriteria {
            address: Address::repeat_byte(0xfa),
            event_selector: B256::repeat_byte(0xee),
            child_address_location: ChildAddressLocation::Topic(1),
            topics: vec![],
            include_transaction_receipts: false,
        };

        let creation = |block_number: u64, child: Address| Log {
            address: factory.address,
            topics: vec![
                factory.event_selector,
                B256::left_padding_from(child.as_slice()),
            ],
            data: Bytes::new(),
            block_number,
            block_hash: B256::with_last_byte(block_number as u8),
            transaction_hash: B256::with_last_byte(0x77),
            transaction_index: 0,
            log_index: block_number,
        };

        let first = Address::repeat_byte(0x01);
        let second = Address::repeat_byte(0x02);
        store
            .insert_factory_child_address_logs(1, &[creation(20, second), creation(3, first)])
            .await
            .unwrap();

        let mut stream = store.get_factory_child_addresses(1, &factory, 0, 100);
        let batch = stream.next().await.unwrap().unwrap();
        assert_eq!(batch, vec![first, second]);
        assert!(stream.next().await.is_none());

        // Range excludes the later creation.
        let mut stream = store.get_factory_child_addresses(1, &factory, 0, 10);
        assert_eq!(stream.next().await.unwrap().unwrap(), vec![first]);
    }
}
