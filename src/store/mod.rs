//! Sync Store Interface
//!
//! Durable keyed storage for blocks, transactions, receipts, logs and
//! completed-interval metadata. The orchestrator consumes this interface
//! only; `memory` provides a reference implementation for tests and demos.
//!
//! Every insert must be idempotent under repeated `(chain_id, criteria,
//! interval)` keys — task retries replay inserts.

pub mod memory;

use crate::errors::StoreError;
use crate::intervals::Interval;
use crate::sources::{BlockFilterCriteria, FactoryCriteria, LogFilterCriteria, TraceFilterCriteria};
use crate::types::{Block, Log, Transaction, TransactionReceipt};
use alloy_primitives::Address;
use async_trait::async_trait;
use futures::stream::BoxStream;

pub use memory::InMemorySyncStore;

/// Batches of factory child addresses, streamed in creation order.
pub type AddressBatchStream<'a> = BoxStream<'a, Result<Vec<Address>, StoreError>>;

#[async_trait]
pub trait SyncStore: Send + Sync + 'static {
    /// Intervals already synced for a log filter.
    async fn get_log_filter_intervals(
        &self,
        chain_id: u64,
        filter: &LogFilterCriteria,
    ) -> Result<Vec<Interval>, StoreError>;

    /// Intervals already synced for a factory's child contract logs.
    async fn get_factory_log_filter_intervals(
        &self,
        chain_id: u64,
        factory: &FactoryCriteria,
    ) -> Result<Vec<Interval>, StoreError>;

    async fn get_block_filter_intervals(
        &self,
        chain_id: u64,
        filter: &BlockFilterCriteria,
    ) -> Result<Vec<Interval>, StoreError>;

    async fn get_trace_filter_intervals(
        &self,
        chain_id: u64,
        filter: &TraceFilterCriteria,
    ) -> Result<Vec<Interval>, StoreError>;

    /// Persists a block, its matched transactions/receipts/logs, and the
    /// completed interval for a log filter, atomically.
    #[allow(clippy::too_many_arguments)]
    async fn insert_log_filter_interval(
        &self,
        chain_id: u64,
        filter: &LogFilterCriteria,
        block: &Block,
        transactions: &[Transaction],
        transaction_receipts: &[TransactionReceipt],
        logs: &[Log],
        interval: Interval,
    ) -> Result<(), StoreError>;

    /// Persists factory child-creation logs for later address streaming.
    async fn insert_factory_child_address_logs(
        &self,
        chain_id: u64,
        logs: &[Log],
    ) -> Result<(), StoreError>;

    #[allow(clippy::too_many_arguments)]
    async fn insert_factory_log_filter_interval(
        &self,
        chain_id: u64,
        factory: &FactoryCriteria,
        block: &Block,
        transactions: &[Transaction],
        transaction_receipts: &[TransactionReceipt],
        logs: &[Log],
        interval: Interval,
    ) -> Result<(), StoreError>;

    /// Persists a completed block-filter interval, with the block itself when
    /// it was not already stored.
    async fn insert_block_filter_interval(
        &self,
        chain_id: u64,
        filter: &BlockFilterCriteria,
        block: Option<&Block>,
        interval: Interval,
    ) -> Result<(), StoreError>;

    /// Streams the addresses of child contracts a factory created in
    /// `[from_block, to_block]`, in creation order, batched.
    fn get_factory_child_addresses(
        &self,
        chain_id: u64,
        factory: &FactoryCriteria,
        from_block: u64,
        to_block: u64,
    ) -> AddressBatchStream<'_>;

    /// Whether the store already holds this block.
    async fn has_block(&self, chain_id: u64, block_number: u64) -> Result<bool, StoreError>;
}
