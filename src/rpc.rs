//! RPC Request Interface
//!
//! The orchestrator never opens a transport itself. It issues requests
//! through [`RequestQueue`], an interface over the network's rate-limited
//! JSON-RPC client, and the [`SyncRpc`] shim below lifts "null" responses
//! into errors so workers can treat missing finalized data as retryable.

use crate::errors::{RequestError, SyncError};
use crate::sources::Topics;
use crate::types::{Block, Log, TransactionReceipt};
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use std::sync::Arc;

/// An `eth_getLogs` request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    /// Addresses to match, or `None` for any address.
    pub address: Option<Vec<Address>>,
    pub topics: Topics,
    pub from_block: u64,
    pub to_block: u64,
}

/// The external JSON-RPC request queue. Implementations own rate limiting
/// and transport-level retries; an `Err` from any method means that policy
/// is exhausted.
#[async_trait]
pub trait RequestQueue: Send + Sync + 'static {
    /// `eth_getLogs`.
    async fn get_logs(&self, filter: LogFilter) -> Result<Vec<Log>, RequestError>;

    /// `eth_getBlockByNumber` with full transaction objects.
    async fn get_block_by_number(&self, block_number: u64)
        -> Result<Option<Block>, RequestError>;

    /// `eth_getTransactionReceipt`.
    async fn get_transaction_receipt(
        &self,
        transaction_hash: B256,
    ) -> Result<Option<TransactionReceipt>, RequestError>;
}

/// Shim over the request queue used by the sync workers.
#[derive(Debug)]
pub(crate) struct SyncRpc<R> {
    request_queue: Arc<R>,
}

impl<R> Clone for SyncRpc<R> {
    fn clone(&self) -> Self {
        Self {
            request_queue: Arc::clone(&self.request_queue),
        }
    }
}

impl<R: RequestQueue> SyncRpc<R> {
    pub(crate) fn new(request_queue: Arc<R>) -> Self {
        Self { request_queue }
    }

    pub(crate) async fn fetch_logs(&self, filter: LogFilter) -> Result<Vec<Log>, SyncError> {
        Ok(self.request_queue.get_logs(filter).await?)
    }

    /// Fetches a block that must exist. Historical sync only requests
    /// finalized blocks, so a null response means the upstream node is
    /// inconsistent and the fetch should be retried.
    pub(crate) async fn fetch_block(&self, block_number: u64) -> Result<Block, SyncError> {
        self.request_queue
            .get_block_by_number(block_number)
            .await?
            .ok_or(SyncError::BlockNotFound(block_number))
    }

    /// Fetches receipts for the given transaction hashes, erroring on any
    /// null response.
    pub(crate) async fn fetch_receipts(
        &self,
        transaction_hashes: impl IntoIterator<Item = B256>,
    ) -> Result<Vec<TransactionReceipt>, SyncError> {
        let mut receipts = Vec::new();
        for hash in transaction_hashes {
            let receipt = self
                .request_queue
                .get_transaction_receipt(hash)
                .await?
                .ok_or(SyncError::ReceiptNotFound(hash))?;
            receipts.push(receipt);
        }
        Ok(receipts)
    }
}
