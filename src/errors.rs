use alloy_primitives::B256;
use thiserror::Error;

/// Errors surfaced by the external JSON-RPC request queue.
///
/// The request queue applies its own transport-level retry policy, so every
/// variant here is treated as exhaustion of that policy; the orchestrator
/// responds by re-enqueueing the failed task.
#[derive(Error, Debug, Clone)]
pub enum RequestError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited")]
    RateLimited,
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("transport error: {0}")]
    Transport(String),
}

/// Errors surfaced by the sync store.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("rpc request failed: {0}")]
    Request(#[from] RequestError),
    #[error("sync store operation failed: {0}")]
    Store(#[from] StoreError),
    #[error("block {0} not found")]
    BlockNotFound(u64),
    #[error("receipt for transaction {0} not found")]
    ReceiptNotFound(B256),
    #[error("network not set")]
    NetworkNotSet,
    #[error("rpc client not set")]
    RpcNotSet,
    #[error("sync store not set")]
    StoreNotSet,
    #[error(
        "source {id} is configured for chain {source_chain_id} but the network is chain {network_chain_id}"
    )]
    ChainMismatch {
        id: String,
        source_chain_id: u64,
        network_chain_id: u64,
    },
}
