//! historical-sync: a historical blockchain event indexer core
//!
//! This library populates a sync store with every event matching a set of
//! user-declared sources (log filters, factory child contract filters,
//! block-interval filters and trace filters) over each source's block range.
//! Previously synced intervals are cached and skipped, every block fetch is
//! shared across all the sources that need it, and a monotonically advancing
//! checkpoint is emitted so consumers can process data as soon as it is
//! durable.

// Public re-exports
pub use builder::HistoricalSyncBuilder;
pub use errors::{RequestError, StoreError, SyncError};
pub use events::SyncEvent;
pub use historical_sync::HistoricalSync;
pub use intervals::Interval;
pub use network::Network;
pub use progress::{BlockFrontier, BlockProgressTracker, CheckpointUpdate, ProgressTracker};
pub use queue::{TaskQueue, TaskWorker};
pub use rpc::{LogFilter, RequestQueue};
pub use sources::{
    BlockFilterCriteria, BlockSource, ChildAddressLocation, EventSource, FactoryCriteria,
    FactorySource, LogFilterCriteria, LogSource, Topics, TraceFilterCriteria, TraceSource,
};
pub use store::memory::{InsertedBlockInterval, InsertedInterval};
pub use store::{AddressBatchStream, InMemorySyncStore, SyncStore};
pub use types::{Block, Checkpoint, Log, Transaction, TransactionReceipt};

// Interval algebra is part of the public surface; the store interface trades
// in its interval sets.
pub mod intervals;

// Internal modules
mod builder;
mod debounce;
mod errors;
mod events;
mod historical_sync;
mod metrics;
mod network;
mod progress;
mod queue;
mod rpc;
mod sources;
mod store;
mod types;
mod util;
