//! Historical Sync Builder Implementation
//!
//! This module provides a builder pattern for constructing a
//! [`HistoricalSync`] instance, allowing flexible configuration of the
//! network, event sources, sync store and RPC client.

use crate::errors::SyncError;
use crate::historical_sync::HistoricalSync;
use crate::network::Network;
use crate::rpc::RequestQueue;
use crate::sources::EventSource;
use crate::store::SyncStore;
use std::sync::Arc;

/// Builder for constructing a [`HistoricalSync`] instance.
pub struct HistoricalSyncBuilder<S, R> {
    network: Option<Network>,
    sources: Vec<EventSource>,
    store: Option<Arc<S>>,
    request_queue: Option<Arc<R>>,
}

impl<S, R> Default for HistoricalSyncBuilder<S, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S, R> HistoricalSyncBuilder<S, R> {
    pub fn new() -> Self {
        Self {
            network: None,
            sources: Vec::new(),
            store: None,
            request_queue: None,
        }
    }

    /// Sets the network to sync.
    pub fn network(mut self, network: Network) -> Self {
        self.network = Some(network);
        self
    }

    /// Adds an event source to be synced.
    pub fn add_source(mut self, source: EventSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Adds multiple event sources to be synced.
    pub fn add_sources(mut self, sources: impl IntoIterator<Item = EventSource>) -> Self {
        self.sources.extend(sources);
        self
    }

    /// Sets the sync store.
    pub fn store(mut self, store: Arc<S>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the RPC request queue.
    pub fn request_queue(mut self, request_queue: Arc<R>) -> Self {
        self.request_queue = Some(request_queue);
        self
    }
}

impl<S: SyncStore, R: RequestQueue> HistoricalSyncBuilder<S, R> {
    /// Consumes the builder and produces a constructed [`HistoricalSync`].
    pub fn build(self) -> Result<HistoricalSync<S, R>, SyncError> {
        let network = self.network.ok_or(SyncError::NetworkNotSet)?;
        let store = self.store.ok_or(SyncError::StoreNotSet)?;
        let request_queue = self.request_queue.ok_or(SyncError::RpcNotSet)?;

        // Every source must target the configured network.
        for source in &self.sources {
            if source.chain_id() != network.chain_id {
                return Err(SyncError::ChainMismatch {
                    id: source.id().to_owned(),
                    source_chain_id: source.chain_id(),
                    network_chain_id: network.chain_id,
                });
            }
        }

        Ok(HistoricalSync::new(
            network,
            self.sources,
            store,
            request_queue,
        ))
    }
}
