//! Historical Sync Core Implementation
//!
//! This module contains the core functionality for syncing historical event
//! data for a single network. It owns the per-source progress trackers and
//! the task queue, schedules fetch tasks over each source's uncovered block
//! ranges, coalesces all per-block work behind a single block fetch, and
//! emits progress checkpoints as data becomes durable.

use crate::debounce::CheckpointDebouncer;
use crate::errors::SyncError;
use crate::events::{EventChannel, SyncEvent};
use crate::intervals::{self, Interval};
use crate::network::Network;
use crate::progress::{BlockProgressTracker, ProgressTracker};
use crate::queue::{TaskQueue, TaskWorker};
use crate::rpc::{LogFilter, RequestQueue, SyncRpc};
use crate::sources::{
    BlockFilterCriteria, BlockSource, EventSource, FactorySource, LogFilterCriteria, LogSource,
    TraceSource,
};
use crate::store::SyncStore;
use crate::types::{Block, Checkpoint, Log, Transaction};
use crate::util::create_progress_bar;
use alloy_primitives::B256;
use async_trait::async_trait;
use futures::StreamExt;
use indicatif::ProgressBar;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Task priorities count down from here so lower block numbers run first.
const TASK_PRIORITY_BASE: u64 = u64::MAX;

/// Trailing-edge window for checkpoint emission.
const CHECKPOINT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);

/// Cadence of the periodic progress log.
const PROGRESS_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// A unit of historical sync work.
#[derive(Debug)]
pub(crate) enum SyncTask {
    /// Fetch logs matching a log source's criteria over a block range.
    LogFilter { source: usize, range: Interval },
    /// Discover the child contract addresses a factory created in a range.
    FactoryChildAddresses { source: usize, range: Interval },
    /// Fetch logs emitted by a factory's known child contracts in a range.
    FactoryLogFilter { source: usize, range: Interval },
    /// Mark the blocks matching a block source's interval criteria.
    BlockFilter { source: usize, range: Interval },
    /// Mark a trace source's range complete.
    TraceFilter { source: usize, range: Interval },
    /// Fetch one block and drain the callbacks queued against it.
    Block {
        block_number: u64,
        callbacks: Vec<BlockCallback>,
    },
}

impl SyncTask {
    /// Earlier blocks run first, which is the precondition for advancing the
    /// checkpoint.
    pub(crate) fn priority(&self) -> u64 {
        let first_block = match self {
            Self::LogFilter { range, .. }
            | Self::FactoryChildAddresses { range, .. }
            | Self::FactoryLogFilter { range, .. }
            | Self::BlockFilter { range, .. }
            | Self::TraceFilter { range, .. } => range.start,
            Self::Block { block_number, .. } => *block_number,
        };
        TASK_PRIORITY_BASE - first_block
    }
}

impl fmt::Display for SyncTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogFilter { range, .. } => write!(f, "log filter {range}"),
            Self::FactoryChildAddresses { range, .. } => {
                write!(f, "factory child addresses {range}")
            }
            Self::FactoryLogFilter { range, .. } => write!(f, "factory log filter {range}"),
            Self::BlockFilter { range, .. } => write!(f, "block filter {range}"),
            Self::TraceFilter { range, .. } => write!(f, "trace filter {range}"),
            Self::Block { block_number, .. } => write!(f, "block {block_number}"),
        }
    }
}

/// Work deferred until a block is fetched, carrying everything the insert
/// needs besides the block itself.
#[derive(Debug)]
pub(crate) enum BlockCallback {
    /// Insert a completed log-filter interval. Also used by child-address
    /// discovery with the factory's synthetic criteria.
    LogFilter {
        criteria: LogFilterCriteria,
        interval: Interval,
        logs: Vec<Log>,
        transaction_hashes: HashSet<B256>,
    },
    /// Insert a completed factory log-filter interval.
    FactoryLogFilter {
        source: usize,
        interval: Interval,
        logs: Vec<Log>,
        transaction_hashes: HashSet<B256>,
    },
    /// Insert a completed block-filter interval with the fetched block.
    BlockFilter { source: usize, interval: Interval },
}

/// Progress state for one source.
enum SourceProgress {
    /// No historical work: the range was invalid or entirely beyond the
    /// finalized block.
    Skipped,
    Log(ProgressTracker),
    Factory {
        child_addresses: ProgressTracker,
        logs: ProgressTracker,
    },
    Block(ProgressTracker),
    Trace(ProgressTracker),
}

impl SourceProgress {
    fn trackers(&self) -> impl Iterator<Item = &ProgressTracker> {
        let (a, b) = match self {
            Self::Skipped => (None, None),
            Self::Log(t) | Self::Block(t) | Self::Trace(t) => (Some(t), None),
            Self::Factory {
                child_addresses,
                logs,
            } => (Some(child_addresses), Some(logs)),
        };
        a.into_iter().chain(b)
    }

    /// The tracker that measures delivered data (for factories, the log
    /// tracker rather than address discovery).
    fn data_tracker(&self) -> Option<&ProgressTracker> {
        match self {
            Self::Skipped => None,
            Self::Log(t) | Self::Block(t) | Self::Trace(t) => Some(t),
            Self::Factory { logs, .. } => Some(logs),
        }
    }
}

struct SourceState {
    progress: SourceProgress,
    bar: Option<ProgressBar>,
}

#[derive(Default)]
struct SyncState {
    sources: Vec<SourceState>,
    /// Deferred per-block work, drained in ascending block order once every
    /// source has completed up to that block.
    block_callbacks: BTreeMap<u64, Vec<BlockCallback>>,
    /// Highest block for which callbacks have been handed to `Block` tasks.
    block_tasks_enqueued_checkpoint: Option<u64>,
    block_progress: BlockProgressTracker,
}

impl SyncState {
    fn new() -> Self {
        Self::default()
    }
}

/// Handle to a configured historical sync run.
///
/// Construct with [`HistoricalSync::builder`], then drive the lifecycle:
/// `setup` restores cached progress and schedules the outstanding work,
/// `start` begins processing, and events arrive on [`subscribe`]d channels.
/// `kill` stops the run; in-flight requests finish and are discarded.
///
/// [`subscribe`]: HistoricalSync::subscribe
pub struct HistoricalSync<S: SyncStore, R: RequestQueue> {
    service: Arc<SyncService<S, R>>,
    queue: TaskQueue<SyncService<S, R>>,
}

impl<S: SyncStore, R: RequestQueue> HistoricalSync<S, R> {
    /// Construct a new builder to configure a sync run.
    pub fn builder() -> crate::builder::HistoricalSyncBuilder<S, R> {
        crate::builder::HistoricalSyncBuilder::new()
    }

    pub(crate) fn new(
        network: Network,
        sources: Vec<EventSource>,
        store: Arc<S>,
        request_queue: Arc<R>,
    ) -> Self {
        let events = EventChannel::new();
        let service = Arc::new(SyncService {
            checkpoint_debouncer: CheckpointDebouncer::new(
                CHECKPOINT_DEBOUNCE_WINDOW,
                events.clone(),
            ),
            network,
            sources,
            store,
            rpc: SyncRpc::new(request_queue),
            events,
            state: Mutex::new(SyncState::new()),
            is_killed: AtomicBool::new(false),
            started_at: Mutex::new(None),
            progress_ticker: Mutex::new(None),
        });
        let concurrency = service.network.max_task_concurrency;
        let queue = TaskQueue::new(Arc::clone(&service), concurrency, false);
        Self { service, queue }
    }

    /// Subscribes to sync events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.service.events.subscribe()
    }

    /// Restores cached progress for every source and schedules the remaining
    /// historical work. Must be called once, before [`start`].
    ///
    /// [`start`]: HistoricalSync::start
    pub async fn setup(
        &self,
        latest_block_number: u64,
        finalized_block_number: u64,
    ) -> Result<(), SyncError> {
        for handle in 0..self.service.sources.len() {
            let entry = self
                .service
                .setup_source(&self.queue, handle, latest_block_number, finalized_block_number)
                .await?;
            self.service.lock_state().sources.push(entry);
        }
        Ok(())
    }

    /// Starts processing. Completion and checkpoints are reported through
    /// the event channel; this never returns an error to the caller.
    pub fn start(&self) {
        crate::metrics::record_start_timestamp();
        *self
            .service
            .started_at
            .lock()
            .expect("start timestamp lock poisoned") = Some(Instant::now());
        info!(network = %self.service.network.name, "started historical sync");

        // Nothing scheduled means everything was cached.
        if self.queue.is_empty() && self.queue.in_flight() == 0 {
            self.service.complete();
            return;
        }

        self.service.spawn_progress_ticker();

        let service = Arc::clone(&self.service);
        let queue = self.queue.clone();
        tokio::spawn(async move {
            queue.on_idle().await;
            if !service.is_killed() {
                service.complete();
            }
        });

        self.queue.start();
    }

    /// Stops the run. In-flight requests complete and their results are
    /// discarded; no further events are emitted.
    pub fn kill(&self) {
        self.service.is_killed.store(true, Ordering::Release);
        self.service.stop_progress_ticker();
        self.queue.pause();
        self.queue.clear();
        info!(network = %self.service.network.name, "killed historical sync");
    }
}

pub(crate) struct SyncService<S, R> {
    network: Network,
    sources: Vec<EventSource>,
    store: Arc<S>,
    rpc: SyncRpc<R>,
    events: EventChannel,
    checkpoint_debouncer: CheckpointDebouncer,
    state: Mutex<SyncState>,
    is_killed: AtomicBool,
    started_at: Mutex<Option<Instant>>,
    progress_ticker: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl<S: SyncStore, R: RequestQueue> TaskWorker for SyncService<S, R> {
    type Task = SyncTask;
    type Error = SyncError;

    async fn process(&self, task: &SyncTask, queue: &TaskQueue<Self>) -> Result<(), SyncError> {
        if self.is_killed() {
            return Ok(());
        }
        match task {
            SyncTask::LogFilter { source, range } => {
                self.log_filter_worker(queue, *source, *range).await
            }
            SyncTask::FactoryChildAddresses { source, range } => {
                self.factory_child_addresses_worker(queue, *source, *range).await
            }
            SyncTask::FactoryLogFilter { source, range } => {
                self.factory_log_filter_worker(queue, *source, *range).await
            }
            SyncTask::BlockFilter { source, range } => {
                self.block_filter_worker(queue, *source, *range).await
            }
            SyncTask::TraceFilter { source, range } => {
                self.trace_filter_worker(queue, *source, *range).await
            }
            SyncTask::Block {
                block_number,
                callbacks,
            } => self.block_worker(*block_number, callbacks).await,
        }
    }

    async fn on_error(&self, error: SyncError, task: SyncTask, queue: &TaskQueue<Self>) {
        if self.is_killed() {
            return;
        }
        warn!(task = %task, %error, "historical sync task failed, retrying");
        let priority = task.priority();
        queue.add_task(task, priority);
    }
}

impl<S: SyncStore, R: RequestQueue> SyncService<S, R> {
    fn is_killed(&self) -> bool {
        self.is_killed.load(Ordering::Acquire)
    }

    fn lock_state(&self) -> MutexGuard<'_, SyncState> {
        self.state.lock().expect("sync state lock poisoned")
    }

    fn log_source(&self, handle: usize) -> &LogSource {
        match &self.sources[handle] {
            EventSource::Log(source) => source,
            _ => unreachable!("task scheduled against a non-log source"),
        }
    }

    fn factory_source(&self, handle: usize) -> &FactorySource {
        match &self.sources[handle] {
            EventSource::Factory(source) => source,
            _ => unreachable!("task scheduled against a non-factory source"),
        }
    }

    fn block_source(&self, handle: usize) -> &BlockSource {
        match &self.sources[handle] {
            EventSource::Block(source) => source,
            _ => unreachable!("task scheduled against a non-block source"),
        }
    }

    fn trace_source(&self, handle: usize) -> &TraceSource {
        match &self.sources[handle] {
            EventSource::Trace(source) => source,
            _ => unreachable!("task scheduled against a non-trace source"),
        }
    }

    fn max_block_range(&self, source: &EventSource) -> u64 {
        source
            .max_block_range()
            .unwrap_or(self.network.default_max_block_range)
    }

    // ---------------------------------------------------------------- setup

    /// Validates a source's block range against the chain head. `None` means
    /// the source has no historical work.
    fn effective_range(
        &self,
        source: &EventSource,
        latest_block_number: u64,
        finalized_block_number: u64,
    ) -> Option<Interval> {
        let start = source.start_block();
        if start > latest_block_number {
            warn!(
                source = source.name(),
                start_block = start,
                latest_block = latest_block_number,
                "start block is beyond the latest block, skipping historical sync"
            );
            return None;
        }
        if start > finalized_block_number {
            warn!(
                source = source.name(),
                start_block = start,
                finalized_block = finalized_block_number,
                "start block is not finalized yet, skipping historical sync"
            );
            return None;
        }
        let end = source
            .end_block()
            .unwrap_or(finalized_block_number)
            .min(finalized_block_number);
        if end < start {
            warn!(
                source = source.name(),
                start_block = start,
                end_block = end,
                "empty block range, skipping historical sync"
            );
            return None;
        }
        Some(Interval::new(start, end))
    }

    async fn setup_source(
        &self,
        queue: &TaskQueue<Self>,
        handle: usize,
        latest_block_number: u64,
        finalized_block_number: u64,
    ) -> Result<SourceState, SyncError> {
        let source = &self.sources[handle];
        let Some(target) = self.effective_range(source, latest_block_number, finalized_block_number)
        else {
            crate::metrics::record_total_blocks(&self.network.name, source.id(), 0);
            crate::metrics::record_cached_blocks(&self.network.name, source.id(), 0);
            return Ok(SourceState {
                progress: SourceProgress::Skipped,
                bar: None,
            });
        };

        let chain_id = source.chain_id();
        let (progress, required) = match source {
            EventSource::Log(log_source) => {
                let cached = self
                    .store
                    .get_log_filter_intervals(chain_id, &log_source.criteria)
                    .await?;
                let tracker = ProgressTracker::new(target, cached);
                let required = tracker.required();
                for chunk in intervals::chunk(&required, self.max_block_range(source)) {
                    self.enqueue(queue, SyncTask::LogFilter {
                        source: handle,
                        range: chunk,
                    });
                }
                (SourceProgress::Log(tracker), required)
            }
            EventSource::Factory(factory_source) => {
                let child_cached = self
                    .store
                    .get_log_filter_intervals(chain_id, &factory_source.child_address_criteria())
                    .await?;
                let log_cached = self
                    .store
                    .get_factory_log_filter_intervals(chain_id, &factory_source.criteria)
                    .await?;
                let child_addresses = ProgressTracker::new(target, child_cached);
                let logs = ProgressTracker::new(target, log_cached);

                let child_required = child_addresses.required();
                let log_required = logs.required();
                // Only ranges whose child addresses are already discovered
                // can fetch logs now; the rest stream in as discovery
                // completes.
                let log_ready = intervals::difference(&log_required, &child_required);

                let max_range = self.max_block_range(source);
                for chunk in intervals::chunk(&child_required, max_range) {
                    self.enqueue(queue, SyncTask::FactoryChildAddresses {
                        source: handle,
                        range: chunk,
                    });
                }
                for chunk in intervals::chunk(&log_ready, max_range) {
                    self.enqueue(queue, SyncTask::FactoryLogFilter {
                        source: handle,
                        range: chunk,
                    });
                }
                (
                    SourceProgress::Factory {
                        child_addresses,
                        logs,
                    },
                    log_required,
                )
            }
            EventSource::Block(block_source) => {
                let cached = self
                    .store
                    .get_block_filter_intervals(chain_id, &block_source.criteria)
                    .await?;
                let tracker = ProgressTracker::new(target, cached);
                let required = tracker.required();
                for chunk in intervals::chunk(&required, self.max_block_range(source)) {
                    self.enqueue(queue, SyncTask::BlockFilter {
                        source: handle,
                        range: chunk,
                    });
                }
                (SourceProgress::Block(tracker), required)
            }
            EventSource::Trace(trace_source) => {
                let cached = self
                    .store
                    .get_trace_filter_intervals(chain_id, &trace_source.criteria)
                    .await?;
                let tracker = ProgressTracker::new(target, cached);
                let required = tracker.required();
                for chunk in intervals::chunk(&required, self.max_block_range(source)) {
                    self.enqueue(queue, SyncTask::TraceFilter {
                        source: handle,
                        range: chunk,
                    });
                }
                (SourceProgress::Trace(tracker), required)
            }
        };

        let total_blocks = target.blocks();
        let cached_blocks = total_blocks - intervals::total_blocks(&required);
        crate::metrics::record_total_blocks(&self.network.name, source.id(), total_blocks);
        crate::metrics::record_cached_blocks(&self.network.name, source.id(), cached_blocks);
        info!(
            source = source.name(),
            total_blocks,
            cached_blocks,
            "set up historical sync"
        );

        let bar = create_progress_bar(total_blocks, cached_blocks, source.name());
        if required.is_empty() {
            bar.finish();
        }
        Ok(SourceState {
            progress,
            bar: Some(bar),
        })
    }

    fn enqueue(&self, queue: &TaskQueue<Self>, task: SyncTask) {
        let priority = task.priority();
        queue.add_task(task, priority);
    }

    // -------------------------------------------------------------- workers

    async fn log_filter_worker(
        &self,
        queue: &TaskQueue<Self>,
        handle: usize,
        range: Interval,
    ) -> Result<(), SyncError> {
        let source = self.log_source(handle);
        let logs = self
            .rpc
            .fetch_logs(LogFilter {
                address: source.criteria.address.clone(),
                topics: source.criteria.topics.clone(),
                from_block: range.start,
                to_block: range.end,
            })
            .await?;
        if self.is_killed() {
            return Ok(());
        }

        let log_intervals = build_log_intervals(range, logs);

        let mut state = self.lock_state();
        for log_interval in log_intervals {
            state
                .block_callbacks
                .entry(log_interval.interval.end)
                .or_default()
                .push(BlockCallback::LogFilter {
                    criteria: source.criteria.clone(),
                    interval: log_interval.interval,
                    logs: log_interval.logs,
                    transaction_hashes: log_interval.transaction_hashes,
                });
        }

        let SourceProgress::Log(tracker) = &mut state.sources[handle].progress else {
            unreachable!("log filter task against a non-log source state");
        };
        tracker.add_completed_interval(range);
        self.record_task_progress(&state, handle, range);
        self.enqueue_block_tasks(&mut state, queue);
        Ok(())
    }

    async fn factory_child_addresses_worker(
        &self,
        queue: &TaskQueue<Self>,
        handle: usize,
        range: Interval,
    ) -> Result<(), SyncError> {
        let source = self.factory_source(handle);
        let logs = self
            .rpc
            .fetch_logs(LogFilter {
                address: Some(vec![source.criteria.address]),
                topics: vec![Some(vec![source.criteria.event_selector])],
                from_block: range.start,
                to_block: range.end,
            })
            .await?;
        if self.is_killed() {
            return Ok(());
        }

        self.store
            .insert_factory_child_address_logs(source.chain_id, &logs)
            .await?;

        let log_intervals = build_log_intervals(range, logs);
        let child_criteria = source.child_address_criteria();

        let mut state = self.lock_state();
        // Cache discovery progress under the synthetic filter so the next
        // run restores it.
        for log_interval in log_intervals {
            state
                .block_callbacks
                .entry(log_interval.interval.end)
                .or_default()
                .push(BlockCallback::LogFilter {
                    criteria: child_criteria.clone(),
                    interval: log_interval.interval,
                    logs: log_interval.logs,
                    transaction_hashes: log_interval.transaction_hashes,
                });
        }

        let SourceProgress::Factory {
            child_addresses,
            logs: log_tracker,
        } = &mut state.sources[handle].progress
        else {
            unreachable!("factory task against a non-factory source state");
        };

        let update = child_addresses.add_completed_interval(range);
        if update.is_updated {
            // Newly discovered child addresses unlock log fetching over the
            // freshly contiguous range.
            let discovered_from = update
                .prev_checkpoint
                .map_or(child_addresses.target().start, |prev| prev + 1);
            let discovered_to = update
                .new_checkpoint
                .expect("an updated tracker has a checkpoint");
            let unlocked = intervals::intersection(
                &[Interval::new(discovered_from, discovered_to)],
                &log_tracker.required(),
            );
            for chunk in intervals::chunk(&unlocked, self.max_block_range(&self.sources[handle])) {
                self.enqueue(queue, SyncTask::FactoryLogFilter {
                    source: handle,
                    range: chunk,
                });
            }
        }

        self.enqueue_block_tasks(&mut state, queue);
        Ok(())
    }

    async fn factory_log_filter_worker(
        &self,
        queue: &TaskQueue<Self>,
        handle: usize,
        range: Interval,
    ) -> Result<(), SyncError> {
        let source = self.factory_source(handle);

        let mut logs = Vec::new();
        let mut batches = self.store.get_factory_child_addresses(
            source.chain_id,
            &source.criteria,
            source.start_block,
            range.end,
        );
        while let Some(batch) = batches.next().await {
            let addresses = batch?;
            if addresses.is_empty() {
                continue;
            }
            let batch_logs = self
                .rpc
                .fetch_logs(LogFilter {
                    address: Some(addresses),
                    topics: source.criteria.topics.clone(),
                    from_block: range.start,
                    to_block: range.end,
                })
                .await?;
            logs.extend(batch_logs);
        }
        drop(batches);
        if self.is_killed() {
            return Ok(());
        }

        let log_intervals = build_log_intervals(range, logs);

        let mut state = self.lock_state();
        for log_interval in log_intervals {
            state
                .block_callbacks
                .entry(log_interval.interval.end)
                .or_default()
                .push(BlockCallback::FactoryLogFilter {
                    source: handle,
                    interval: log_interval.interval,
                    logs: log_interval.logs,
                    transaction_hashes: log_interval.transaction_hashes,
                });
        }

        let SourceProgress::Factory {
            logs: log_tracker, ..
        } = &mut state.sources[handle].progress
        else {
            unreachable!("factory task against a non-factory source state");
        };
        log_tracker.add_completed_interval(range);
        self.record_task_progress(&state, handle, range);
        self.enqueue_block_tasks(&mut state, queue);
        Ok(())
    }

    async fn block_filter_worker(
        &self,
        queue: &TaskQueue<Self>,
        handle: usize,
        range: Interval,
    ) -> Result<(), SyncError> {
        let source = self.block_source(handle);
        let criteria = source.criteria;

        let mut matched = Vec::new();
        let mut block_number = first_matching_block(&criteria, range.start);
        while block_number <= range.end {
            matched.push(block_number);
            block_number += criteria.interval;
        }
        // The range end marks the whole range cached even when unmatched.
        if matched.last() != Some(&range.end) {
            matched.push(range.end);
        }

        // Blocks the store already holds complete their interval without a
        // block fetch.
        let mut deferred = Vec::new();
        let mut previous = range.start;
        for block_number in matched {
            if self.is_killed() {
                return Ok(());
            }
            let interval = Interval::new(previous, block_number);
            if self.store.has_block(source.chain_id, block_number).await? {
                self.store
                    .insert_block_filter_interval(source.chain_id, &criteria, None, interval)
                    .await?;
            } else {
                deferred.push((block_number, interval));
            }
            previous = block_number + 1;
        }

        let mut state = self.lock_state();
        for (block_number, interval) in deferred {
            state
                .block_callbacks
                .entry(block_number)
                .or_default()
                .push(BlockCallback::BlockFilter {
                    source: handle,
                    interval,
                });
        }

        let SourceProgress::Block(tracker) = &mut state.sources[handle].progress else {
            unreachable!("block filter task against a non-block source state");
        };
        tracker.add_completed_interval(range);
        self.record_task_progress(&state, handle, range);
        self.enqueue_block_tasks(&mut state, queue);
        Ok(())
    }

    async fn trace_filter_worker(
        &self,
        queue: &TaskQueue<Self>,
        handle: usize,
        range: Interval,
    ) -> Result<(), SyncError> {
        let source = self.trace_source(handle);
        // Trace data fetching is not wired up yet; completing the range keeps
        // the checkpoint moving for configurations that declare trace
        // sources.
        debug!(source = %source.contract_name, %range, "skipped trace fetch");

        let mut state = self.lock_state();
        let SourceProgress::Trace(tracker) = &mut state.sources[handle].progress else {
            unreachable!("trace filter task against a non-trace source state");
        };
        tracker.add_completed_interval(range);
        self.record_task_progress(&state, handle, range);
        self.enqueue_block_tasks(&mut state, queue);
        Ok(())
    }

    async fn block_worker(
        &self,
        block_number: u64,
        callbacks: &[BlockCallback],
    ) -> Result<(), SyncError> {
        let block = self.rpc.fetch_block(block_number).await?;
        if self.is_killed() {
            return Ok(());
        }

        for callback in callbacks {
            self.execute_block_callback(&block, callback).await?;
        }

        let frontier = self
            .lock_state()
            .block_progress
            .add_completed_block(block.number, block.timestamp);

        if let Some(frontier) = frontier {
            self.checkpoint_debouncer.call(Checkpoint {
                block_timestamp: frontier.block_timestamp,
                chain_id: self.network.chain_id,
                block_number: frontier.block_number,
            });
        }
        Ok(())
    }

    async fn execute_block_callback(
        &self,
        block: &Block,
        callback: &BlockCallback,
    ) -> Result<(), SyncError> {
        match callback {
            BlockCallback::LogFilter {
                criteria,
                interval,
                logs,
                transaction_hashes,
            } => {
                let transactions = matched_transactions(block, transaction_hashes);
                let receipts = if criteria.include_transaction_receipts {
                    self.rpc
                        .fetch_receipts(transaction_hashes.iter().copied())
                        .await?
                } else {
                    Vec::new()
                };
                self.store
                    .insert_log_filter_interval(
                        self.network.chain_id,
                        criteria,
                        block,
                        &transactions,
                        &receipts,
                        logs,
                        *interval,
                    )
                    .await?;
            }
            BlockCallback::FactoryLogFilter {
                source,
                interval,
                logs,
                transaction_hashes,
            } => {
                let factory = self.factory_source(*source);
                let transactions = matched_transactions(block, transaction_hashes);
                let receipts = if factory.criteria.include_transaction_receipts {
                    self.rpc
                        .fetch_receipts(transaction_hashes.iter().copied())
                        .await?
                } else {
                    Vec::new()
                };
                self.store
                    .insert_factory_log_filter_interval(
                        factory.chain_id,
                        &factory.criteria,
                        block,
                        &transactions,
                        &receipts,
                        logs,
                        *interval,
                    )
                    .await?;
            }
            BlockCallback::BlockFilter { source, interval } => {
                let block_source = self.block_source(*source);
                self.store
                    .insert_block_filter_interval(
                        block_source.chain_id,
                        &block_source.criteria,
                        Some(block),
                        *interval,
                    )
                    .await?;
            }
        }
        Ok(())
    }

    // ----------------------------------------------------------- scheduling

    /// Converts per-interval block callbacks into block fetch tasks, but only
    /// up to the lowest checkpoint among sources that still have work: a
    /// block must not be fetched while any source could still queue a
    /// callback against it.
    fn enqueue_block_tasks(&self, state: &mut SyncState, queue: &TaskQueue<Self>) {
        let mut min_incomplete: Option<Option<u64>> = None;
        let mut max_checkpoint: Option<u64> = None;
        for entry in &state.sources {
            for tracker in entry.progress.trackers() {
                let checkpoint = tracker.checkpoint();
                max_checkpoint = max_checkpoint.max(checkpoint);
                if !tracker.is_complete() {
                    min_incomplete = Some(match min_incomplete {
                        None => checkpoint,
                        Some(current) => current.min(checkpoint),
                    });
                }
            }
        }
        let can_enqueue_up_to = min_incomplete.unwrap_or(max_checkpoint);

        if can_enqueue_up_to <= state.block_tasks_enqueued_checkpoint {
            return;
        }
        let Some(up_to) = can_enqueue_up_to else { return };

        let pending = state.block_callbacks.split_off(&up_to.saturating_add(1));
        let ready = std::mem::replace(&mut state.block_callbacks, pending);
        if !ready.is_empty() {
            state.block_progress.add_pending_blocks(ready.keys().copied());
            for (block_number, callbacks) in ready {
                self.enqueue(queue, SyncTask::Block {
                    block_number,
                    callbacks,
                });
            }
        }
        state.block_tasks_enqueued_checkpoint = can_enqueue_up_to;
    }

    fn record_task_progress(&self, state: &SyncState, handle: usize, range: Interval) {
        let source = &self.sources[handle];
        crate::metrics::increment_completed_blocks(
            &self.network.name,
            source.id(),
            range.blocks(),
        );
        let entry = &state.sources[handle];
        if let Some(bar) = &entry.bar {
            bar.inc(range.blocks());
            if entry
                .progress
                .data_tracker()
                .is_some_and(ProgressTracker::is_complete)
            {
                bar.finish();
            }
        }
    }

    // ------------------------------------------------------------ lifecycle

    fn spawn_progress_ticker(self: &Arc<Self>) {
        let service = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROGRESS_LOG_INTERVAL);
            // The first tick fires immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                service.log_progress();
            }
        });
        *self
            .progress_ticker
            .lock()
            .expect("progress ticker lock poisoned") = Some(handle);
    }

    fn stop_progress_ticker(&self) {
        if let Some(handle) = self
            .progress_ticker
            .lock()
            .expect("progress ticker lock poisoned")
            .take()
        {
            handle.abort();
        }
    }

    fn log_progress(&self) {
        let state = self.lock_state();
        for (handle, entry) in state.sources.iter().enumerate() {
            let Some(tracker) = entry.progress.data_tracker() else {
                continue;
            };
            let total = tracker.target().blocks();
            let remaining = intervals::total_blocks(&tracker.required());
            info!(
                source = self.sources[handle].name(),
                synced_blocks = total - remaining,
                total_blocks = total,
                "historical sync progress"
            );
        }
    }

    fn complete(&self) {
        self.stop_progress_ticker();
        {
            let state = self.lock_state();
            for entry in &state.sources {
                if let Some(bar) = &entry.bar {
                    bar.finish();
                }
            }
        }
        let elapsed = self
            .started_at
            .lock()
            .expect("start timestamp lock poisoned")
            .map(|started| started.elapsed());
        info!(
            network = %self.network.name,
            elapsed = ?elapsed.unwrap_or_default(),
            "completed historical sync"
        );
        self.events.send(SyncEvent::SyncComplete);
    }
}

/// Logs grouped into contiguous intervals, one per block that had logs, so
/// each interval's insert rides on a single block fetch. The range end is
/// always present to cover a log-free tail.
#[derive(Debug)]
struct LogInterval {
    interval: Interval,
    logs: Vec<Log>,
    transaction_hashes: HashSet<B256>,
}

fn build_log_intervals(range: Interval, logs: Vec<Log>) -> Vec<LogInterval> {
    let mut logs_by_block: BTreeMap<u64, Vec<Log>> = BTreeMap::new();
    for log in logs {
        if range.contains(log.block_number) {
            logs_by_block.entry(log.block_number).or_default().push(log);
        }
    }
    logs_by_block.entry(range.end).or_default();

    let mut out = Vec::with_capacity(logs_by_block.len());
    let mut previous = range.start;
    for (block_number, logs) in logs_by_block {
        let transaction_hashes = logs.iter().map(|log| log.transaction_hash).collect();
        out.push(LogInterval {
            interval: Interval::new(previous, block_number),
            logs,
            transaction_hashes,
        });
        previous = block_number + 1;
    }
    out
}

/// First block `>= from` with `(block - offset) % interval == 0`.
fn first_matching_block(criteria: &BlockFilterCriteria, from: u64) -> u64 {
    let offset = criteria.offset % criteria.interval;
    let remainder = from % criteria.interval;
    if remainder <= offset {
        from + (offset - remainder)
    } else {
        from + criteria.interval - (remainder - offset)
    }
}

fn matched_transactions(block: &Block, transaction_hashes: &HashSet<B256>) -> Vec<Transaction> {
    block
        .transactions
        .iter()
        .filter(|tx| transaction_hashes.contains(&tx.hash))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::{Address, Bytes};

    fn log_at(block_number: u64, tx: u8) -> Log {
        Log {
            address: Address::repeat_byte(0xaa),
            topics: vec![],
            data: Bytes::new(),
            block_number,
            block_hash: B256::with_last_byte(block_number as u8),
            transaction_hash: B256::repeat_byte(tx),
            transaction_index: 0,
            log_index: 0,
        }
    }

    #[test]
    fn log_intervals_partition_the_range() {
        let range = Interval::new(0, 100);
        let intervals = build_log_intervals(range, vec![log_at(57, 2), log_at(10, 1)]);

        let bounds: Vec<_> = intervals.iter().map(|li| li.interval).collect();
        assert_eq!(
            bounds,
            vec![
                Interval::new(0, 10),
                Interval::new(11, 57),
                Interval::new(58, 100)
            ]
        );
        assert_eq!(intervals[0].logs.len(), 1);
        assert_eq!(intervals[1].logs.len(), 1);
        assert!(intervals[2].logs.is_empty());
        assert!(intervals[2].transaction_hashes.is_empty());
    }

    #[test]
    fn log_intervals_cover_log_free_ranges() {
        let range = Interval::new(41, 80);
        let intervals = build_log_intervals(range, vec![]);
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].interval, Interval::new(41, 80));
    }

    #[test]
    fn log_interval_tail_log_is_single_interval() {
        let range = Interval::new(0, 40);
        let intervals = build_log_intervals(range, vec![log_at(40, 1)]);
        assert_eq!(intervals.len(), 1);
        assert_eq!(intervals[0].interval, Interval::new(0, 40));
        assert_eq!(intervals[0].logs.len(), 1);
    }

    #[test]
    fn first_matching_block_rounds_up() {
        let criteria = BlockFilterCriteria {
            interval: 10,
            offset: 3,
        };
        assert_eq!(first_matching_block(&criteria, 0), 3);
        assert_eq!(first_matching_block(&criteria, 3), 3);
        assert_eq!(first_matching_block(&criteria, 4), 13);
        assert_eq!(first_matching_block(&criteria, 13), 13);
        assert_eq!(first_matching_block(&criteria, 24), 33);
    }

    #[test]
    fn task_priority_orders_earlier_blocks_first() {
        let early = SyncTask::LogFilter {
            source: 0,
            range: Interval::new(0, 40),
        };
        let late = SyncTask::Block {
            block_number: 90,
            callbacks: vec![],
        };
        assert!(early.priority() > late.priority());
    }
}
