//! Per-Source Sync Progress Tracking
//!
//! Two trackers back the orchestrator's scheduling decisions:
//! [`ProgressTracker`] records which sub-intervals of a source's target range
//! have been fully fetched, and [`BlockProgressTracker`] records which of the
//! coalesced block fetches have landed so the global checkpoint can advance.

use crate::intervals::{self, Interval};
use std::collections::{HashMap, VecDeque};

/// Result of merging a newly completed interval into a [`ProgressTracker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckpointUpdate {
    /// True iff the checkpoint advanced.
    pub is_updated: bool,
    pub prev_checkpoint: Option<u64>,
    pub new_checkpoint: Option<u64>,
}

/// Tracks completion of a single source over its target block range.
///
/// The checkpoint is the highest block `c` such that `[target.start, c]` is
/// fully completed, or `None` while the target's first block is still
/// outstanding. `Option<u64>` orders the way the scheduler needs it to:
/// `None < Some(_)`.
#[derive(Debug, Clone)]
pub struct ProgressTracker {
    target: Interval,
    completed: Vec<Interval>,
}

impl ProgressTracker {
    /// Constructs a tracker over `target`, seeded with previously completed
    /// intervals. The seed is canonicalized and clamped to the target, so
    /// stale store rows outside the range are ignored.
    pub fn new(target: Interval, completed: Vec<Interval>) -> Self {
        let completed = intervals::intersection(&intervals::canonicalize(completed), &[target]);
        Self { target, completed }
    }

    pub fn target(&self) -> Interval {
        self.target
    }

    /// The sub-intervals of the target that still need to be synced.
    pub fn required(&self) -> Vec<Interval> {
        intervals::difference(&[self.target], &self.completed)
    }

    pub fn checkpoint(&self) -> Option<u64> {
        self.completed
            .first()
            .filter(|first| first.start == self.target.start)
            .map(|first| first.end)
    }

    pub fn is_complete(&self) -> bool {
        self.checkpoint() == Some(self.target.end)
    }

    /// Merges `interval` (clamped to the target) into the completed set and
    /// reports whether the checkpoint advanced.
    pub fn add_completed_interval(&mut self, interval: Interval) -> CheckpointUpdate {
        let prev_checkpoint = self.checkpoint();
        let clamped = intervals::intersection(&[interval], &[self.target]);
        self.completed = intervals::union(&self.completed, &clamped);
        let new_checkpoint = self.checkpoint();

        CheckpointUpdate {
            is_updated: new_checkpoint > prev_checkpoint,
            prev_checkpoint,
            new_checkpoint,
        }
    }
}

/// A completed-block frontier: the highest block number for which this block
/// and every earlier pending block have been fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockFrontier {
    pub block_number: u64,
    pub block_timestamp: u64,
}

/// Tracks which of the blocks handed to block fetch tasks have completed.
///
/// Pending blocks are appended in strictly ascending order (the scheduler
/// drains its callback map in block order). Completions may arrive in any
/// order; the frontier advances across the longest completed prefix.
#[derive(Debug, Default)]
pub struct BlockProgressTracker {
    pending: VecDeque<u64>,
    completed: HashMap<u64, u64>,
    checkpoint: Option<BlockFrontier>,
}

impl BlockProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn checkpoint(&self) -> Option<BlockFrontier> {
        self.checkpoint
    }

    /// Appends block numbers awaiting fetch. Each must be strictly greater
    /// than every block already pending or completed.
    pub fn add_pending_blocks(&mut self, blocks: impl IntoIterator<Item = u64>) {
        for block in blocks {
            let floor = self
                .pending
                .back()
                .copied()
                .or(self.checkpoint.map(|c| c.block_number));
            assert!(
                floor.map_or(true, |f| block > f),
                "pending block {block} must be greater than {floor:?}"
            );
            self.pending.push_back(block);
        }
    }

    /// Records a completed block fetch. Returns the new frontier iff it
    /// advanced; the returned block number is monotonically non-decreasing
    /// across calls.
    pub fn add_completed_block(
        &mut self,
        block_number: u64,
        block_timestamp: u64,
    ) -> Option<BlockFrontier> {
        self.completed.insert(block_number, block_timestamp);

        let mut advanced = None;
        while let Some(&front) = self.pending.front() {
            match self.completed.remove(&front) {
                Some(timestamp) => {
                    self.pending.pop_front();
                    advanced = Some(BlockFrontier {
                        block_number: front,
                        block_timestamp: timestamp,
                    });
                }
                None => break,
            }
        }

        if advanced.is_some() {
            self.checkpoint = advanced;
        }
        advanced
    }
}
