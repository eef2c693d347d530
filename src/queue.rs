//! Bounded-Concurrency Priority Task Queue
//!
//! Tasks run highest-priority-first (FIFO among equal priorities) with at
//! most `concurrency` in flight. Workers receive a handle back to the queue
//! so they can enqueue follow-up work, and failures route through the
//! worker's error callback, which decides whether to re-enqueue; the queue
//! itself never retries.

use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// Processes tasks popped off a [`TaskQueue`].
#[async_trait]
pub trait TaskWorker: Send + Sync + Sized + 'static {
    type Task: Send + 'static;
    type Error: Send + 'static;

    async fn process(&self, task: &Self::Task, queue: &TaskQueue<Self>)
        -> Result<(), Self::Error>;

    /// Called with ownership of the failed task. Re-enqueueing (or not) is
    /// this callback's responsibility.
    async fn on_error(&self, error: Self::Error, task: Self::Task, queue: &TaskQueue<Self>);
}

struct Entry<T> {
    priority: u64,
    seq: u64,
    task: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: highest priority first, then lowest sequence number
        // (insertion order) among ties.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState<T> {
    heap: BinaryHeap<Entry<T>>,
    in_flight: usize,
    paused: bool,
    next_seq: u64,
    idle_waiters: Vec<oneshot::Sender<()>>,
}

struct QueueInner<W: TaskWorker> {
    worker: Arc<W>,
    concurrency: usize,
    state: Mutex<QueueState<W::Task>>,
}

pub struct TaskQueue<W: TaskWorker> {
    inner: Arc<QueueInner<W>>,
}

impl<W: TaskWorker> Clone for TaskQueue<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<W: TaskWorker> TaskQueue<W> {
    pub fn new(worker: Arc<W>, concurrency: usize, auto_start: bool) -> Self {
        assert!(concurrency > 0, "concurrency must be non-zero");
        Self {
            inner: Arc::new(QueueInner {
                worker,
                concurrency,
                state: Mutex::new(QueueState {
                    heap: BinaryHeap::new(),
                    in_flight: 0,
                    paused: !auto_start,
                    next_seq: 0,
                    idle_waiters: Vec::new(),
                }),
            }),
        }
    }

    /// Inserts a task. Higher priority runs first; equal priorities run in
    /// insertion order.
    pub fn add_task(&self, task: W::Task, priority: u64) {
        {
            let mut state = self.lock_state();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.heap.push(Entry {
                priority,
                seq,
                task,
            });
        }
        self.dispatch();
    }

    pub fn start(&self) {
        self.lock_state().paused = false;
        self.dispatch();
    }

    /// Stops dispatching. In-flight tasks run to completion.
    pub fn pause(&self) {
        self.lock_state().paused = true;
    }

    /// Drops every queued (not in-flight) task.
    pub fn clear(&self) {
        let waiters = {
            let mut state = self.lock_state();
            state.heap.clear();
            if state.in_flight == 0 {
                std::mem::take(&mut state.idle_waiters)
            } else {
                Vec::new()
            }
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }

    /// Number of queued tasks, excluding in-flight ones.
    pub fn len(&self) -> usize {
        self.lock_state().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of tasks currently being processed.
    pub fn in_flight(&self) -> usize {
        self.lock_state().in_flight
    }

    /// Resolves once the queue holds no queued and no in-flight tasks.
    pub async fn on_idle(&self) {
        tokio::task::yield_now().await;
        let receiver = {
            let mut state = self.lock_state();
            if state.heap.is_empty() && state.in_flight == 0 {
                return;
            }
            let (tx, rx) = oneshot::channel();
            state.idle_waiters.push(tx);
            rx
        };
        let _ = receiver.await;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, QueueState<W::Task>> {
        self.inner.state.lock().expect("task queue lock poisoned")
    }

    fn dispatch(&self) {
        loop {
            let entry = {
                let mut state = self.lock_state();
                if state.paused || state.in_flight >= self.inner.concurrency {
                    return;
                }
                match state.heap.pop() {
                    Some(entry) => {
                        state.in_flight += 1;
                        entry
                    }
                    None => return,
                }
            };

            let queue = self.clone();
            tokio::spawn(async move { queue.run(entry.task).await });
        }
    }

    async fn run(self, task: W::Task) {
        let worker = Arc::clone(&self.inner.worker);
        if let Err(error) = worker.process(&task, &self).await {
            worker.on_error(error, task, &self).await;
        }

        let waiters = {
            let mut state = self.lock_state();
            state.in_flight -= 1;
            if state.heap.is_empty() && state.in_flight == 0 {
                std::mem::take(&mut state.idle_waiters)
            } else {
                Vec::new()
            }
        };
        for waiter in waiters {
            let _ = waiter.send(());
        }

        self.dispatch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Default)]
    struct RecordingWorker {
        processed: Mutex<Vec<u64>>,
        fail_once: Mutex<HashSet<u64>>,
    }

    #[async_trait]
    impl TaskWorker for RecordingWorker {
        type Task = u64;
        type Error = String;

        async fn process(&self, task: &u64, _queue: &TaskQueue<Self>) -> Result<(), String> {
            if self.fail_once.lock().unwrap().remove(task) {
                return Err(format!("injected failure for {task}"));
            }
            self.processed.lock().unwrap().push(*task);
            Ok(())
        }

        async fn on_error(&self, _error: String, task: u64, queue: &TaskQueue<Self>) {
            queue.add_task(task, u64::MAX - task);
        }
    }

    #[tokio::test]
    async fn runs_highest_priority_first() {
        let worker = Arc::new(RecordingWorker::default());
        let queue = TaskQueue::new(Arc::clone(&worker), 1, false);

        for block in [80u64, 0, 40] {
            queue.add_task(block, u64::MAX - block);
        }
        queue.start();
        queue.on_idle().await;

        assert_eq!(*worker.processed.lock().unwrap(), vec![0, 40, 80]);
    }

    #[tokio::test]
    async fn equal_priorities_run_fifo() {
        let worker = Arc::new(RecordingWorker::default());
        let queue = TaskQueue::new(Arc::clone(&worker), 1, false);

        for task in [1u64, 2, 3] {
            queue.add_task(task, 7);
        }
        queue.start();
        queue.on_idle().await;

        assert_eq!(*worker.processed.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn error_callback_reenqueues_and_retries() {
        let worker = Arc::new(RecordingWorker::default());
        worker.fail_once.lock().unwrap().insert(40);
        let queue = TaskQueue::new(Arc::clone(&worker), 2, false);

        for block in [0u64, 40, 80] {
            queue.add_task(block, u64::MAX - block);
        }
        queue.start();
        queue.on_idle().await;

        let processed = worker.processed.lock().unwrap().clone();
        assert_eq!(processed.len(), 3);
        assert!(processed.contains(&40));
    }

    #[tokio::test]
    async fn pause_holds_queued_tasks() {
        let worker = Arc::new(RecordingWorker::default());
        let queue = TaskQueue::new(Arc::clone(&worker), 4, false);

        queue.add_task(1, 1);
        tokio::task::yield_now().await;
        assert_eq!(queue.len(), 1);
        assert!(worker.processed.lock().unwrap().is_empty());

        queue.start();
        queue.on_idle().await;
        assert_eq!(*worker.processed.lock().unwrap(), vec![1]);
    }

    #[tokio::test]
    async fn clear_drops_queued_tasks_and_resolves_idle() {
        let worker = Arc::new(RecordingWorker::default());
        let queue = TaskQueue::new(Arc::clone(&worker), 1, false);

        queue.add_task(1, 1);
        queue.add_task(2, 2);
        queue.clear();
        assert_eq!(queue.len(), 0);

        queue.start();
        queue.on_idle().await;
        assert!(worker.processed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn on_idle_with_empty_queue_resolves_immediately() {
        let worker = Arc::new(RecordingWorker::default());
        let queue = TaskQueue::new(worker, 1, true);
        queue.on_idle().await;
    }
}
