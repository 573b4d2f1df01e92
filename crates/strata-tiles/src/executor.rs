//! Executors that run content fetch and processing tasks off the frame loop.
//!
//! Tasks never touch tileset state. Each returns a [`ContentEvent`] that the
//! frame thread collects with [`TaskRunner::drain`] and applies in one place.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

use crate::pipeline::ContentEvent;

/// A unit of asynchronous content work.
pub type ContentTask = Box<dyn FnOnce() -> ContentEvent + Send + 'static>;

/// Runs content tasks and hands their results back to the frame thread.
pub trait TaskRunner: Send {
    /// Queue a task. Never blocks.
    fn spawn(&mut self, task: ContentTask);

    /// Move every completed result into `completed`.
    fn drain(&mut self, completed: &mut Vec<ContentEvent>);

    /// Tasks queued or running but not yet drained.
    fn in_flight(&self) -> usize;
}

/// Runs queued tasks on the calling thread during [`drain`](TaskRunner::drain).
///
/// Tasks spawned while applying one drain's results run on the next drain,
/// so each pipeline stage takes one frame.
#[derive(Default)]
pub struct InlineRunner {
    queue: VecDeque<ContentTask>,
}

impl InlineRunner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl TaskRunner for InlineRunner {
    fn spawn(&mut self, task: ContentTask) {
        self.queue.push_back(task);
    }

    fn drain(&mut self, completed: &mut Vec<ContentEvent>) {
        for task in self.queue.drain(..) {
            completed.push(task());
        }
    }

    fn in_flight(&self) -> usize {
        self.queue.len()
    }
}

/// Fixed pool of OS threads fed through crossbeam channels.
pub struct WorkerPool {
    task_sender: Option<crossbeam_channel::Sender<ContentTask>>,
    result_receiver: crossbeam_channel::Receiver<ContentEvent>,
    worker_handles: Vec<JoinHandle<()>>,
    in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
    /// Spawn `worker_count` threads (at least one).
    pub fn new(worker_count: usize) -> Self {
        let (task_tx, task_rx) = crossbeam_channel::unbounded::<ContentTask>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded();
        let in_flight = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::with_capacity(worker_count.max(1));
        for index in 0..worker_count.max(1) {
            let rx = task_rx.clone();
            let tx = result_tx.clone();
            let spawned = std::thread::Builder::new()
                .name(format!("tile-content-{index}"))
                .spawn(move || {
                    while let Ok(task) = rx.recv() {
                        if tx.send(task()).is_err() {
                            break;
                        }
                    }
                });
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(e) => tracing::error!(error = %e, "failed to spawn tile content worker"),
            }
        }
        tracing::debug!(workers = handles.len(), "tile content worker pool started");

        Self {
            task_sender: Some(task_tx),
            result_receiver: result_rx,
            worker_handles: handles,
            in_flight,
        }
    }

    /// Pool sized to the machine, leaving two cores for the frame and render threads.
    pub fn with_defaults() -> Self {
        let cpus = num_cpus::get().max(2);
        Self::new((cpus - 2).max(1))
    }

    /// Number of live worker threads.
    pub fn worker_count(&self) -> usize {
        self.worker_handles.len()
    }

    /// Close the task channel and join every worker.
    pub fn shutdown(&mut self) {
        self.task_sender.take();
        for handle in self.worker_handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl TaskRunner for WorkerPool {
    fn spawn(&mut self, task: ContentTask) {
        let Some(sender) = &self.task_sender else {
            tracing::warn!("content task submitted after worker pool shutdown");
            return;
        };
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        if sender.send(task).is_err() {
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
        }
    }

    fn drain(&mut self, completed: &mut Vec<ContentEvent>) {
        while let Ok(event) = self.result_receiver.try_recv() {
            self.in_flight.fetch_sub(1, Ordering::Relaxed);
            completed.push(event);
        }
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}
