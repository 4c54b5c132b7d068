use std::collections::VecDeque;
use std::sync::mpsc::{channel, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::sequencer::{Completion, OpSequencer};
use crate::store::StoreInner;

/// Per-worker heartbeat handle. The interpreter ticks it between
/// operations so long batches do not read as stalled workers.
pub(crate) struct TpHandle {
    last_tick: Mutex<Instant>,
}

impl TpHandle {
    pub fn new() -> Self {
        Self {
            last_tick: Mutex::new(Instant::now()),
        }
    }

    pub fn reset_timeout(&self) {
        *self.last_tick.lock().expect("heartbeat lock poisoned") = Instant::now();
    }

    /// Time since the worker last reported progress.
    pub fn since_reset(&self) -> Duration {
        self.last_tick.lock().expect("heartbeat lock poisoned").elapsed()
    }
}

struct PoolState {
    jobs: VecDeque<Arc<OpSequencer>>,
    shutdown: bool,
}

struct PoolQueue {
    state: Mutex<PoolState>,
    cond: Condvar,
}

/// Fixed-size pool of worker threads. The work item is a sequencer; each
/// enqueued op queues its sequencer once, and the picking worker applies
/// exactly one op under that sequencer's apply lock.
pub(crate) struct WorkerPool {
    queue: Arc<PoolQueue>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(inner: Arc<StoreInner>, threads: usize) -> Self {
        assert!(threads > 0, "worker pool needs at least one thread");
        let queue = Arc::new(PoolQueue {
            state: Mutex::new(PoolState {
                jobs: VecDeque::new(),
                shutdown: false,
            }),
            cond: Condvar::new(),
        });
        let workers = (0..threads)
            .map(|index| {
                let queue = Arc::clone(&queue);
                let inner = Arc::clone(&inner);
                thread::Builder::new()
                    .name(format!("weft-op-{index}"))
                    .spawn(move || worker_loop(inner, queue))
                    .expect("spawn worker thread")
            })
            .collect();
        Self { queue, workers }
    }

    pub fn queue(&self, osr: Arc<OpSequencer>) {
        let mut state = self.queue.state.lock().expect("pool lock poisoned");
        if state.shutdown {
            warn!("op queued after pool shutdown; dropping");
            return;
        }
        state.jobs.push_back(osr);
        drop(state);
        self.queue.cond.notify_one();
    }
}

fn worker_loop(inner: Arc<StoreInner>, queue: Arc<PoolQueue>) {
    let handle = TpHandle::new();
    loop {
        let job = {
            let mut state = queue.state.lock().expect("pool lock poisoned");
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    break job;
                }
                if state.shutdown {
                    return;
                }
                state = queue.cond.wait(state).expect("pool lock poisoned");
            }
        };
        handle.reset_timeout();
        inner.do_op(&job, &handle);
        debug!(
            sequencer = job.name(),
            busy_ms = handle.since_reset().as_millis() as u64,
            "op applied"
        );
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        {
            let mut state = self.queue.state.lock().expect("pool lock poisoned");
            state.shutdown = true;
        }
        self.queue.cond.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Single-threaded completion runner. Queued callbacks fire in queue
/// order on a dedicated thread.
pub(crate) struct Finisher {
    tx: Mutex<Option<Sender<Completion>>>,
    worker: Option<JoinHandle<()>>,
}

impl Finisher {
    pub fn new(name: &str) -> Self {
        let (tx, rx) = channel::<Completion>();
        let worker = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                for completion in rx {
                    completion();
                }
            })
            .expect("spawn finisher thread");
        Self {
            tx: Mutex::new(Some(tx)),
            worker: Some(worker),
        }
    }

    pub fn queue(&self, completion: Completion) {
        let tx = self.tx.lock().expect("finisher lock poisoned");
        if let Some(tx) = tx.as_ref() {
            let _ = tx.send(completion);
        } else {
            warn!("completion queued after finisher shutdown; dropping");
        }
    }
}

impl Drop for Finisher {
    fn drop(&mut self) {
        self.tx.lock().expect("finisher lock poisoned").take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
