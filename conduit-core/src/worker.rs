//! One cooperative event loop per worker thread, plus the start/reload/stop
//! handshake used to coordinate it (§4.9).
//!
//! Grounded on `src/worker-thread.hpp`: a mutex+condvar pair is the *only*
//! locked surface in this module, used solely for the start/reload/stop
//! handshake (§5, "WorkerThread coordination... is the only locked
//! surface"). Everything that happens once the thread is up — layout swaps,
//! pipeline lifecycle, timer sweeps — runs lock-free, pinned to that one
//! thread, exactly like the reference `Net`/`Timer` pair.
//!
//! `PipelineLayout` itself is `Rc`-based and therefore `!Send` by design
//! (§5: pipelines never cross threads). A layout set is never handed across
//! the thread boundary; instead each worker is given a `builder` closure
//! that *constructs* its own layouts after it has already moved onto its
//! own thread, both at startup and on every `reload()`.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use flume::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};

use crate::config::{
    WORKER_CLEANING_TIMER_MS, WORKER_PENDING_TIMER_MS, WORKER_POLL_INTERVAL_MS,
    WORKER_START_TIMEOUT_MS, WORKER_STOP_TIMEOUT_MS,
};
use crate::pipeline::PipelineLayout;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// A worker thread's own view of its bound layouts: the registry this
/// thread reads and mutates, never shared with any other thread.
///
/// Reload swaps the registry wholesale; a pipeline already allocated from a
/// previous generation keeps its own `Rc<PipelineLayout>` alive and drains
/// normally — the swap only changes what *future* allocations see (§4.3,
/// §8 scenario 6).
pub struct Net {
    layouts: RefCell<Vec<Rc<PipelineLayout>>>,
    generation: Cell<u64>,
}

impl Net {
    fn new() -> Self {
        Self {
            layouts: RefCell::new(Vec::new()),
            generation: Cell::new(0),
        }
    }

    /// The layouts currently bound on this thread.
    #[must_use]
    pub fn layouts(&self) -> Vec<Rc<PipelineLayout>> {
        self.layouts.borrow().clone()
    }

    /// Monotonically increasing generation counter, bumped on every
    /// `reload` (§5, "swap-on-reload uses a generation counter").
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.get()
    }

    fn swap(&self, layouts: Vec<Rc<PipelineLayout>>) {
        *self.layouts.borrow_mut() = layouts;
        self.generation.set(self.generation.get() + 1);
    }

    /// Sum of live (allocated, not yet freed) pipelines across every layout
    /// this thread currently tracks.
    #[must_use]
    pub fn pending_pipelines(&self) -> usize {
        self.layouts.borrow().iter().map(|l| l.active()).sum()
    }

    fn shutdown_all(&self) {
        for layout in self.layouts.borrow().iter() {
            layout.shutdown();
        }
    }
}

/// A function the worker thread calls, on itself, to produce the bound
/// layouts it should run. Called once at `start()` and again on every
/// `reload()`. Must not capture any `!Send` state from the spawning thread
/// (the `Rc<PipelineLayout>`s it returns are constructed *inside* the call,
/// after the closure has already moved onto the worker thread).
pub type LayoutBuilder = Box<dyn Fn() -> Vec<Rc<PipelineLayout>> + Send>;

enum Task {
    Reload,
    Shutdown { force: bool },
}

#[derive(Default)]
struct HandshakeState {
    started: bool,
    failed: bool,
    shutdown_complete: bool,
    pending_pipelines: usize,
}

struct Handshake {
    state: Mutex<HandshakeState>,
    cv: Condvar,
}

/// One cooperative worker: a dedicated OS thread hosting exactly one
/// [`Net`], reachable from the controlling thread only through `reload()`
/// and `stop()`.
pub struct WorkerThread {
    index: usize,
    handshake: Arc<Handshake>,
    tasks: Sender<Task>,
    join: Mutex<Option<JoinHandle<()>>>,
}

/// Handle returned by [`WorkerThread::start`]. Cloning it shares the same
/// underlying thread and coordination state.
pub type WorkerHandle = Arc<WorkerThread>;

impl WorkerThread {
    /// Spawn the worker thread and block until it signals ready (its `Net`
    /// constructed and its first layout set built) or failure.
    ///
    /// Returns `None` if the thread could not be spawned, or if it did not
    /// signal readiness within [`crate::config::WORKER_START_TIMEOUT_MS`].
    #[must_use]
    pub fn start(index: usize, builder: LayoutBuilder) -> Option<WorkerHandle> {
        let handshake = Arc::new(Handshake {
            state: Mutex::new(HandshakeState::default()),
            cv: Condvar::new(),
        });
        let (tasks_tx, tasks_rx) = flume::unbounded();

        let thread_handshake = handshake.clone();
        let spawned = std::thread::Builder::new()
            .name(format!("conduit-worker-{index}"))
            .spawn(move || worker_main(index, tasks_rx, thread_handshake, builder));

        let join = match spawned {
            Ok(handle) => handle,
            Err(error) => {
                tracing::error!(index, %error, "failed to spawn worker thread");
                return None;
            }
        };

        let ready = {
            let mut state = handshake.state.lock();
            let deadline = Instant::now() + Duration::from_millis(WORKER_START_TIMEOUT_MS);
            while !state.started && !state.failed {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break;
                }
                let timed_out = handshake.cv.wait_for(&mut state, remaining).timed_out();
                if timed_out {
                    break;
                }
            }
            state.started && !state.failed
        };

        if !ready {
            tracing::error!(index, "worker thread failed to become ready in time");
            return None;
        }

        Some(Arc::new(Self {
            index,
            handshake,
            tasks: tasks_tx,
            join: Mutex::new(Some(join)),
        }))
    }

    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Post a reconfiguration task. The thread swaps its layouts in at the
    /// next quiescent point in its loop (between task-channel polls, never
    /// mid-`process`); pipelines already running on the old layouts drain
    /// there undisturbed (§4.3, §8 scenario 6).
    pub fn reload(&self) {
        if self.tasks.send(Task::Reload).is_err() {
            tracing::warn!(index = self.index, "reload posted to a dead worker thread");
        }
    }

    /// Post a shutdown task and, unless `force`, wait until every pipeline
    /// has drained or [`crate::config::WORKER_STOP_TIMEOUT_MS`] elapses.
    ///
    /// Returns the number of pipelines still pending at the point this call
    /// returns (zero on a clean graceful stop).
    pub fn stop(&self, force: bool) -> usize {
        if self.tasks.send(Task::Shutdown { force }).is_err() {
            return 0;
        }

        if force {
            return self.handshake.state.lock().pending_pipelines;
        }

        let mut state = self.handshake.state.lock();
        let deadline = Instant::now() + Duration::from_millis(WORKER_STOP_TIMEOUT_MS);
        while !state.shutdown_complete {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if self.handshake.cv.wait_for(&mut state, remaining).timed_out() {
                break;
            }
        }
        state.pending_pipelines
    }
}

impl Drop for WorkerThread {
    fn drop(&mut self) {
        if let Some(join) = self.join.lock().take() {
            let _ = self.tasks.send(Task::Shutdown { force: true });
            let _ = join.join();
        }
    }
}

fn worker_main(index: usize, tasks: Receiver<Task>, handshake: Arc<Handshake>, builder: LayoutBuilder) {
    let span = tracing::info_span!("worker", index);
    let _enter = span.enter();

    let net = Net::new();
    net.swap(builder());

    {
        let mut state = handshake.state.lock();
        state.started = true;
        handshake.cv.notify_all();
    }
    tracing::info!("worker started");

    let poll_interval = Duration::from_millis(WORKER_POLL_INTERVAL_MS);
    let cleaning_period = Duration::from_millis(WORKER_CLEANING_TIMER_MS);
    let pending_period = Duration::from_millis(WORKER_PENDING_TIMER_MS);
    let mut last_clean = Instant::now();
    let mut last_pending_sweep = Instant::now();
    let mut force_shutdown = false;
    let mut shutting_down = false;

    loop {
        match tasks.recv_timeout(poll_interval) {
            Ok(Task::Reload) => {
                tracing::info!("reload: swapping in new layout generation");
                net.swap(builder());
            }
            Ok(Task::Shutdown { force }) => {
                tracing::warn!(force, "shutdown requested");
                net.shutdown_all();
                shutting_down = true;
                force_shutdown = force;
                if force {
                    break;
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if shutting_down && net.pending_pipelines() == 0 {
            break;
        }

        if last_clean.elapsed() >= cleaning_period {
            // Pool caps (`PIPELINE_POOL_CAP`) already bound steady-state
            // memory; this sweep exists as the hook a richer pool (e.g.
            // one with idle-eviction) would use.
            last_clean = Instant::now();
        }

        if last_pending_sweep.elapsed() >= pending_period {
            let mut state = handshake.state.lock();
            state.pending_pipelines = net.pending_pipelines();
            handshake.cv.notify_all();
            drop(state);
            last_pending_sweep = Instant::now();
        }
    }

    let _ = force_shutdown;
    let mut state = handshake.state.lock();
    state.pending_pipelines = net.pending_pipelines();
    state.shutdown_complete = true;
    handshake.cv.notify_all();
    tracing::info!("worker stopped");
}
