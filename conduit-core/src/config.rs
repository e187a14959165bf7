//! Tunables owned by the core itself.
//!
//! These are compile-time constants, not the external configuration loader
//! (that layer is a collaborator outside this crate's scope). Tuning any of
//! these requires a rebuild.

/// Size of one `Data` chunk, in bytes.
///
/// Every chunk allocated by a [`crate::buffer::Producer`] is exactly this
/// size; a `Data` view can span any number of chunks.
pub const CHUNK_SIZE: usize = 4096;

/// Re-entrancy depth at which [`crate::io::InputContext`] starts deferring
/// further inputs to the flush queue instead of dispatching inline.
pub const DISPATCH_DEPTH_LIMIT: usize = 1;

/// Maximum number of `Pipeline`s a `PipelineLayout` keeps in its free pool.
///
/// Pipelines freed beyond this cap are dropped instead of recycled.
pub const PIPELINE_POOL_CAP: usize = 128;

/// Defensive cap on synthetic NOTIFICATION-style error payloads the core
/// will stage before giving up and truncating (mirrors the teacher's
/// staging-buffer sizing idiom for bounded scratch allocations).
pub const STREAM_ERROR_NOTIFY_CAP: usize = 256;

/// How often a [`crate::worker::WorkerThread`]'s cooperative loop polls its
/// task channel between timer sweeps.
pub const WORKER_POLL_INTERVAL_MS: u64 = 50;

/// Period of the "pending" timer that re-counts undrained pipelines and
/// wakes any caller blocked in `WorkerThread::stop(force = false)`.
pub const WORKER_PENDING_TIMER_MS: u64 = 100;

/// Period of the "cleaning" timer that sweeps recycled-but-unused pool
/// entries. The pools themselves are already capped (`PIPELINE_POOL_CAP`),
/// so this timer's job is bookkeeping, not the cap itself.
pub const WORKER_CLEANING_TIMER_MS: u64 = 1000;

/// How long `start()` waits on the ready/failed condvar before giving up.
pub const WORKER_START_TIMEOUT_MS: u64 = 5_000;

/// Default deadline for a graceful (non-forced) `stop()` before the caller
/// should escalate to `stop(force = true)`.
pub const WORKER_STOP_TIMEOUT_MS: u64 = 5_000;
