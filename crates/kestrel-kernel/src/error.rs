//! Kernel error types.
//!
//! All kernel subsystems surface errors through [`KernelError`], which is the
//! single error type returned by every fallible public API in this crate.
//! Each variant carries enough context for callers to decide how to handle
//! the failure without inspecting opaque strings.
//!
//! *Invariant violations* (an empty ready set, a command naming an object
//! that was never created) are not represented here: the dispatch core has
//! no recovery path for them, so they surface as a panic on the server
//! thread, observed by the embedder as [`KernelError::ServerFault`].

use crate::sync::{EventId, SemId};
use crate::task::TaskId;

/// Unified error type for the Kestrel dispatch core.
#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    // -- Task / scheduler errors --------------------------------------------
    /// The referenced task handle does not name a task in this kernel's
    /// task table.
    #[error("unknown task: {task}")]
    UnknownTask {
        /// The handle that was looked up.
        task: TaskId,
    },

    /// A task was registered with a priority level outside the configured
    /// range. Caught at build time, before the server starts.
    #[error("task `{task}` has priority {priority}, but only {levels} levels are configured")]
    InvalidPriority {
        task: String,
        priority: usize,
        levels: usize,
    },

    /// The kernel was built with zero priority levels; at least one is
    /// required to host the idle task.
    #[error("at least one priority level is required")]
    NoPriorityLevels,

    /// A blocking operation was issued on behalf of the idle task. The idle
    /// task is what keeps the ready set non-empty, so it may never block.
    #[error("the idle task may not block")]
    IdleTaskMayNotBlock,

    // -- Event / semaphore errors -------------------------------------------
    /// The referenced event handle does not name an event in this kernel.
    #[error("unknown event: {event}")]
    UnknownEvent { event: EventId },

    /// The referenced semaphore handle does not name a semaphore in this
    /// kernel.
    #[error("unknown semaphore: {semaphore}")]
    UnknownSemaphore { semaphore: SemId },

    /// A second task attempted to wait on an event that already has a
    /// waiter. Events admit a single waiter at a time.
    #[error("event {event} already has a waiter")]
    EventBusy { event: EventId },

    // -- Server errors ------------------------------------------------------
    /// The kernel server has terminated; no further commands can be
    /// submitted. At this layer the server's loss is a top-level fault, not
    /// a recoverable condition.
    #[error("kernel server is gone")]
    ServerGone,

    /// The kernel server thread panicked. The server is the sole serializer
    /// of kernel state, so its failure is fatal to the whole system.
    #[error("kernel server faulted")]
    ServerFault,

    /// Spawning the server thread failed.
    #[error("failed to spawn kernel server thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Convenience alias used throughout the kernel crate.
pub type Result<T> = std::result::Result<T, KernelError>;
