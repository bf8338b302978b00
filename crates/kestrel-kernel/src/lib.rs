//! Kestrel dispatch core.
//!
//! This crate provides the request-dispatch heart of the Kestrel real-time
//! kernel: a single serializing server context that arbitrates all
//! cross-context service requests and decides which task runs next.
//!
//! - **[`server`]** -- The kernel server loop: drains the command channel,
//!   cooperates with ingress contexts at an explicit yield point, selects
//!   the next task, and drives context switches through a [`Port`].
//! - **[`sched`]** -- Ready-queue scheduler: per-priority FIFO handle queues
//!   over a multi-word priority bitmap with total, O(words) selection.
//! - **[`command`]** -- The tagged command protocol multiplexing packets,
//!   event signals, and semaphore gives through one FIFO
//!   multi-producer/single-consumer channel built on [`crossbeam::channel`].
//! - **[`task`]** -- Pre-allocated task table addressed by dense handles.
//! - **[`sync`]** -- Event and semaphore objects referenced by commands.
//! - **[`monitor`]** -- Observer hooks for commands, context switches, and
//!   idle transitions, registered in a [`DashMap`]-backed registry.
//! - **[`error`]** -- Unified kernel error types via [`thiserror`].
//!
//! Producers on any thread submit commands; the server alone mutates kernel
//! state. No lock protects the task table, ready queues, or dispatcher
//! state: serialization is by construction.
//!
//! [`DashMap`]: dashmap::DashMap
//! [`Port`]: server::Port
//!
//! # Example
//!
//! ```rust
//! use kestrel_kernel::{Command, HostPort, Kernel};
//!
//! # fn main() -> kestrel_kernel::Result<()> {
//! let mut builder = Kernel::builder();
//! let worker = builder.task("worker", 3, 0x2000);
//! let wakeup = builder.event("wakeup");
//!
//! let handle = builder.build()?.start(HostPort)?;
//! handle.submit(Command::packet("park-worker", move |core| {
//!     let _ = core.wait_event(wakeup, worker);
//! }))?;
//! handle.submit(Command::event_signal(wakeup))?;
//! handle.shutdown()?;
//! # Ok(())
//! # }
//! ```

pub mod command;
pub mod error;
pub mod monitor;
pub mod sched;
pub mod server;
pub mod sync;
pub mod task;

// Re-export the most commonly used types at the crate root for convenience.
pub use command::{Command, CommandKind, CommandSender, PacketDescriptor, PacketFn};
pub use error::{KernelError, Result};
pub use monitor::{KernelMonitor, MonitorRegistry};
pub use server::{
    DEFAULT_PRIORITY_LEVELS, HostPort, Kernel, KernelBuilder, KernelCore, KernelHandle, Port,
};
pub use sync::{EventId, SemId};
pub use task::{TaskId, TaskInfo, TaskState};
