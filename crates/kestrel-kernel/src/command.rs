//! Command channel protocol.
//!
//! Every cross-context service request travels to the kernel server as a
//! single fixed-size [`Command`] value multiplexing three request kinds: an
//! explicit sum type whose tag is the discriminant and whose payload is
//! either a packet descriptor or a small object handle, inline. No
//! allocation happens beyond the descriptor the caller builds.
//!
//! # Ordering
//!
//! The channel is strictly **FIFO**: commands are serviced oldest-first,
//! including while a backlog exists. Producers never block on submit; the
//! kernel server is the only consumer and parks in the blocking pop when the
//! channel is empty.

use crossbeam::channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};

use crate::error::{KernelError, Result};
use crate::server::KernelCore;
use crate::sync::{EventId, SemId};

/// Handler invoked by the kernel server for a packet command.
///
/// The handler runs on the server's own execution context with exclusive
/// access to all kernel state. It is trusted to run to completion without
/// blocking: the server is the single serializer of kernel state, so a
/// blocked handler stalls every pending service request system-wide.
pub type PacketFn = Box<dyn FnOnce(&mut KernelCore) + Send>;

/// A caller-built request descriptor: the handler to invoke plus whatever
/// arguments the caller captured into it.
pub struct PacketDescriptor {
    op: &'static str,
    handler: PacketFn,
}

impl PacketDescriptor {
    /// Build a descriptor around `handler`. `op` is a short static label
    /// used for tracing and monitoring.
    pub fn new(op: &'static str, handler: impl FnOnce(&mut KernelCore) + Send + 'static) -> Self {
        Self {
            op,
            handler: Box::new(handler),
        }
    }

    /// The descriptor's label.
    #[must_use]
    pub fn op(&self) -> &'static str {
        self.op
    }

    pub(crate) fn invoke(self, core: &mut KernelCore) {
        (self.handler)(core);
    }
}

impl std::fmt::Debug for PacketDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketDescriptor")
            .field("op", &self.op)
            .finish_non_exhaustive()
    }
}

/// Discriminant of a [`Command`], used to tag monitor callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandKind {
    Packet,
    EventSignal,
    SemaphoreGive,
}

/// A service request in flight to the kernel server.
///
/// Constructed at submission time, consumed exactly once by the server. The
/// referenced descriptor, event, or semaphore outlives the command and is
/// owned elsewhere.
#[derive(Debug)]
pub enum Command {
    /// Invoke the descriptor's handler on the server context.
    Packet(PacketDescriptor),
    /// Mark the event as signalled, releasing its waiter if present.
    EventSignal(EventId),
    /// Increment the semaphore, releasing a waiter if present.
    SemaphoreGive(SemId),
}

impl Command {
    /// Build a packet command from a label and a handler closure.
    pub fn packet(op: &'static str, handler: impl FnOnce(&mut KernelCore) + Send + 'static) -> Self {
        Self::Packet(PacketDescriptor::new(op, handler))
    }

    /// Build an event-signal command.
    #[must_use]
    pub fn event_signal(event: EventId) -> Self {
        Self::EventSignal(event)
    }

    /// Build a semaphore-give command.
    #[must_use]
    pub fn semaphore_give(semaphore: SemId) -> Self {
        Self::SemaphoreGive(semaphore)
    }

    /// The command's discriminant.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Packet(_) => CommandKind::Packet,
            Self::EventSignal(_) => CommandKind::EventSignal,
            Self::SemaphoreGive(_) => CommandKind::SemaphoreGive,
        }
    }
}

/// Producer side of the command channel.
///
/// Cheaply cloneable; safe to use from any thread. [`CommandSender::submit`]
/// never blocks the producer.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: Sender<Command>,
}

impl CommandSender {
    /// Submit a command to the kernel server.
    ///
    /// Fails only with [`KernelError::ServerGone`] once the server has
    /// terminated; at this layer a missing server is a top-level fault,
    /// not a retryable condition.
    pub fn submit(&self, command: Command) -> Result<()> {
        let kind = command.kind();
        self.tx
            .send(command)
            .map_err(|_| KernelError::ServerGone)?;
        tracing::trace!(?kind, "command submitted");
        Ok(())
    }
}

/// Consumer side of the command channel. Owned by the kernel server alone.
#[derive(Debug)]
pub(crate) struct CommandReceiver {
    rx: Receiver<Command>,
}

impl CommandReceiver {
    /// Blocking pop: parks the server until a command arrives. Returns
    /// `None` once every producer handle has been dropped.
    pub(crate) fn pop_blocking(&self) -> Option<Command> {
        self.rx.recv().ok()
    }

    /// Non-blocking pop: returns immediately with `None` when the channel
    /// is empty.
    pub(crate) fn pop_now(&self) -> Option<Command> {
        self.rx.try_recv().ok()
    }
}

/// Create a connected producer/consumer pair.
pub(crate) fn channel() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = unbounded();
    (CommandSender { tx }, CommandReceiver { rx })
}
