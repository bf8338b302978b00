//! Events and semaphores.
//!
//! The two object kinds a command can reference besides a packet. Both are
//! created at kernel build time, identified by dense handles, and owned by
//! the kernel server's state; all mutation happens on the server context.
//!
//! A give or signal that finds a waiter is *consumed by the release*: the
//! count (or latch) is unchanged and the front waiter becomes ready instead.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::task::TaskId;

/// Dense handle to an event in this kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(usize);

impl EventId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "event#{}", self.0)
    }
}

/// Dense handle to a semaphore in this kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SemId(usize);

impl SemId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for SemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sem#{}", self.0)
    }
}

/// Outcome of a wait/take attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Acquire {
    /// The latch or a counted unit was available; the task stays ready.
    Granted,
    /// Nothing available; the task was queued and must block.
    MustBlock,
}

/// A binary event: a latch plus at most one waiter.
#[derive(Debug)]
pub(crate) struct Event {
    pub(crate) name: String,
    signalled: bool,
    waiter: Option<TaskId>,
}

impl Event {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            signalled: false,
            waiter: None,
        }
    }

    /// Signal the event. Returns the task to release, if one was waiting;
    /// otherwise the latch is set.
    pub(crate) fn signal(&mut self) -> Option<TaskId> {
        match self.waiter.take() {
            Some(waiter) => Some(waiter),
            None => {
                self.signalled = true;
                None
            }
        }
    }

    /// Attempt to wait. `None` means the event already has a waiter.
    pub(crate) fn wait(&mut self, task: TaskId) -> Option<Acquire> {
        if self.signalled {
            self.signalled = false;
            Some(Acquire::Granted)
        } else if self.waiter.is_some() {
            None
        } else {
            self.waiter = Some(task);
            Some(Acquire::MustBlock)
        }
    }

    pub(crate) fn signalled(&self) -> bool {
        self.signalled
    }
}

/// A counting semaphore with a FIFO wait list.
#[derive(Debug)]
pub(crate) struct Semaphore {
    pub(crate) name: String,
    count: u32,
    waiters: VecDeque<TaskId>,
}

impl Semaphore {
    pub(crate) fn new(name: String, initial: u32) -> Self {
        Self {
            name,
            count: initial,
            waiters: VecDeque::new(),
        }
    }

    /// Give one unit. Returns the task to release, if one was waiting.
    pub(crate) fn give(&mut self) -> Option<TaskId> {
        match self.waiters.pop_front() {
            Some(waiter) => Some(waiter),
            None => {
                self.count += 1;
                None
            }
        }
    }

    /// Attempt to take one unit on behalf of `task`.
    pub(crate) fn take(&mut self, task: TaskId) -> Acquire {
        if self.count > 0 {
            self.count -= 1;
            Acquire::Granted
        } else {
            self.waiters.push_back(task);
            Acquire::MustBlock
        }
    }

    pub(crate) fn count(&self) -> u32 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: usize) -> TaskId {
        TaskId::new(index)
    }

    #[test]
    fn event_latches_without_waiter() {
        let mut event = Event::new("uart-rx".into());
        assert_eq!(event.signal(), None);
        assert!(event.signalled());

        // A later wait consumes the latch and proceeds.
        assert_eq!(event.wait(id(0)), Some(Acquire::Granted));
        assert!(!event.signalled());
    }

    #[test]
    fn event_signal_is_consumed_by_release() {
        let mut event = Event::new("uart-rx".into());
        assert_eq!(event.wait(id(0)), Some(Acquire::MustBlock));

        // The waiter absorbs the signal; the latch stays clear.
        assert_eq!(event.signal(), Some(id(0)));
        assert!(!event.signalled());
    }

    #[test]
    fn event_admits_one_waiter() {
        let mut event = Event::new("uart-rx".into());
        assert_eq!(event.wait(id(0)), Some(Acquire::MustBlock));
        assert_eq!(event.wait(id(1)), None);
    }

    #[test]
    fn semaphore_counts_without_waiters() {
        let mut sem = Semaphore::new("tx-slots".into(), 1);
        assert_eq!(sem.take(id(0)), Acquire::Granted);
        assert_eq!(sem.count(), 0);

        assert_eq!(sem.give(), None);
        assert_eq!(sem.count(), 1);
    }

    #[test]
    fn semaphore_give_releases_fifo() {
        let mut sem = Semaphore::new("tx-slots".into(), 0);
        assert_eq!(sem.take(id(3)), Acquire::MustBlock);
        assert_eq!(sem.take(id(4)), Acquire::MustBlock);

        // Units are consumed by the releases, oldest waiter first.
        assert_eq!(sem.give(), Some(id(3)));
        assert_eq!(sem.give(), Some(id(4)));
        assert_eq!(sem.count(), 0);

        assert_eq!(sem.give(), None);
        assert_eq!(sem.count(), 1);
    }
}
