//! Ready-queue scheduler.
//!
//! The [`ReadySet`] maintains one FIFO queue of runnable tasks per priority
//! level plus a multi-word bitmap marking which levels are non-empty.
//! Selection locates the lowest-numbered set bit (numerically lowest level =
//! highest scheduling priority) and answers with the head of that level's
//! queue, in O(words) time and without touching the queues themselves.
//!
//! # Invariant
//!
//! At least one bit of the bitmap is always set in a built kernel, because
//! the idle task is permanently ready and is never removed from the ready
//! set. This is what makes [`ReadySet::select_next`] total: it returns a
//! task handle, never an `Option` or a `Result`.
//!
//! Queue and bitmap are mutated together in [`ReadySet::enqueue`] and
//! [`ReadySet::remove`], and all mutation happens on the kernel server's own
//! execution context, so no observer can see the pair inconsistent.

use std::collections::VecDeque;

use crate::task::TaskId;

const BITS_PER_WORD: usize = u64::BITS as usize;

/// Per-priority ready queues plus the priority bitmap.
#[derive(Debug)]
pub struct ReadySet {
    /// One bit per priority level; bit set ⇔ that level's queue is non-empty.
    bitmap: Vec<u64>,
    /// One FIFO handle queue per priority level.
    lanes: Vec<VecDeque<TaskId>>,
}

impl ReadySet {
    /// Create an empty ready set with `levels` priority levels.
    #[must_use]
    pub fn new(levels: usize) -> Self {
        Self {
            bitmap: vec![0; levels.div_ceil(BITS_PER_WORD)],
            lanes: vec![VecDeque::new(); levels],
        }
    }

    /// Number of priority levels.
    #[must_use]
    pub fn levels(&self) -> usize {
        self.lanes.len()
    }

    /// Whether the given level currently has runnable tasks.
    #[must_use]
    pub fn is_level_ready(&self, level: usize) -> bool {
        self.bitmap[level / BITS_PER_WORD] & (1 << (level % BITS_PER_WORD)) != 0
    }

    /// The task that should run now: the head of the queue at the
    /// lowest-numbered non-empty level. Ties within a level are broken by
    /// strict FIFO order; no other tie-break exists.
    ///
    /// This is a pure query: the selected task stays in its queue.
    ///
    /// # Panics
    ///
    /// Panics if the ready set is empty. A built kernel keeps the idle task
    /// permanently ready, so an empty ready set is a broken invariant, not a
    /// reachable state.
    #[must_use]
    pub fn select_next(&self) -> TaskId {
        let mut base = 0;
        for word in &self.bitmap {
            if *word != 0 {
                let level = base + word.trailing_zeros() as usize;
                return self.lanes[level].front().copied().unwrap_or_else(|| {
                    panic!("priority bitmap marks level {level} ready but its queue is empty")
                });
            }
            base += BITS_PER_WORD;
        }
        panic!("ready set is empty: the idle task must always be ready");
    }

    /// Append a task to the tail of its level's queue and mark the level in
    /// the bitmap.
    pub(crate) fn enqueue(&mut self, task: TaskId, level: usize) {
        self.lanes[level].push_back(task);
        self.bitmap[level / BITS_PER_WORD] |= 1 << (level % BITS_PER_WORD);
    }

    /// Remove a task from its level's queue, clearing the level's bit if the
    /// queue becomes empty.
    pub(crate) fn remove(&mut self, task: TaskId, level: usize) {
        let lane = &mut self.lanes[level];
        if let Some(position) = lane.iter().position(|queued| *queued == task) {
            lane.remove(position);
        }
        if lane.is_empty() {
            self.bitmap[level / BITS_PER_WORD] &= !(1 << (level % BITS_PER_WORD));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(index: usize) -> TaskId {
        TaskId::new(index)
    }

    #[test]
    fn idle_alone_is_selected() {
        // Scenario: only the idle task (level 15) is ready.
        let mut ready = ReadySet::new(16);
        ready.enqueue(id(0), 15);
        assert_eq!(ready.select_next(), id(0));
    }

    #[test]
    fn higher_priority_wins() {
        let mut ready = ReadySet::new(16);
        ready.enqueue(id(0), 15); // idle
        ready.enqueue(id(1), 3);
        assert_eq!(ready.select_next(), id(1));

        // After the level-3 task leaves the ready set, idle is selected again.
        ready.remove(id(1), 3);
        assert_eq!(ready.select_next(), id(0));
    }

    #[test]
    fn never_selects_lower_priority_while_higher_is_ready() {
        let mut ready = ReadySet::new(16);
        ready.enqueue(id(0), 15);
        ready.enqueue(id(1), 9);
        ready.enqueue(id(2), 4);
        ready.enqueue(id(3), 11);

        assert_eq!(ready.select_next(), id(2));
        ready.remove(id(2), 4);
        assert_eq!(ready.select_next(), id(1));
        ready.remove(id(1), 9);
        assert_eq!(ready.select_next(), id(3));
    }

    #[test]
    fn fifo_within_a_level() {
        let mut ready = ReadySet::new(16);
        ready.enqueue(id(5), 7);
        ready.enqueue(id(6), 7);

        assert_eq!(ready.select_next(), id(5));
        ready.remove(id(5), 7);
        assert_eq!(ready.select_next(), id(6));
    }

    #[test]
    fn selection_does_not_remove() {
        let mut ready = ReadySet::new(16);
        ready.enqueue(id(2), 1);
        assert_eq!(ready.select_next(), id(2));
        assert_eq!(ready.select_next(), id(2));
        assert!(ready.is_level_ready(1));
    }

    #[test]
    fn scan_crosses_word_boundaries() {
        // More levels than a single u64 word; the scan must accumulate a
        // running offset across words.
        let mut ready = ReadySet::new(130);
        assert_eq!(ready.levels(), 130);

        ready.enqueue(id(0), 129); // idle at the last level, third word
        assert_eq!(ready.select_next(), id(0));

        ready.enqueue(id(1), 70); // second word
        assert_eq!(ready.select_next(), id(1));

        ready.enqueue(id(2), 3); // first word
        assert_eq!(ready.select_next(), id(2));
    }

    #[test]
    fn bitmap_tracks_emptiness() {
        let mut ready = ReadySet::new(16);
        ready.enqueue(id(0), 2);
        ready.enqueue(id(1), 2);

        ready.remove(id(0), 2);
        assert!(ready.is_level_ready(2), "one task still queued");

        ready.remove(id(1), 2);
        assert!(!ready.is_level_ready(2));
    }

    #[test]
    #[should_panic(expected = "ready set is empty")]
    fn empty_ready_set_is_fatal() {
        let ready = ReadySet::new(16);
        let _ = ready.select_next();
    }
}
