//! Cooperative millisecond task scheduler.
//!
//! There is no background thread: the host advances the scheduler by
//! calling [`Scheduler::tick`] from its idle poll, and every task whose due
//! time has passed fires inside that call, in ascending due-time order
//! (ties broken by the order tasks were scheduled).
//!
//! Tasks carry a typed payload rather than a closure. The owner interprets
//! fired payloads, which keeps the task lifecycle (pending, fired,
//! cancelled) visible from outside and lets handlers schedule or cancel
//! further work while the tick is running.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Opaque handle returned when a task is scheduled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskHandle(u64);

impl fmt::Display for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// How a task behaves after it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Recurrence {
    /// Removed after firing once.
    Once,
    /// Re-armed at `due + period_ms`, measured from the previous due time.
    Every(u64),
}

/// Lifecycle of a handle as seen from outside.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for its due time (recurring tasks stay here between firings).
    Pending,
    /// Fired (one-shot), cancelled, or never issued by this scheduler.
    Done,
}

/// A task that came due during a tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FiredTask<T> {
    pub handle: TaskHandle,
    /// The time the task was due, not the time it was observed.
    pub due_ms: u64,
    pub payload: T,
    /// Whether the task is still pending for another period.
    pub recurring: bool,
}

#[derive(Debug)]
struct Entry<T> {
    due_ms: u64,
    seq: u64,
    recurrence: Recurrence,
    payload: T,
}

/// Single-threaded task queue keyed by due time.
pub struct Scheduler<T> {
    /// Latest host time observed, the origin for relative delays.
    now_ms: u64,
    next_id: u64,
    next_seq: u64,
    /// (due_ms, seq) -> handle, iterated in firing order.
    queue: BTreeMap<(u64, u64), TaskHandle>,
    tasks: HashMap<TaskHandle, Entry<T>>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    /// Create an empty scheduler at time zero.
    pub fn new() -> Self {
        Self {
            now_ms: 0,
            next_id: 0,
            next_seq: 0,
            queue: BTreeMap::new(),
            tasks: HashMap::new(),
        }
    }

    /// Latest host time observed.
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    /// Advance the scheduler clock. Time never moves backwards.
    pub fn observe(&mut self, now_ms: u64) {
        self.now_ms = self.now_ms.max(now_ms);
    }

    /// Fire `payload` once, `delay_ms` after the current scheduler time.
    pub fn schedule_once(&mut self, delay_ms: u64, payload: T) -> TaskHandle {
        let due = self.now_ms.saturating_add(delay_ms);
        self.insert(due, Recurrence::Once, payload)
    }

    /// Fire `payload` once at an absolute time. A time in the past fires on
    /// the next tick.
    pub fn schedule_at(&mut self, due_ms: u64, payload: T) -> TaskHandle {
        self.insert(due_ms, Recurrence::Once, payload)
    }

    /// Fire `payload` after `initial_delay_ms`, then every `period_ms`.
    ///
    /// The period is clamped to at least 1 ms so a tick always terminates.
    pub fn schedule_recurring(
        &mut self,
        initial_delay_ms: u64,
        period_ms: u64,
        payload: T,
    ) -> TaskHandle {
        let due = self.now_ms.saturating_add(initial_delay_ms);
        self.insert(due, Recurrence::Every(period_ms.max(1)), payload)
    }

    fn insert(&mut self, due_ms: u64, recurrence: Recurrence, payload: T) -> TaskHandle {
        let handle = TaskHandle(self.next_id);
        self.next_id += 1;
        let seq = self.take_seq();
        self.queue.insert((due_ms, seq), handle);
        self.tasks.insert(
            handle,
            Entry {
                due_ms,
                seq,
                recurrence,
                payload,
            },
        );
        handle
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Cancel a task. Returns whether anything was pending.
    ///
    /// Cancelling an unknown, fired, or already-cancelled handle is a no-op.
    pub fn cancel(&mut self, handle: TaskHandle) -> bool {
        match self.tasks.remove(&handle) {
            Some(entry) => {
                self.queue.remove(&(entry.due_ms, entry.seq));
                true
            }
            None => false,
        }
    }

    /// Cancel every pending task whose payload matches `pred`.
    pub fn cancel_where<F>(&mut self, mut pred: F) -> usize
    where
        F: FnMut(&T) -> bool,
    {
        let doomed: Vec<TaskHandle> = self
            .tasks
            .iter()
            .filter(|(_, entry)| pred(&entry.payload))
            .map(|(handle, _)| *handle)
            .collect();
        for handle in &doomed {
            self.cancel(*handle);
        }
        doomed.len()
    }

    /// Cancel everything.
    pub fn clear(&mut self) {
        self.queue.clear();
        self.tasks.clear();
    }

    pub fn state(&self, handle: TaskHandle) -> TaskState {
        if self.tasks.contains_key(&handle) {
            TaskState::Pending
        } else {
            TaskState::Done
        }
    }

    pub fn is_pending(&self, handle: TaskHandle) -> bool {
        self.state(handle) == TaskState::Pending
    }

    /// Due time of a pending task.
    pub fn due_ms(&self, handle: TaskHandle) -> Option<u64> {
        self.tasks.get(&handle).map(|entry| entry.due_ms)
    }

    pub fn pending_count(&self) -> usize {
        self.tasks.len()
    }

    /// Earliest due time in the queue, useful for sizing the host's poll wait.
    pub fn next_due_ms(&self) -> Option<u64> {
        self.queue.keys().next().map(|(due, _)| *due)
    }
}

impl<T: Clone> Scheduler<T> {
    /// Remove and return the earliest task due at or before `now_ms`.
    ///
    /// Recurring tasks are re-armed for `due + period` before they are
    /// returned, so a handler may still cancel them.
    pub fn pop_due(&mut self, now_ms: u64) -> Option<FiredTask<T>> {
        self.observe(now_ms);

        let (&(due_ms, seq), &handle) = self.queue.iter().next()?;
        if due_ms > now_ms {
            return None;
        }
        self.queue.remove(&(due_ms, seq));

        let recurrence = self.tasks.get(&handle)?.recurrence;
        match recurrence {
            Recurrence::Once => {
                let entry = self.tasks.remove(&handle)?;
                Some(FiredTask {
                    handle,
                    due_ms,
                    payload: entry.payload,
                    recurring: false,
                })
            }
            Recurrence::Every(period_ms) => {
                let next_due = due_ms.saturating_add(period_ms);
                let next_seq = self.take_seq();
                let entry = self.tasks.get_mut(&handle)?;
                entry.due_ms = next_due;
                entry.seq = next_seq;
                let payload = entry.payload.clone();
                self.queue.insert((next_due, next_seq), handle);
                Some(FiredTask {
                    handle,
                    due_ms,
                    payload,
                    recurring: true,
                })
            }
        }
    }

    /// Fire every task due at or before `now_ms`, in due-time order.
    ///
    /// The handler gets the scheduler back so it can schedule or cancel
    /// work; tasks it schedules at or before `now_ms` fire in this same
    /// tick. Returns the number of tasks fired.
    pub fn tick<F>(&mut self, now_ms: u64, mut handler: F) -> usize
    where
        F: FnMut(&mut Self, FiredTask<T>),
    {
        let mut fired = 0;
        while let Some(task) = self.pop_due(now_ms) {
            log::trace!("[SCHEDULER] {} due at {}ms fired at {}ms", task.handle, task.due_ms, now_ms);
            fired += 1;
            handler(self, task);
        }
        fired
    }
}

impl<T> fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("now_ms", &self.now_ms)
            .field("pending", &self.tasks.len())
            .finish_non_exhaustive()
    }
}
