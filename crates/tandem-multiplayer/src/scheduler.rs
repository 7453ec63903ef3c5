//! Cancellable periodic and one-shot tasks on a simulated clock.
//!
//! Sessions own one [`Scheduler`] and drain it with [`Scheduler::pop_due`]
//! after advancing their clock. Every task carries the scopes it depends on;
//! destroying an entity or dropping a participant cancels the whole scope
//! with [`Scheduler::cancel_scope`], so no task runs against a stale
//! reference.

use tandem_net::{EntityId, ParticipantId};

/// Shortest allowed period, guards against a zero-period busy loop.
const MIN_PERIOD_SECS: f64 = 1e-3;

/// Handle to a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

/// Lifetime a task is tied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskScope {
    /// Cancelled when the entity is destroyed.
    Entity(EntityId),
    /// Cancelled when the participant leaves.
    Participant(ParticipantId),
}

#[derive(Debug, Clone)]
struct ScheduledTask<T> {
    id: TaskId,
    due: f64,
    period: Option<f64>,
    scopes: Vec<TaskScope>,
    payload: T,
}

/// Time-ordered task queue. Ties on the due time run in scheduling order.
#[derive(Debug, Clone)]
pub struct Scheduler<T> {
    tasks: Vec<ScheduledTask<T>>,
    next_id: u64,
}

impl<T: Clone> Scheduler<T> {
    /// Creates an empty scheduler.
    pub fn new() -> Self {
        Self {
            tasks: Vec::new(),
            next_id: 0,
        }
    }

    /// Run `payload` once at time `at`.
    pub fn schedule_once(&mut self, at: f64, scopes: &[TaskScope], payload: T) -> TaskId {
        self.push(at, None, scopes, payload)
    }

    /// Run `payload` at `first`, then every `period` seconds until cancelled.
    ///
    /// A periodic task fires at most once per [`Scheduler::pop_due`] sweep;
    /// periods missed during a long clock step are skipped, not replayed.
    pub fn schedule_periodic(
        &mut self,
        first: f64,
        period: f64,
        scopes: &[TaskScope],
        payload: T,
    ) -> TaskId {
        self.push(first, Some(period.max(MIN_PERIOD_SECS)), scopes, payload)
    }

    fn push(&mut self, due: f64, period: Option<f64>, scopes: &[TaskScope], payload: T) -> TaskId {
        let id = TaskId(self.next_id);
        self.next_id += 1;
        self.tasks.push(ScheduledTask {
            id,
            due,
            period,
            scopes: scopes.to_vec(),
            payload,
        });
        id
    }

    /// Cancel one task. Returns `false` if it already ran or was cancelled.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        self.tasks.len() != before
    }

    /// Cancel every task tied to `scope`. Returns how many were removed.
    pub fn cancel_scope(&mut self, scope: TaskScope) -> usize {
        let before = self.tasks.len();
        self.tasks.retain(|t| !t.scopes.contains(&scope));
        before - self.tasks.len()
    }

    /// Whether `id` is still pending.
    pub fn is_scheduled(&self, id: TaskId) -> bool {
        self.tasks.iter().any(|t| t.id == id)
    }

    /// Earliest pending due time.
    pub fn next_due(&self) -> Option<f64> {
        self.tasks.iter().map(|t| t.due).reduce(f64::min)
    }

    /// Number of pending tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether no task is pending.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Take the earliest task due at or before `now`.
    ///
    /// One-shot tasks are removed; periodic ones are rescheduled past `now`.
    /// Callers loop until `None`, so a task cancelled by an earlier task of
    /// the same sweep never runs. A non-finite `now` finds nothing due.
    pub fn pop_due(&mut self, now: f64) -> Option<(TaskId, T)> {
        if !now.is_finite() {
            return None;
        }
        let index = self
            .tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.due <= now)
            .min_by(|(_, a), (_, b)| a.due.total_cmp(&b.due).then(a.id.cmp(&b.id)))
            .map(|(i, _)| i)?;

        let task = &mut self.tasks[index];
        match task.period {
            Some(period) => {
                let missed = ((now - task.due) / period).floor();
                task.due += missed * period + period;
                if task.due <= now {
                    task.due += period;
                }
                Some((task.id, task.payload.clone()))
            }
            None => {
                let task = self.tasks.swap_remove(index);
                Some((task.id, task.payload))
            }
        }
    }
}

impl<T: Clone> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}
