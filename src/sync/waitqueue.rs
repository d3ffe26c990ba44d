//! Wait-queue primitive (spec §4.A).
//!
//! A wait-queue is conceptually an intrusive doubly-linked list of
//! wait-nodes embedded in tasks; here it is a `VecDeque` of task IDs guarded
//! by the counted spinlock. `register` unregisters from any previous queue
//! first (a task may only ever be parked on one wait-queue — see
//! `task::Task::waiting_on`); `wake_one`/`wake_all` delegate the actual
//! "is this task asleep, and should it be woken" decision to a caller
//! supplied predicate, because only the scheduler's task table knows a
//! task's current state. This keeps `sync` free of a dependency on `task`.
//!
//! The critical correctness property (spec §8): no `wake` call ever misses
//! a sleeper whose wake condition is already true at the time of the call.
//! That is guaranteed by the canonical pattern callers must follow:
//! acquire the mutex guarding the condition, set the task `SLEEPING`,
//! `register` on the queue, re-check the condition, release the mutex and
//! yield only if the condition is still false.

use alloc::collections::VecDeque;

use crate::sync::spinlock::IrqSpinlock;

pub type TaskId = u64;

pub struct WaitQueue {
    sleepers: IrqSpinlock<VecDeque<TaskId>>,
}

impl WaitQueue {
    pub const fn new() -> Self {
        WaitQueue {
            sleepers: IrqSpinlock::new(VecDeque::new()),
        }
    }

    /// Link `id` into this queue. A task must `unregister` from whatever
    /// queue it was previously on before registering elsewhere; callers
    /// enforce the at-most-one-queue invariant (`Task::waiting_on`), so this
    /// just appends.
    pub fn register(&self, id: TaskId) {
        let mut g = self.sleepers.acquire();
        if !g.contains(&id) {
            g.push_back(id);
        }
    }

    pub fn unregister(&self, id: TaskId) {
        self.sleepers.acquire().retain(|&x| x != id);
    }

    pub fn is_empty(&self) -> bool {
        self.sleepers.acquire().is_empty()
    }

    /// Walk the list and wake the first task for which `try_wake` returns
    /// true (i.e. it was actually sleeping). Returns whether anyone woke.
    pub fn wake_one(&self, mut try_wake: impl FnMut(TaskId) -> bool) -> bool {
        let g = self.sleepers.acquire();
        for &id in g.iter() {
            if try_wake(id) {
                return true;
            }
        }
        false
    }

    /// Wake every linked task whose predicate succeeds.
    pub fn wake_all(&self, mut try_wake: impl FnMut(TaskId)) {
        let g = self.sleepers.acquire();
        for &id in g.iter() {
            try_wake(id);
        }
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}
