//! Preemptive scheduler (spec §4.D).
//!
//! `select_next` is the pure selection algorithm lifted out of the
//! scheduler loop so it can be tested against spec §8's properties
//! directly, the same way `examples/original_source/arch/x86/kernel/
//! scheduler.c`'s `scheduler()` function inlines the scan-and-rotate but
//! keeps it as one self-contained loop. `Scheduler` is the stateful driver:
//! it owns the task table, the round-robin order, and the dead list, and
//! exposes `yield_now`/`sleep_ms`/`wake` as the primitives the rest of the
//! kernel parks and wakes through (via `sync::mutex::Parker`).
//!
//! The real machine's `yield` hands the scheduler's own lock off across
//! the context switch (acquired by the yielding task, released by whatever
//! task is switched into) — see `spec.md` §4.D. This crate does not
//! perform a real stack switch (there is no hardware under `cargo test`,
//! and the bare-metal binary's switch stub is architecture assembly that
//! lives in `arch::idt`), so `Scheduler` models a switch as "update
//! `current`, return to the caller", which is sufficient to drive and test
//! every data-structure invariant the spec asks for.

use alloc::collections::VecDeque;

use crate::sync::idalloc::IdAllocator;
use crate::sync::ordered_map::OrderedMap;
use crate::sync::spinlock::IrqSpinlock;
use crate::task::{Pid, SchedFlags, Task, TaskId, TaskState};

#[derive(Debug, Clone, Copy)]
pub struct TaskSnapshot {
    pub state: TaskState,
    pub flags: SchedFlags,
    pub wake_up_tick: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub chosen: TaskId,
    pub clear_preempted: bool,
    pub clear_wake_up: bool,
}

/// Move every element from the front of `order` up to and including `id`
/// to the back, preserving relative order (the original's `list_new_last`):
/// everything already scanned (the selected task included) goes to the
/// tail, so the next scan starts from tasks not yet considered this round.
fn rotate_to_back(order: &mut VecDeque<TaskId>, id: TaskId) {
    while let Some(front) = order.pop_front() {
        let is_target = front == id;
        order.push_back(front);
        if is_target {
            break;
        }
    }
}

/// Selection rules, in order (spec §4.D):
/// 1. A `PREEMPTED` task runs regardless of state; the flag is cleared.
/// 2. Otherwise skip tasks already marked `RUNNING_ON_CPU`.
/// 3. `RUNNABLE` tasks run immediately.
/// 4. `SLEEPING`/`INTR_SLEEPING` tasks run once their wake-up tick arrives;
///    the wake-up is cleared before scheduling.
/// 5. If nothing is found, the caller runs the idle task (`None` here).
pub fn select_next(
    order: &mut VecDeque<TaskId>,
    mut snapshot: impl FnMut(TaskId) -> TaskSnapshot,
    now_tick: u64,
) -> Option<Selection> {
    for &id in order.iter() {
        if snapshot(id).flags.contains(SchedFlags::PREEMPTED) {
            rotate_to_back(order, id);
            return Some(Selection {
                chosen: id,
                clear_preempted: true,
                clear_wake_up: false,
            });
        }
    }

    let candidates: alloc::vec::Vec<TaskId> = order.iter().copied().collect();
    for id in candidates {
        let s = snapshot(id);
        if s.flags.contains(SchedFlags::RUNNING_ON_CPU) {
            continue;
        }
        match s.state {
            TaskState::Runnable => {
                rotate_to_back(order, id);
                return Some(Selection {
                    chosen: id,
                    clear_preempted: false,
                    clear_wake_up: false,
                });
            }
            TaskState::Sleeping | TaskState::InterruptibleSleeping => {
                if let Some(wake) = s.wake_up_tick {
                    if wake <= now_tick {
                        rotate_to_back(order, id);
                        return Some(Selection {
                            chosen: id,
                            clear_preempted: false,
                            clear_wake_up: true,
                        });
                    }
                }
            }
            _ => {}
        }
    }

    None
}

struct SchedulerInner {
    tasks: OrderedMap<TaskId, Task>,
    order: VecDeque<TaskId>,
    dead: alloc::vec::Vec<TaskId>,
    ids: IdAllocator,
    pids: IdAllocator,
    current: Option<TaskId>,
    idle: Option<TaskId>,
    ticks: u64,
}

/// The scheduler's own state, guarded the way `ktasks` is in the original: one
/// counted spinlock, acquired by a yielding task and released by whichever
/// task is switched into.
pub struct Scheduler {
    inner: IrqSpinlock<SchedulerInner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Scheduler {
            inner: IrqSpinlock::new(SchedulerInner {
                tasks: OrderedMap::new(),
                order: VecDeque::new(),
                dead: alloc::vec::Vec::new(),
                ids: IdAllocator::starting_at(1),
                pids: IdAllocator::starting_at(1),
                current: None,
                idle: None,
                ticks: 0,
            }),
        }
    }
}

impl Scheduler {
    /// Register the idle task, run only when nothing else is selectable.
    pub fn set_idle(&self, task: Task) -> TaskId {
        let id = task.id;
        let mut g = self.inner.acquire();
        g.tasks.insert(id, task);
        g.idle = Some(id);
        id
    }

    pub fn alloc_pid(&self) -> Pid {
        self.inner.acquire().pids.alloc()
    }

    /// Create and register a new runnable task (spec §4.D `scheduler_task_add`).
    pub fn spawn(&self, mut task: Task) -> TaskId {
        let mut g = self.inner.acquire();
        let id = g.ids.alloc();
        task.id = id;
        task.state = TaskState::Runnable;
        g.order.push_front(id); // new tasks get the next time-slice
        g.tasks.insert(id, task);
        id
    }

    pub fn remove(&self, id: TaskId) {
        let mut g = self.inner.acquire();
        g.order.retain(|&x| x != id);
        g.tasks.remove(&id);
    }

    pub fn current(&self) -> Option<TaskId> {
        self.inner.acquire().current
    }

    pub fn tick(&self) -> u64 {
        self.inner.acquire().ticks
    }

    pub fn advance_tick(&self) -> u64 {
        let mut g = self.inner.acquire();
        g.ticks += 1;
        g.ticks
    }

    pub fn with_task<R>(&self, id: TaskId, f: impl FnOnce(&mut Task) -> R) -> Option<R> {
        let mut g = self.inner.acquire();
        g.tasks.get_mut(&id).map(f)
    }

    /// Run one scheduling decision: pick the next task per `select_next`,
    /// apply its flag/wake-up clears, set it `Running`, demote the
    /// previously running task back to `Runnable` (unless it changed state
    /// itself, e.g. to sleep, while we weren't looking — mirrors the original's
    /// "it's state may not be RUNNING" comment), and make it current.
    pub fn schedule_once(&self) -> TaskId {
        let mut g = self.inner.acquire();
        let now = g.ticks;

        if let Some(prev) = g.current.take() {
            if let Some(t) = g.tasks.get_mut(&prev) {
                if t.state == TaskState::Running {
                    t.state = TaskState::Runnable;
                }
            }
        }

        // Snapshot every candidate's scheduling-relevant state up front so
        // `select_next`'s closure doesn't need to borrow `g.tasks` while
        // we're also mutably borrowing `g.order`.
        let order_ids: alloc::vec::Vec<TaskId> = g.order.iter().copied().collect();
        let snapshots: alloc::collections::BTreeMap<TaskId, TaskSnapshot> = order_ids
            .iter()
            .map(|&id| {
                let t = g.tasks.get(&id).expect("scheduled task must exist");
                (
                    id,
                    TaskSnapshot {
                        state: t.state,
                        flags: t.flags,
                        wake_up_tick: t.wake_up_tick,
                    },
                )
            })
            .collect();

        let idle = g.idle;
        let chosen = select_next(&mut g.order, |id| snapshots[&id], now);

        let chosen_id = match chosen {
            Some(sel) => {
                if let Some(t) = g.tasks.get_mut(&sel.chosen) {
                    if sel.clear_preempted {
                        t.flags.remove(SchedFlags::PREEMPTED);
                    }
                    if sel.clear_wake_up {
                        t.wake_up_tick = None;
                    }
                }
                sel.chosen
            }
            None => idle.expect("idle task must be registered before scheduling"),
        };

        if let Some(t) = g.tasks.get_mut(&chosen_id) {
            t.state = TaskState::Running;
        }
        g.current = Some(chosen_id);

        // Reap anything queued for final teardown (spec §4.D: "reap dead
        // tasks" happens on every pass through the loop).
        let dead = core::mem::take(&mut g.dead);
        for id in dead {
            g.tasks.remove(&id);
        }

        chosen_id
    }

    /// Mark a task `Runnable` if it was `Sleeping`/`InterruptibleSleeping`.
    /// Returns whether a transition actually happened — this is the
    /// predicate `WaitQueue::wake_one`/`wake_all` delegate to.
    pub fn wake(&self, id: TaskId) -> bool {
        let mut g = self.inner.acquire();
        match g.tasks.get_mut(&id) {
            Some(t) if t.is_sleeping() => {
                t.state = TaskState::Runnable;
                t.wake_up_tick = None;
                true
            }
            _ => false,
        }
    }

    /// Signal delivery wakes only from `INTR_SLEEPING` (spec §4.C).
    pub fn wake_interruptible(&self, id: TaskId) -> bool {
        let mut g = self.inner.acquire();
        match g.tasks.get_mut(&id) {
            Some(t) if t.state == TaskState::InterruptibleSleeping => {
                t.state = TaskState::Runnable;
                t.wake_up_tick = None;
                true
            }
            _ => false,
        }
    }

    pub fn set_sleeping(&self, id: TaskId, interruptible: bool) {
        let mut g = self.inner.acquire();
        if let Some(t) = g.tasks.get_mut(&id) {
            t.state = if interruptible {
                TaskState::InterruptibleSleeping
            } else {
                TaskState::Sleeping
            };
        }
    }

    /// `yield_preempt` (spec §4.D): what the timer IRQ calls.
    pub fn yield_preempt(&self, id: TaskId) {
        let mut g = self.inner.acquire();
        if let Some(t) = g.tasks.get_mut(&id) {
            t.flags.insert(SchedFlags::PREEMPTED);
        }
    }

    pub fn sleep_until(&self, id: TaskId, wake_tick: u64, interruptible: bool) {
        let mut g = self.inner.acquire();
        if let Some(t) = g.tasks.get_mut(&id) {
            t.state = if interruptible {
                TaskState::InterruptibleSleeping
            } else {
                TaskState::Sleeping
            };
            t.wake_up_tick = Some(wake_tick);
        }
    }

    pub fn mark_zombie(&self, id: TaskId, exit_code: i32) {
        let mut g = self.inner.acquire();
        if let Some(t) = g.tasks.get_mut(&id) {
            t.state = TaskState::Zombie;
            t.exit_code = Some(exit_code);
        }
    }

    /// Freed from the dead list only after the scheduler has switched away
    /// from it (spec §3 Task lifecycle).
    pub fn queue_dead(&self, id: TaskId) {
        let mut g = self.inner.acquire();
        if let Some(t) = g.tasks.get_mut(&id) {
            t.state = TaskState::Dead;
        }
        g.order.retain(|&x| x != id);
        g.dead.push(id);
    }
}

/// `sync::mutex::Parker` adapter over the real scheduler.
pub struct SchedulerParker<'a> {
    pub scheduler: &'a Scheduler,
}

impl crate::sync::mutex::Parker for SchedulerParker<'_> {
    fn current(&self) -> TaskId {
        self.scheduler.current().expect("parker used outside a task context")
    }

    fn park_and_yield(&self, id: TaskId, interruptible: bool) {
        self.scheduler.set_sleeping(id, interruptible);
        self.scheduler.schedule_once();
    }

    fn wake(&self, id: TaskId) -> bool {
        self.scheduler.wake(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(state: TaskState, flags: SchedFlags, wake: Option<u64>) -> TaskSnapshot {
        TaskSnapshot {
            state,
            flags,
            wake_up_tick: wake,
        }
    }

    #[test]
    fn picks_first_runnable_and_rotates_scanned_tasks_to_back() {
        let mut order: VecDeque<TaskId> = [1, 2, 3].into_iter().collect();
        let states = alloc::collections::BTreeMap::from([
            (1, snap(TaskState::Sleeping, SchedFlags::empty(), None)),
            (2, snap(TaskState::Runnable, SchedFlags::empty(), None)),
            (3, snap(TaskState::Runnable, SchedFlags::empty(), None)),
        ]);
        let sel = select_next(&mut order, |id| states[&id], 100).unwrap();
        assert_eq!(sel.chosen, 2);
        // 1 and 2 were scanned (1 skipped, 2 chosen); both move to the
        // back in original relative order, leaving 3 at the front.
        assert_eq!(order, alloc::collections::VecDeque::from([3, 1, 2]));
    }

    #[test]
    fn preempted_task_runs_regardless_of_state_and_flag_is_cleared() {
        let mut order: VecDeque<TaskId> = [1, 2].into_iter().collect();
        let states = alloc::collections::BTreeMap::from([
            (1, snap(TaskState::Runnable, SchedFlags::empty(), None)),
            (2, snap(TaskState::Sleeping, SchedFlags::PREEMPTED, None)),
        ]);
        let sel = select_next(&mut order, |id| states[&id], 100).unwrap();
        assert_eq!(sel.chosen, 2);
        assert!(sel.clear_preempted);
    }

    #[test]
    fn running_on_cpu_is_skipped() {
        let mut order: VecDeque<TaskId> = [1, 2].into_iter().collect();
        let states = alloc::collections::BTreeMap::from([
            (1, snap(TaskState::Runnable, SchedFlags::RUNNING_ON_CPU, None)),
            (2, snap(TaskState::Runnable, SchedFlags::empty(), None)),
        ]);
        let sel = select_next(&mut order, |id| states[&id], 100).unwrap();
        assert_eq!(sel.chosen, 2);
    }

    #[test]
    fn sleeping_task_only_eligible_once_wake_tick_due() {
        let mut order: VecDeque<TaskId> = [1].into_iter().collect();
        let states = alloc::collections::BTreeMap::from([(
            1,
            snap(TaskState::Sleeping, SchedFlags::empty(), Some(50)),
        )]);
        assert!(select_next(&mut order, |id| states[&id], 10).is_none());
        assert!(select_next(&mut order, |id| states[&id], 50).is_some());
    }

    #[test]
    fn nothing_selectable_returns_none_so_caller_falls_back_to_idle() {
        let mut order: VecDeque<TaskId> = [1].into_iter().collect();
        let states = alloc::collections::BTreeMap::from([(
            1,
            snap(TaskState::Sleeping, SchedFlags::empty(), None),
        )]);
        assert!(select_next(&mut order, |id| states[&id], 100).is_none());
    }

    #[test]
    fn scheduler_round_robins_two_runnable_tasks() {
        let sched = Scheduler::default();
        let idle = Task::new(0, 0, true);
        sched.set_idle(idle);

        let a = sched.spawn(Task::new(0, 1, false));
        let b = sched.spawn(Task::new(0, 2, false));

        let first = sched.schedule_once();
        let second = sched.schedule_once();
        assert_ne!(first, second);
        assert!((first == a && second == b) || (first == b && second == a));
    }

    #[test]
    fn falls_back_to_idle_when_everything_is_sleeping() {
        let sched = Scheduler::default();
        let idle = Task::new(0, 0, true);
        let idle_id = sched.set_idle(idle);

        let a = sched.spawn(Task::new(0, 1, false));
        sched.sleep_until(a, 1000, false);

        let chosen = sched.schedule_once();
        assert_eq!(chosen, idle_id);
    }

    #[test]
    fn wake_only_transitions_sleeping_states() {
        let sched = Scheduler::default();
        let idle = Task::new(0, 0, true);
        sched.set_idle(idle);
        let a = sched.spawn(Task::new(0, 1, false));
        sched.with_task(a, |t| t.state = TaskState::Sleeping);
        assert!(sched.wake(a));
        assert!(!sched.wake(a), "already runnable, nothing to wake");
    }

    #[test]
    fn wake_interruptible_ignores_uninterruptible_sleep() {
        let sched = Scheduler::default();
        let idle = Task::new(0, 0, true);
        sched.set_idle(idle);
        let a = sched.spawn(Task::new(0, 1, false));
        sched.with_task(a, |t| t.state = TaskState::Sleeping);
        assert!(!sched.wake_interruptible(a));
        sched.with_task(a, |t| t.state = TaskState::InterruptibleSleeping);
        assert!(sched.wake_interruptible(a));
    }
}
