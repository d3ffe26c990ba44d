//! Delayed-ACK timer (spec §4.K), grounded on
//! `examples/original_source/src/net/ipv4/tcp_timer.c`'s one-shot
//! `tcp_delack_timer_start`/`tcp_delack_timer_stop`.
//!
//! The original schedules onto a kernel work-timer; there's no timer-wheel
//! subsystem in this crate yet, so this is kept as a plain tick deadline
//! that whatever drives the TCP engine's periodic tick polls.

#[derive(Debug, Clone, Copy, Default)]
pub struct DelayedAck {
    deadline_tick: Option<u64>,
}

impl DelayedAck {
    pub const fn new() -> Self {
        DelayedAck { deadline_tick: None }
    }

    /// `tcp_delack_timer_start`.
    pub fn start(&mut self, now_tick: u64, delay_ticks: u64) {
        self.deadline_tick = Some(now_tick + delay_ticks);
    }

    /// `tcp_delack_timer_stop`.
    pub fn stop(&mut self) {
        self.deadline_tick = None;
    }

    pub fn is_pending(&self) -> bool {
        self.deadline_tick.is_some()
    }

    /// Returns `true` (and disarms) the first time `now_tick` reaches the
    /// deadline set by `start`.
    pub fn poll(&mut self, now_tick: u64) -> bool {
        match self.deadline_tick {
            Some(deadline) if now_tick >= deadline => {
                self.deadline_tick = None;
                true
            }
            _ => false,
        }
    }
}
