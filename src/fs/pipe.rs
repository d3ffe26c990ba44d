//! Pipe/FIFO ring (spec §4.I), grounded on
//! `examples/original_source/src/fs/pipe.c`.
//!
//! The original buffers a list of fixed-size pages, each trimmed by
//! `(start, len)` as it drains. Since nothing outside this module inspects
//! page boundaries, a single byte ring sized `max_pages * PAGE_SIZE`
//! (`sync::ring::RingBuffer<u8>`) gives the same FIFO/backpressure contract
//! with far less bookkeeping; recorded as a substitution in DESIGN.md.
//! Signal delivery (`SIGPIPE` on write-to-orphan) is decoupled the same way
//! `sync::waitqueue` decouples from `task`: callers pass a closure rather
//! than this module depending on `task::Task` directly.

use crate::config::{PAGE_SIZE, PIPE_DEFAULT_MAX_PAGES};
use crate::error::{Errno, KResult};
use crate::sync::mutex::{Mutex, Parker};
use crate::sync::ring::RingBuffer;
use crate::sync::waitqueue::{TaskId, WaitQueue};

struct PipeState {
    ring: RingBuffer<u8>,
    readers: u32,
    writers: u32,
}

pub struct Pipe {
    state: Mutex<PipeState>,
    read_queue: WaitQueue,
    write_queue: WaitQueue,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PollFlags: u32 {
        const POLLIN  = 1 << 0;
        const POLLOUT = 1 << 1;
        const POLLHUP = 1 << 2;
    }
}

impl Pipe {
    pub fn new() -> Self {
        Self::with_max_pages(PIPE_DEFAULT_MAX_PAGES)
    }

    pub fn with_max_pages(max_pages: usize) -> Self {
        Pipe {
            state: Mutex::new(PipeState {
                ring: RingBuffer::new(max_pages * PAGE_SIZE),
                readers: 0,
                writers: 0,
            }),
            read_queue: WaitQueue::new(),
            write_queue: WaitQueue::new(),
        }
    }

    pub fn open_read(&self, parker: &dyn Parker) {
        self.state.lock(parker).readers += 1;
    }

    pub fn open_write(&self, parker: &dyn Parker) {
        self.state.lock(parker).writers += 1;
    }

    /// `pipe_release`: drop a reader or writer reference; wake the opposite
    /// queue when the count reaches zero so waiters notice EOF/orphan.
    pub fn close_read(&self, parker: &dyn Parker) {
        let mut g = self.state.lock(parker);
        g.readers -= 1;
        if g.readers == 0 {
            drop(g);
            self.write_queue.wake_all(|id| {
                parker.wake(id);
            });
        }
    }

    pub fn close_write(&self, parker: &dyn Parker) {
        let mut g = self.state.lock(parker);
        g.writers -= 1;
        if g.writers == 0 {
            drop(g);
            self.read_queue.wake_all(|id| {
                parker.wake(id);
            });
        }
    }

    /// `pipe_read` (spec §4.I "Read").
    pub fn read(
        &self,
        out: &mut [u8],
        nonblock: bool,
        me: TaskId,
        parker: &dyn Parker,
    ) -> KResult<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        loop {
            let mut g = self.state.lock(parker);
            if !g.ring.is_empty() {
                let mut n = 0;
                while n < out.len() {
                    match g.ring.pop() {
                        Some(b) => {
                            out[n] = b;
                            n += 1;
                        }
                        None => break,
                    }
                }
                drop(g);
                self.write_queue.wake_all(|id| {
                    parker.wake(id);
                });
                return Ok(n);
            }
            if g.writers == 0 {
                return Ok(0); // EOF
            }
            if nonblock {
                return Err(Errno::Again);
            }
            self.read_queue.register(me);
            drop(g);
            parker.park_and_yield(me, true);
            self.read_queue.unregister(me);
        }
    }

    /// `pipe_write` (spec §4.I "Write"). `on_broken_pipe` is invoked (to
    /// queue `SIGPIPE` on the caller's task) exactly when `EPIPE` is
    /// returned.
    pub fn write(
        &self,
        data: &[u8],
        nonblock: bool,
        me: TaskId,
        parker: &dyn Parker,
        on_broken_pipe: impl FnOnce(),
    ) -> KResult<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        {
            let g = self.state.lock(parker);
            if g.readers == 0 {
                drop(g);
                on_broken_pipe();
                return Err(Errno::Pipe);
            }
        }

        let mut written = 0;
        while written < data.len() {
            let mut g = self.state.lock(parker);
            if g.readers == 0 {
                drop(g);
                if written > 0 {
                    return Ok(written);
                }
                on_broken_pipe();
                return Err(Errno::Pipe);
            }
            while written < data.len() {
                match g.ring.try_push(data[written]) {
                    Ok(()) => written += 1,
                    Err(_) => break,
                }
            }
            let room_left = !g.ring.is_full();
            drop(g);
            self.read_queue.wake_all(|id| {
                parker.wake(id);
            });
            if written == data.len() {
                return Ok(written);
            }
            if room_left {
                continue;
            }
            if nonblock {
                return if written > 0 { Ok(written) } else { Err(Errno::Again) };
            }
            self.write_queue.register(me);
            parker.park_and_yield(me, true);
            self.write_queue.unregister(me);
        }
        Ok(written)
    }

    /// `open()` for the FIFO path (spec §4.I "FIFO open"): non-blocking
    /// read opens always succeed; non-blocking write opens fail `ENXIO`
    /// when there are no readers yet.
    pub fn fifo_open_nonblock_write(&self, parker: &dyn Parker) -> KResult<()> {
        if self.state.lock(parker).readers == 0 {
            return Err(Errno::NxIo);
        }
        Ok(())
    }

    pub fn poll(&self, parker: &dyn Parker) -> PollFlags {
        let g = self.state.lock(parker);
        let mut flags = PollFlags::empty();
        if !g.ring.is_empty() || g.writers == 0 {
            flags.insert(PollFlags::POLLIN);
        }
        if !g.ring.is_full() || g.readers == 0 {
            flags.insert(PollFlags::POLLOUT);
        }
        if g.readers == 0 || g.writers == 0 {
            flags.insert(PollFlags::POLLHUP);
        }
        flags
    }
}

impl Default for Pipe {
    fn default() -> Self {
        Self::new()
    }
}
