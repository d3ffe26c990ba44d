//! Minimal console/tty abstraction.
//!
//! The `/proc` surface, `log` sink, and the "Seg-Fault - <pid> terminated"
//! user-visible failure message (§7) all need somewhere to write text
//! before a real tty driver exists. Real tty handling (line discipline,
//! termios, VT escape state machine) is out of scope for the core per
//! spec §1 — this is the "external collaborator" seam such a driver would
//! plug into.

use core::fmt::Write;
use spin::Mutex;

/// Anything that can receive kernel text output: a VGA/serial console, or a
/// task's controlling tty.
pub trait Tty: Send {
    fn write_str(&mut self, s: &str);
}

/// A `Tty` that throws output away; used in tests and before a real sink is
/// installed.
pub struct NullTty;

impl Tty for NullTty {
    fn write_str(&mut self, _s: &str) {}
}

/// Global kernel console sink, installed once at boot by `main`.
static CONSOLE: Mutex<Option<alloc::boxed::Box<dyn Tty>>> = Mutex::new(None);

/// Install the console used by `kprint!`/the `log` backend.
pub fn install(tty: alloc::boxed::Box<dyn Tty>) {
    *CONSOLE.lock() = Some(tty);
}

/// Write a line to the installed console, or drop it silently if none is
/// installed yet (mirrors the original's behavior before `tty_init()` runs).
pub fn write_line(args: core::fmt::Arguments<'_>) {
    let mut guard = CONSOLE.lock();
    if let Some(tty) = guard.as_mut() {
        let mut buf = alloc::string::String::new();
        let _ = buf.write_fmt(args);
        buf.push('\n');
        tty.write_str(&buf);
    }
}

struct KernelLogger;

impl log::Log for KernelLogger {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        write_line(format_args!("[{}] {}", record.level(), record.args()));
    }

    fn flush(&self) {}
}

static LOGGER: KernelLogger = KernelLogger;

/// Route the `log` facade to the kernel console. Called once at boot.
pub fn init_logging() {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Trace);
}
