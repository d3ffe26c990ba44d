#![no_main]
#![no_std]

extern crate alloc;

mod os;

use core::fmt::Write;

use linked_list_allocator::LockedHeap;
use log::info;
use uefi::prelude::*;

use kestrel::config::KernelConfig;
use kestrel::task::{Task, TaskState};
use kestrel::{arch, console, sched};

#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Park the CPU until the next interrupt, or spin on hosted targets where
/// there's no such instruction.
#[cfg(all(not(test), target_arch = "x86_64"))]
fn halt() {
    unsafe { core::arch::asm!("hlt", options(nomem, nostack)) };
}

#[cfg(any(test, not(target_arch = "x86_64")))]
fn halt() {}

#[entry]
fn os_main(_image_handle: Handle, mut system_table: SystemTable<Boot>) -> Status {
    uefi_services::init(&mut system_table).unwrap();

    {
        let stdout = system_table.stdout();
        _ = stdout.clear();
        _ = stdout.write_str("Booting\n");
    }

    os::memory::store_usable_memory_regions(&system_table);

    let config = KernelConfig {
        usable_memory_bytes: os::memory::total_usable_bytes(),
        ..KernelConfig::default()
    };

    let (heap_start, heap_size) = os::memory::largest_region().expect("no usable memory region reported by firmware");
    let heap_size = core::cmp::min(heap_size as usize, config.heap_size_bytes);
    unsafe {
        ALLOCATOR.lock().init(heap_start as *mut u8, heap_size);
    }

    console::init_logging();
    info!(
        "usable memory: {} bytes, heap: {} bytes at {:#x}",
        config.usable_memory_bytes, heap_size, heap_start
    );

    arch::gdt::init();
    arch::idt::init();

    let scheduler = sched::Scheduler::new();
    let idle_pid = scheduler.alloc_pid();
    let mut idle = Task::new(0, idle_pid, true);
    idle.state = TaskState::Runnable;
    scheduler.set_idle(idle);

    _ = system_table.stdout().write_str("Boot complete, entering idle loop\n");

    loop {
        scheduler.advance_tick();
        scheduler.schedule_once();
        halt();
    }
}
