//! The round-robin preemptive scheduler.
//!
//! The timer ISR is the kernel's sole preemption source. By the time
//! [`on_timer_tick`] runs, the CPU has already cleared `IF` (vector 32 is an
//! interrupt gate) and `interrupts::isr_dispatch` has already sent the PIC
//! EOI -- missing that ordering would mean the incoming thread resumes with
//! the timer still masked. Voluntary blocking (`read`, `wait`, `futex_wait`,
//! a kernel `Semaphore`/`Mutex`) reaches the same [`reschedule`] through
//! [`block_current`], with interrupts disabled for the same reason: the
//! (demote-current, pick-next, switch) sequence must be atomic with respect
//! to another interrupt touching the process table.
//!
//! `switch` is a plain function call/return, not a ring transition, so
//! nothing here re-enables interrupts explicitly. Whichever mechanism built
//! the incoming thread's saved stack already arranged for that: a resumed
//! `switch` call unwinds back through `isr_common_stub`'s `iretd`, which
//! restores that thread's own saved `EFLAGS` (`IF=1`); a freshly forged
//! kernel thread's trampoline (`switch::kernel_thread_trampoline`) executes
//! an explicit `sti`; a forged trap-return frame carries the `IF=1` it
//! copied from its parent's trap frame.

use super::{switch, BlockReason, Pid, State, PROCESS_TABLE};
use crate::cpu;
use crate::gdt;

/// Finds the next index, starting just after `current` and wrapping around,
/// for which `is_ready` returns `true`. Factored out of [`reschedule`] so
/// the round-robin search order can be unit-tested without a real process
/// table, PCBs, or kernel stacks.
fn next_ready_index(len: usize, current: usize, mut is_ready: impl FnMut(usize) -> bool) -> Option<usize> {
    for offset in 1..=len {
        let idx = (current + offset) % len;
        if is_ready(idx) {
            return Some(idx);
        }
    }
    None
}

/// Entry point from the timer ISR, the kernel's sole preemption source.
/// Must be called after the PIC has already been acknowledged.
pub fn on_timer_tick() {
    reschedule();
}

/// Marks the currently-running PCB `Blocked` for `reason` and switches away.
/// Returns once some other part of the kernel has marked this PCB `Ready`
/// again (via [`super::wake`] or [`super::wake_one_matching`]) and the
/// scheduler has picked it back up.
pub fn block_current(reason: BlockReason) {
    super::with_current(|pcb| {
        pcb.state = State::Blocked;
        pcb.blocked_on = reason;
    });
    reschedule();
}

/// Picks the next `Ready` PCB (round-robin from the current one) and
/// context-switches to it. If the currently-running PCB is still `Running`
/// (a preemption, not a voluntary block), it is demoted to `Ready` first.
/// If no other PCB is `Ready`, returns without switching -- the caller
/// keeps running. PID 0 is always either `Running` or `Ready` and never
/// blocks, so this only returns without switching when PID 0 itself is the
/// lone thread calling in.
fn reschedule() {
    let mut guard = PROCESS_TABLE.lock();
    let table = guard.as_mut().expect("process table initialized");

    let current_idx = table.current;
    let len = table.procs.len();
    let Some(next_idx) = next_ready_index(len, current_idx, |idx| table.procs[idx].state == State::Ready)
    else {
        return;
    };

    if table.procs[current_idx].state == State::Running {
        table.procs[current_idx].state = State::Ready;
    }
    table.procs[next_idx].state = State::Running;
    table.current = next_idx;

    // SAFETY: `current_idx` stays a live index into `table.procs` for as
    // long as this PCB remains in the table, which is guaranteed until some
    // future `wait` reaps it -- long after this pointer is used below.
    let prev_esp_slot = core::ptr::addr_of_mut!(table.procs[current_idx].saved_esp);
    let next_esp = table.procs[next_idx].saved_esp;
    let next_dir = table.procs[next_idx].directory_phys;
    let next_stack_top = table.procs[next_idx].kernel_stack_top();
    let current_dir = table.procs[current_idx].directory_phys;

    // The table must be unlocked before `switch`: the outgoing thread does
    // not return from this call until it is scheduled again, and a spin
    // lock left held across that gap would wedge every other thread that
    // ever needs the process table in the meantime.
    drop(guard);

    gdt::set_kernel_stack(next_stack_top);
    if next_dir != current_dir {
        // SAFETY: `next_dir` is the incoming PCB's own address space,
        // already fully built (kernel PDEs shared, user PDEs its own).
        unsafe { cpu::cr3_write(next_dir) };
    }

    // SAFETY: `next_esp` was produced by a previous `switch`,
    // `forge_kernel_thread`, or `forge_trap_return` call for this exact
    // PCB; `prev_esp_slot` is this PCB's own live `saved_esp` field.
    unsafe { switch::switch(next_esp, prev_esp_slot) };
}

/// Switches away from the currently-running PCB without changing its state
/// (the caller, `sys_exit`, has already set it `Terminated`). Never returns:
/// PID 0 is always `Ready` or `Running` and never blocks, so `reschedule`
/// always finds someone else to switch to.
pub fn exit_reschedule() -> ! {
    reschedule();
    // Unreachable once any PCB has exited, since PID 0 is always available
    // to switch to; kept as a safe fallback rather than an `unreachable!()`.
    crate::hlt_loop()
}

/// Wakes `pid` (see [`super::wake`]) and, if it is PID 0 or otherwise more
/// urgent than whatever is currently running, nothing special happens here
/// -- round robin does not preempt early. The next timer tick or voluntary
/// block picks it up in turn. Exposed so IPC primitives can name the
/// operation without reaching into `task::wake` directly.
pub fn wake(pid: Pid) {
    super::wake(pid);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_case]
    fn next_ready_index_wraps_around() {
        let ready = [false, false, true, false];
        assert_eq!(next_ready_index(4, 0, |i| ready[i]), Some(2));
    }

    #[test_case]
    fn next_ready_index_skips_current() {
        let ready = [true, false, false, false];
        // Starting at index 0: offset 1..=3 visits 1, 2, 3, never 0 again.
        assert_eq!(next_ready_index(4, 0, |i| ready[i]), None);
    }

    #[test_case]
    fn next_ready_index_none_when_nothing_ready() {
        let ready = [false, false, false];
        assert_eq!(next_ready_index(3, 1, |i| ready[i]), None);
    }

    #[test_case]
    fn next_ready_index_prefers_nearest_wraparound_match() {
        let ready = [true, true, false, false];
        assert_eq!(next_ready_index(4, 2, |i| ready[i]), Some(0));
    }
}
