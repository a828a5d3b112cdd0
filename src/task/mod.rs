//! The process/thread model: PCBs, the process table, and the round-robin
//! scheduler.
//!
//! A C kernel would thread the process list through raw intrusive
//! `next`/`prev` pointers. Here it is an owned `Vec<Pcb>` behind a single
//! lock: round-robin iteration becomes a cursor index instead of
//! pointer-chasing, and a blocked PCB records *why* it is blocked
//! (`BlockReason`) instead of sitting on a separate intrusive
//! wait-queue-next pointer. `wait`/`futex_wake` scan the table linearly to
//! find a match -- O(n) in the process count, acceptable at the scale this
//! kernel ever runs.

pub mod scheduler;
pub mod switch;

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::config::KERNEL_STACK_SIZE;
use crate::sync::IrqLock;

pub type Pid = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Ready,
    Running,
    Blocked,
    Terminated,
}

/// Why a `Blocked` PCB is waiting, and the key the corresponding wake call
/// must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    /// Not blocked.
    None,
    /// Blocked in the `read` syscall on an empty keyboard ring.
    Stdin,
    /// Blocked in `wait`, for any child to terminate.
    ChildWait,
    /// Blocked in `futex_wait`, keyed by the futex's virtual address.
    Futex(u32),
}

/// A kernel stack, heap-allocated and owned by exactly one PCB. `Boot` only
/// for PID 0, the kernel's own bootstrap thread, which keeps running on the
/// stack `boot.rs`'s trampoline already set up rather than being handed a
/// fresh one.
enum KernelStack {
    Owned(Box<[u8; KERNEL_STACK_SIZE]>),
    Boot { top: u32 },
}

impl KernelStack {
    fn top(&self) -> u32 {
        match self {
            KernelStack::Owned(stack) => stack.as_ptr() as u32 + KERNEL_STACK_SIZE as u32,
            KernelStack::Boot { top } => *top,
        }
    }
}

pub struct Pcb {
    pub id: Pid,
    pub parent_id: Pid,
    pub state: State,
    /// Valid only while this PCB is not the one currently running: the
    /// scheduler writes the outgoing thread's esp here right before the
    /// switch, so the currently-running PCB's copy is always stale.
    pub saved_esp: u32,
    kernel_stack: KernelStack,
    pub directory_phys: u32,
    pub exit_code: i32,
    pub blocked_on: BlockReason,
}

impl Pcb {
    #[must_use]
    pub fn kernel_stack_top(&self) -> u32 {
        self.kernel_stack.top()
    }
}

struct ProcessTable {
    procs: Vec<Pcb>,
    current: usize,
    next_pid: Pid,
}

impl ProcessTable {
    fn find_index(&self, pid: Pid) -> Option<usize> {
        self.procs.iter().position(|p| p.id == pid)
    }
}

static PROCESS_TABLE: IrqLock<Option<ProcessTable>> = IrqLock::new(None);

/// Seeds the process table with PID 0, the kernel's own bootstrap thread,
/// running on the stack the boot trampoline already established. Must run
/// once, after the kernel directory exists but before interrupts (and thus
/// preemption) are enabled.
pub fn init(kernel_dir_phys: u32, boot_stack_top: u32) {
    let kernel_pcb = Pcb {
        id: 0,
        parent_id: 0,
        state: State::Running,
        saved_esp: 0,
        kernel_stack: KernelStack::Boot { top: boot_stack_top },
        directory_phys: kernel_dir_phys,
        exit_code: 0,
        blocked_on: BlockReason::None,
    };
    let mut table = PROCESS_TABLE.lock();
    *table = Some(ProcessTable {
        procs: alloc::vec![kernel_pcb],
        current: 0,
        next_pid: 1,
    });
}

/// Creates a kernel thread: clones the current (kernel) address space and
/// forges a stack that, once switched to, enables interrupts and calls
/// `entry`. Links it into the table as `Ready`.
pub fn create_task(entry: extern "C" fn() -> !) -> Result<Pid, crate::memory::pmm::OutOfMemory> {
    let current_dir = current_directory_phys();
    let directory_phys = crate::memory::vmm::clone_address_space(current_dir)?;

    let stack = Box::new([0u8; KERNEL_STACK_SIZE]);
    let stack_top = stack.as_ptr() as u32 + KERNEL_STACK_SIZE as u32;
    // SAFETY: `stack_top` backs a freshly allocated, exclusively-owned
    // buffer of `KERNEL_STACK_SIZE` writable bytes.
    let saved_esp = unsafe { switch::forge_kernel_thread(stack_top, entry) };

    let mut guard = PROCESS_TABLE.lock();
    let table = guard.as_mut().expect("process table initialized");
    let id = table.next_pid;
    table.next_pid += 1;
    let parent_id = table.procs[table.current].id;
    table.procs.push(Pcb {
        id,
        parent_id,
        state: State::Ready,
        saved_esp,
        kernel_stack: KernelStack::Owned(stack),
        directory_phys,
        exit_code: 0,
        blocked_on: BlockReason::None,
    });
    Ok(id)
}

/// Allocates a PCB around an already-forged kernel stack and an already
/// (or freshly) owned address space: the shared machinery behind
/// `sys_fork` and `sys_clone`, which differ only in how they got
/// `directory_phys` and `saved_esp`.
pub fn spawn_from_trap(parent_id: Pid, directory_phys: u32, saved_esp: u32, stack: Box<[u8; KERNEL_STACK_SIZE]>) -> Pid {
    let mut guard = PROCESS_TABLE.lock();
    let table = guard.as_mut().expect("process table initialized");
    let id = table.next_pid;
    table.next_pid += 1;
    table.procs.push(Pcb {
        id,
        parent_id,
        state: State::Ready,
        saved_esp,
        kernel_stack: KernelStack::Owned(stack),
        directory_phys,
        exit_code: 0,
        blocked_on: BlockReason::None,
    });
    id
}

/// The PID of the currently-running PCB.
#[must_use]
pub fn current_pid() -> Pid {
    let guard = PROCESS_TABLE.lock();
    let table = guard.as_ref().expect("process table initialized");
    table.procs[table.current].id
}

/// The page directory of the currently-running PCB.
#[must_use]
pub fn current_directory_phys() -> u32 {
    let guard = PROCESS_TABLE.lock();
    let table = guard.as_ref().expect("process table initialized");
    table.procs[table.current].directory_phys
}

/// The top of the currently-running PCB's kernel stack.
#[must_use]
pub fn current_kernel_stack_top() -> u32 {
    let guard = PROCESS_TABLE.lock();
    let table = guard.as_ref().expect("process table initialized");
    table.procs[table.current].kernel_stack_top()
}

/// Runs `f` with mutable access to the currently-running PCB.
pub fn with_current<R>(f: impl FnOnce(&mut Pcb) -> R) -> R {
    let mut guard = PROCESS_TABLE.lock();
    let table = guard.as_mut().expect("process table initialized");
    let idx = table.current;
    f(&mut table.procs[idx])
}

/// Runs `f` with mutable access to the PCB identified by `pid`, if it still
/// exists in the table.
pub fn with_pcb<R>(pid: Pid, f: impl FnOnce(&mut Pcb) -> R) -> Option<R> {
    let mut guard = PROCESS_TABLE.lock();
    let table = guard.as_mut().expect("process table initialized");
    let idx = table.find_index(pid)?;
    Some(f(&mut table.procs[idx]))
}

/// Marks `pid` `Ready`, if it is currently `Blocked`. Used by `exit` (waking
/// a waiting parent).
pub fn wake(pid: Pid) {
    with_pcb(pid, |pcb| {
        if pcb.state == State::Blocked {
            pcb.state = State::Ready;
            pcb.blocked_on = BlockReason::None;
        }
    });
}

/// Wakes the first `Blocked` PCB whose `blocked_on` matches `reason`.
/// Returns its PID, if any. Used by `futex_wake`.
pub fn wake_one_matching(reason: BlockReason) -> Option<Pid> {
    let mut guard = PROCESS_TABLE.lock();
    let table = guard.as_mut().expect("process table initialized");
    let pcb = table
        .procs
        .iter_mut()
        .find(|p| p.state == State::Blocked && p.blocked_on == reason)?;
    pcb.state = State::Ready;
    pcb.blocked_on = BlockReason::None;
    Some(pcb.id)
}

/// Finds a `Terminated` child of `parent_id`, removes it from the table, and
/// returns its `(pid, exit_code, directory_phys)`. Dropping the removed
/// `Pcb` frees its kernel stack; the caller is responsible for destroying
/// `directory_phys`, which may still be shared with a surviving thread in
/// the same group.
pub fn reap_child(parent_id: Pid) -> Option<(Pid, i32, u32)> {
    let mut guard = PROCESS_TABLE.lock();
    let table = guard.as_mut().expect("process table initialized");
    let idx = table
        .procs
        .iter()
        .position(|p| p.parent_id == parent_id && p.state == State::Terminated)?;
    let pcb = table.procs.remove(idx);
    if table.current > idx {
        table.current -= 1;
    }
    Some((pcb.id, pcb.exit_code, pcb.directory_phys))
}

/// Reparents every live child of `exited_id` to PID 0, so an exiting
/// process's children remain reapable by someone instead of lingering in the
/// table forever once their real parent is gone.
pub fn reparent_orphans(exited_id: Pid) {
    let mut guard = PROCESS_TABLE.lock();
    let table = guard.as_mut().expect("process table initialized");
    for pcb in &mut table.procs {
        if pcb.parent_id == exited_id {
            pcb.parent_id = 0;
        }
    }
}

/// Whether `parent_id` has at least one child that is not yet `Terminated`.
/// Used by `wait` to decide whether to block.
#[must_use]
pub fn has_running_child(parent_id: Pid) -> bool {
    let guard = PROCESS_TABLE.lock();
    let table = guard.as_ref().expect("process table initialized");
    table
        .procs
        .iter()
        .any(|p| p.parent_id == parent_id && p.state != State::Terminated)
}

/// The directory and stack-top of the PCB identified by `pid`, used by the
/// scheduler when it installs the incoming thread.
#[must_use]
pub fn pcb_directory_and_stack(pid: Pid) -> Option<(u32, u32)> {
    let guard = PROCESS_TABLE.lock();
    let table = guard.as_ref().expect("process table initialized");
    let idx = table.find_index(pid)?;
    let pcb = &table.procs[idx];
    Some((pcb.directory_phys, pcb.kernel_stack_top()))
}
