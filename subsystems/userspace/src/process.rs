//! # Processes
//!
//! A process owns one address space and, once started, one substrate
//! thread. Parents hold their children strongly until they join or exit;
//! children see their parent through a weak link that is cleared when
//! either side goes away.

use crate::kernel::Kernel;
use crate::variant::ProcessVariant;
use crate::{UserError, UserResult};
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use keel_execution::{Lock, ThreadId};
use keel_hal::{ExceptionCause, TrapAction, TrapFrame, TrapHandler, UserContext, UserMemory};
use keel_memory::AddressSpace;
use spin::Mutex;

/// Process ID
pub type Pid = i32;

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Record exists, nothing loaded
    Created,
    /// Address space built, thread not started
    Loaded,
    /// Thread started
    Running,
    /// Exited or terminated; resources returned
    Exited,
}

/// A user process
pub struct Process {
    pid: Pid,
    kernel: Arc<Kernel>,
    variant: Arc<dyn ProcessVariant>,
    state: Mutex<ProcessState>,
    address_space: AddressSpace,
    context: Mutex<Option<UserContext>>,
    thread: Mutex<Option<ThreadId>>,
    parent: Mutex<Weak<Process>>,
    children: Mutex<BTreeMap<Pid, Arc<Process>>>,
    /// Serializes children writing their exit status into this process
    exit_lock: Lock,
    exit_statuses: Mutex<BTreeMap<Pid, i32>>,
}

impl Process {
    pub(crate) fn new(pid: Pid, kernel: Arc<Kernel>, parent: Option<&Arc<Process>>) -> Self {
        let address_space = AddressSpace::new(
            Arc::clone(kernel.memory()),
            Arc::clone(kernel.pool()),
            kernel.config().load,
        );
        Self {
            pid,
            variant: Arc::clone(kernel.variant()),
            exit_lock: Lock::new(Arc::clone(kernel.substrate())),
            kernel,
            state: Mutex::new(ProcessState::Created),
            address_space,
            context: Mutex::new(None),
            thread: Mutex::new(None),
            parent: Mutex::new(parent.map(Arc::downgrade).unwrap_or_default()),
            children: Mutex::new(BTreeMap::new()),
            exit_statuses: Mutex::new(BTreeMap::new()),
        }
    }

    /// Process ID
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The kernel this process belongs to
    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    /// Current lifecycle state
    pub fn state(&self) -> ProcessState {
        *self.state.lock()
    }

    fn set_state(&self, state: ProcessState) {
        *self.state.lock() = state;
    }

    /// Is this the root process?
    pub fn is_root(&self) -> bool {
        self.pid == self.kernel.config().root_pid
    }

    /// The process's address space
    pub fn address_space(&self) -> &AddressSpace {
        &self.address_space
    }

    /// Register state the program starts with, once loaded
    pub fn context(&self) -> Option<UserContext> {
        *self.context.lock()
    }

    /// Substrate thread, once started
    pub fn thread(&self) -> Option<ThreadId> {
        *self.thread.lock()
    }

    /// Parent process, if it is still attached
    pub fn parent(&self) -> Option<Arc<Process>> {
        self.parent.lock().upgrade()
    }

    /// IDs of the children this process still owns
    pub fn children(&self) -> Vec<Pid> {
        self.children.lock().keys().copied().collect()
    }

    /// Does this process own child `pid`?
    pub fn has_child(&self, pid: Pid) -> bool {
        self.children.lock().contains_key(&pid)
    }

    /// Exit status recorded by child `pid`, if it exited normally
    pub fn exit_status_of(&self, pid: Pid) -> Option<i32> {
        self.exit_statuses.lock().get(&pid).copied()
    }

    /// Open `program` and build the address space for it
    pub fn load(&self, program: &str, args: &[String]) -> UserResult<()> {
        if self.state() != ProcessState::Created {
            return Err(UserError::InvalidState);
        }

        let executable = self.kernel.executables().open(program)?;
        let context = self.variant.load(self, &*executable, args).map_err(|error| {
            log::debug!("Process {}: loading {} failed: {}", self.pid, program, error);
            error
        })?;

        *self.context.lock() = Some(context);
        self.set_state(ProcessState::Loaded);
        self.kernel.stats().program_loaded();
        log::debug!(
            "Process {}: loaded {} ({} pages, entry {:#x})",
            self.pid,
            program,
            self.address_space.mapped_pages(),
            context.entry_pc
        );
        Ok(())
    }

    /// Start the thread that runs the loaded program
    pub fn start(self: &Arc<Self>) -> UserResult<ThreadId> {
        if self.state() != ProcessState::Loaded {
            return Err(UserError::InvalidState);
        }

        // Running before the spawn: the new thread may exit before spawn returns
        self.set_state(ProcessState::Running);
        let process = Arc::clone(self);
        let name = format!("process#{}", self.pid);
        let spawned = self
            .kernel
            .substrate()
            .spawn(&name, Box::new(move || process.run()));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(error) => {
                self.set_state(ProcessState::Loaded);
                return Err(error.into());
            }
        };

        *self.thread.lock() = Some(thread);
        log::info!("Process {}: started on {}", self.pid, thread);
        Ok(thread)
    }

    fn run(self: Arc<Self>) {
        let Some(context) = self.context() else {
            self.terminate_abnormally("no program loaded");
            return;
        };

        let mut dispatcher = Dispatcher { process: &self };
        self.kernel.processor().run(context, &mut dispatcher);

        if self.state() != ProcessState::Exited {
            self.terminate_abnormally("processor stopped");
        }
    }

    /// Run `program` in a new child process and return the child's ID.
    ///
    /// The child is linked before its thread starts. Nothing of a child
    /// that failed to load survives.
    pub fn exec(self: &Arc<Self>, program: &str, args: &[String]) -> UserResult<Pid> {
        let child = self.kernel.create_process(Some(self));
        child.load(program, args)?;

        self.children.lock().insert(child.pid, Arc::clone(&child));
        if let Err(error) = child.start() {
            self.children.lock().remove(&child.pid);
            return Err(error);
        }
        Ok(child.pid)
    }

    /// Wait for child `pid` to finish, then disown it.
    ///
    /// Returns its exit status, or `None` if it terminated abnormally.
    /// Fails without blocking if `pid` is not a child of this process.
    pub fn join(&self, pid: Pid) -> UserResult<Option<i32>> {
        let child = self
            .children
            .lock()
            .get(&pid)
            .cloned()
            .ok_or(UserError::NotChild)?;

        if let Some(thread) = child.thread() {
            self.kernel.substrate().join(thread);
        }

        *child.parent.lock() = Weak::new();
        self.children.lock().remove(&pid);
        drop(child);

        self.exit_lock.acquire();
        let status = self.exit_statuses.lock().remove(&pid);
        self.exit_lock.release();
        Ok(status)
    }

    fn record_exit_status(&self, pid: Pid, status: i32) {
        self.exit_lock.acquire();
        self.exit_statuses.lock().entry(pid).or_insert(status);
        self.exit_lock.release();
    }

    /// Exit normally with `status`.
    ///
    /// Records the status with the parent, returns every page and orphans
    /// the children. The root process halts the machine instead of
    /// returning.
    pub fn exit(&self, status: i32) {
        if self.state() == ProcessState::Exited {
            return;
        }

        if let Some(parent) = self.parent() {
            parent.record_exit_status(self.pid, status);
        }
        self.release_resources();
        log::info!("Process {}: exited with status {}", self.pid, status);

        if self.is_root() {
            self.kernel.halt();
        }
    }

    /// End the process without recording an exit status
    pub fn terminate_abnormally(&self, reason: &str) {
        if self.state() == ProcessState::Exited {
            return;
        }

        self.kernel.stats().abnormal_exit();
        self.release_resources();
        log::warn!("Process {}: terminated abnormally ({})", self.pid, reason);

        if self.is_root() {
            self.kernel.halt();
        }
    }

    fn release_resources(&self) {
        self.set_state(ProcessState::Exited);

        let pages = self.address_space.unload();
        let children = core::mem::take(&mut *self.children.lock());
        for child in children.values() {
            *child.parent.lock() = Weak::new();
        }
        *self.parent.lock() = Weak::new();

        log::trace!(
            "Process {}: returned {} pages, orphaned {} children",
            self.pid,
            pages,
            children.len()
        );
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.kernel.processes().unregister(self.pid);
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("state", &self.state())
            .field("thread", &self.thread())
            .field("children", &self.children())
            .finish()
    }
}

/// Routes the processor's traps to the process's variant
struct Dispatcher<'a> {
    process: &'a Arc<Process>,
}

impl TrapHandler for Dispatcher<'_> {
    fn handle_trap(&mut self, cause: ExceptionCause, frame: &mut TrapFrame) -> TrapAction {
        self.process
            .variant
            .handle_exception(self.process, cause, frame)
    }

    fn memory(&self) -> &dyn UserMemory {
        &self.process.address_space
    }
}

/// Weak registry of live processes
#[derive(Default)]
pub struct ProcessTable {
    entries: Mutex<BTreeMap<Pid, Weak<Process>>>,
}

impl ProcessTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, process: &Arc<Process>) {
        self.entries.lock().insert(process.pid, Arc::downgrade(process));
    }

    pub(crate) fn unregister(&self, pid: Pid) {
        self.entries.lock().remove(&pid);
    }

    /// Look up a live process
    pub fn get(&self, pid: Pid) -> Option<Arc<Process>> {
        let entry = self.entries.lock().get(&pid).cloned();
        entry?.upgrade()
    }

    /// Number of live process records
    pub fn live(&self) -> usize {
        self.entries.lock().len()
    }

    /// IDs of live process records
    pub fn pids(&self) -> Vec<Pid> {
        self.entries.lock().keys().copied().collect()
    }
}

impl core::fmt::Debug for ProcessTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ProcessTable")
            .field("pids", &self.pids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{exec, exit, join, Harness};
    use core::sync::atomic::{AtomicBool, Ordering};
    use keel_hal::host::{HostOutcome, HostSubstrate};
    use keel_hal::{HalError, HalResult, InterruptState, Substrate, ThreadEntry, TickHandler};

    /// Runs every new thread as soon as it is spawned, before `spawn`
    /// returns to its caller. Refuses to spawn while `refuse` is set.
    struct Preempting {
        host: Arc<HostSubstrate>,
        refuse: Arc<AtomicBool>,
    }

    impl Substrate for Preempting {
        fn now(&self) -> u64 {
            self.host.now()
        }

        fn current_thread(&self) -> ThreadId {
            self.host.current_thread()
        }

        fn disable_interrupts(&self) -> InterruptState {
            self.host.disable_interrupts()
        }

        fn restore_interrupts(&self, state: InterruptState) {
            self.host.restore_interrupts(state)
        }

        fn interrupts_enabled(&self) -> bool {
            self.host.interrupts_enabled()
        }

        fn block_current(&self) {
            self.host.block_current()
        }

        fn make_ready(&self, thread: ThreadId) {
            self.host.make_ready(thread)
        }

        fn yield_now(&self) {
            self.host.yield_now()
        }

        fn set_tick_handler(&self, handler: TickHandler) {
            self.host.set_tick_handler(handler)
        }

        fn spawn(&self, name: &str, entry: ThreadEntry) -> HalResult<ThreadId> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(HalError::OutOfMemory);
            }
            let thread = self.host.spawn(name, entry)?;
            self.host.yield_now();
            Ok(thread)
        }

        fn join(&self, thread: ThreadId) {
            self.host.join(thread)
        }

        fn terminate(&self) -> ! {
            self.host.terminate()
        }
    }

    fn preempting(refuse: &Arc<AtomicBool>) -> Harness {
        let refuse = Arc::clone(refuse);
        Harness::with_substrate(move |host: &Arc<HostSubstrate>| -> Arc<dyn Substrate> {
            Arc::new(Preempting {
                host: Arc::clone(host),
                refuse,
            })
        })
    }

    #[test]
    fn test_join_returns_exit_status() {
        let harness = Harness::new();
        harness.program("child.coff", |session| exit(session, 7));
        harness.program("root.coff", |session| {
            let child = exec(session, "child.coff", &[]);
            assert_eq!(child, 1);
            assert_eq!(join(session, child), (1, 7));
            // disowned after the first join
            assert_eq!(join(session, child).0, -1);
            exit(session, 0);
        });

        assert_eq!(harness.run("root.coff", &[]), HostOutcome::Terminated);
        assert_eq!(harness.kernel.stats().programs_loaded.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_join_rejects_non_children() {
        let harness = Harness::new();
        harness.program("root.coff", |session| {
            assert_eq!(join(session, 99).0, -1);
            assert_eq!(join(session, 0).0, -1);
            assert_eq!(join(session, -3).0, -1);
            exit(session, 0);
        });

        assert_eq!(harness.run("root.coff", &[]), HostOutcome::Terminated);
    }

    #[test]
    fn test_faulting_child_is_abnormal() {
        let harness = Harness::new();
        let pool = Arc::clone(harness.kernel.pool());
        harness.program("fault.coff", |session| {
            assert_eq!(session.raise(ExceptionCause::PageFault, 0x7fff_0000), TrapAction::Finish);
            assert!(session.is_finished());
        });
        harness.program("runaway.coff", |_session| {});
        harness.program("root.coff", move |session| {
            let free = pool.free_pages();
            let faulting = exec(session, "fault.coff", &[]);
            assert_eq!(join(session, faulting), (0, -1));
            let runaway = exec(session, "runaway.coff", &[]);
            assert_eq!(join(session, runaway), (0, -1));
            assert_eq!(pool.free_pages(), free);
            exit(session, 0);
        });

        assert_eq!(harness.run("root.coff", &[]), HostOutcome::Terminated);
        assert_eq!(harness.kernel.stats().abnormal_exits.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_exited_child_stays_joinable() {
        let harness = Harness::new();
        let host = Arc::clone(&harness.host);
        let kernel = Arc::downgrade(&harness.kernel);
        harness.program("quick.coff", |session| exit(session, 5));
        harness.program("root.coff", move |session| {
            let child = exec(session, "quick.coff", &[]);
            for _ in 0..10 {
                host.yield_now();
            }

            let kernel = kernel.upgrade().unwrap();
            let record = kernel.processes().get(child).unwrap();
            assert_eq!(record.state(), ProcessState::Exited);
            assert_eq!(record.address_space().mapped_pages(), 0);
            drop(record);

            assert_eq!(join(session, child), (1, 5));
            assert!(kernel.processes().get(child).is_none());
            exit(session, 0);
        });

        assert_eq!(harness.run("root.coff", &[]), HostOutcome::Terminated);
    }

    #[test]
    fn test_exit_orphans_children() {
        let harness = Harness::new();
        let kernel = Arc::downgrade(&harness.kernel);
        let released = Arc::new(AtomicBool::new(false));

        let host = Arc::clone(&harness.host);
        let gate = Arc::clone(&released);
        harness.program("grandchild.coff", move |session| {
            while !gate.load(Ordering::SeqCst) {
                host.yield_now();
            }
            exit(session, 0);
        });
        harness.program("middle.coff", |session| {
            let grandchild = exec(session, "grandchild.coff", &[]);
            exit(session, grandchild);
        });
        harness.program("root.coff", move |session| {
            let middle = exec(session, "middle.coff", &[]);
            let (result, grandchild) = join(session, middle);
            assert_eq!(result, 1);

            let kernel = kernel.upgrade().unwrap();
            let record = kernel.processes().get(grandchild).unwrap();
            assert_eq!(record.state(), ProcessState::Running);
            assert!(record.parent().is_none());
            drop(record);
            assert!(kernel.processes().get(middle).is_none());

            // not ours to join
            assert_eq!(join(session, grandchild).0, -1);
            released.store(true, Ordering::SeqCst);
            exit(session, 0);
        });

        assert_eq!(harness.run("root.coff", &[]), HostOutcome::Terminated);
    }

    #[test]
    fn test_exec_failure_discards_child() {
        let harness = Harness::new();
        harness.store.insert_malformed("broken.coff");
        let pool = Arc::clone(harness.kernel.pool());
        let kernel = Arc::downgrade(&harness.kernel);
        harness.program("root.coff", move |session| {
            let free = pool.free_pages();
            assert_eq!(exec(session, "broken.coff", &[]), -1);
            assert_eq!(exec(session, "absent.coff", &[]), -1);
            assert_eq!(pool.free_pages(), free);

            let kernel = kernel.upgrade().unwrap();
            assert_eq!(kernel.processes().pids(), [0]);
            exit(session, 0);
        });

        assert_eq!(harness.run("root.coff", &[]), HostOutcome::Terminated);
    }

    #[test]
    fn test_child_exiting_inside_start_stays_exited() {
        let harness = preempting(&Arc::new(AtomicBool::new(false)));
        let kernel = Arc::downgrade(&harness.kernel);
        harness.program("quick.coff", |session| exit(session, 4));
        harness.program("root.coff", move |session| {
            let child = exec(session, "quick.coff", &[]);
            assert_eq!(child, 1);

            let kernel = kernel.upgrade().unwrap();
            let record = kernel.processes().get(child).unwrap();
            assert_eq!(record.state(), ProcessState::Exited);
            assert!(record.thread().is_some());
            drop(record);

            assert_eq!(join(session, child), (1, 4));
            exit(session, 0);
        });

        assert_eq!(harness.run("root.coff", &[]), HostOutcome::Terminated);
    }

    #[test]
    fn test_failed_spawn_leaves_process_loaded() {
        let refuse = Arc::new(AtomicBool::new(true));
        let harness = preempting(&refuse);
        harness.program("idle.coff", |session| exit(session, 0));
        let kernel = &harness.kernel;

        let _root = kernel.create_process(None);
        let process = kernel.create_process(None);
        process.load("idle.coff", &[]).unwrap();
        assert_eq!(
            process.start().unwrap_err(),
            UserError::Hal(HalError::OutOfMemory)
        );
        assert_eq!(process.state(), ProcessState::Loaded);
        assert!(process.thread().is_none());

        process.terminate_abnormally("test");
        assert_eq!(kernel.pool().free_pages(), kernel.pool().total_pages());
    }

    #[test]
    fn test_lifecycle_states() {
        let harness = Harness::new();
        harness.program("idle.coff", |session| exit(session, 0));
        let kernel = &harness.kernel;

        let _root = kernel.create_process(None);
        let process = kernel.create_process(None);
        assert!(!process.is_root());
        assert_eq!(process.state(), ProcessState::Created);
        assert_eq!(process.start().unwrap_err(), UserError::InvalidState);
        process.load("idle.coff", &[]).unwrap();
        assert_eq!(process.state(), ProcessState::Loaded);
        assert_eq!(process.address_space().mapped_pages(), 10);
        assert_eq!(
            process.load("idle.coff", &[]).unwrap_err(),
            UserError::InvalidState
        );
        assert!(process.context().is_some());
        assert!(process.thread().is_none());

        process.terminate_abnormally("test");
        assert_eq!(process.state(), ProcessState::Exited);
        assert_eq!(kernel.pool().free_pages(), kernel.pool().total_pages());
    }
}
