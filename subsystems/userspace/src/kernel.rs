//! # Kernel
//!
//! The context object shared by every process: the collaborators, the
//! physical page pool, the pid allocator and the process table. There is
//! no global kernel state; everything hangs off one `Arc<Kernel>`.

use crate::config::KernelConfig;
use crate::process::{Pid, Process, ProcessTable};
use crate::variant::{ProcessVariant, UserVariant};
use crate::{UserError, UserResult};
use alloc::string::String;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use keel_hal::{Console, ExecutableStore, MainMemory, Processor, Substrate};
use keel_memory::PagePool;
use spin::Mutex;

/// The collaborators a kernel runs on
#[derive(Clone)]
pub struct Machine {
    /// Threads, ticks and interrupt masking
    pub substrate: Arc<dyn Substrate>,
    /// Physical memory
    pub memory: Arc<MainMemory>,
    /// Console byte stream
    pub console: Arc<dyn Console>,
    /// Where executables are opened from
    pub executables: Arc<dyn ExecutableStore>,
    /// Runs user programs
    pub processor: Arc<dyn Processor>,
}

impl core::fmt::Debug for Machine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Machine")
            .field("memory", &self.memory)
            .finish_non_exhaustive()
    }
}

/// Kernel counters
#[derive(Debug, Default)]
pub struct KernelStats {
    /// Process records created
    pub processes_created: AtomicU64,
    /// Programs loaded into an address space
    pub programs_loaded: AtomicU64,
    /// System calls dispatched
    pub syscalls: AtomicU64,
    /// Processes that ended without calling exit
    pub abnormal_exits: AtomicU64,
}

impl KernelStats {
    /// Create zeroed counters
    pub const fn new() -> Self {
        Self {
            processes_created: AtomicU64::new(0),
            programs_loaded: AtomicU64::new(0),
            syscalls: AtomicU64::new(0),
            abnormal_exits: AtomicU64::new(0),
        }
    }

    /// Increment processes created
    pub fn process_created(&self) {
        self.processes_created.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment programs loaded
    pub fn program_loaded(&self) {
        self.programs_loaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment system calls
    pub fn syscall(&self) {
        self.syscalls.fetch_add(1, Ordering::Relaxed);
    }

    /// Increment abnormal exits
    pub fn abnormal_exit(&self) {
        self.abnormal_exits.fetch_add(1, Ordering::Relaxed);
    }
}

/// Kernel context
pub struct Kernel {
    machine: Machine,
    pool: Arc<PagePool>,
    config: KernelConfig,
    variant: Arc<dyn ProcessVariant>,
    next_pid: Mutex<Pid>,
    booted: AtomicBool,
    processes: ProcessTable,
    stats: KernelStats,
}

impl Kernel {
    /// Create a kernel whose processes use [`UserVariant`]
    pub fn new(machine: Machine, config: KernelConfig) -> Arc<Self> {
        Self::with_variant(machine, config, Arc::new(UserVariant))
    }

    /// Create a kernel whose processes use `variant`
    pub fn with_variant(
        machine: Machine,
        config: KernelConfig,
        variant: Arc<dyn ProcessVariant>,
    ) -> Arc<Self> {
        let pool = Arc::new(PagePool::new(machine.memory.num_pages()));
        log::info!(
            "Kernel: {} physical pages of {} bytes",
            pool.total_pages(),
            machine.memory.page_size()
        );
        Arc::new(Self {
            machine,
            pool,
            next_pid: Mutex::new(config.root_pid),
            config,
            variant,
            booted: AtomicBool::new(false),
            processes: ProcessTable::new(),
            stats: KernelStats::new(),
        })
    }

    /// Start the root process running `program`.
    ///
    /// Only the first call can succeed; the root pid is used up even if
    /// the program fails to load.
    pub fn boot(self: &Arc<Self>, program: &str, args: &[String]) -> UserResult<Arc<Process>> {
        if self.booted.swap(true, Ordering::SeqCst) {
            return Err(UserError::AlreadyBooted);
        }

        let root = self.create_process(None);
        if let Err(error) = root.load(program, args) {
            log::error!("Kernel: cannot load {}: {}", program, error);
            return Err(error);
        }
        root.start()?;

        log::info!("Kernel: booted {} as process {}", program, root.pid());
        Ok(root)
    }

    /// Create an empty process record
    pub fn create_process(self: &Arc<Self>, parent: Option<&Arc<Process>>) -> Arc<Process> {
        let pid = self.allocate_pid();
        let process = Arc::new(Process::new(pid, Arc::clone(self), parent));
        self.processes.register(&process);
        self.stats.process_created();
        log::debug!(
            "Kernel: created process {} (parent {:?})",
            pid,
            parent.map(|parent| parent.pid())
        );
        process
    }

    fn allocate_pid(&self) -> Pid {
        let mut next = self.next_pid.lock();
        let pid = *next;
        *next += 1;
        pid
    }

    /// Stop the machine
    pub fn halt(&self) -> ! {
        log::info!("Kernel: halting at tick {}", self.machine.substrate.now());
        self.machine.substrate.terminate()
    }

    /// Report a fatal kernel error and stop the machine
    pub fn panic(&self, reason: &str) -> ! {
        log::error!("Kernel panic: {}", reason);
        self.machine.substrate.terminate()
    }

    /// Execution substrate
    pub fn substrate(&self) -> &Arc<dyn Substrate> {
        &self.machine.substrate
    }

    /// Physical memory
    pub fn memory(&self) -> &Arc<MainMemory> {
        &self.machine.memory
    }

    /// Console
    pub fn console(&self) -> &Arc<dyn Console> {
        &self.machine.console
    }

    /// Executable store
    pub fn executables(&self) -> &Arc<dyn ExecutableStore> {
        &self.machine.executables
    }

    /// Processor
    pub fn processor(&self) -> &Arc<dyn Processor> {
        &self.machine.processor
    }

    /// Physical page pool
    pub fn pool(&self) -> &Arc<PagePool> {
        &self.pool
    }

    /// Configuration
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Variant given to every new process
    pub fn variant(&self) -> &Arc<dyn ProcessVariant> {
        &self.variant
    }

    /// Live processes
    pub fn processes(&self) -> &ProcessTable {
        &self.processes
    }

    /// Counters
    pub fn stats(&self) -> &KernelStats {
        &self.stats
    }
}

impl core::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kernel")
            .field("pool", &self.pool)
            .field("processes", &self.processes)
            .field("stats", &self.stats)
            .finish()
    }
}
