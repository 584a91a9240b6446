//! Host harness shared by the unit tests.
//!
//! Programs are one text page each, so every process owns ten pages with
//! the default layout: text at page 0, stack at pages 1-8, arguments at
//! page 9. The helpers below use the stack pages as scratch memory.

use crate::config::KernelConfig;
use crate::kernel::{Kernel, Machine};
use crate::syscalls::Syscall;
use crate::variant::ProcessVariant;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};
use keel_hal::host::{
    BufferConsole, HostOutcome, HostSubstrate, RamImage, RamImageStore, ScriptedProcessor,
    UserSession,
};
use keel_hal::{MachineConfig, MainMemory, Substrate};

/// Where [`exec`] stores the file name
pub const NAME_ADDR: i32 = 1024;
/// Where [`join`] asks for the exit status
pub const STATUS_ADDR: i32 = 1280;
/// Where [`exec`] builds the argument pointer array
pub const ARGV_ADDR: i32 = 1536;
/// Where [`exec`] stores argument strings
pub const STRINGS_ADDR: i32 = 2048;

/// A kernel wired to host collaborators
pub struct Harness {
    pub host: Arc<HostSubstrate>,
    pub console: Arc<BufferConsole>,
    pub store: Arc<RamImageStore>,
    pub processor: Arc<ScriptedProcessor>,
    pub kernel: Arc<Kernel>,
    next_entry: AtomicU32,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(BufferConsole::new(), None, unwrapped)
    }

    pub fn with_input(input: &[u8]) -> Self {
        Self::build(BufferConsole::with_input(input), None, unwrapped)
    }

    pub fn with_variant(variant: Arc<dyn ProcessVariant>) -> Self {
        Self::build(BufferConsole::new(), Some(variant), unwrapped)
    }

    /// The kernel runs on whatever `wrap` builds around the host substrate
    pub fn with_substrate<W>(wrap: W) -> Self
    where
        W: FnOnce(&Arc<HostSubstrate>) -> Arc<dyn Substrate>,
    {
        Self::build(BufferConsole::new(), None, wrap)
    }

    fn build<W>(console: BufferConsole, variant: Option<Arc<dyn ProcessVariant>>, wrap: W) -> Self
    where
        W: FnOnce(&Arc<HostSubstrate>) -> Arc<dyn Substrate>,
    {
        let host = Arc::new(HostSubstrate::default());
        let console = Arc::new(console);
        let store = Arc::new(RamImageStore::new());
        let processor = Arc::new(ScriptedProcessor::new());

        let machine = Machine {
            substrate: wrap(&host),
            memory: Arc::new(MainMemory::new(MachineConfig::new())),
            console: console.clone(),
            executables: store.clone(),
            processor: processor.clone(),
        };
        let config = KernelConfig::new();
        let kernel = match variant {
            Some(variant) => Kernel::with_variant(machine, config, variant),
            None => Kernel::new(machine, config),
        };

        Self {
            host,
            console,
            store,
            processor,
            kernel,
            next_entry: AtomicU32::new(0x100),
        }
    }

    /// Register `name` as a one-page program running `script`
    pub fn program<F>(&self, name: &str, script: F)
    where
        F: Fn(&mut UserSession<'_>) + Send + Sync + 'static,
    {
        let entry = self.next_entry.fetch_add(0x100, Ordering::Relaxed);
        self.store.insert(name, RamImage::new(entry).with_text(1, &[]));
        self.processor.install(entry, script);
    }

    /// Boot `program` as the root process and run until the machine stops
    pub fn run(&self, program: &str, args: &[&str]) -> HostOutcome {
        let kernel = Arc::clone(&self.kernel);
        let program = String::from(program);
        let args: Vec<String> = args.iter().map(|arg| String::from(*arg)).collect();
        self.host.boot(move || {
            kernel.boot(&program, &args).unwrap();
        })
    }
}

fn unwrapped(host: &Arc<HostSubstrate>) -> Arc<dyn Substrate> {
    host.clone()
}

/// Call `exit`
pub fn exit(session: &mut UserSession<'_>, status: i32) {
    session.syscall(Syscall::Exit as i32, [status, 0, 0, 0]);
}

/// Call `exec` on `name` with `args`, returning its result
pub fn exec(session: &mut UserSession<'_>, name: &str, args: &[&str]) -> i32 {
    assert!(session.write_string(NAME_ADDR, name));
    let mut cursor = STRINGS_ADDR;
    for (index, arg) in args.iter().enumerate() {
        assert!(session.write_string(cursor, arg));
        assert!(session.write_word(ARGV_ADDR + 4 * index as i32, cursor));
        cursor += arg.len() as i32 + 1;
    }
    session
        .syscall(Syscall::Exec as i32, [NAME_ADDR, args.len() as i32, ARGV_ADDR, 0])
        .unwrap()
}

/// Call `join` on `pid`, returning its result and the stored status
pub fn join(session: &mut UserSession<'_>, pid: i32) -> (i32, i32) {
    assert!(session.write_word(STATUS_ADDR, -1));
    let result = session
        .syscall(Syscall::Join as i32, [pid, STATUS_ADDR, 0, 0])
        .unwrap();
    (result, session.read_word(STATUS_ADDR).unwrap())
}
