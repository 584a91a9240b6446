//! # Processor and Traps
//!
//! The processor runs a user program until it traps. Every trap is handed
//! to the kernel's [`TrapHandler`], which decides whether the program
//! resumes or its thread is done with the processor.

/// Cause of a processor trap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionCause {
    /// The program executed a system call
    Syscall,
    /// Reference to an invalid virtual page
    PageFault,
    /// Translation lookaside buffer miss
    TlbMiss,
    /// Write to a read-only page
    ReadOnly,
    /// Physical address outside main memory
    BusError,
    /// Misaligned or otherwise invalid virtual address
    AddressError,
    /// Arithmetic overflow
    Overflow,
    /// Undecodable instruction
    IllegalInstruction,
}

impl ExceptionCause {
    /// Human-readable name
    pub fn name(self) -> &'static str {
        match self {
            Self::Syscall => "syscall",
            Self::PageFault => "page fault",
            Self::TlbMiss => "TLB miss",
            Self::ReadOnly => "read-only violation",
            Self::BusError => "bus error",
            Self::AddressError => "address error",
            Self::Overflow => "overflow",
            Self::IllegalInstruction => "illegal instruction",
        }
    }
}

/// Registers visible to the trap handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrapFrame {
    /// System call code register
    pub code: i32,
    /// System call argument registers
    pub args: [i32; 4],
    /// Result register
    pub result: i32,
    /// Program counter of the trapping instruction
    pub pc: u32,
    /// Program counter of the following instruction
    pub next_pc: u32,
    /// Faulting virtual address, when the cause has one
    pub bad_vaddr: u32,
}

impl TrapFrame {
    /// Width of one instruction in bytes
    pub const INSTRUCTION_SIZE: u32 = 4;

    /// Build a frame for a system call at `pc`
    pub fn syscall(pc: u32, code: i32, args: [i32; 4]) -> Self {
        Self {
            code,
            args,
            result: 0,
            pc,
            next_pc: pc.wrapping_add(Self::INSTRUCTION_SIZE),
            bad_vaddr: 0,
        }
    }

    /// Step past the trapping instruction
    pub fn advance_pc(&mut self) {
        self.pc = self.next_pc;
        self.next_pc = self.next_pc.wrapping_add(Self::INSTRUCTION_SIZE);
    }
}

/// What the processor does after a trap has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapAction {
    /// Continue the user program
    Resume,
    /// The thread is done with the processor
    Finish,
}

/// Initial register state of a freshly loaded program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UserContext {
    /// Entry program counter
    pub entry_pc: u32,
    /// Initial stack pointer
    pub initial_sp: u32,
    /// Number of arguments
    pub argc: u32,
    /// Virtual address of the argument pointer array
    pub argv: u32,
}

/// Byte access to the address space of the running program
pub trait UserMemory {
    /// Copy out of user memory. Returns the number of bytes transferred.
    fn read(&self, vaddr: i32, buf: &mut [u8]) -> usize;

    /// Copy into user memory. Returns the number of bytes transferred.
    fn write(&self, vaddr: i32, data: &[u8]) -> usize;
}

/// Kernel entry point for traps
pub trait TrapHandler {
    /// Handle one trap. May rewrite `frame` before the program resumes.
    fn handle_trap(&mut self, cause: ExceptionCause, frame: &mut TrapFrame) -> TrapAction;

    /// Address space of the program this handler serves
    fn memory(&self) -> &dyn UserMemory;
}

/// Processor abstraction
pub trait Processor: Send + Sync {
    /// Run a user program on the current thread until the handler answers
    /// [`TrapAction::Finish`].
    fn run(&self, context: UserContext, handler: &mut dyn TrapHandler);
}
