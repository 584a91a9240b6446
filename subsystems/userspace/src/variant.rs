//! # Process Variants
//!
//! How a process loads its program and reacts to traps. The kernel hands
//! the same variant to every process it creates. Extended kernels wrap
//! [`UserVariant`] to add system calls of their own.

use crate::process::Process;
use crate::syscalls::{self, SyscallOutcome};
use crate::UserResult;
use alloc::string::String;
use alloc::sync::Arc;
use keel_hal::{ExceptionCause, Executable, TrapAction, TrapFrame, UserContext};

/// Per-kernel process behavior
pub trait ProcessVariant: Send + Sync {
    /// Build `process`'s address space for `executable`
    fn load(
        &self,
        process: &Process,
        executable: &dyn Executable,
        args: &[String],
    ) -> UserResult<UserContext> {
        Ok(process.address_space().load(executable, args)?)
    }

    /// Handle system call `code`
    fn handle_syscall(&self, process: &Arc<Process>, code: i32, args: [i32; 4]) -> SyscallOutcome;

    /// Handle a trap raised while `process` runs.
    ///
    /// System calls go to [`ProcessVariant::handle_syscall`]; their result
    /// lands in the result register and the program counter moves past the
    /// call. Every other cause terminates the process abnormally.
    fn handle_exception(
        &self,
        process: &Arc<Process>,
        cause: ExceptionCause,
        frame: &mut TrapFrame,
    ) -> TrapAction {
        if cause != ExceptionCause::Syscall {
            log::debug!(
                "Process {}: {} at pc {:#x}, address {:#x}",
                process.pid(),
                cause.name(),
                frame.pc,
                frame.bad_vaddr
            );
            process.terminate_abnormally(cause.name());
            return TrapAction::Finish;
        }

        match self.handle_syscall(process, frame.code, frame.args) {
            SyscallOutcome::Return(result) => {
                frame.result = result;
                frame.advance_pc();
                TrapAction::Resume
            }
            SyscallOutcome::Finish => TrapAction::Finish,
        }
    }
}

/// The base system-call set
#[derive(Debug, Clone, Copy, Default)]
pub struct UserVariant;

impl ProcessVariant for UserVariant {
    fn handle_syscall(&self, process: &Arc<Process>, code: i32, args: [i32; 4]) -> SyscallOutcome {
        syscalls::dispatch(process, code, args)
    }
}
