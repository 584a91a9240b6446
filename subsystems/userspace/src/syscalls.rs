//! # System Calls
//!
//! ## Calling Convention
//! - Code: the trap frame's code register
//! - Arguments: four argument registers
//! - Result: the result register (negative = error)
//!
//! | code | call   | arguments                     | result                          |
//! |------|--------|-------------------------------|---------------------------------|
//! | 0    | halt   |                               | root only; otherwise -1         |
//! | 1    | exit   | status                        | does not return                 |
//! | 2    | exec   | name, argc, argv              | child pid or -1                 |
//! | 3    | join   | pid, status address           | 1 normal, 0 abnormal, -1 error  |
//! | 6    | read   | fd, buffer, count             | bytes read or -1                |
//! | 7    | write  | fd, buffer, count             | bytes written or -1             |
//!
//! A `read` or `write` whose buffer is not fully mapped moves no bytes and
//! returns 0.
//!
//! `create`, `open`, `close` and `unlink` have codes but no implementation;
//! calling them, or any unknown code, is a kernel panic.

use crate::process::{Pid, Process};
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use keel_memory::LoadConfig;

/// Console input descriptor
pub const STDIN_FD: i32 = 0;
/// Console output descriptor
pub const STDOUT_FD: i32 = 1;

/// System call numbers
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    /// Stop the machine
    Halt = 0,
    /// End the calling process
    Exit = 1,
    /// Start a child process
    Exec = 2,
    /// Wait for a child process
    Join = 3,
    /// Create a file
    Create = 4,
    /// Open a file
    Open = 5,
    /// Read from a descriptor
    Read = 6,
    /// Write to a descriptor
    Write = 7,
    /// Close a descriptor
    Close = 8,
    /// Remove a file
    Unlink = 9,
}

impl Syscall {
    /// Convert from a code
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Syscall::Halt),
            1 => Some(Syscall::Exit),
            2 => Some(Syscall::Exec),
            3 => Some(Syscall::Join),
            4 => Some(Syscall::Create),
            5 => Some(Syscall::Open),
            6 => Some(Syscall::Read),
            7 => Some(Syscall::Write),
            8 => Some(Syscall::Close),
            9 => Some(Syscall::Unlink),
            _ => None,
        }
    }

    /// Get the call name
    pub fn name(self) -> &'static str {
        match self {
            Syscall::Halt => "halt",
            Syscall::Exit => "exit",
            Syscall::Exec => "exec",
            Syscall::Join => "join",
            Syscall::Create => "create",
            Syscall::Open => "open",
            Syscall::Read => "read",
            Syscall::Write => "write",
            Syscall::Close => "close",
            Syscall::Unlink => "unlink",
        }
    }

    /// Does the base kernel implement this call?
    pub fn is_implemented(self) -> bool {
        !matches!(
            self,
            Syscall::Create | Syscall::Open | Syscall::Close | Syscall::Unlink
        )
    }
}

/// What happens to the caller after a system call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallOutcome {
    /// Resume with this result
    Return(i32),
    /// The caller is gone
    Finish,
}

/// Dispatch system call `code` for `process`
pub fn dispatch(process: &Arc<Process>, code: i32, args: [i32; 4]) -> SyscallOutcome {
    let kernel = process.kernel();
    kernel.stats().syscall();

    let Some(syscall) = Syscall::from_code(code) else {
        kernel.panic(&format!("process {} made unknown system call {}", process.pid(), code));
    };
    log::trace!("Process {}: {}{:?}", process.pid(), syscall.name(), args);

    match syscall {
        Syscall::Halt => handle_halt(process),
        Syscall::Exit => {
            process.exit(args[0]);
            SyscallOutcome::Finish
        }
        Syscall::Exec => SyscallOutcome::Return(handle_exec(process, args[0], args[1], args[2])),
        Syscall::Join => SyscallOutcome::Return(handle_join(process, args[0], args[1])),
        Syscall::Read => SyscallOutcome::Return(handle_read(process, args[0], args[1], args[2])),
        Syscall::Write => SyscallOutcome::Return(handle_write(process, args[0], args[1], args[2])),
        Syscall::Create | Syscall::Open | Syscall::Close | Syscall::Unlink => kernel.panic(&format!(
            "process {} called unimplemented system call {}",
            process.pid(),
            syscall.name()
        )),
    }
}

fn handle_halt(process: &Process) -> SyscallOutcome {
    if !process.is_root() {
        log::debug!("Process {}: halt refused, not the root process", process.pid());
        return SyscallOutcome::Return(-1);
    }
    process.kernel().halt()
}

fn handle_exec(process: &Arc<Process>, name_addr: i32, argc: i32, argv_addr: i32) -> i32 {
    if name_addr < 0 || argc < 0 || argv_addr < 0 {
        log::debug!(
            "Process {}: exec rejected (name {}, argc {}, argv {})",
            process.pid(),
            name_addr,
            argc,
            argv_addr
        );
        return -1;
    }

    let config = *process.kernel().config();
    let memory = process.address_space();

    let Some(name) = memory.read_string(name_addr, config.max_file_name_length) else {
        log::debug!("Process {}: exec file name unreadable", process.pid());
        return -1;
    };
    if !name.ends_with(config.executable_suffix) {
        log::debug!("Process {}: exec of {} lacks {}", process.pid(), name, config.executable_suffix);
        return -1;
    }

    let Some(args) = read_arguments(process, argc, argv_addr, config.max_argument_length) else {
        log::debug!("Process {}: exec arguments unreadable", process.pid());
        return -1;
    };

    match process.exec(&name, &args) {
        Ok(pid) => pid,
        Err(error) => {
            log::debug!("Process {}: exec of {} failed: {}", process.pid(), name, error);
            -1
        }
    }
}

fn read_arguments(process: &Process, argc: i32, argv_addr: i32, max_len: usize) -> Option<Vec<String>> {
    let memory = process.address_space();
    (0..argc)
        .map(|index| {
            let slot = index
                .checked_mul(LoadConfig::POINTER_SIZE as i32)
                .and_then(|offset| argv_addr.checked_add(offset))?;
            let pointer = memory.read_word(slot)?;
            memory.read_string(pointer, max_len)
        })
        .collect()
}

fn handle_join(process: &Process, pid: Pid, status_addr: i32) -> i32 {
    if status_addr < 0 {
        log::debug!("Process {}: join with bad status address {}", process.pid(), status_addr);
        return -1;
    }

    match process.join(pid) {
        Err(_) => {
            log::debug!("Process {}: join on {} which is not a child", process.pid(), pid);
            -1
        }
        Ok(None) => 0,
        Ok(Some(status)) => {
            if process.address_space().write_word(status_addr, status) {
                1
            } else {
                log::debug!("Process {}: cannot store status of {}", process.pid(), pid);
                0
            }
        }
    }
}

/// Is the user buffer `[buf_addr, buf_addr + count)` fully mapped?
///
/// Checked before the console is touched, so a bad buffer moves no bytes
/// in either direction.
fn buffer_mapped(process: &Process, buf_addr: i32, count: usize) -> bool {
    let mapped = process.address_space().is_mapped(buf_addr, count);
    if !mapped {
        log::debug!(
            "Process {}: buffer {:#x}+{} is not mapped",
            process.pid(),
            buf_addr,
            count
        );
    }
    mapped
}

fn handle_read(process: &Process, fd: i32, buf_addr: i32, count: i32) -> i32 {
    if fd != STDIN_FD || count < 0 {
        return -1;
    }
    let count = count as usize;
    if count == 0 || !buffer_mapped(process, buf_addr, count) {
        return 0;
    }

    let mut buffer = vec![0u8; count];
    let received = match process.kernel().console().read(&mut buffer) {
        Some(received) if received > 0 => received.min(count),
        _ => return -1,
    };

    if process.address_space().write(buf_addr, &buffer[..received]) != received {
        return -1;
    }
    received as i32
}

fn handle_write(process: &Process, fd: i32, buf_addr: i32, count: i32) -> i32 {
    if fd != STDOUT_FD || count < 0 {
        return -1;
    }
    let count = count as usize;
    if count == 0 || !buffer_mapped(process, buf_addr, count) {
        return 0;
    }

    let mut buffer = vec![0u8; count];
    if process.address_space().read(buf_addr, &mut buffer) != count {
        return -1;
    }
    match process.kernel().console().write(&buffer) {
        Some(written) if written == count => written as i32,
        _ => -1,
    }
}
