//! Scripted processor.
//!
//! A user program is a Rust closure registered under an entry point. The
//! closure talks to the kernel through a [`UserSession`], which turns each
//! call into the trap the real processor would raise. A program that
//! returns without being finished by the kernel has run off the end of its
//! code and raises an illegal-instruction exception.

use crate::trap::{ExceptionCause, Processor, TrapAction, TrapFrame, TrapHandler, UserContext};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Body of a scripted program
pub type Script = Arc<dyn Fn(&mut UserSession<'_>) + Send + Sync>;

/// The running program's view of the machine
pub struct UserSession<'a> {
    handler: &'a mut dyn TrapHandler,
    context: UserContext,
    pc: u32,
    finished: bool,
}

impl<'a> UserSession<'a> {
    fn new(handler: &'a mut dyn TrapHandler, context: UserContext) -> Self {
        Self {
            handler,
            context,
            pc: context.entry_pc,
            finished: false,
        }
    }

    /// Register state the program started with
    pub fn context(&self) -> UserContext {
        self.context
    }

    /// Current program counter
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Has the kernel taken the processor away from this program?
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Execute a system call. `None` if the call did not return.
    pub fn syscall(&mut self, code: i32, args: [i32; 4]) -> Option<i32> {
        if self.finished {
            return None;
        }
        let mut frame = TrapFrame::syscall(self.pc, code, args);
        match self.handler.handle_trap(ExceptionCause::Syscall, &mut frame) {
            TrapAction::Resume => {
                self.pc = frame.pc;
                Some(frame.result)
            }
            TrapAction::Finish => {
                self.finished = true;
                None
            }
        }
    }

    /// Raise a processor exception other than a system call
    pub fn raise(&mut self, cause: ExceptionCause, bad_vaddr: u32) -> TrapAction {
        if self.finished {
            return TrapAction::Finish;
        }
        let mut frame = TrapFrame {
            pc: self.pc,
            next_pc: self.pc.wrapping_add(TrapFrame::INSTRUCTION_SIZE),
            bad_vaddr,
            ..TrapFrame::default()
        };
        let action = self.handler.handle_trap(cause, &mut frame);
        if action == TrapAction::Finish {
            self.finished = true;
        }
        action
    }

    /// Load bytes from user memory
    pub fn read(&self, vaddr: i32, buf: &mut [u8]) -> usize {
        self.handler.memory().read(vaddr, buf)
    }

    /// Store bytes into user memory
    pub fn write(&self, vaddr: i32, data: &[u8]) -> usize {
        self.handler.memory().write(vaddr, data)
    }

    /// Load a little-endian word
    pub fn read_word(&self, vaddr: i32) -> Option<i32> {
        let mut buf = [0u8; 4];
        (self.read(vaddr, &mut buf) == buf.len()).then(|| i32::from_le_bytes(buf))
    }

    /// Store a little-endian word
    pub fn write_word(&self, vaddr: i32, value: i32) -> bool {
        self.write(vaddr, &value.to_le_bytes()) == 4
    }

    /// Store a NUL-terminated string
    pub fn write_string(&self, vaddr: i32, text: &str) -> bool {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.write(vaddr, &bytes) == bytes.len()
    }

    /// Load a NUL-terminated string of at most `max_len` bytes
    pub fn read_string(&self, vaddr: i32, max_len: usize) -> Option<String> {
        let mut buf = vec![0u8; max_len + 1];
        let count = self.read(vaddr, &mut buf);
        let end = buf[..count].iter().position(|byte| *byte == 0)?;
        String::from_utf8(buf[..end].to_vec()).ok()
    }

    /// Decode the argument vector set up by the kernel
    pub fn arguments(&self) -> Vec<String> {
        (0..self.context.argc)
            .filter_map(|index| {
                let slot = self.context.argv.wrapping_add(index * 4) as i32;
                let pointer = self.read_word(slot)?;
                self.read_string(pointer, 256)
            })
            .collect()
    }
}

/// Processor running [`Script`]s keyed by entry point
#[derive(Default)]
pub struct ScriptedProcessor {
    scripts: spin::RwLock<BTreeMap<u32, Script>>,
}

impl ScriptedProcessor {
    /// Create a processor with no programs
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the program entered at `entry_pc`
    pub fn install<F>(&self, entry_pc: u32, script: F)
    where
        F: Fn(&mut UserSession<'_>) + Send + Sync + 'static,
    {
        self.scripts.write().insert(entry_pc, Arc::new(script));
    }
}

impl core::fmt::Debug for ScriptedProcessor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ScriptedProcessor")
            .field("entry_points", &self.scripts.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Processor for ScriptedProcessor {
    fn run(&self, context: UserContext, handler: &mut dyn TrapHandler) {
        let script = self.scripts.read().get(&context.entry_pc).cloned();
        let mut session = UserSession::new(handler, context);
        if let Some(script) = script {
            script(&mut session);
        }
        if !session.is_finished() {
            let pc = session.pc();
            session.raise(ExceptionCause::IllegalInstruction, pc);
        }
    }
}
