//! Console backed by byte buffers.

use crate::console::Console;
use std::collections::VecDeque;

/// Console whose input is preloaded and whose output is captured
#[derive(Debug, Default)]
pub struct BufferConsole {
    input: spin::Mutex<VecDeque<u8>>,
    output: spin::Mutex<Vec<u8>>,
}

impl BufferConsole {
    /// Create a console with empty streams
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a console whose input stream holds `input`
    pub fn with_input(input: &[u8]) -> Self {
        let console = Self::new();
        console.push_input(input);
        console
    }

    /// Append bytes to the input stream
    pub fn push_input(&self, input: &[u8]) {
        self.input.lock().extend(input.iter().copied());
    }

    /// Everything written so far
    pub fn output(&self) -> Vec<u8> {
        self.output.lock().clone()
    }
}

impl Console for BufferConsole {
    fn read(&self, buf: &mut [u8]) -> Option<usize> {
        let mut input = self.input.lock();
        if input.is_empty() {
            return None;
        }
        let count = buf.len().min(input.len());
        for (slot, byte) in buf.iter_mut().zip(input.drain(..count)) {
            *slot = byte;
        }
        Some(count)
    }

    fn write(&self, data: &[u8]) -> Option<usize> {
        self.output.lock().extend_from_slice(data);
        Some(data.len())
    }
}
