//! # Host Implementations
//!
//! In-process implementations of every collaborator, for running the kernel
//! core on a development machine:
//! - [`HostSubstrate`]: a uniprocessor built from OS threads, only one of
//!   which runs at any time
//! - [`RamImage`] / [`RamImageStore`]: executables held in memory
//! - [`BufferConsole`]: console streams backed by byte buffers
//! - [`ScriptedProcessor`]: a processor whose "programs" are Rust closures
//!   issuing system calls

mod substrate;
mod image;
mod console;
mod processor;

pub use substrate::{HostConfig, HostOutcome, HostSubstrate};
pub use image::{RamImage, RamImageStore};
pub use console::BufferConsole;
pub use processor::{Script, ScriptedProcessor, UserSession};
