//! Kernel configuration.

use crate::process::Pid;
use keel_memory::LoadConfig;
use static_assertions::const_assert;

/// Kernel-wide settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    /// How address spaces are laid out
    pub load: LoadConfig,
    /// Longest file name `exec` accepts, excluding the NUL
    pub max_file_name_length: usize,
    /// Longest single argument `exec` accepts, excluding the NUL
    pub max_argument_length: usize,
    /// Suffix every executable name must carry
    pub executable_suffix: &'static str,
    /// Id of the first process; only it may halt the machine
    pub root_pid: Pid,
}

impl KernelConfig {
    /// Default file name limit
    pub const DEFAULT_MAX_FILE_NAME_LENGTH: usize = 64;
    /// Default argument limit
    pub const DEFAULT_MAX_ARGUMENT_LENGTH: usize = 256;
    /// Default executable suffix
    pub const DEFAULT_EXECUTABLE_SUFFIX: &'static str = ".coff";
    /// Default root process id
    pub const DEFAULT_ROOT_PID: Pid = 0;

    /// Create the default configuration
    pub const fn new() -> Self {
        Self {
            load: LoadConfig::new(),
            max_file_name_length: Self::DEFAULT_MAX_FILE_NAME_LENGTH,
            max_argument_length: Self::DEFAULT_MAX_ARGUMENT_LENGTH,
            executable_suffix: Self::DEFAULT_EXECUTABLE_SUFFIX,
            root_pid: Self::DEFAULT_ROOT_PID,
        }
    }

    /// Builder: address space layout
    pub const fn with_load(mut self, load: LoadConfig) -> Self {
        self.load = load;
        self
    }

    /// Builder: file name limit
    pub const fn with_max_file_name_length(mut self, length: usize) -> Self {
        self.max_file_name_length = length;
        self
    }

    /// Builder: argument limit
    pub const fn with_max_argument_length(mut self, length: usize) -> Self {
        self.max_argument_length = length;
        self
    }

    /// Builder: executable suffix
    pub const fn with_executable_suffix(mut self, suffix: &'static str) -> Self {
        self.executable_suffix = suffix;
        self
    }

    /// Builder: root process id
    pub const fn with_root_pid(mut self, pid: Pid) -> Self {
        self.root_pid = pid;
        self
    }
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self::new()
    }
}

const_assert!(KernelConfig::DEFAULT_MAX_FILE_NAME_LENGTH <= KernelConfig::DEFAULT_MAX_ARGUMENT_LENGTH);
const_assert!(KernelConfig::DEFAULT_ROOT_PID >= 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let config = KernelConfig::new()
            .with_load(LoadConfig::new().with_stack_pages(2))
            .with_executable_suffix(".elf")
            .with_root_pid(7);
        assert_eq!(config.load.stack_pages, 2);
        assert_eq!(config.executable_suffix, ".elf");
        assert_eq!(config.root_pid, 7);
        assert_eq!(config.max_file_name_length, 64);
        assert_eq!(KernelConfig::default().max_argument_length, 256);
    }
}
