//! # Console
//!
//! Byte-stream console. Input and output are independent streams.

/// Console abstraction
pub trait Console: Send + Sync {
    /// Read whatever input is available into `buf`.
    ///
    /// Returns the number of bytes read, or `None` at end of stream or on
    /// error.
    fn read(&self, buf: &mut [u8]) -> Option<usize>;

    /// Write `data` to the output stream.
    ///
    /// Returns the number of bytes accepted, or `None` on error.
    fn write(&self, data: &[u8]) -> Option<usize>;
}
