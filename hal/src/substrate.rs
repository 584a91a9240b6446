//! # Execution Substrate
//!
//! The substrate multiplexes many logical threads onto one execution
//! context. It preempts only through its periodic tick callback, so the
//! sole atomicity primitive the kernel needs is masking that callback:
//! [`Substrate::disable_interrupts`] / [`Substrate::restore_interrupts`].

use crate::{HalResult, ThreadId};
use alloc::boxed::Box;
use alloc::sync::Arc;

/// Body of a thread started with [`Substrate::spawn`]
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

/// Periodic timer callback installed with [`Substrate::set_tick_handler`]
pub type TickHandler = Arc<dyn Fn() + Send + Sync + 'static>;

/// Interrupt status saved by [`Substrate::disable_interrupts`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "the previous interrupt state must be restored"]
pub struct InterruptState(bool);

impl InterruptState {
    /// Wrap a raw "interrupts were enabled" flag
    pub const fn from_enabled(enabled: bool) -> Self {
        Self(enabled)
    }

    /// Were interrupts enabled when this state was captured?
    pub const fn was_enabled(self) -> bool {
        self.0
    }
}

/// Execution substrate abstraction
pub trait Substrate: Send + Sync {
    /// Current value of the monotonic tick clock
    fn now(&self) -> u64;

    /// The thread currently executing
    fn current_thread(&self) -> ThreadId;

    /// Mask the tick callback, returning the previous state
    fn disable_interrupts(&self) -> InterruptState;

    /// Restore a state returned by [`Substrate::disable_interrupts`]
    fn restore_interrupts(&self, state: InterruptState);

    /// Is the tick callback currently unmasked?
    fn interrupts_enabled(&self) -> bool;

    /// Park the current thread until some other thread calls
    /// [`Substrate::make_ready`] on it.
    ///
    /// Interrupts must be disabled by the caller. They are still disabled
    /// when the thread resumes.
    fn block_current(&self);

    /// Move a blocked thread to the ready pool
    fn make_ready(&self, thread: ThreadId);

    /// Give up the processor to the next ready thread, if any
    fn yield_now(&self);

    /// Install the periodic tick callback
    fn set_tick_handler(&self, handler: TickHandler);

    /// Create a thread and place it in the ready pool
    fn spawn(&self, name: &str, entry: ThreadEntry) -> HalResult<ThreadId>;

    /// Block until `thread` has finished. Returns immediately if it already has.
    fn join(&self, thread: ThreadId);

    /// Stop the whole machine
    fn terminate(&self) -> !;
}

/// RAII interrupt mask
///
/// Disables interrupts on creation and restores the previous state on drop.
pub struct InterruptGuard<'a> {
    substrate: &'a dyn Substrate,
    previous: InterruptState,
}

impl<'a> InterruptGuard<'a> {
    /// Disable interrupts until the guard is dropped
    pub fn new(substrate: &'a dyn Substrate) -> Self {
        let previous = substrate.disable_interrupts();
        Self { substrate, previous }
    }

    /// Were interrupts enabled before this guard?
    pub fn previous(&self) -> InterruptState {
        self.previous
    }
}

impl Drop for InterruptGuard<'_> {
    fn drop(&mut self) {
        self.substrate.restore_interrupts(self.previous);
    }
}

impl core::fmt::Debug for InterruptGuard<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InterruptGuard")
            .field("previous", &self.previous)
            .finish()
    }
}
