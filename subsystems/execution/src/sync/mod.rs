//! # Synchronization Primitives
//!
//! Locks and condition variables built on the substrate's interrupt
//! masking and thread blocking.

pub mod queue;
pub mod lock;
pub mod condition;

pub use queue::WaitQueue;
pub use lock::Lock;
pub use condition::Condition;
