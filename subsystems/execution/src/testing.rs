//! Host harness shared by the unit tests.

use alloc::boxed::Box;
use alloc::sync::Arc;
use keel_hal::host::{HostConfig, HostOutcome, HostSubstrate};
use keel_hal::{Substrate, ThreadId};

/// Boot a fresh host substrate with `main` as its first thread
pub fn boot<F>(main: F) -> HostOutcome
where
    F: FnOnce(Arc<dyn Substrate>) + Send + 'static,
{
    boot_with(HostConfig::new(), main)
}

/// Same as [`boot`] with an explicit configuration
pub fn boot_with<F>(config: HostConfig, main: F) -> HostOutcome
where
    F: FnOnce(Arc<dyn Substrate>) + Send + 'static,
{
    let host = Arc::new(HostSubstrate::new(config));
    let substrate: Arc<dyn Substrate> = host.clone();
    host.boot(move || main(substrate))
}

/// Start a thread, panicking if the substrate refuses
pub fn spawn<F>(substrate: &Arc<dyn Substrate>, name: &str, body: F) -> ThreadId
where
    F: FnOnce() + Send + 'static,
{
    substrate.spawn(name, Box::new(body)).unwrap()
}
