// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process-wide runtime entry points.
//!
//! A process installs its transport driver once with [`init_process`];
//! the free functions here mirror the [`DispatchPool`] operations on
//! the process-wide pool so service main loops do not thread a pool
//! handle through their startup code.

use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::dispatch::{DispatchError, DispatchPool};
use crate::driver::{PollFd, RpcDriver};

static PROCESS_POOL: OnceCell<DispatchPool> = OnceCell::new();

/// Installs the process-wide transport driver. First call wins.
pub fn init_process(driver: Arc<dyn RpcDriver>) -> Result<(), DispatchError> {
    PROCESS_POOL
        .set(DispatchPool::new(driver))
        .map_err(|_| DispatchError::AlreadyInitialized)
}

fn pool() -> Result<&'static DispatchPool, DispatchError> {
    PROCESS_POOL.get().ok_or(DispatchError::NotInitialized)
}

/// Sets the process thread budget and starts the dispatch workers.
pub fn configure_rpc_threadpool(
    max_threads: usize,
    caller_will_join: bool,
) -> Result<(), DispatchError> {
    pool()?.configure(max_threads, caller_will_join)
}

/// Turns the calling thread into a dispatch worker until the process
/// driver closes.
pub fn join_rpc_threadpool() -> Result<(), DispatchError> {
    pool()?.join();
    Ok(())
}

/// Descriptor an event loop can poll for inbound calls on the process
/// driver.
pub fn setup_transport_polling() -> Result<PollFd, DispatchError> {
    pool()?.setup_polling()
}

/// Serves at most one inbound call in response to poll readiness.
pub fn handle_transport_poll(fd: PollFd) -> Result<(), DispatchError> {
    pool()?.handle_poll_ready(fd)
}

/// Queues a task to run on a dispatch thread after its current call.
pub fn add_post_dispatch_task<F>(task: F) -> Result<(), DispatchError>
where
    F: FnOnce() + Send + 'static,
{
    pool()?.add_post_dispatch_task(task);
    Ok(())
}
