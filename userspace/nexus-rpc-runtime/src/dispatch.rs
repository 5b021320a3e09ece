// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: worker pool pulling inbound calls off the driver
//!
//! A process serves inbound calls either with dedicated worker threads,
//! with the caller's own thread via [`DispatchPool::join`], or by
//! wiring the driver's poll descriptor into an existing event loop and
//! draining one call per readiness event. The pool is configured once;
//! the thread budget cannot be renegotiated after threads exist.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use log::{debug, trace, warn};
use parking_lot::Mutex;
use thiserror::Error;

use crate::driver::{DriverError, InboundCall, PollFd, RpcDriver};

/// Errors raised while configuring or running the dispatch pool.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The pool's thread budget was already set.
    #[error("dispatch pool is already configured")]
    AlreadyConfigured,
    /// A thread budget must admit at least one thread.
    #[error("invalid dispatch thread count {0}")]
    InvalidThreadCount(usize),
    /// The host refused to start a worker thread.
    #[error("worker thread spawn failed: {0}")]
    Spawn(std::io::Error),
    /// The process driver was already installed.
    #[error("process transport already initialized")]
    AlreadyInitialized,
    /// No process driver is installed yet.
    #[error("process transport not initialized")]
    NotInitialized,
    /// The driver failed underneath the pool.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

struct PoolShared {
    driver: Arc<dyn RpcDriver>,
    configured: Mutex<bool>,
    post_tasks: Mutex<VecDeque<Box<dyn FnOnce() + Send>>>,
}

/// Worker pool bound to one transport driver.
pub struct DispatchPool {
    shared: Arc<PoolShared>,
}

impl DispatchPool {
    /// Creates an unconfigured pool over `driver`.
    pub fn new(driver: Arc<dyn RpcDriver>) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                driver,
                configured: Mutex::new(false),
                post_tasks: Mutex::new(VecDeque::new()),
            }),
        }
    }

    /// Sets the thread budget and starts the workers.
    ///
    /// `max_threads` counts the caller's thread when it intends to
    /// [`DispatchPool::join`] later, so `caller_will_join` reduces the
    /// spawn count by one. A second configuration attempt is rejected
    /// and changes nothing.
    pub fn configure(&self, max_threads: usize, caller_will_join: bool) -> Result<(), DispatchError> {
        if max_threads == 0 {
            return Err(DispatchError::InvalidThreadCount(0));
        }
        let mut configured = self.shared.configured.lock();
        if *configured {
            warn!("dispatch pool already configured, keeping existing threads");
            return Err(DispatchError::AlreadyConfigured);
        }
        let spawn_count = max_threads - usize::from(caller_will_join);
        for index in 0..spawn_count {
            let shared = self.shared.clone();
            thread::Builder::new()
                .name(format!("rpc-worker-{index}"))
                .spawn(move || worker_loop(&shared))
                .map_err(DispatchError::Spawn)?;
        }
        *configured = true;
        debug!("dispatch pool configured, {spawn_count} worker threads spawned");
        Ok(())
    }

    /// Turns the calling thread into a worker until the driver closes.
    ///
    /// Joining is independent of configuration; a caller may serve as
    /// the only dispatch thread without ever configuring the pool.
    pub fn join(&self) {
        debug!("caller thread joining dispatch pool");
        worker_loop(&self.shared);
    }

    /// Descriptor an external event loop can poll for inbound calls.
    pub fn setup_polling(&self) -> Result<PollFd, DispatchError> {
        Ok(self.shared.driver.poll_descriptor()?)
    }

    /// Serves at most one inbound call in response to poll readiness.
    ///
    /// Single-consumer: the descriptor must not be polled by the worker
    /// threads' driver queue and an event loop at the same time from
    /// multiple threads.
    pub fn handle_poll_ready(&self, fd: PollFd) -> Result<(), DispatchError> {
        trace!("poll readiness on fd {}", fd.raw());
        if let Some(call) = self.shared.driver.try_next_inbound()? {
            deliver(call);
            run_post_tasks(&self.shared);
        }
        Ok(())
    }

    /// Queues a task to run on a dispatch thread after the call it is
    /// currently serving completes.
    ///
    /// Tasks run in FIFO order and never while a reply is still
    /// pending.
    pub fn add_post_dispatch_task<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.shared.post_tasks.lock().push_back(Box::new(task));
    }
}

fn worker_loop(shared: &PoolShared) {
    debug!("dispatch worker running");
    while let Some(call) = shared.driver.next_inbound() {
        deliver(call);
        run_post_tasks(shared);
    }
    debug!("dispatch worker exiting, driver closed");
}

fn deliver(call: InboundCall) {
    let InboundCall { target, code, request, reply } = call;
    if let Some((policy, priority)) = target.scheduling_hint() {
        trace!("dispatching call {code} under {policy:?} priority {priority}");
    }
    reply.send(target.dispatch(code, &request));
}

fn run_post_tasks(shared: &PoolShared) {
    loop {
        // The task runs outside the queue lock.
        let task = shared.post_tasks.lock().pop_front();
        match task {
            Some(task) => task(),
            None => break,
        }
    }
}
