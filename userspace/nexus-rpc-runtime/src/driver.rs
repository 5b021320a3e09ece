// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Seam between the call runtime and the transport driver.
//!
//! Everything above this module is driver-agnostic: proxies send
//! through [`RpcDriver::send_call`], the worker pool pulls inbound work
//! through [`RpcDriver::next_inbound`], and death notifications are
//! registered against the driver's watch table. The in-process
//! [`LoopbackDriver`](crate::loopback::LoopbackDriver) is the reference
//! implementation; a kernel-backed driver plugs in behind the same
//! trait.

use std::fmt;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use log::debug;
use thiserror::Error;

use crate::object::ServiceStub;
use crate::parcel::MsgParcel;
use crate::status::{CallError, TransportCode};

/// Driver-scoped identity of an exposed endpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(pub u64);

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "endpoint {}", self.0)
    }
}

/// Ticket for a registered death watch, used to unregister it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchId(pub u64);

/// Pollable descriptor handed to an external event loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollFd(pub i32);

impl PollFd {
    /// Raw descriptor value for the host poll facility.
    pub fn raw(self) -> i32 {
        self.0
    }
}

/// Driver-side callback fired when a watched endpoint dies.
///
/// Implementations must tolerate being invoked from a driver thread and
/// must not call back into the driver.
pub trait DeathNotify: Send + Sync + 'static {
    /// The watched endpoint is gone.
    fn endpoint_died(&self);
}

/// One-shot reply channel for an inbound call.
///
/// Dropping the sink without sending tells the waiting caller that no
/// reply will come.
#[derive(Debug)]
pub struct ReplySink(Sender<MsgParcel>);

impl ReplySink {
    /// Wraps the sending half of a reply channel.
    pub fn new(tx: Sender<MsgParcel>) -> Self {
        Self(tx)
    }

    /// Delivers the reply, consuming the sink.
    pub fn send(self, reply: MsgParcel) {
        if self.0.send(reply).is_err() {
            debug!("reply dropped, caller stopped waiting");
        }
    }
}

/// Inbound call pulled from the driver, ready for dispatch.
#[derive(Debug)]
pub struct InboundCall {
    /// Stub of the exposed service the call addresses.
    pub target: Arc<ServiceStub>,
    /// Call code selected by the remote caller.
    pub code: u32,
    /// Request payload.
    pub request: MsgParcel,
    /// Where the reply goes.
    pub reply: ReplySink,
}

/// Errors raised at the driver boundary.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DriverError {
    /// The driver was shut down.
    #[error("transport driver closed")]
    Closed,
    /// The addressed endpoint is not in the driver's table.
    #[error("no such {0}")]
    NoSuchEndpoint(EndpointId),
    /// The addressed endpoint died.
    #[error("peer endpoint is gone")]
    PeerGone,
    /// The callee went away without replying.
    #[error("call completed without a reply")]
    NoReply,
}

impl From<DriverError> for CallError {
    fn from(err: DriverError) -> Self {
        let code = match err {
            DriverError::Closed => TransportCode::Closed,
            DriverError::NoSuchEndpoint(_) => TransportCode::UnknownEndpoint,
            DriverError::PeerGone => TransportCode::PeerGone,
            DriverError::NoReply => TransportCode::NoReply,
        };
        CallError::Transport(code)
    }
}

/// Process transport driver.
///
/// One driver instance serves a whole process: it carries outbound
/// calls to remote endpoints, queues inbound calls for the worker pool,
/// and tracks death watches on remote endpoints.
pub trait RpcDriver: Send + Sync + 'static {
    /// Sends a call to a remote endpoint and waits for its reply parcel.
    ///
    /// Must not be invoked while holding runtime locks; the call blocks
    /// until the peer replies or the driver reports a failure.
    fn send_call(
        &self,
        endpoint: EndpointId,
        code: u32,
        request: MsgParcel,
    ) -> Result<MsgParcel, DriverError>;

    /// Blocks for the next inbound call.
    ///
    /// Returns `None` once the driver is closed and drained; worker
    /// threads treat that as their exit signal.
    fn next_inbound(&self) -> Option<InboundCall>;

    /// Non-blocking variant of [`RpcDriver::next_inbound`].
    ///
    /// `Ok(None)` means no work is queued right now; a closed driver is
    /// an error so pollers can tear down their registration.
    fn try_next_inbound(&self) -> Result<Option<InboundCall>, DriverError>;

    /// Descriptor an external event loop can poll for inbound readiness.
    fn poll_descriptor(&self) -> Result<PollFd, DriverError>;

    /// Registers a death watch on a remote endpoint.
    fn register_death_watch(
        &self,
        endpoint: EndpointId,
        notify: Arc<dyn DeathNotify>,
    ) -> Result<WatchId, DriverError>;

    /// Removes a previously registered death watch.
    ///
    /// Unregistering a watch that already fired is not an error.
    fn unregister_death_watch(
        &self,
        endpoint: EndpointId,
        watch: WatchId,
    ) -> Result<(), DriverError>;
}
