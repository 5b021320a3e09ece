// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: in-process transport double for host-side tests
//!
//! Implements [`RpcDriver`] over plain process-local queues: outbound
//! calls are enqueued for the worker pool and answered through a
//! one-shot reply channel, exactly like a kernel-backed driver would
//! behave, minus the process boundary. Death is simulated explicitly so
//! the notification bridge can be exercised without killing anything.
//! Host tests and the e2e suite run the full runtime over this driver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::driver::{
    DeathNotify, DriverError, EndpointId, InboundCall, PollFd, ReplySink, RpcDriver, WatchId,
};
use crate::interface::InterfaceRef;
use crate::object::{get_or_create_endpoint, RpcEndpoint, ServiceStub};
use crate::parcel::MsgParcel;

/// Synthetic poll descriptor reported by the loopback driver.
pub const LOOPBACK_POLL_FD: i32 = 0;

struct ExposedObject {
    stub: Arc<ServiceStub>,
    alive: bool,
}

/// In-process [`RpcDriver`] backed by host channels.
///
/// Lock order is `objects` before `watches`; death simulation and watch
/// registration both follow it, which is what makes a watch either fire
/// or fail to register once the endpoint is dead, never neither.
pub struct LoopbackDriver {
    inbound_tx: Mutex<Option<Sender<InboundCall>>>,
    inbound_rx: Mutex<Receiver<InboundCall>>,
    objects: Mutex<HashMap<EndpointId, ExposedObject>>,
    watches: Mutex<HashMap<EndpointId, Vec<(WatchId, Arc<dyn DeathNotify>)>>>,
    next_endpoint: AtomicU64,
    next_watch: AtomicU64,
    closed: AtomicBool,
}

impl LoopbackDriver {
    /// Creates an open driver with an empty endpoint table.
    pub fn new() -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::channel();
        Arc::new(Self {
            inbound_tx: Mutex::new(Some(inbound_tx)),
            inbound_rx: Mutex::new(inbound_rx),
            objects: Mutex::new(HashMap::new()),
            watches: Mutex::new(HashMap::new()),
            next_endpoint: AtomicU64::new(1),
            next_watch: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        })
    }

    /// Exposes a service instance and returns its endpoint identity.
    ///
    /// The instance is wrapped through the process identity cache, so
    /// exposing the same instance twice serves it under two endpoint
    /// ids backed by one wrapper. An interface that is already remote
    /// keeps the endpoint identity it came with.
    pub fn expose(&self, service: &InterfaceRef) -> EndpointId {
        let endpoint = get_or_create_endpoint(service);
        if let Some((_, id)) = endpoint.remote_parts() {
            return id;
        }
        let stub = match endpoint.local_stub() {
            Some(stub) => stub.clone(),
            // Unreachable shape: an endpoint is local or remote.
            None => return EndpointId(0),
        };
        let id = EndpointId(self.next_endpoint.fetch_add(1, Ordering::Relaxed));
        self.objects.lock().insert(id, ExposedObject { stub, alive: true });
        debug!("exposed {} as {id}", service.descriptor());
        id
    }

    /// Caller-side endpoint for an exposed identity.
    pub fn remote_endpoint(self: &Arc<Self>, endpoint: EndpointId) -> Arc<RpcEndpoint> {
        RpcEndpoint::remote(self.clone(), endpoint)
    }

    /// Marks an endpoint dead and fires its death watches.
    ///
    /// Subsequent calls to the endpoint fail with
    /// [`DriverError::PeerGone`]; a second death of the same endpoint is
    /// a no-op because the watches were already consumed.
    pub fn simulate_death(&self, endpoint: EndpointId) {
        let fired = {
            let mut objects = self.objects.lock();
            let Some(object) = objects.get_mut(&endpoint) else {
                return;
            };
            if !object.alive {
                return;
            }
            object.alive = false;
            self.watches.lock().remove(&endpoint).unwrap_or_default()
        };
        debug!("{endpoint} died, notifying {} watches", fired.len());
        for (_, notify) in fired {
            notify.endpoint_died();
        }
    }

    /// Closes the driver: senders are torn down, blocked workers wake
    /// and exit, and unserved calls are dropped so their callers fail
    /// with [`DriverError::NoReply`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("loopback driver closing");
        self.inbound_tx.lock().take();
        while let Ok(call) = self.inbound_rx.lock().try_recv() {
            drop(call);
        }
    }
}

impl RpcDriver for LoopbackDriver {
    fn send_call(
        &self,
        endpoint: EndpointId,
        code: u32,
        request: MsgParcel,
    ) -> Result<MsgParcel, DriverError> {
        let stub = {
            let objects = self.objects.lock();
            let object = objects.get(&endpoint).ok_or(DriverError::NoSuchEndpoint(endpoint))?;
            if !object.alive {
                return Err(DriverError::PeerGone);
            }
            object.stub.clone()
        };
        let tx = {
            let guard = self.inbound_tx.lock();
            guard.as_ref().ok_or(DriverError::Closed)?.clone()
        };
        let (reply_tx, reply_rx) = mpsc::channel();
        let call = InboundCall { target: stub, code, request, reply: ReplySink::new(reply_tx) };
        tx.send(call).map_err(|_| DriverError::Closed)?;
        drop(tx);
        // No locks are held while waiting for the reply.
        reply_rx.recv().map_err(|_| DriverError::NoReply)
    }

    fn next_inbound(&self) -> Option<InboundCall> {
        self.inbound_rx.lock().recv().ok()
    }

    fn try_next_inbound(&self) -> Result<Option<InboundCall>, DriverError> {
        match self.inbound_rx.lock().try_recv() {
            Ok(call) => Ok(Some(call)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(DriverError::Closed),
        }
    }

    fn poll_descriptor(&self) -> Result<PollFd, DriverError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DriverError::Closed);
        }
        Ok(PollFd(LOOPBACK_POLL_FD))
    }

    fn register_death_watch(
        &self,
        endpoint: EndpointId,
        notify: Arc<dyn DeathNotify>,
    ) -> Result<WatchId, DriverError> {
        let objects = self.objects.lock();
        let object = objects.get(&endpoint).ok_or(DriverError::NoSuchEndpoint(endpoint))?;
        if !object.alive {
            return Err(DriverError::PeerGone);
        }
        let watch = WatchId(self.next_watch.fetch_add(1, Ordering::Relaxed));
        self.watches.lock().entry(endpoint).or_default().push((watch, notify));
        Ok(watch)
    }

    fn unregister_death_watch(
        &self,
        endpoint: EndpointId,
        watch: WatchId,
    ) -> Result<(), DriverError> {
        if let Some(list) = self.watches.lock().get_mut(&endpoint) {
            list.retain(|(id, _)| *id != watch);
        }
        Ok(())
    }
}
