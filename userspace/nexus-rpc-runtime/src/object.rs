// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: object identity across the transport boundary
//!
//! A local service instance that crosses the process boundary is
//! wrapped in exactly one [`RpcEndpoint`]; handing the same instance
//! over twice must surface the same wrapper, or the peer would see two
//! identities for one object. The process-wide cache below guarantees
//! that under concurrent wrapping. The reverse direction lives here
//! too: [`from_endpoint`] narrows an endpoint back into a callable
//! interface, minting a proxy for remote endpoints and recovering the
//! original instance for local ones.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::debug;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::driver::{EndpointId, RpcDriver};
use crate::embedded::{
    get_u32, read_string, read_string_sequence, sequence_image, string_image, write_string,
    write_string_sequence,
};
use crate::interface::{
    Interface, InterfaceRef, CALL_CAN_SERVE, CALL_INTERFACE_CHAIN, CALL_PING,
};
use crate::parcel::MsgParcel;
use crate::sched::{self, SchedPolicy};
use crate::status::{CallError, CallStatus};

/// Tag stamped on wrappers minted by this runtime.
///
/// A process can host more than one language runtime; each stamps its
/// own wrappers. Narrowing refuses wrappers carrying a foreign tag
/// rather than guessing at their layout.
pub const RUNTIME_TAG: &str = "nexus-rpc-rust";

/// Stable per-instance identity token of a shared interface object.
///
/// The Arc data pointer is used directly: it is stable for the life of
/// the allocation and independent of which trait object view the
/// caller holds.
pub(crate) fn instance_token(service: &InterfaceRef) -> usize {
    Arc::as_ptr(service) as *const () as usize
}

static ENDPOINT_CACHE: Lazy<Mutex<HashMap<usize, Arc<RpcEndpoint>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Receive-side wrapper around a local service instance.
///
/// Carries the dispatch state stamped at wrap time: the runtime tag,
/// the minimum scheduler policy registered for the service, and whether
/// the service asked for caller identities.
pub struct ServiceStub {
    service: InterfaceRef,
    runtime_tag: &'static str,
    sched_hint: Option<(SchedPolicy, i32)>,
    wants_caller_identity: bool,
}

impl ServiceStub {
    fn new(service: InterfaceRef, runtime_tag: &'static str) -> Self {
        let sched_hint = sched::get_min_scheduler_policy(&service);
        let wants_caller_identity = sched::get_requesting_caller_identity(&service);
        Self { service, runtime_tag, sched_hint, wants_caller_identity }
    }

    /// The wrapped service instance.
    pub fn service(&self) -> &InterfaceRef {
        &self.service
    }

    /// Minimum scheduler policy stamped at wrap time, if registered.
    pub fn scheduling_hint(&self) -> Option<(SchedPolicy, i32)> {
        self.sched_hint
    }

    /// True when the service asked to receive caller identities.
    pub fn wants_caller_identity(&self) -> bool {
        self.wants_caller_identity
    }

    /// Tag of the runtime that minted this stub.
    pub fn runtime_tag(&self) -> &'static str {
        self.runtime_tag
    }

    /// Runs one inbound call and encodes the full reply parcel.
    ///
    /// The reply always leads with the call status; payload roots
    /// follow it. Handler failures never escape as panics or empty
    /// replies with a success status.
    pub fn dispatch(&self, code: u32, request: &MsgParcel) -> MsgParcel {
        match self.handle(code, request) {
            Ok(payload) => {
                let mut reply = MsgParcel::new();
                match CallStatus::Ok.write_to_parcel(&mut reply) {
                    Ok(_) => reply.append_parcel(payload),
                    Err(err) => debug!("reply status encode failed: {err}"),
                }
                reply
            }
            Err(err) => {
                debug!("call {code} on {} failed: {err}", self.service.descriptor());
                let mut reply = MsgParcel::new();
                if let Err(err) = CallStatus::from_error(&err).write_to_parcel(&mut reply) {
                    debug!("reply status encode failed: {err}");
                }
                reply
            }
        }
    }

    fn handle(&self, code: u32, request: &MsgParcel) -> Result<MsgParcel, CallError> {
        match code {
            CALL_INTERFACE_CHAIN => self.reply_interface_chain(),
            CALL_CAN_SERVE => self.reply_can_serve(request),
            CALL_PING => {
                self.service.ping()?;
                Ok(MsgParcel::new())
            }
            _ => self.service.on_call(code, request),
        }
    }

    fn reply_interface_chain(&self) -> Result<MsgParcel, CallError> {
        let chain = self.service.interface_chain()?;
        let names: Vec<&str> = chain.iter().map(String::as_str).collect();
        let mut payload = MsgParcel::new();
        let root = payload.write_buffer(&sequence_image(names.len()));
        write_string_sequence(&names, &mut payload, root, 0)?;
        Ok(payload)
    }

    fn reply_can_serve(&self, request: &MsgParcel) -> Result<MsgParcel, CallError> {
        let (root, _) = request.root_buffer(0)?;
        let wanted = read_string(request, root, 0)?;
        let serves = self.service.interface_chain()?.iter().any(|name| name == wanted);
        let mut payload = MsgParcel::new();
        payload.write_buffer(&u32::from(serves).to_le_bytes());
        Ok(payload)
    }
}

impl fmt::Debug for ServiceStub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceStub")
            .field("descriptor", &self.service.descriptor())
            .field("runtime_tag", &self.runtime_tag)
            .field("sched_hint", &self.sched_hint)
            .field("wants_caller_identity", &self.wants_caller_identity)
            .finish()
    }
}

enum EndpointKind {
    Local(Arc<ServiceStub>),
    Remote {
        driver: Arc<dyn RpcDriver>,
        id: EndpointId,
    },
}

/// Transport-facing identity of an object, local or remote.
pub struct RpcEndpoint {
    kind: EndpointKind,
}

impl fmt::Debug for RpcEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EndpointKind::Local(stub) => {
                f.debug_tuple("Local").field(&stub.service.descriptor()).finish()
            }
            EndpointKind::Remote { id, .. } => f.debug_tuple("Remote").field(id).finish(),
        }
    }
}

impl RpcEndpoint {
    /// Wraps a remote endpoint identity served by `driver`.
    pub fn remote(driver: Arc<dyn RpcDriver>, id: EndpointId) -> Arc<Self> {
        Arc::new(Self { kind: EndpointKind::Remote { driver, id } })
    }

    /// Wraps a local service under a foreign runtime tag.
    ///
    /// Embedding runtimes mint their wrappers through this entry point
    /// and keep their own caches; [`from_endpoint`] will refuse to
    /// narrow the result.
    pub fn local_tagged(service: InterfaceRef, runtime_tag: &'static str) -> Arc<Self> {
        Arc::new(Self { kind: EndpointKind::Local(Arc::new(ServiceStub::new(service, runtime_tag))) })
    }

    /// True when calls on this endpoint cross a process boundary.
    pub fn is_remote(&self) -> bool {
        matches!(self.kind, EndpointKind::Remote { .. })
    }

    /// Driver-scoped identity of a remote endpoint.
    pub fn remote_id(&self) -> Option<EndpointId> {
        match &self.kind {
            EndpointKind::Remote { id, .. } => Some(*id),
            EndpointKind::Local(_) => None,
        }
    }

    pub(crate) fn remote_parts(&self) -> Option<(&Arc<dyn RpcDriver>, EndpointId)> {
        match &self.kind {
            EndpointKind::Remote { driver, id } => Some((driver, *id)),
            EndpointKind::Local(_) => None,
        }
    }

    /// Stub of a local endpoint.
    pub fn local_stub(&self) -> Option<&Arc<ServiceStub>> {
        match &self.kind {
            EndpointKind::Local(stub) => Some(stub),
            EndpointKind::Remote { .. } => None,
        }
    }

    /// Issues a call and decodes the leading status of the reply.
    ///
    /// On success the returned parcel still contains the status as root
    /// region 0; payload roots start at index 1. Remote endpoints go
    /// through the driver, local ones dispatch on the calling thread.
    pub fn call(&self, code: u32, request: MsgParcel) -> Result<MsgParcel, CallError> {
        let reply = match &self.kind {
            EndpointKind::Remote { driver, id } => driver.send_call(*id, code, request)?,
            EndpointKind::Local(stub) => stub.dispatch(code, &request),
        };
        CallStatus::read_from_parcel(&reply)?.into_result()?;
        Ok(reply)
    }

    /// Asks the endpoint whether it can serve `descriptor`.
    pub fn can_serve(&self, descriptor: &str) -> Result<bool, CallError> {
        let mut request = MsgParcel::new();
        let root = request.write_buffer(&string_image(descriptor));
        write_string(descriptor, &mut request, root, 0)?;
        let reply = self.call(CALL_CAN_SERVE, request)?;
        let (_, image) = reply.root_buffer(1)?;
        Ok(get_u32(image, 0)? != 0)
    }
}

/// Returns the one wrapper for a service instance, creating it on first
/// use.
///
/// Check and insert happen under a single lock, so two threads handing
/// over the same instance concurrently observe the same wrapper. The
/// stub construction inside the critical section is pure allocation.
/// Proxies pass straight through to their existing endpoint. Entries
/// are never evicted; a wrapped service lives as long as the process
/// table.
pub fn get_or_create_endpoint(service: &InterfaceRef) -> Arc<RpcEndpoint> {
    if let Some(endpoint) = service.remote_endpoint() {
        return endpoint;
    }
    // Registry stamps are read outside the cache lock; a losing racer
    // discards them along with its stub.
    let stub = ServiceStub::new(service.clone(), RUNTIME_TAG);
    let token = instance_token(service);
    let mut cache = ENDPOINT_CACHE.lock();
    cache
        .entry(token)
        .or_insert_with(|| Arc::new(RpcEndpoint { kind: EndpointKind::Local(Arc::new(stub)) }))
        .clone()
}

/// Converts an interface into its transport endpoint.
pub fn to_endpoint(service: &InterfaceRef) -> Arc<RpcEndpoint> {
    get_or_create_endpoint(service)
}

/// Narrows an endpoint into a callable interface for `descriptor`.
///
/// Remote endpoints always yield a proxy; whether the peer actually
/// serves the descriptor is the cast protocol's question, not this
/// one's. Local endpoints hand back the original instance when its
/// chain covers the descriptor, and `None` otherwise. Wrappers minted
/// by a foreign runtime are never narrowed.
pub fn from_endpoint(endpoint: &Arc<RpcEndpoint>, descriptor: &str) -> Option<InterfaceRef> {
    match &endpoint.kind {
        EndpointKind::Remote { .. } => Some(Arc::new(RemoteProxy {
            endpoint: endpoint.clone(),
            descriptor: descriptor.to_owned(),
        }) as InterfaceRef),
        EndpointKind::Local(stub) => {
            if stub.runtime_tag != RUNTIME_TAG {
                debug!("refusing to narrow wrapper tagged {:?}", stub.runtime_tag);
                return None;
            }
            let chain = stub.service.interface_chain().ok()?;
            chain.iter().any(|name| name == descriptor).then(|| stub.service.clone())
        }
    }
}

/// Compares two optional interfaces by underlying object identity.
///
/// Two absent interfaces are equal. Local interfaces compare by
/// instance identity, remote proxies by their endpoint identity; a
/// local instance never equals a proxy.
pub fn interfaces_equal(left: Option<&InterfaceRef>, right: Option<&InterfaceRef>) -> bool {
    match (left, right) {
        (None, None) => true,
        (Some(left), Some(right)) => match (left.remote_endpoint(), right.remote_endpoint()) {
            (None, None) => instance_token(left) == instance_token(right),
            (Some(a), Some(b)) => a.remote_id() == b.remote_id(),
            _ => false,
        },
        _ => false,
    }
}

/// Caller-side stand-in for an interface served by a remote endpoint.
///
/// Base operations are forwarded over the wire through the reserved
/// call codes; generated proxy code layers its user calls on
/// [`RpcEndpoint::call`] via [`Interface::remote_endpoint`].
#[derive(Debug)]
pub struct RemoteProxy {
    endpoint: Arc<RpcEndpoint>,
    descriptor: String,
}

impl Interface for RemoteProxy {
    fn descriptor(&self) -> &str {
        &self.descriptor
    }

    fn interface_chain(&self) -> Result<Vec<String>, CallError> {
        let reply = self.endpoint.call(CALL_INTERFACE_CHAIN, MsgParcel::new())?;
        let (root, _) = reply.root_buffer(1)?;
        let chain = read_string_sequence(&reply, root, 0)?;
        Ok(chain.into_iter().map(str::to_owned).collect())
    }

    fn is_remote(&self) -> bool {
        true
    }

    fn remote_endpoint(&self) -> Option<Arc<RpcEndpoint>> {
        Some(self.endpoint.clone())
    }

    fn ping(&self) -> Result<(), CallError> {
        self.endpoint.call(CALL_PING, MsgParcel::new()).map(|_| ())
    }

    fn on_call(&self, code: u32, request: &MsgParcel) -> Result<MsgParcel, CallError> {
        self.endpoint.call(code, request.clone())
    }
}
