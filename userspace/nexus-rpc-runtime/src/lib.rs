// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: transport-support runtime underneath cross-process interface calls
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Evolving
//!
//! PUBLIC API:
//!   - MsgParcel / embedded codecs: driver-bound payloads with anchored,
//!     bounds-checked child regions
//!   - Interface trait + RpcEndpoint: object identity across the boundary,
//!     wrapping, narrowing and equality
//!   - cast_interface: typed narrowing, remote query included
//!   - link_to_death: at-most-once death notifications for remote endpoints
//!   - DispatchPool / process entry points: worker threads, caller join and
//!     poll-driven dispatch
//!   - Scheduler policy and caller-identity registries
//!
//! DEPENDENCIES:
//!   - thiserror: error enums at each layer boundary
//!   - parking_lot + once_cell: process-wide tables
//!   - log: runtime diagnostics
//!
//! The crate is driver-agnostic: everything reaches the transport
//! through the [`driver::RpcDriver`] seam. [`loopback::LoopbackDriver`]
//! is the in-process implementation used by host tests; a kernel-backed
//! driver implements the same trait in its own crate.

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]

pub mod cast;
pub mod death;
pub mod dispatch;
pub mod driver;
pub mod embedded;
pub mod interface;
pub mod loopback;
pub mod object;
pub mod parcel;
pub mod process;
pub mod sched;
pub mod status;

pub use cast::cast_interface;
pub use death::{link_to_death, DeathError, DeathRecipient, DeathWatch};
pub use dispatch::{DispatchError, DispatchPool};
pub use driver::{
    DeathNotify, DriverError, EndpointId, InboundCall, PollFd, ReplySink, RpcDriver, WatchId,
};
pub use embedded::{
    GrantRegion, MemoryBlock, MemoryView, QueueDescriptor, QueueFlavor, QueueView, SequenceView,
    WireElem,
};
pub use interface::{Interface, InterfaceRef, BASE_DESCRIPTOR, FIRST_USER_CALL};
pub use loopback::LoopbackDriver;
pub use object::{
    from_endpoint, get_or_create_endpoint, interfaces_equal, to_endpoint, RemoteProxy,
    RpcEndpoint, ServiceStub, RUNTIME_TAG,
};
pub use parcel::{BufferHandle, MsgParcel, NativeHandle, ParcelError};
pub use sched::{
    get_min_scheduler_policy, get_requesting_caller_identity, set_min_scheduler_policy,
    set_requesting_caller_identity, SchedPolicy,
};
pub use status::{CallError, CallStatus, ExceptionCode, TransportCode};
