// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Base contract of a callable interface.
//!
//! Generated service and proxy code builds on [`Interface`]; the
//! runtime itself only relies on the base operations defined here. Call
//! codes below [`FIRST_USER_CALL`] and at or above [`RESERVED_CALL_BASE`]
//! belong to the runtime and must not be claimed by interfaces.

use std::fmt;
use std::sync::Arc;

use crate::object::RpcEndpoint;
use crate::parcel::MsgParcel;
use crate::status::{CallError, ExceptionCode};

/// Descriptor of the implicit base interface every chain ends with.
pub const BASE_DESCRIPTOR: &str = "nexus.rpc.Base";

/// First call code available to user interfaces.
pub const FIRST_USER_CALL: u32 = 1;

/// Lower bound of the call-code range reserved for the runtime.
pub const RESERVED_CALL_BASE: u32 = 0x00ff_0000;

/// Reserved call: report the interface chain, most derived first.
pub const CALL_INTERFACE_CHAIN: u32 = RESERVED_CALL_BASE + 1;

/// Reserved call: ask whether the endpoint can serve a descriptor.
pub const CALL_CAN_SERVE: u32 = RESERVED_CALL_BASE + 2;

/// Reserved call: liveness probe, no payload either way.
pub const CALL_PING: u32 = RESERVED_CALL_BASE + 3;

/// Shared reference to a callable interface.
pub type InterfaceRef = Arc<dyn Interface>;

/// Base operations of every callable object, local or remote.
///
/// Local services implement [`Interface::on_call`] and the descriptor
/// accessors; the remote-side defaults are overridden by the runtime's
/// proxy type and are not meant for service code.
pub trait Interface: Send + Sync + 'static {
    /// Most derived descriptor this object serves.
    fn descriptor(&self) -> &str;

    /// Descriptors this object can serve, most derived first.
    ///
    /// The chain always ends with [`BASE_DESCRIPTOR`]. The default
    /// covers single-interface services; multi-level interfaces
    /// override it with their full ancestry.
    fn interface_chain(&self) -> Result<Vec<String>, CallError> {
        let descriptor = self.descriptor();
        if descriptor == BASE_DESCRIPTOR {
            return Ok(vec![BASE_DESCRIPTOR.to_owned()]);
        }
        Ok(vec![descriptor.to_owned(), BASE_DESCRIPTOR.to_owned()])
    }

    /// True when calls on this object cross a process boundary.
    fn is_remote(&self) -> bool {
        false
    }

    /// Transport endpoint backing this object when it is a proxy.
    fn remote_endpoint(&self) -> Option<Arc<RpcEndpoint>> {
        None
    }

    /// Liveness probe. Local objects are trivially alive.
    fn ping(&self) -> Result<(), CallError> {
        Ok(())
    }

    /// Handles a user call and produces the reply payload.
    ///
    /// Only codes in the user range arrive here; the runtime answers
    /// the reserved codes itself before consulting the service.
    fn on_call(&self, code: u32, request: &MsgParcel) -> Result<MsgParcel, CallError> {
        let _ = request;
        Err(CallError::Exception {
            code: ExceptionCode::Unsupported,
            message: format!("call {code} not implemented by {}", self.descriptor()),
        })
    }
}

impl fmt::Debug for dyn Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interface")
            .field("descriptor", &self.descriptor())
            .field("remote", &self.is_remote())
            .finish()
    }
}
