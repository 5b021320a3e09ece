// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Typed narrowing of interfaces across the transport boundary.
//!
//! A caller holding some interface may only know it as a base type.
//! [`cast_interface`] answers whether the underlying object serves a
//! more derived descriptor: locally by consulting the object's own
//! chain, remotely by asking the peer. A successful remote cast mints a
//! proxy on the same endpoint as the parent, never a second connection.

use crate::interface::InterfaceRef;
use crate::object::{from_endpoint, to_endpoint};
use crate::status::CallError;

/// Narrows `parent` to the interface named by `descriptor`.
///
/// `Ok(None)` means the object definitely does not serve the
/// descriptor. When the remote query itself fails, `emit_error` picks
/// between propagating the failure and folding it into `Ok(None)`;
/// local casts cannot fail unless the object's own chain query does.
/// An absent parent is absent in any type: `None` casts to `Ok(None)`.
pub fn cast_interface(
    parent: Option<InterfaceRef>,
    descriptor: &str,
    emit_error: bool,
) -> Result<Option<InterfaceRef>, CallError> {
    let Some(parent) = parent else {
        return Ok(None);
    };
    if !parent.is_remote() {
        match parent.interface_chain() {
            Ok(chain) if chain.iter().any(|name| name == descriptor) => {
                return Ok(Some(parent));
            }
            Ok(_) => return Ok(None),
            Err(err) if emit_error => return Err(err),
            Err(_) => return Ok(None),
        }
    }
    let endpoint = to_endpoint(&parent);
    match endpoint.can_serve(descriptor) {
        Ok(true) => Ok(from_endpoint(&endpoint, descriptor)),
        Ok(false) => Ok(None),
        Err(err) if emit_error => Err(err),
        Err(_) => Ok(None),
    }
}
