// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Death notifications for remote endpoints.
//!
//! A caller that depends on a remote service registers a
//! [`DeathRecipient`]; the bridge adapts it onto the driver's watch
//! table and guarantees the callback runs at most once, holding only
//! weak references so a watch never keeps its recipient or target
//! alive.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use log::debug;
use thiserror::Error;

use crate::driver::{DeathNotify, DriverError, EndpointId, RpcDriver, WatchId};
use crate::interface::{Interface, InterfaceRef};

/// Errors raised while linking or unlinking a death watch.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeathError {
    /// Death watches only make sense on remote endpoints.
    #[error("death watches require a remote endpoint")]
    NotRemote,
    /// The driver rejected the watch operation.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Caller-side observer of a remote endpoint's death.
pub trait DeathRecipient: Send + Sync + 'static {
    /// The watched endpoint died.
    ///
    /// `cookie` is the value passed at link time; `target` is the
    /// interface the watch was linked through, already weak because the
    /// peer is gone.
    fn on_remote_died(&self, cookie: u64, target: &Weak<dyn Interface>);
}

/// Adapter between a [`DeathRecipient`] and the driver's watch table.
///
/// Holds the recipient and target weakly and fires at most once, even
/// when a driver signals the same death twice or a racing unlink loses.
pub struct DeathAdapter {
    recipient: Weak<dyn DeathRecipient>,
    cookie: u64,
    target: Weak<dyn Interface>,
    fired: AtomicBool,
}

impl DeathNotify for DeathAdapter {
    fn endpoint_died(&self) {
        if self.fired.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.recipient.upgrade() {
            Some(recipient) => recipient.on_remote_died(self.cookie, &self.target),
            None => debug!("death recipient dropped before notification, cookie {}", self.cookie),
        }
    }
}

/// Live registration of a death watch.
///
/// Dropping the watch does not unlink it; the registration stays with
/// the driver until it fires or [`DeathWatch::unlink`] removes it.
pub struct DeathWatch {
    driver: Arc<dyn RpcDriver>,
    endpoint: EndpointId,
    watch: WatchId,
    adapter: Arc<DeathAdapter>,
}

impl DeathWatch {
    /// Removes the registration, consuming the watch.
    ///
    /// A watch that already fired unlinks without error.
    pub fn unlink(self) -> Result<(), DeathError> {
        self.driver.unregister_death_watch(self.endpoint, self.watch)?;
        Ok(())
    }

    /// True once the recipient was notified (or would have been, had it
    /// still been alive).
    pub fn has_fired(&self) -> bool {
        self.adapter.fired.load(Ordering::Acquire)
    }
}

impl fmt::Debug for DeathWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeathWatch")
            .field("endpoint", &self.endpoint)
            .field("watch", &self.watch)
            .field("fired", &self.has_fired())
            .finish()
    }
}

/// Registers `recipient` to hear about the death of `target`'s endpoint.
///
/// `target` must be a remote interface; local services do not die
/// independently of the process observing them. The recipient is held
/// weakly: if it is dropped before the endpoint dies, the notification
/// is quietly skipped.
pub fn link_to_death(
    target: &InterfaceRef,
    recipient: &Arc<dyn DeathRecipient>,
    cookie: u64,
) -> Result<DeathWatch, DeathError> {
    let endpoint = target.remote_endpoint().ok_or(DeathError::NotRemote)?;
    let (driver, id) = endpoint.remote_parts().ok_or(DeathError::NotRemote)?;
    let adapter = Arc::new(DeathAdapter {
        recipient: Arc::downgrade(recipient),
        cookie,
        target: Arc::downgrade(target),
        fired: AtomicBool::new(false),
    });
    let watch = driver.register_death_watch(id, adapter.clone())?;
    Ok(DeathWatch { driver: driver.clone(), endpoint: id, watch, adapter })
}
