// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Per-service dispatch parameters.
//!
//! Services can register a minimum scheduler policy and ask to receive
//! caller identities before they are exposed; the values are stamped
//! onto the wrapper when the instance first crosses the boundary.
//! Entries reference services weakly and are pruned on the next
//! registration, so the registries never keep a service alive and never
//! grow past the set of live registrants plus the most recently dead.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use log::error;
use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::interface::{Interface, InterfaceRef};
use crate::object::instance_token;

/// Scheduling class a service can require for its dispatch threads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedPolicy {
    /// Time-sharing scheduling; priority is a niceness in `[-20, 19]`.
    Normal,
    /// First-in-first-out real-time scheduling; priority in `[1, 99]`.
    Fifo,
    /// Round-robin real-time scheduling; priority in `[1, 99]`.
    RoundRobin,
}

impl SchedPolicy {
    fn admits(self, priority: i32) -> bool {
        match self {
            Self::Normal => (-20..=19).contains(&priority),
            Self::Fifo | Self::RoundRobin => (1..=99).contains(&priority),
        }
    }
}

struct MapEntry<V> {
    service: Weak<dyn Interface>,
    value: V,
}

/// Weak map from service instances to per-service values.
///
/// Dead entries are swept on every insert, under the same lock as the
/// insert itself, so a sweep can never race a concurrent registration
/// into resurrecting a stale entry.
struct WeakServiceMap<V> {
    entries: HashMap<usize, MapEntry<V>>,
}

impl<V: Copy> WeakServiceMap<V> {
    fn new() -> Self {
        Self { entries: HashMap::new() }
    }

    fn prune_then_insert(&mut self, service: &InterfaceRef, value: V) {
        self.entries.retain(|_, entry| entry.service.strong_count() > 0);
        self.entries.insert(
            instance_token(service),
            MapEntry { service: Arc::downgrade(service), value },
        );
    }

    fn get(&self, service: &InterfaceRef) -> Option<V> {
        let entry = self.entries.get(&instance_token(service))?;
        (entry.service.strong_count() > 0).then_some(entry.value)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

static SERVICE_PRIORITIES: Lazy<Mutex<WeakServiceMap<(SchedPolicy, i32)>>> =
    Lazy::new(|| Mutex::new(WeakServiceMap::new()));

static CALLER_IDENTITY_FLAGS: Lazy<Mutex<WeakServiceMap<bool>>> =
    Lazy::new(|| Mutex::new(WeakServiceMap::new()));

/// Registers the minimum scheduler policy for a local service.
///
/// Returns `false` and logs when the service is remote or the priority
/// is outside the policy's range; a rejected registration leaves any
/// previous entry untouched. Must be called before the instance is
/// exposed: the policy is stamped at wrap time.
pub fn set_min_scheduler_policy(
    service: &InterfaceRef,
    policy: SchedPolicy,
    priority: i32,
) -> bool {
    if service.is_remote() {
        error!(
            "cannot set scheduler policy on remote interface {}",
            service.descriptor()
        );
        return false;
    }
    if !policy.admits(priority) {
        error!("priority {priority} out of range for {policy:?}");
        return false;
    }
    SERVICE_PRIORITIES.lock().prune_then_insert(service, (policy, priority));
    true
}

/// Looks up the registered minimum scheduler policy for a service.
pub fn get_min_scheduler_policy(service: &InterfaceRef) -> Option<(SchedPolicy, i32)> {
    SERVICE_PRIORITIES.lock().get(service)
}

/// Registers whether a local service wants caller identities delivered
/// with inbound calls.
///
/// Returns `false` and logs when the service is remote. Like the
/// scheduler policy, the flag is stamped at wrap time.
pub fn set_requesting_caller_identity(service: &InterfaceRef, enable: bool) -> bool {
    if service.is_remote() {
        error!(
            "cannot request caller identity on remote interface {}",
            service.descriptor()
        );
        return false;
    }
    CALLER_IDENTITY_FLAGS.lock().prune_then_insert(service, enable);
    true
}

/// Looks up the caller-identity flag for a service. Defaults to `false`.
pub fn get_requesting_caller_identity(service: &InterfaceRef) -> bool {
    CALLER_IDENTITY_FLAGS.lock().get(service).unwrap_or(false)
}
