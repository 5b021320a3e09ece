// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use nexus_rpc_runtime::{
    cast_interface, from_endpoint, get_or_create_endpoint, interfaces_equal, link_to_death,
    to_endpoint, CallError, DeathError, DeathRecipient, DispatchPool, Interface, InterfaceRef,
    LoopbackDriver, TransportCode, BASE_DESCRIPTOR,
};

const SENSOR: &str = "nexus.test.Sensor";
const THERMOMETER: &str = "nexus.test.Thermometer";

struct Thermometer;

impl Interface for Thermometer {
    fn descriptor(&self) -> &str {
        THERMOMETER
    }

    fn interface_chain(&self) -> Result<Vec<String>, CallError> {
        Ok(vec![THERMOMETER.to_owned(), SENSOR.to_owned(), BASE_DESCRIPTOR.to_owned()])
    }
}

fn thermometer() -> InterfaceRef {
    Arc::new(Thermometer)
}

/// Driver with one worker thread serving its inbound queue.
fn served_driver() -> Arc<LoopbackDriver> {
    let driver = LoopbackDriver::new();
    DispatchPool::new(driver.clone()).configure(1, false).expect("configure pool");
    driver
}

#[derive(Default)]
struct Recorder {
    notified: AtomicUsize,
    cookie: AtomicU64,
    target_alive: AtomicBool,
}

impl DeathRecipient for Recorder {
    fn on_remote_died(&self, cookie: u64, target: &Weak<dyn Interface>) {
        self.notified.fetch_add(1, Ordering::SeqCst);
        self.cookie.store(cookie, Ordering::SeqCst);
        self.target_alive.store(target.upgrade().is_some(), Ordering::SeqCst);
    }
}

#[test]
fn wrapper_identity_is_stable_per_instance() {
    let service = thermometer();
    let first = get_or_create_endpoint(&service);
    let second = to_endpoint(&service);
    assert!(Arc::ptr_eq(&first, &second));

    let other = thermometer();
    let third = get_or_create_endpoint(&other);
    assert!(!Arc::ptr_eq(&first, &third));
}

#[test]
fn casting_an_absent_parent_never_errors() {
    for emit_error in [false, true] {
        let child = cast_interface(None, THERMOMETER, emit_error).expect("absent is not an error");
        assert!(child.is_none());
    }
}

#[test]
fn local_casts_narrow_through_the_chain() {
    let service = thermometer();
    let narrowed = cast_interface(Some(service.clone()), SENSOR, false)
        .expect("chain lookup")
        .expect("thermometer serves sensor");
    assert!(interfaces_equal(Some(&service), Some(&narrowed)));

    let absent = cast_interface(Some(service), "nexus.test.Barometer", false).expect("chain lookup");
    assert!(absent.is_none());
}

#[test]
fn remote_casts_ask_the_peer_and_share_the_connection() {
    let driver = served_driver();
    let service = thermometer();
    let id = driver.expose(&service);

    let sensor = from_endpoint(&driver.remote_endpoint(id), SENSOR).expect("remote always proxies");
    assert!(sensor.is_remote());

    let narrowed = cast_interface(Some(sensor.clone()), THERMOMETER, true)
        .expect("capability query")
        .expect("peer serves thermometer");
    assert!(narrowed.is_remote());
    assert_eq!(narrowed.descriptor(), THERMOMETER);
    // Same endpoint underneath, not a second connection.
    assert!(interfaces_equal(Some(&sensor), Some(&narrowed)));

    let absent = cast_interface(Some(sensor), "nexus.test.Barometer", true).expect("capability query");
    assert!(absent.is_none());

    driver.close();
}

#[test]
fn remote_cast_failures_follow_the_error_mode() {
    let driver = LoopbackDriver::new();
    let service = thermometer();
    let id = driver.expose(&service);
    let sensor = from_endpoint(&driver.remote_endpoint(id), SENSOR).expect("proxy");
    driver.simulate_death(id);

    let silent = cast_interface(Some(sensor.clone()), THERMOMETER, false).expect("failure folded");
    assert!(silent.is_none());

    let err = cast_interface(Some(sensor), THERMOMETER, true).expect_err("failure surfaced");
    assert_eq!(err, CallError::Transport(TransportCode::PeerGone));

    driver.close();
}

#[test]
fn equality_spans_local_and_remote_identities() {
    let driver = LoopbackDriver::new();
    let local = thermometer();
    let id = driver.expose(&local);
    let proxy_a = from_endpoint(&driver.remote_endpoint(id), SENSOR).expect("proxy");
    let proxy_b = from_endpoint(&driver.remote_endpoint(id), THERMOMETER).expect("proxy");

    // Proxies to one endpoint share an identity regardless of their type.
    assert!(interfaces_equal(Some(&proxy_a), Some(&proxy_b)));
    // A proxy never equals the local instance it ultimately reaches.
    assert!(!interfaces_equal(Some(&local), Some(&proxy_a)));

    let other_id = driver.expose(&thermometer());
    let proxy_c = from_endpoint(&driver.remote_endpoint(other_id), SENSOR).expect("proxy");
    assert!(!interfaces_equal(Some(&proxy_a), Some(&proxy_c)));

    driver.close();
}

#[test]
fn death_watch_fires_at_most_once() {
    let driver = LoopbackDriver::new();
    let service = thermometer();
    let id = driver.expose(&service);
    let target = from_endpoint(&driver.remote_endpoint(id), SENSOR).expect("proxy");

    let recorder = Arc::new(Recorder::default());
    let recipient: Arc<dyn DeathRecipient> = recorder.clone();
    let watch = link_to_death(&target, &recipient, 0x5eed).expect("link watch");

    driver.simulate_death(id);
    driver.simulate_death(id);

    assert!(watch.has_fired());
    assert_eq!(recorder.notified.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.cookie.load(Ordering::SeqCst), 0x5eed);
    // The test still holds the proxy, so the weak target upgrades inside
    // the callback.
    assert!(recorder.target_alive.load(Ordering::SeqCst));

    driver.close();
}

#[test]
fn unlinked_watches_stay_silent() {
    let driver = LoopbackDriver::new();
    let service = thermometer();
    let id = driver.expose(&service);
    let target = from_endpoint(&driver.remote_endpoint(id), SENSOR).expect("proxy");

    let recorder = Arc::new(Recorder::default());
    let recipient: Arc<dyn DeathRecipient> = recorder.clone();
    let watch = link_to_death(&target, &recipient, 7).expect("link watch");
    watch.unlink().expect("unlink");

    driver.simulate_death(id);
    assert_eq!(recorder.notified.load(Ordering::SeqCst), 0);

    driver.close();
}

#[test]
fn linking_to_a_local_service_is_refused() {
    let service = thermometer();
    let recipient: Arc<dyn DeathRecipient> = Arc::new(Recorder::default());
    let err = link_to_death(&service, &recipient, 1).expect_err("local target");
    assert_eq!(err, DeathError::NotRemote);
}
