// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use nexus_rpc_runtime::embedded::read_queue_descriptor;
use nexus_rpc_runtime::{
    cast_interface, from_endpoint, interfaces_equal, link_to_death, set_min_scheduler_policy,
    to_endpoint, CallError, DeathRecipient, DispatchPool, Interface, InterfaceRef,
    LoopbackDriver, MsgParcel, QueueFlavor, SchedPolicy, TransportCode, BASE_DESCRIPTOR,
};
use rpc_e2e::{
    accumulate_request, reply_value, sample_queue, Thermometer, CALL_ACCUMULATE,
    CALL_DESCRIBE_QUEUE, CALL_READ, SENSOR_DESCRIPTOR, THERMOMETER_DESCRIPTOR,
};

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
fn full_stack_call_cast_and_death() {
    let driver = LoopbackDriver::new();
    let service: InterfaceRef = Thermometer::new(20);
    assert!(set_min_scheduler_policy(&service, SchedPolicy::Fifo, 10));
    let id = driver.expose(&service);

    // The stub picked up the dispatch parameters registered before it
    // crossed the boundary.
    let endpoint = to_endpoint(&service);
    let stub = endpoint.local_stub().expect("local stub");
    assert_eq!(stub.scheduling_hint(), Some((SchedPolicy::Fifo, 10)));

    DispatchPool::new(driver.clone()).configure(2, false).expect("start workers");

    let sensor = from_endpoint(&driver.remote_endpoint(id), SENSOR_DESCRIPTOR).expect("proxy");
    sensor.ping().expect("ping crosses the boundary");
    assert_eq!(
        sensor.interface_chain().expect("chain query"),
        vec![THERMOMETER_DESCRIPTOR, SENSOR_DESCRIPTOR, BASE_DESCRIPTOR]
    );

    // A sample batch runs through the embedded codec and back.
    let reply = sensor
        .on_call(CALL_ACCUMULATE, &accumulate_request(&[3, 4, 5]))
        .expect("accumulate");
    assert_eq!(reply_value(&reply), 32);

    // Narrow to the most derived interface over the wire.
    let thermometer = cast_interface(Some(sensor.clone()), THERMOMETER_DESCRIPTOR, true)
        .expect("capability query")
        .expect("peer serves thermometer");
    assert!(interfaces_equal(Some(&sensor), Some(&thermometer)));
    let reply = thermometer.on_call(CALL_READ, &MsgParcel::new()).expect("read");
    assert_eq!(reply_value(&reply), 32);

    // The shared sample queue survives the parcel transfer.
    let reply = thermometer
        .on_call(CALL_DESCRIBE_QUEUE, &MsgParcel::new())
        .expect("describe queue");
    let (root, _) = reply.root_buffer(1).expect("queue root");
    let queue = read_queue_descriptor(&reply, root, 0).expect("decode queue");
    queue.validate().expect("consistent descriptor");
    let expected = sample_queue();
    assert_eq!(queue.grants.to_vec(), expected.grants);
    assert_eq!(queue.sync_handle, expected.sync_handle.as_ref());
    assert_eq!(queue.flavor, QueueFlavor::Synchronized);

    // Death notice arrives exactly once, then calls fail fast.
    let recorder = Arc::new(Recorder::default());
    let recipient: Arc<dyn DeathRecipient> = recorder.clone();
    let watch = link_to_death(&thermometer, &recipient, 0x00c0_ffee).expect("link watch");
    driver.simulate_death(id);
    driver.simulate_death(id);
    assert!(watch.has_fired());
    assert_eq!(recorder.notified.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.cookie.load(Ordering::SeqCst), 0x00c0_ffee);
    assert!(recorder.target_alive.load(Ordering::SeqCst));

    let err = thermometer.ping().expect_err("dead peer");
    assert_eq!(err, CallError::Transport(TransportCode::PeerGone));

    driver.close();
}

#[test]
fn concurrent_clients_fold_into_one_service_instance() {
    let driver = LoopbackDriver::new();
    let service: InterfaceRef = Thermometer::new(0);
    let id = driver.expose(&service);
    DispatchPool::new(driver.clone()).configure(3, false).expect("start workers");

    let clients: Vec<_> = (0..8)
        .map(|_| {
            let driver = driver.clone();
            thread::spawn(move || {
                let sensor = from_endpoint(&driver.remote_endpoint(id), SENSOR_DESCRIPTOR)
                    .expect("proxy");
                sensor
                    .on_call(CALL_ACCUMULATE, &accumulate_request(&[1, 2, 3]))
                    .expect("accumulate");
            })
        })
        .collect();
    for client in clients {
        client.join().expect("client thread");
    }

    let sensor = from_endpoint(&driver.remote_endpoint(id), SENSOR_DESCRIPTOR).expect("proxy");
    let reply = sensor.on_call(CALL_READ, &MsgParcel::new()).expect("read");
    assert_eq!(reply_value(&reply), 48);

    driver.close();
}
