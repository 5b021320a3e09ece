// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Process-global entry points driven end to end. The pool and driver
//! installed here are process-wide, so the whole lifecycle lives in a
//! single test.

use std::thread;

use nexus_rpc_runtime::process::{
    add_post_dispatch_task, configure_rpc_threadpool, init_process, join_rpc_threadpool,
};
use nexus_rpc_runtime::{from_endpoint, DispatchError, InterfaceRef, LoopbackDriver, MsgParcel};
use rpc_e2e::{reply_value, Thermometer, CALL_READ, SENSOR_DESCRIPTOR};

#[test]
fn caller_joined_threadpool_serves_the_process() {
    assert!(matches!(
        configure_rpc_threadpool(1, true),
        Err(DispatchError::NotInitialized)
    ));

    let driver = LoopbackDriver::new();
    init_process(driver.clone()).expect("install driver");
    assert!(matches!(
        init_process(driver.clone()),
        Err(DispatchError::AlreadyInitialized)
    ));

    let service: InterfaceRef = Thermometer::new(21);
    let id = driver.expose(&service);

    // A budget of one with a joining caller spawns nothing; this thread
    // is the whole pool once it joins.
    configure_rpc_threadpool(1, true).expect("configure");
    add_post_dispatch_task(|| {}).expect("queue post task");

    let client = {
        let driver = driver.clone();
        thread::spawn(move || {
            let sensor = from_endpoint(&driver.remote_endpoint(id), SENSOR_DESCRIPTOR)
                .expect("proxy");
            let reply = sensor.on_call(CALL_READ, &MsgParcel::new()).expect("read");
            let value = reply_value(&reply);
            driver.close();
            value
        })
    };

    join_rpc_threadpool().expect("serve until close");
    assert_eq!(client.join().expect("client thread"), 21);
}
