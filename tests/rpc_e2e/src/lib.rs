// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures for the transport e2e suite: a small thermometer
//! service implemented directly on the runtime's [`Interface`] trait,
//! plus the request builders and reply readers the tests reuse.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use nexus_rpc_runtime::embedded::{
    get_u32, read_sequence, sequence_image, write_queue_descriptor, write_sequence,
};
use nexus_rpc_runtime::{
    CallError, ExceptionCode, GrantRegion, Interface, MsgParcel, NativeHandle, QueueDescriptor,
    QueueFlavor, BASE_DESCRIPTOR, FIRST_USER_CALL,
};

/// Descriptor of the base sensor interface.
pub const SENSOR_DESCRIPTOR: &str = "nexus.hw.Sensor";
/// Descriptor of the derived thermometer interface.
pub const THERMOMETER_DESCRIPTOR: &str = "nexus.hw.Thermometer";

/// Reads the current value. No request payload; reply carries a `u32`.
pub const CALL_READ: u32 = FIRST_USER_CALL;
/// Folds a batch of samples into the reading. Request carries a `u32`
/// sequence; reply carries the new reading.
pub const CALL_ACCUMULATE: u32 = FIRST_USER_CALL + 1;
/// Describes the shared sample queue. Reply carries a queue descriptor.
pub const CALL_DESCRIBE_QUEUE: u32 = FIRST_USER_CALL + 2;

/// Thermometer service used by every e2e scenario.
pub struct Thermometer {
    reading: AtomicU32,
}

impl Thermometer {
    /// Creates a thermometer with an initial reading.
    pub fn new(initial: u32) -> Arc<Self> {
        Arc::new(Self { reading: AtomicU32::new(initial) })
    }
}

impl Interface for Thermometer {
    fn descriptor(&self) -> &str {
        THERMOMETER_DESCRIPTOR
    }

    fn interface_chain(&self) -> Result<Vec<String>, CallError> {
        Ok(vec![
            THERMOMETER_DESCRIPTOR.to_owned(),
            SENSOR_DESCRIPTOR.to_owned(),
            BASE_DESCRIPTOR.to_owned(),
        ])
    }

    fn on_call(&self, code: u32, request: &MsgParcel) -> Result<MsgParcel, CallError> {
        match code {
            CALL_READ => {
                let mut reply = MsgParcel::new();
                reply.write_buffer(&self.reading.load(Ordering::SeqCst).to_le_bytes());
                Ok(reply)
            }
            CALL_ACCUMULATE => {
                let (root, _) = request.root_buffer(0)?;
                let samples = read_sequence::<u32>(request, root, 0)?;
                let total: u32 = samples.iter().sum();
                let reading = self.reading.fetch_add(total, Ordering::SeqCst) + total;
                let mut reply = MsgParcel::new();
                reply.write_buffer(&reading.to_le_bytes());
                Ok(reply)
            }
            CALL_DESCRIBE_QUEUE => {
                let descriptor = sample_queue();
                let mut reply = MsgParcel::new();
                let root = reply.write_buffer(&descriptor.inline_image());
                write_queue_descriptor(&descriptor, &mut reply, root, 0)?;
                Ok(reply)
            }
            other => Err(CallError::Exception {
                code: ExceptionCode::Unsupported,
                message: format!("thermometer call {other} not implemented"),
            }),
        }
    }
}

/// Queue description the thermometer hands out: two grants over one
/// shared region, synchronized through a single handle.
pub fn sample_queue() -> QueueDescriptor {
    QueueDescriptor {
        grants: vec![
            GrantRegion { region_index: 0, offset: 0, size: 4096 },
            GrantRegion { region_index: 0, offset: 4096, size: 4096 },
        ],
        sync_handle: Some(NativeHandle::new(vec![3], vec![])),
        quantum: 16,
        flavor: QueueFlavor::Synchronized,
    }
}

/// Builds the request parcel for [`CALL_ACCUMULATE`].
pub fn accumulate_request(samples: &[u32]) -> MsgParcel {
    let mut request = MsgParcel::new();
    let root = request.write_buffer(&sequence_image(samples.len()));
    write_sequence(samples, &mut request, root, 0).expect("encode samples");
    request
}

/// Reads the `u32` payload at the first reply root after the status.
pub fn reply_value(reply: &MsgParcel) -> u32 {
    let (_, image) = reply.root_buffer(1).expect("payload root");
    get_u32(image, 0).expect("payload word")
}
