// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! Call outcome carried on the wire.
//!
//! Every reply parcel leads with a [`CallStatus`] as its first root
//! region. The status collapses a call's outcome into three legible
//! states so peers with different native error conventions can agree on
//! what happened: success, an exception the interface declared, or a
//! transport-level failure. On the Rust side handlers work with
//! [`CallError`] and the conversion in both directions lives here.

use thiserror::Error;

use crate::embedded::{get_i32, get_u32, read_string, string_image, write_string};
use crate::parcel::{BufferHandle, MsgParcel, ParcelError};

/// Byte offset of the status discriminant within the status image.
pub const STATUS_DISCRIMINANT_OFFSET: usize = 0;
/// Byte offset of the exception or transport code within the status image.
pub const STATUS_CODE_OFFSET: usize = 4;
/// Byte offset of the message string image within the status image.
pub const STATUS_MESSAGE_OFFSET: usize = 8;
/// Width of a status inline image.
pub const STATUS_WIRE_SIZE: usize = 24;

/// Exception category declared by an interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExceptionCode {
    /// Caller lacks the rights for the operation.
    Security,
    /// An argument failed the callee's validation.
    IllegalArgument,
    /// The callee cannot serve the call in its current state.
    IllegalState,
    /// The operation is not implemented by this service.
    Unsupported,
    /// An interface-specific code outside the common set.
    Other(i32),
}

impl ExceptionCode {
    /// Wire value of this code.
    pub fn to_wire(self) -> i32 {
        match self {
            Self::Security => 1,
            Self::IllegalArgument => 2,
            Self::IllegalState => 3,
            Self::Unsupported => 4,
            Self::Other(code) => code,
        }
    }

    /// Decodes a wire value; unknown values land in `Other`.
    pub fn from_wire(raw: i32) -> Self {
        match raw {
            1 => Self::Security,
            2 => Self::IllegalArgument,
            3 => Self::IllegalState,
            4 => Self::Unsupported,
            other => Self::Other(other),
        }
    }
}

/// Transport-level failure category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportCode {
    /// The transport driver was shut down.
    Closed,
    /// No endpoint with the requested identity exists.
    UnknownEndpoint,
    /// The peer endpoint died before or during the call.
    PeerGone,
    /// The callee never produced a reply.
    NoReply,
    /// A parcel failed validation on the remote side.
    BadParcel,
    /// A driver-specific code outside the common set.
    Other(i32),
}

impl TransportCode {
    /// Wire value of this code.
    pub fn to_wire(self) -> i32 {
        match self {
            Self::Closed => 1,
            Self::UnknownEndpoint => 2,
            Self::PeerGone => 3,
            Self::NoReply => 4,
            Self::BadParcel => 5,
            Self::Other(code) => code,
        }
    }

    /// Decodes a wire value; unknown values land in `Other`.
    pub fn from_wire(raw: i32) -> Self {
        match raw {
            1 => Self::Closed,
            2 => Self::UnknownEndpoint,
            3 => Self::PeerGone,
            4 => Self::NoReply,
            5 => Self::BadParcel,
            other => Self::Other(other),
        }
    }
}

/// Failed call outcome as seen by Rust callers and handlers.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CallError {
    /// The callee declared an exception.
    #[error("declared exception {code:?}: {message}")]
    Exception {
        /// Exception category.
        code: ExceptionCode,
        /// Human-readable description from the callee.
        message: String,
    },
    /// The transport failed to complete the call.
    #[error("transport failure {0:?}")]
    Transport(TransportCode),
    /// A parcel failed validation on this side of the call.
    #[error(transparent)]
    Parcel(#[from] ParcelError),
}

/// Wire union of a call's outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CallStatus {
    /// The call completed; payload regions follow the status.
    Ok,
    /// The callee declared an exception.
    Exception {
        /// Exception category.
        code: ExceptionCode,
        /// Human-readable description from the callee.
        message: String,
    },
    /// The transport failed the call. Code only, no message.
    TransportFailure(TransportCode),
}

impl CallStatus {
    /// Collapses a handler error into its wire status.
    ///
    /// Local parcel validation failures surface to the peer as a
    /// transport failure; the offending payload never produces a reply
    /// pretending the call ran.
    pub fn from_error(err: &CallError) -> Self {
        match err {
            CallError::Exception { code, message } => {
                Self::Exception { code: *code, message: message.clone() }
            }
            CallError::Transport(code) => Self::TransportFailure(*code),
            CallError::Parcel(_) => Self::TransportFailure(TransportCode::BadParcel),
        }
    }

    /// Converts the decoded status back into a caller-side result.
    pub fn into_result(self) -> Result<(), CallError> {
        match self {
            Self::Ok => Ok(()),
            Self::Exception { code, message } => Err(CallError::Exception { code, message }),
            Self::TransportFailure(code) => Err(CallError::Transport(code)),
        }
    }

    fn fields(&self) -> (u32, i32, &str) {
        match self {
            Self::Ok => (0, 0, ""),
            Self::Exception { code, message } => (1, code.to_wire(), message.as_str()),
            Self::TransportFailure(code) => (2, code.to_wire(), ""),
        }
    }

    /// Writes this status as the next root region of `parcel`.
    ///
    /// The message string is always embedded, empty for the stateless
    /// discriminants, so the region shape does not depend on the
    /// outcome.
    pub fn write_to_parcel(&self, parcel: &mut MsgParcel) -> Result<BufferHandle, ParcelError> {
        let (discriminant, code, message) = self.fields();
        let mut image = [0u8; STATUS_WIRE_SIZE];
        image[STATUS_DISCRIMINANT_OFFSET..STATUS_DISCRIMINANT_OFFSET + 4]
            .copy_from_slice(&discriminant.to_le_bytes());
        image[STATUS_CODE_OFFSET..STATUS_CODE_OFFSET + 4].copy_from_slice(&code.to_le_bytes());
        image[STATUS_MESSAGE_OFFSET..STATUS_MESSAGE_OFFSET + 16]
            .copy_from_slice(&string_image(message));
        let root = parcel.write_buffer(&image);
        write_string(message, parcel, root, STATUS_MESSAGE_OFFSET)?;
        Ok(root)
    }

    /// Decodes the status from the first root region of `parcel`.
    pub fn read_from_parcel(parcel: &MsgParcel) -> Result<Self, ParcelError> {
        let (root, image) = parcel.root_buffer(0)?;
        let discriminant = get_u32(image, STATUS_DISCRIMINANT_OFFSET)?;
        let code = get_i32(image, STATUS_CODE_OFFSET)?;
        let message = read_string(parcel, root, STATUS_MESSAGE_OFFSET)?;
        match discriminant {
            0 => Ok(Self::Ok),
            1 => Ok(Self::Exception {
                code: ExceptionCode::from_wire(code),
                message: message.to_owned(),
            }),
            2 => Ok(Self::TransportFailure(TransportCode::from_wire(code))),
            other => Err(ParcelError::BadStatus(other)),
        }
    }
}
