// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: structured parcel storage for driver-bound call payloads
//!
//! A [`MsgParcel`] is the unit handed to (and received from) the
//! transport driver. It carries flat byte storage plus two side tables:
//! buffer regions (root or embedded) and opaque handle entries. Embedded
//! regions are anchored to a slot inside their parent region, so a
//! receiver can resolve child payloads without trusting inline pointers.
//! Every read path re-validates offsets against the storage it actually
//! received; claimed sizes that disagree with the region table are
//! rejected, never truncated.

use thiserror::Error;

/// Alignment of buffer regions inside parcel storage.
pub const REGION_ALIGN: usize = 8;
/// Width of an anchor slot (embedded-buffer or handle pointer field).
pub const ANCHOR_SLOT_SIZE: usize = 8;
/// Upper bound on OS descriptors carried by a single [`NativeHandle`].
pub const MAX_HANDLE_FDS: usize = 1024;
/// Upper bound on raw integer words carried by a single [`NativeHandle`].
pub const MAX_HANDLE_INTS: usize = 1024;

/// Errors raised while encoding or decoding parcel payloads.
///
/// Malformed input from a peer is always reported through this type;
/// decode paths never panic and never hand back truncated data.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[must_use = "parcel errors must be handled"]
pub enum ParcelError {
    /// A buffer handle does not name a region of this parcel.
    #[error("buffer handle {0} out of range")]
    NoSuchRegion(u32),
    /// A region escapes the storage that was actually received.
    #[error("region [{offset}, +{len}) escapes parcel storage of {storage} bytes")]
    OutOfBounds {
        /// Region start within parcel storage.
        offset: usize,
        /// Region length in bytes.
        len: usize,
        /// Total storage received.
        storage: usize,
    },
    /// An anchor slot does not fit inside the parent region.
    #[error("anchor slot at {offset} escapes parent region of {parent_len} bytes")]
    BadAnchorSlot {
        /// Slot offset relative to the parent region.
        offset: usize,
        /// Parent region length.
        parent_len: usize,
    },
    /// No embedded buffer was anchored at the named parent slot.
    #[error("no embedded buffer anchored at parent {parent}+{offset}")]
    AnchorMissing {
        /// Parent region index.
        parent: u32,
        /// Slot offset relative to the parent region.
        offset: usize,
    },
    /// The size claimed by an inline image disagrees with the region table.
    #[error("embedded buffer claims {claimed} bytes but region holds {actual}")]
    SizeMismatch {
        /// Byte count derived from the inline image.
        claimed: usize,
        /// Byte count actually present.
        actual: usize,
    },
    /// No handle entry was anchored at the named parent slot.
    #[error("no handle anchored at parent {parent}+{offset}")]
    HandleMissing {
        /// Parent region index.
        parent: u32,
        /// Slot offset relative to the parent region.
        offset: usize,
    },
    /// A native handle exceeds the descriptor or integer bounds.
    #[error("native handle too large ({fds} descriptors, {ints} ints)")]
    OversizedHandle {
        /// Descriptor count of the rejected handle.
        fds: usize,
        /// Integer word count of the rejected handle.
        ints: usize,
    },
    /// An element count multiplied by the element width overflows.
    #[error("element count {count} x {elem_size} bytes overflows")]
    CountOverflow {
        /// Claimed element count.
        count: u64,
        /// Element width in bytes.
        elem_size: usize,
    },
    /// An inline image field does not fit inside its region.
    #[error("field at {offset}+{need} escapes region of {len} bytes")]
    FieldOutOfRange {
        /// Field offset relative to the region.
        offset: usize,
        /// Field width in bytes.
        need: usize,
        /// Region length.
        len: usize,
    },
    /// An embedded string is not valid UTF-8.
    #[error("embedded string is not valid UTF-8")]
    BadUtf8,
    /// An embedded string lacks its trailing NUL byte.
    #[error("embedded string missing NUL terminator")]
    MissingTerminator,
    /// A queue flavor word is not a known value.
    #[error("unknown queue flavor {0}")]
    BadFlavor(u32),
    /// A memory block claims backing bytes but carries no handle.
    #[error("memory block of {size} bytes has no backing handle")]
    MissingBacking {
        /// Claimed backing size.
        size: u64,
    },
    /// A grant entry references a descriptor the handle does not carry.
    #[error("grant references descriptor {region_index}, handle carries {available}")]
    GrantOutOfRange {
        /// Descriptor index named by the grant.
        region_index: u32,
        /// Descriptors actually present.
        available: usize,
    },
    /// A synchronized queue descriptor arrived without its handle.
    #[error("synchronized queue missing its synchronization handle")]
    MissingSyncHandle,
    /// A status discriminant is not a known value.
    #[error("unknown status discriminant {0}")]
    BadStatus(u32),
}

/// Index of a validated buffer region inside a [`MsgParcel`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferHandle(pub(crate) u32);

/// Opaque bundle of OS descriptors plus raw integer words.
///
/// The descriptors are plain `i32` values here; duplication and
/// ownership across the process boundary belong to the driver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NativeHandle {
    fds: Vec<i32>,
    ints: Vec<i32>,
}

impl NativeHandle {
    /// Builds a handle from descriptor and integer words.
    pub fn new(fds: Vec<i32>, ints: Vec<i32>) -> Self {
        Self { fds, ints }
    }

    /// Descriptor slots carried by this handle.
    pub fn fds(&self) -> &[i32] {
        &self.fds
    }

    /// Raw integer words carried by this handle.
    pub fn ints(&self) -> &[i32] {
        &self.ints
    }

    /// True when the handle is present but carries nothing.
    ///
    /// Distinct from a null handle: an empty handle round-trips as
    /// empty, a null one as null.
    pub fn is_empty(&self) -> bool {
        self.fds.is_empty() && self.ints.is_empty()
    }

    fn within_bounds(&self) -> bool {
        self.fds.len() <= MAX_HANDLE_FDS && self.ints.len() <= MAX_HANDLE_INTS
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Anchor {
    parent: u32,
    parent_offset: usize,
}

#[derive(Clone, Debug)]
struct Region {
    offset: usize,
    len: usize,
    anchor: Option<Anchor>,
}

#[derive(Clone, Debug)]
struct HandleEntry {
    value: Option<NativeHandle>,
    anchor: Anchor,
}

/// Structured buffer exchanged with the transport driver.
#[derive(Clone, Debug, Default)]
pub struct MsgParcel {
    data: Vec<u8>,
    regions: Vec<Region>,
    handles: Vec<HandleEntry>,
}

impl MsgParcel {
    /// Creates an empty parcel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw storage of this parcel.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Number of buffer regions (root and embedded).
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Number of handle-table entries (null entries included).
    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Appends a root buffer region and returns its handle.
    pub fn write_buffer(&mut self, bytes: &[u8]) -> BufferHandle {
        self.push_region(bytes, None)
    }

    /// Appends a buffer region anchored at `parent_offset` inside `parent`.
    ///
    /// The anchor slot must lie fully inside the parent region.
    pub fn write_embedded_buffer(
        &mut self,
        bytes: &[u8],
        parent: BufferHandle,
        parent_offset: usize,
    ) -> Result<BufferHandle, ParcelError> {
        let parent_len = self.region(parent)?.len;
        check_slot(parent_offset, parent_len)?;
        Ok(self.push_region(bytes, Some(Anchor { parent: parent.0, parent_offset })))
    }

    /// Resolves a buffer handle to its bytes.
    pub fn read_buffer(&self, handle: BufferHandle) -> Result<&[u8], ParcelError> {
        let region = self.region(handle)?;
        self.slice(region)
    }

    /// Returns the `index`-th root region, in write order.
    pub fn root_buffer(&self, index: u32) -> Result<(BufferHandle, &[u8]), ParcelError> {
        let mut seen = 0;
        for (pos, region) in self.regions.iter().enumerate() {
            if region.anchor.is_some() {
                continue;
            }
            if seen == index {
                let handle = BufferHandle(pos as u32);
                return Ok((handle, self.slice(region)?));
            }
            seen += 1;
        }
        Err(ParcelError::NoSuchRegion(index))
    }

    /// Resolves the embedded buffer anchored at `parent_offset` inside
    /// `parent`, validating the length claimed by the inline image.
    ///
    /// A claim that disagrees with the region table in either direction
    /// is rejected; the payload is never truncated to fit.
    pub fn read_embedded_buffer(
        &self,
        claimed_len: usize,
        parent: BufferHandle,
        parent_offset: usize,
    ) -> Result<(BufferHandle, &[u8]), ParcelError> {
        let (pos, region) = self
            .regions
            .iter()
            .enumerate()
            .find(|(_, region)| {
                region.anchor
                    == Some(Anchor { parent: parent.0, parent_offset })
            })
            .ok_or(ParcelError::AnchorMissing { parent: parent.0, offset: parent_offset })?;
        if claimed_len != region.len {
            return Err(ParcelError::SizeMismatch { claimed: claimed_len, actual: region.len });
        }
        Ok((BufferHandle(pos as u32), self.slice(region)?))
    }

    /// Recovers the handle of an already-decoded region by address range.
    ///
    /// Returns `None` when the bytes were not produced by this parcel;
    /// a handle is never fabricated for foreign storage.
    pub fn find_buffer(&self, bytes: &[u8]) -> Option<BufferHandle> {
        let base = self.data.as_ptr() as usize;
        let start = bytes.as_ptr() as usize;
        if start < base || start + bytes.len() > base + self.data.len() {
            return None;
        }
        let offset = start - base;
        self.regions
            .iter()
            .position(|region| region.offset == offset && region.len == bytes.len())
            .map(|pos| BufferHandle(pos as u32))
    }

    /// Records a (possibly null) handle anchored at `parent_offset`
    /// inside `parent`.
    pub fn write_embedded_handle(
        &mut self,
        handle: Option<&NativeHandle>,
        parent: BufferHandle,
        parent_offset: usize,
    ) -> Result<(), ParcelError> {
        let parent_len = self.region(parent)?.len;
        check_slot(parent_offset, parent_len)?;
        if let Some(handle) = handle {
            if !handle.within_bounds() {
                return Err(ParcelError::OversizedHandle {
                    fds: handle.fds.len(),
                    ints: handle.ints.len(),
                });
            }
        }
        self.handles.push(HandleEntry {
            value: handle.cloned(),
            anchor: Anchor { parent: parent.0, parent_offset },
        });
        Ok(())
    }

    /// Resolves the handle anchored at `parent_offset` inside `parent`.
    ///
    /// `Ok(None)` is a present-but-null handle; a missing table entry is
    /// an error, so null never masks a malformed payload.
    pub fn read_embedded_handle(
        &self,
        parent: BufferHandle,
        parent_offset: usize,
    ) -> Result<Option<&NativeHandle>, ParcelError> {
        self.handles
            .iter()
            .find(|entry| entry.anchor == Anchor { parent: parent.0, parent_offset })
            .map(|entry| entry.value.as_ref())
            .ok_or(ParcelError::HandleMissing { parent: parent.0, offset: parent_offset })
    }

    /// Moves every region and handle of `other` to the end of this
    /// parcel, preserving anchors.
    ///
    /// Appended root regions keep their write order after the existing
    /// roots, so a reply can carry a status region first and splice a
    /// handler's payload parcel behind it.
    pub fn append_parcel(&mut self, other: MsgParcel) {
        let aligned = self.data.len().next_multiple_of(REGION_ALIGN);
        self.data.resize(aligned, 0);
        let byte_base = self.data.len();
        let region_base = self.regions.len() as u32;
        self.data.extend_from_slice(&other.data);
        for region in other.regions {
            self.regions.push(Region {
                offset: byte_base + region.offset,
                len: region.len,
                anchor: region.anchor.map(|anchor| Anchor {
                    parent: anchor.parent + region_base,
                    parent_offset: anchor.parent_offset,
                }),
            });
        }
        for entry in other.handles {
            self.handles.push(HandleEntry {
                value: entry.value,
                anchor: Anchor {
                    parent: entry.anchor.parent + region_base,
                    parent_offset: entry.anchor.parent_offset,
                },
            });
        }
    }

    fn push_region(&mut self, bytes: &[u8], anchor: Option<Anchor>) -> BufferHandle {
        let aligned = self.data.len().next_multiple_of(REGION_ALIGN);
        self.data.resize(aligned, 0);
        let offset = self.data.len();
        self.data.extend_from_slice(bytes);
        self.regions.push(Region { offset, len: bytes.len(), anchor });
        BufferHandle((self.regions.len() - 1) as u32)
    }

    fn region(&self, handle: BufferHandle) -> Result<&Region, ParcelError> {
        self.regions
            .get(handle.0 as usize)
            .ok_or(ParcelError::NoSuchRegion(handle.0))
    }

    fn slice(&self, region: &Region) -> Result<&[u8], ParcelError> {
        let end = region.offset.checked_add(region.len).ok_or(ParcelError::OutOfBounds {
            offset: region.offset,
            len: region.len,
            storage: self.data.len(),
        })?;
        self.data.get(region.offset..end).ok_or(ParcelError::OutOfBounds {
            offset: region.offset,
            len: region.len,
            storage: self.data.len(),
        })
    }
}

fn check_slot(parent_offset: usize, parent_len: usize) -> Result<(), ParcelError> {
    let end = parent_offset.checked_add(ANCHOR_SLOT_SIZE);
    match end {
        Some(end) if end <= parent_len => Ok(()),
        _ => Err(ParcelError::BadAnchorSlot { offset: parent_offset, parent_len }),
    }
}
