// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: embedded payload codecs for variable-length parcel fields
//!
//! Variable-length values (sequences, strings, memory blocks, queue
//! descriptors) travel as child regions of a parent buffer. The parent
//! carries a fixed-width inline image per field; children are anchored
//! at `parent_offset + FIELD_OFFSET` in the parcel's region table.
//! Writers compose the inline image first, append the parent region,
//! then call the `write_*` functions here to attach children. Readers
//! call the matching `read_*` functions, which validate every claimed
//! count and size against the region actually received before handing
//! out a borrowed, non-owning view. Decoded data is never copied out of
//! the receive buffer.

use crate::parcel::{BufferHandle, MsgParcel, NativeHandle, ParcelError};

/// Byte offset of the element count within a sequence inline image.
pub const SEQUENCE_COUNT_OFFSET: usize = 0;
/// Byte offset of the child-data anchor slot within a sequence inline image.
pub const SEQUENCE_DATA_OFFSET: usize = 8;
/// Width of a sequence inline image.
pub const SEQUENCE_WIRE_SIZE: usize = 16;

/// Byte offset of the length within a string inline image.
pub const STRING_LEN_OFFSET: usize = 0;
/// Byte offset of the child-data anchor slot within a string inline image.
pub const STRING_DATA_OFFSET: usize = 8;
/// Width of a string inline image.
pub const STRING_WIRE_SIZE: usize = 16;

/// Byte offset of the backing-handle slot within a memory block image.
pub const MEMORY_HANDLE_OFFSET: usize = 0;
/// Byte offset of the size field within a memory block image.
pub const MEMORY_SIZE_OFFSET: usize = 8;
/// Byte offset of the tag string image within a memory block image.
pub const MEMORY_TAG_OFFSET: usize = 16;
/// Width of a memory block inline image.
pub const MEMORY_WIRE_SIZE: usize = 32;

/// Byte offset of the grant sequence image within a queue descriptor image.
pub const QUEUE_GRANTS_OFFSET: usize = 0;
/// Byte offset of the synchronization-handle slot within a queue descriptor image.
pub const QUEUE_SYNC_HANDLE_OFFSET: usize = 16;
/// Byte offset of the element quantum within a queue descriptor image.
pub const QUEUE_QUANTUM_OFFSET: usize = 24;
/// Byte offset of the flavor tag within a queue descriptor image.
pub const QUEUE_FLAVOR_OFFSET: usize = 28;
/// Width of a queue descriptor inline image.
pub const QUEUE_WIRE_SIZE: usize = 32;

/// Fixed-width element of an embedded sequence.
///
/// Elements are encoded little-endian at `WIRE_SIZE`-byte strides.
/// `put` and `take` operate on slices of exactly `WIRE_SIZE` bytes; the
/// sequence codecs validate bounds before slicing.
pub trait WireElem: Sized {
    /// Wire width of one element, in bytes.
    const WIRE_SIZE: usize;

    /// Encodes one element into `out`.
    fn put(&self, out: &mut [u8]);

    /// Decodes one element from `bytes`.
    fn take(bytes: &[u8]) -> Self;
}

macro_rules! impl_wire_int {
    ($($ty:ty),*) => {
        $(
            impl WireElem for $ty {
                const WIRE_SIZE: usize = core::mem::size_of::<$ty>();

                fn put(&self, out: &mut [u8]) {
                    out[..Self::WIRE_SIZE].copy_from_slice(&self.to_le_bytes());
                }

                fn take(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; Self::WIRE_SIZE];
                    raw.copy_from_slice(&bytes[..Self::WIRE_SIZE]);
                    Self::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_wire_int!(u8, u16, u32, u64, i8, i16, i32, i64);

/// Reads a `u32` field at `offset` from received region bytes.
pub fn get_u32(bytes: &[u8], offset: usize) -> Result<u32, ParcelError> {
    let raw = field(bytes, offset, 4)?;
    Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Reads an `i32` field at `offset` from received region bytes.
pub fn get_i32(bytes: &[u8], offset: usize) -> Result<i32, ParcelError> {
    get_u32(bytes, offset).map(|raw| raw as i32)
}

/// Reads a `u64` field at `offset` from received region bytes.
pub fn get_u64(bytes: &[u8], offset: usize) -> Result<u64, ParcelError> {
    let raw = field(bytes, offset, 8)?;
    let mut out = [0u8; 8];
    out.copy_from_slice(raw);
    Ok(u64::from_le_bytes(out))
}

fn field(bytes: &[u8], offset: usize, need: usize) -> Result<&[u8], ParcelError> {
    let end = offset
        .checked_add(need)
        .filter(|end| *end <= bytes.len())
        .ok_or(ParcelError::FieldOutOfRange { offset, need, len: bytes.len() })?;
    Ok(&bytes[offset..end])
}

/// Zero-copy view over a decoded sequence.
///
/// The view borrows the receive buffer; elements are decoded lazily on
/// access and the underlying wire storage is owned by the parcel, so
/// dropping the view never frees anything.
#[derive(Clone, Copy, Debug)]
pub struct SequenceView<'p, T> {
    bytes: &'p [u8],
    count: usize,
    handle: BufferHandle,
    _elem: core::marker::PhantomData<T>,
}

impl<'p, T: WireElem> SequenceView<'p, T> {
    /// Number of elements in the sequence.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True when the sequence holds no elements.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Decodes the element at `index`, or `None` past the end.
    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.count {
            return None;
        }
        Some(T::take(&self.bytes[index * T::WIRE_SIZE..]))
    }

    /// Iterates over decoded elements.
    pub fn iter(&self) -> impl Iterator<Item = T> + 'p {
        let bytes = self.bytes;
        (0..self.count).map(move |index| T::take(&bytes[index * T::WIRE_SIZE..]))
    }

    /// Collects all elements into an owned vector.
    pub fn to_vec(&self) -> Vec<T> {
        self.iter().collect()
    }

    /// Raw wire bytes backing the view, inside the receive buffer.
    pub fn as_bytes(&self) -> &'p [u8] {
        self.bytes
    }

    /// Region handle of the child buffer the view is bound to.
    pub fn buffer_handle(&self) -> BufferHandle {
        self.handle
    }
}

/// Builds the inline image of a sequence with `count` elements.
///
/// The image is spliced into the parent buffer at the field offset; the
/// data slot stays zero and is resolved through the region table.
pub fn sequence_image(count: usize) -> [u8; SEQUENCE_WIRE_SIZE] {
    let mut image = [0u8; SEQUENCE_WIRE_SIZE];
    image[SEQUENCE_COUNT_OFFSET..SEQUENCE_COUNT_OFFSET + 8]
        .copy_from_slice(&(count as u64).to_le_bytes());
    image
}

/// Writes the elements of a sequence as a child region of `parent`.
///
/// The parent region must already carry `sequence_image(items.len())`
/// at `parent_offset`.
pub fn write_sequence<T: WireElem>(
    items: &[T],
    parcel: &mut MsgParcel,
    parent: BufferHandle,
    parent_offset: usize,
) -> Result<BufferHandle, ParcelError> {
    let len = items
        .len()
        .checked_mul(T::WIRE_SIZE)
        .ok_or(ParcelError::CountOverflow { count: items.len() as u64, elem_size: T::WIRE_SIZE })?;
    let mut payload = vec![0u8; len];
    for (index, item) in items.iter().enumerate() {
        item.put(&mut payload[index * T::WIRE_SIZE..]);
    }
    parcel.write_embedded_buffer(&payload, parent, parent_offset + SEQUENCE_DATA_OFFSET)
}

/// Rebinds the sequence anchored at `parent_offset` to the receive buffer.
///
/// The claimed element count is read from the parent's inline image and
/// `count * WIRE_SIZE` is validated against the child region before the
/// view is handed out; a count that understates or overstates the child
/// is rejected. The buffer may come from an untrusted peer, so the
/// check also guards the multiplication itself.
pub fn read_sequence<'p, T: WireElem>(
    parcel: &'p MsgParcel,
    parent: BufferHandle,
    parent_offset: usize,
) -> Result<SequenceView<'p, T>, ParcelError> {
    let parent_bytes = parcel.read_buffer(parent)?;
    let count = get_u64(parent_bytes, parent_offset + SEQUENCE_COUNT_OFFSET)?;
    let claimed = count
        .checked_mul(T::WIRE_SIZE as u64)
        .and_then(|len| usize::try_from(len).ok())
        .ok_or(ParcelError::CountOverflow { count, elem_size: T::WIRE_SIZE })?;
    let (handle, bytes) =
        parcel.read_embedded_buffer(claimed, parent, parent_offset + SEQUENCE_DATA_OFFSET)?;
    Ok(SequenceView { bytes, count: count as usize, handle, _elem: core::marker::PhantomData })
}

/// Builds the inline image of an embedded string.
pub fn string_image(value: &str) -> [u8; STRING_WIRE_SIZE] {
    let mut image = [0u8; STRING_WIRE_SIZE];
    image[STRING_LEN_OFFSET..STRING_LEN_OFFSET + 8]
        .copy_from_slice(&(value.len() as u64).to_le_bytes());
    image
}

/// Writes a string's bytes as a child region of `parent`.
///
/// The child carries `len + 1` bytes: the UTF-8 content plus a trailing
/// NUL so peers in C-family runtimes can read it in place. The parent
/// region must already carry `string_image(value)` at `parent_offset`.
pub fn write_string(
    value: &str,
    parcel: &mut MsgParcel,
    parent: BufferHandle,
    parent_offset: usize,
) -> Result<BufferHandle, ParcelError> {
    let mut payload = Vec::with_capacity(value.len() + 1);
    payload.extend_from_slice(value.as_bytes());
    payload.push(0);
    parcel.write_embedded_buffer(&payload, parent, parent_offset + STRING_DATA_OFFSET)
}

/// Decodes the string anchored at `parent_offset`, borrowing the
/// receive buffer.
///
/// Validates the exact child length (`len + 1`), the NUL terminator,
/// and UTF-8 before handing out the borrow.
pub fn read_string<'p>(
    parcel: &'p MsgParcel,
    parent: BufferHandle,
    parent_offset: usize,
) -> Result<&'p str, ParcelError> {
    let parent_bytes = parcel.read_buffer(parent)?;
    let len = get_u64(parent_bytes, parent_offset + STRING_LEN_OFFSET)?;
    let claimed = len
        .checked_add(1)
        .and_then(|claimed| usize::try_from(claimed).ok())
        .ok_or(ParcelError::CountOverflow { count: len, elem_size: 1 })?;
    let (_, bytes) =
        parcel.read_embedded_buffer(claimed, parent, parent_offset + STRING_DATA_OFFSET)?;
    match bytes.split_last() {
        Some((0, content)) => core::str::from_utf8(content).map_err(|_| ParcelError::BadUtf8),
        _ => Err(ParcelError::MissingTerminator),
    }
}

/// Writes a sequence of strings as nested children of `parent`.
///
/// The child region holds one string inline image per element; each
/// string's bytes are anchored as grandchildren inside that child. The
/// parent region must already carry `sequence_image(items.len())` at
/// `parent_offset`.
pub fn write_string_sequence(
    items: &[&str],
    parcel: &mut MsgParcel,
    parent: BufferHandle,
    parent_offset: usize,
) -> Result<BufferHandle, ParcelError> {
    let mut images = Vec::with_capacity(items.len() * STRING_WIRE_SIZE);
    for item in items {
        images.extend_from_slice(&string_image(item));
    }
    let child =
        parcel.write_embedded_buffer(&images, parent, parent_offset + SEQUENCE_DATA_OFFSET)?;
    for (index, item) in items.iter().enumerate() {
        write_string(item, parcel, child, index * STRING_WIRE_SIZE)?;
    }
    Ok(child)
}

/// Decodes a sequence of strings anchored at `parent_offset`.
///
/// The returned strings borrow the receive buffer; only the vector of
/// references is allocated.
pub fn read_string_sequence<'p>(
    parcel: &'p MsgParcel,
    parent: BufferHandle,
    parent_offset: usize,
) -> Result<Vec<&'p str>, ParcelError> {
    let parent_bytes = parcel.read_buffer(parent)?;
    let count = get_u64(parent_bytes, parent_offset + SEQUENCE_COUNT_OFFSET)?;
    let claimed = count
        .checked_mul(STRING_WIRE_SIZE as u64)
        .and_then(|len| usize::try_from(len).ok())
        .ok_or(ParcelError::CountOverflow { count, elem_size: STRING_WIRE_SIZE })?;
    let (child, _) =
        parcel.read_embedded_buffer(claimed, parent, parent_offset + SEQUENCE_DATA_OFFSET)?;
    let mut items = Vec::with_capacity(count as usize);
    for index in 0..count as usize {
        items.push(read_string(parcel, child, index * STRING_WIRE_SIZE)?);
    }
    Ok(items)
}

/// Shared-memory region description: a claimed size, the backing
/// handle, and a tag naming how to interpret the region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryBlock {
    /// Claimed size of the backing region in bytes.
    pub size: u64,
    /// Backing handle, or `None` for an explicitly null block.
    pub handle: Option<NativeHandle>,
    /// Tag describing how the region is to be mapped and used.
    pub tag: String,
}

impl MemoryBlock {
    /// Builds the inline image for this block.
    pub fn inline_image(&self) -> [u8; MEMORY_WIRE_SIZE] {
        let mut image = [0u8; MEMORY_WIRE_SIZE];
        image[MEMORY_SIZE_OFFSET..MEMORY_SIZE_OFFSET + 8]
            .copy_from_slice(&self.size.to_le_bytes());
        image[MEMORY_TAG_OFFSET..MEMORY_TAG_OFFSET + STRING_WIRE_SIZE]
            .copy_from_slice(&string_image(&self.tag));
        image
    }
}

/// Decoded view of a memory block, borrowing the receive buffer.
#[derive(Clone, Copy, Debug)]
pub struct MemoryView<'p> {
    /// Claimed size of the backing region in bytes.
    pub size: u64,
    /// Backing handle, or `None` for a null block.
    pub handle: Option<&'p NativeHandle>,
    /// Tag describing how the region is to be interpreted.
    pub tag: &'p str,
}

impl MemoryView<'_> {
    /// True when the claimed size fits within the actual backing region.
    ///
    /// The claimed size comes off the wire and must be checked against
    /// the region the handle really maps before any access trusts it.
    pub fn fits_region(&self, actual_len: u64) -> bool {
        self.size <= actual_len
    }
}

/// Writes a memory block's handle and tag as children of `parent`.
///
/// The parent region must already carry the block's `inline_image()` at
/// `parent_offset`.
pub fn write_memory_block(
    block: &MemoryBlock,
    parcel: &mut MsgParcel,
    parent: BufferHandle,
    parent_offset: usize,
) -> Result<(), ParcelError> {
    parcel.write_embedded_handle(
        block.handle.as_ref(),
        parent,
        parent_offset + MEMORY_HANDLE_OFFSET,
    )?;
    write_string(&block.tag, parcel, parent, parent_offset + MEMORY_TAG_OFFSET)?;
    Ok(())
}

/// Decodes the memory block anchored at `parent_offset`.
///
/// A null handle paired with a non-zero size is rejected: the claim has
/// no backing to validate against.
pub fn read_memory_block<'p>(
    parcel: &'p MsgParcel,
    parent: BufferHandle,
    parent_offset: usize,
) -> Result<MemoryView<'p>, ParcelError> {
    let parent_bytes = parcel.read_buffer(parent)?;
    let size = get_u64(parent_bytes, parent_offset + MEMORY_SIZE_OFFSET)?;
    let handle = parcel.read_embedded_handle(parent, parent_offset + MEMORY_HANDLE_OFFSET)?;
    if handle.is_none() && size != 0 {
        return Err(ParcelError::MissingBacking { size });
    }
    let tag = read_string(parcel, parent, parent_offset + MEMORY_TAG_OFFSET)?;
    Ok(MemoryView { size, handle, tag })
}

/// One grant: a sub-range of a queue's shared memory made accessible to
/// a participant, referencing a descriptor of the queue's handle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GrantRegion {
    /// Index of the backing descriptor within the queue's handle.
    pub region_index: u32,
    /// Byte offset of the grant within the backing region.
    pub offset: u64,
    /// Byte length of the grant.
    pub size: u64,
}

impl WireElem for GrantRegion {
    const WIRE_SIZE: usize = 24;

    fn put(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.region_index.to_le_bytes());
        out[4..8].copy_from_slice(&0u32.to_le_bytes());
        out[8..16].copy_from_slice(&self.offset.to_le_bytes());
        out[16..24].copy_from_slice(&self.size.to_le_bytes());
    }

    fn take(bytes: &[u8]) -> Self {
        Self {
            region_index: u32::take(&bytes[0..]),
            offset: u64::take(&bytes[8..]),
            size: u64::take(&bytes[16..]),
        }
    }
}

/// Queue synchronization flavor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueFlavor {
    /// Single-reader, single-writer queue with no blocking support.
    Unsynchronized,
    /// Queue whose blocking semantics require the synchronization handle.
    Synchronized,
}

impl QueueFlavor {
    /// Wire discriminant of this flavor.
    pub fn to_wire(self) -> u32 {
        match self {
            Self::Unsynchronized => 0,
            Self::Synchronized => 1,
        }
    }

    /// Decodes a flavor discriminant.
    pub fn from_wire(raw: u32) -> Result<Self, ParcelError> {
        match raw {
            0 => Ok(Self::Unsynchronized),
            1 => Ok(Self::Synchronized),
            other => Err(ParcelError::BadFlavor(other)),
        }
    }
}

/// Message-queue descriptor: grant regions plus an optional
/// synchronization handle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueDescriptor {
    /// Grant regions shared with the queue's participants.
    pub grants: Vec<GrantRegion>,
    /// Synchronization handle, or `None` when the queue never blocks.
    pub sync_handle: Option<NativeHandle>,
    /// Size of one queue element in bytes.
    pub quantum: u32,
    /// Synchronization flavor of the queue.
    pub flavor: QueueFlavor,
}

impl QueueDescriptor {
    /// Builds the inline image for this descriptor.
    pub fn inline_image(&self) -> [u8; QUEUE_WIRE_SIZE] {
        let mut image = [0u8; QUEUE_WIRE_SIZE];
        image[QUEUE_GRANTS_OFFSET..QUEUE_GRANTS_OFFSET + SEQUENCE_WIRE_SIZE]
            .copy_from_slice(&sequence_image(self.grants.len()));
        image[QUEUE_QUANTUM_OFFSET..QUEUE_QUANTUM_OFFSET + 4]
            .copy_from_slice(&self.quantum.to_le_bytes());
        image[QUEUE_FLAVOR_OFFSET..QUEUE_FLAVOR_OFFSET + 4]
            .copy_from_slice(&self.flavor.to_wire().to_le_bytes());
        image
    }
}

/// Decoded view of a queue descriptor, borrowing the receive buffer.
#[derive(Clone, Copy, Debug)]
pub struct QueueView<'p> {
    /// Grant regions, rebound to the receive buffer.
    pub grants: SequenceView<'p, GrantRegion>,
    /// Synchronization handle, or `None` when absent on the wire.
    pub sync_handle: Option<&'p NativeHandle>,
    /// Size of one queue element in bytes.
    pub quantum: u32,
    /// Synchronization flavor of the queue.
    pub flavor: QueueFlavor,
}

impl QueueView<'_> {
    /// Checks cross-field consistency of the decoded descriptor.
    ///
    /// A synchronized queue must carry its handle, and every grant must
    /// reference a descriptor the handle actually holds. Kept separate
    /// from decoding so callers can still inspect a descriptor that
    /// fails these checks.
    pub fn validate(&self) -> Result<(), ParcelError> {
        if self.flavor == QueueFlavor::Synchronized && self.sync_handle.is_none() {
            return Err(ParcelError::MissingSyncHandle);
        }
        let available = self.sync_handle.map_or(0, |handle| handle.fds().len());
        for grant in self.grants.iter() {
            if grant.region_index as usize >= available {
                return Err(ParcelError::GrantOutOfRange {
                    region_index: grant.region_index,
                    available,
                });
            }
        }
        Ok(())
    }
}

/// Writes a queue descriptor's children under `parent`.
///
/// The grant sequence is embedded first, then the nullable
/// synchronization handle, matching the decode order. The parent region
/// must already carry the descriptor's `inline_image()` at
/// `parent_offset`.
pub fn write_queue_descriptor(
    descriptor: &QueueDescriptor,
    parcel: &mut MsgParcel,
    parent: BufferHandle,
    parent_offset: usize,
) -> Result<(), ParcelError> {
    write_sequence(&descriptor.grants, parcel, parent, parent_offset + QUEUE_GRANTS_OFFSET)?;
    parcel.write_embedded_handle(
        descriptor.sync_handle.as_ref(),
        parent,
        parent_offset + QUEUE_SYNC_HANDLE_OFFSET,
    )?;
    Ok(())
}

/// Decodes the queue descriptor anchored at `parent_offset`.
///
/// Grants decode first, then the handle; a failure decoding the handle
/// propagates as-is and the already-decoded grants are not rolled back.
pub fn read_queue_descriptor<'p>(
    parcel: &'p MsgParcel,
    parent: BufferHandle,
    parent_offset: usize,
) -> Result<QueueView<'p>, ParcelError> {
    let parent_bytes = parcel.read_buffer(parent)?;
    let quantum = get_u32(parent_bytes, parent_offset + QUEUE_QUANTUM_OFFSET)?;
    let flavor_raw = get_u32(parent_bytes, parent_offset + QUEUE_FLAVOR_OFFSET)?;
    let flavor = QueueFlavor::from_wire(flavor_raw)?;
    let grants = read_sequence(parcel, parent, parent_offset + QUEUE_GRANTS_OFFSET)?;
    let sync_handle =
        parcel.read_embedded_handle(parent, parent_offset + QUEUE_SYNC_HANDLE_OFFSET)?;
    Ok(QueueView { grants, sync_handle, quantum, flavor })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parcel_with_image(image: &[u8]) -> (MsgParcel, BufferHandle) {
        let mut parcel = MsgParcel::new();
        let parent = parcel.write_buffer(image);
        (parcel, parent)
    }

    #[test]
    fn sequence_roundtrip_borrows_receive_buffer() {
        let items: Vec<u32> = vec![3, 5, 8, 13];
        let (mut parcel, parent) = parcel_with_image(&sequence_image(items.len()));
        write_sequence(&items, &mut parcel, parent, 0).unwrap();

        let view: SequenceView<'_, u32> = read_sequence(&parcel, parent, 0).unwrap();
        assert_eq!(view.len(), 4);
        assert_eq!(view.to_vec(), items);
        // The view points into parcel storage, not a copy.
        let base = parcel.data().as_ptr() as usize;
        let view_ptr = view.as_bytes().as_ptr() as usize;
        assert!(view_ptr >= base && view_ptr < base + parcel.data().len());
    }

    #[test]
    fn sequence_count_must_match_child_exactly() {
        let items: Vec<u64> = vec![1, 2, 3];
        let (mut parcel, _) = parcel_with_image(&[]);
        // Claim four elements but write three.
        let parent = parcel.write_buffer(&sequence_image(4));
        write_sequence(&items, &mut parcel, parent, 0).unwrap();
        let err = read_sequence::<u64>(&parcel, parent, 0).unwrap_err();
        assert_eq!(err, ParcelError::SizeMismatch { claimed: 32, actual: 24 });
    }

    #[test]
    fn huge_claimed_count_is_rejected_not_wrapped() {
        let (mut parcel, _) = parcel_with_image(&[]);
        let mut image = sequence_image(0);
        image[0..8].copy_from_slice(&u64::MAX.to_le_bytes());
        let parent = parcel.write_buffer(&image);
        parcel.write_embedded_buffer(&[0u8; 8], parent, SEQUENCE_DATA_OFFSET).unwrap();
        let err = read_sequence::<u64>(&parcel, parent, 0).unwrap_err();
        assert_eq!(err, ParcelError::CountOverflow { count: u64::MAX, elem_size: 8 });
    }

    #[test]
    fn string_roundtrip_checks_terminator_and_utf8() {
        let (mut parcel, parent) = parcel_with_image(&string_image("midi"));
        write_string("midi", &mut parcel, parent, 0).unwrap();
        assert_eq!(read_string(&parcel, parent, 0).unwrap(), "midi");

        // Same length claim, no NUL at the end.
        let (mut parcel, parent) = parcel_with_image(&string_image("midi"));
        parcel.write_embedded_buffer(b"midi!", parent, STRING_DATA_OFFSET).unwrap();
        assert_eq!(read_string(&parcel, parent, 0).unwrap_err(), ParcelError::MissingTerminator);

        let (mut parcel, parent) = parcel_with_image(&string_image("ab"));
        parcel.write_embedded_buffer(&[0xff, 0xfe, 0], parent, STRING_DATA_OFFSET).unwrap();
        assert_eq!(read_string(&parcel, parent, 0).unwrap_err(), ParcelError::BadUtf8);
    }

    #[test]
    fn string_sequence_roundtrip() {
        let items = ["alpha", "", "\u{3042}"];
        let (mut parcel, parent) = parcel_with_image(&sequence_image(items.len()));
        write_string_sequence(&items, &mut parcel, parent, 0).unwrap();
        let decoded = read_string_sequence(&parcel, parent, 0).unwrap();
        assert_eq!(decoded, items);
    }

    #[test]
    fn grant_region_elements_roundtrip() {
        let grants =
            [GrantRegion { region_index: 2, offset: 4096, size: 512 }, GrantRegion {
                region_index: 0,
                offset: 0,
                size: 64,
            }];
        let (mut parcel, parent) = parcel_with_image(&sequence_image(grants.len()));
        write_sequence(&grants, &mut parcel, parent, 0).unwrap();
        let view: SequenceView<'_, GrantRegion> = read_sequence(&parcel, parent, 0).unwrap();
        assert_eq!(view.to_vec(), grants);
    }

    #[test]
    fn memory_block_null_with_size_is_rejected() {
        let block = MemoryBlock { size: 128, handle: None, tag: "ashmem".into() };
        let (mut parcel, parent) = parcel_with_image(&block.inline_image());
        write_memory_block(&block, &mut parcel, parent, 0).unwrap();
        let err = read_memory_block(&parcel, parent, 0).unwrap_err();
        assert_eq!(err, ParcelError::MissingBacking { size: 128 });
    }

    #[test]
    fn memory_block_roundtrip_and_bounds() {
        let block = MemoryBlock {
            size: 128,
            handle: Some(NativeHandle::new(vec![5], vec![])),
            tag: "ashmem".into(),
        };
        let (mut parcel, parent) = parcel_with_image(&block.inline_image());
        write_memory_block(&block, &mut parcel, parent, 0).unwrap();
        let view = read_memory_block(&parcel, parent, 0).unwrap();
        assert_eq!(view.size, 128);
        assert_eq!(view.tag, "ashmem");
        assert!(view.fits_region(128));
        assert!(!view.fits_region(127));
    }

    #[test]
    fn queue_validate_requires_handle_and_grant_bounds() {
        let descriptor = QueueDescriptor {
            grants: vec![GrantRegion { region_index: 1, offset: 0, size: 32 }],
            sync_handle: Some(NativeHandle::new(vec![3], vec![])),
            quantum: 8,
            flavor: QueueFlavor::Synchronized,
        };
        let (mut parcel, parent) = parcel_with_image(&descriptor.inline_image());
        write_queue_descriptor(&descriptor, &mut parcel, parent, 0).unwrap();
        let view = read_queue_descriptor(&parcel, parent, 0).unwrap();
        // One descriptor available, grant asks for index 1.
        assert_eq!(
            view.validate().unwrap_err(),
            ParcelError::GrantOutOfRange { region_index: 1, available: 1 }
        );

        let missing = QueueDescriptor { sync_handle: None, ..descriptor };
        let (mut parcel, parent) = parcel_with_image(&missing.inline_image());
        write_queue_descriptor(&missing, &mut parcel, parent, 0).unwrap();
        let view = read_queue_descriptor(&parcel, parent, 0).unwrap();
        assert_eq!(view.validate().unwrap_err(), ParcelError::MissingSyncHandle);
    }

    #[test]
    fn unknown_queue_flavor_is_rejected() {
        let descriptor = QueueDescriptor {
            grants: Vec::new(),
            sync_handle: None,
            quantum: 16,
            flavor: QueueFlavor::Unsynchronized,
        };
        let mut image = descriptor.inline_image();
        image[QUEUE_FLAVOR_OFFSET..QUEUE_FLAVOR_OFFSET + 4]
            .copy_from_slice(&7u32.to_le_bytes());
        let (mut parcel, parent) = parcel_with_image(&image);
        write_queue_descriptor(&descriptor, &mut parcel, parent, 0).unwrap();
        let err = read_queue_descriptor(&parcel, parent, 0).unwrap_err();
        assert_eq!(err, ParcelError::BadFlavor(7));
    }
}
