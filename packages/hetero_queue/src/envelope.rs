use std::mem;
use std::ptr::NonNull;

use crate::block::Block;

/// Alignment quantum for everything placed in a block.
///
/// Envelopes start at multiples of this value and envelope sizes are rounded
/// up to it, so every payload whose own alignment does not exceed it lands on
/// a correctly aligned address.
pub(crate) const MAX_ALIGN: usize = mem::align_of::<MaxAlign>();

#[repr(C, align(16))]
struct MaxAlign([u8; 16]);

/// Fixed-layout header preceding each payload slot in a block.
///
/// Three kinds of envelope share this layout:
///
/// - an *element envelope* carries a constructed payload at `payload`;
/// - a *padding envelope* (`payload == None`) fills the unusable tail of a
///   block; its `next` points back to the block's beginning;
/// - a *block-switch envelope* (`payload == None`) ends a retired block; its
///   `next` points to the first envelope of the successor block.
///
/// The chain reachable through `next` from the consumer's read cursor covers
/// every live payload and every padding hole in production order.
#[repr(C)]
pub(crate) struct Envelope<T: ?Sized> {
    /// Start of the next envelope. May point into not-yet-written memory;
    /// the consumer only follows it after acquiring a message credit that
    /// was released after that memory was written.
    pub(crate) next: *mut Envelope<T>,

    /// The constructed payload within this envelope, or `None` for padding
    /// and block-switch envelopes.
    pub(crate) payload: Option<NonNull<T>>,

    /// Number of bytes this envelope occupies. Released back to the owning
    /// block's free-byte gate when the consumer advances past it.
    pub(crate) size: usize,

    /// The block whose free-byte gate the released bytes belong to.
    pub(crate) block: NonNull<Block>,
}

/// Size of the envelope header alone.
///
/// This is also the standing tail reserve: the producer keeps at least this
/// many bytes unused at the end of the write block so a padding or
/// block-switch envelope always fits without further space.
#[must_use]
pub(crate) fn header_size<T: ?Sized>() -> usize {
    mem::size_of::<Envelope<T>>()
}

/// Byte offset from an envelope's start to a payload of type `U`.
#[must_use]
pub(crate) fn payload_offset<T: ?Sized, U>() -> usize {
    round_up(header_size::<T>(), mem::align_of::<U>())
}

/// Total size of an element envelope holding a payload of type `U`,
/// rounded up to the alignment quantum.
///
/// # Panics
///
/// Panics if `U` requires stricter alignment than [`MAX_ALIGN`]; block
/// storage only guarantees placement at multiples of the quantum.
#[must_use]
pub(crate) fn envelope_size<T: ?Sized, U>() -> usize {
    assert!(
        mem::align_of::<U>() <= MAX_ALIGN,
        "payload alignment {} exceeds the supported maximum of {MAX_ALIGN}",
        mem::align_of::<U>(),
    );

    round_up(
        payload_offset::<T, U>().checked_add(mem::size_of::<U>())
            .expect("envelope size calculation cannot overflow for storable payload sizes"),
        MAX_ALIGN,
    )
}

fn round_up(value: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());

    let remainder = value % align;
    if remainder == 0 {
        value
    } else {
        value
            .checked_add(align - remainder)
            .expect("alignment rounding cannot overflow for storable payload sizes")
    }
}
