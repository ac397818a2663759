//! Memory barriers around descriptor publication.

use core::sync::atomic::{fence, Ordering};

/// Store fence - descriptor writes are visible before the tail write.
///
/// Use before notifying the device of new descriptors.
#[inline]
pub fn wmb() {
    fence(Ordering::Release);
}

/// Load fence - descriptor fields are read after the DD bit.
///
/// Use after observing a device write-back.
#[inline]
pub fn rmb() {
    fence(Ordering::Acquire);
}

/// Full fence.
#[inline]
pub fn mb() {
    fence(Ordering::SeqCst);
}
