//! Byte-level scanners behind the parser.
//!
//! [`first_pass`] finds safe split points and quote statistics per chunk;
//! [`second_pass`] emits separator positions into the interleaved index.
//! Both work on the padded buffer in 64-byte blocks.

pub mod first_pass;
pub mod second_pass;

pub use first_pass::{ChunkStats, NULL_POS};

/// Shared write access to the interleaved index slots.
///
/// During fan-out every thread writes only its own strided lane (thread `t`
/// touches slots `t`, `t + stride`, `t + 2·stride`, …), so the lanes are
/// disjoint and no synchronization is needed. The scatter may additionally
/// store up to 8 slots past a lane's final count; the allocation carries that
/// slack per lane.
pub(crate) struct SlotSink {
    ptr: *mut u64,
    cap: usize,
}

// SAFETY: writers follow the stride discipline above, so no two threads
// alias a slot.
unsafe impl Send for SlotSink {}
unsafe impl Sync for SlotSink {}

impl SlotSink {
    pub fn new(slots: &mut [u64]) -> Self {
        Self {
            ptr: slots.as_mut_ptr(),
            cap: slots.len(),
        }
    }

    /// Pointer to the first slot of a thread's lane.
    ///
    /// # Safety
    ///
    /// `thread` must be below the stride used for writes, and the caller may
    /// only write slots of that lane, within capacity.
    #[inline]
    pub unsafe fn lane_ptr(&self, thread: usize) -> *mut u64 {
        debug_assert!(thread < self.cap);
        self.ptr.add(thread)
    }
}
