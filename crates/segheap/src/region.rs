//! Growable backing memory for a heap.
//!
//! A [`HeapRegion`] behaves like a program break: it exposes one contiguous
//! byte range `[low, high)` that can only be extended upwards. The heap never
//! asks a region to shrink, except through an explicit [`reset`] that throws
//! the whole heap away.
//!
//! [`BrkRegion`] is the stock implementation. It reserves a fixed capacity
//! up front and moves its break inside that capacity. Backed by a box or a
//! borrowed slice, the memory it hands out never moves.
//!
//! ```text
//!  backing  ┌──────┬──────────────────────────┬─────────────────────────┐
//!           │ pad  │ heap (grown so far)      │ reserve                 │
//!           └──────┴──────────────────────────┴─────────────────────────┘
//!           0      low                        high (break)              capacity
//! ```
//!
//! [`reset`]: HeapRegion::reset

use alloc::{boxed::Box, vec};

use snafu::{Location, Snafu, ensure};

/// Alignment of `low` relative to the real address of the backing memory.
pub const REGION_ALIGN: usize = 16;

/// Errors returned when a region cannot satisfy a growth request.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum GrowError {
    #[snafu(display("heap region exhausted: requested {requested} bytes, {remaining} remaining"))]
    Exhausted {
        requested: usize,
        remaining: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("growing the heap by {requested} bytes exceeds the largest encodable heap"))]
    TooLarge {
        requested: usize,
        #[snafu(implicit)]
        location: Location,
    },
}

/// A contiguous byte range that grows monotonically.
///
/// All offsets are relative to the start of [`bytes`](Self::bytes). The
/// allocator owns every byte in `[low, high)` exclusively.
///
/// Implementations must never move the backing memory while the region is
/// alive, because [`LockedHeap`](crate::global::LockedHeap) hands out raw
/// addresses into it.
pub trait HeapRegion {
    /// Offset of the first byte the heap may use.
    fn low(&self) -> usize;

    /// Offset one past the last byte currently belonging to the heap.
    fn high(&self) -> usize;

    /// Extends the region by `delta` bytes.
    ///
    /// Returns the previous value of [`high`](Self::high), which is the
    /// start of the newly granted bytes. On failure the region is unchanged.
    fn grow(&mut self, delta: usize) -> Result<usize, GrowError>;

    /// Moves the break back to `low`, discarding every byte of the heap.
    fn reset(&mut self);

    /// The bytes `[0, high)`.
    fn bytes(&self) -> &[u8];

    /// The bytes `[0, high)`, mutably.
    fn bytes_mut(&mut self) -> &mut [u8];
}

/// A fixed-capacity region with a movable break.
///
/// `low` is chosen so that the real address of the heap start is aligned to
/// [`REGION_ALIGN`]; the bytes before it are never used.
#[derive(Debug)]
pub struct BrkRegion<B> {
    backing: B,
    low: usize,
    brk: usize,
}

/// A region that owns its backing memory.
pub type ArenaRegion = BrkRegion<Box<[u8]>>;

impl<B> BrkRegion<B>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    /// Creates an empty region over `backing`.
    ///
    /// The region starts with `high == low`.
    pub fn new(backing: B) -> Self {
        let bytes = backing.as_ref();
        let low = bytes.as_ptr().align_offset(REGION_ALIGN).min(bytes.len());
        Self {
            backing,
            low,
            brk: low,
        }
    }

    /// Number of bytes the region can grow to in total.
    pub fn capacity(&self) -> usize {
        self.backing.as_ref().len() - self.low
    }

    /// Number of bytes still available for growth.
    pub fn remaining(&self) -> usize {
        self.backing.as_ref().len() - self.brk
    }

    /// Consumes the region and returns the backing memory.
    pub fn into_inner(self) -> B {
        self.backing
    }
}

impl ArenaRegion {
    /// Allocates a zeroed backing of at least `capacity` usable bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::new(vec![0; capacity + REGION_ALIGN - 1].into_boxed_slice())
    }
}

impl<B> HeapRegion for BrkRegion<B>
where
    B: AsRef<[u8]> + AsMut<[u8]>,
{
    fn low(&self) -> usize {
        self.low
    }

    fn high(&self) -> usize {
        self.brk
    }

    fn grow(&mut self, delta: usize) -> Result<usize, GrowError> {
        let remaining = self.remaining();
        ensure!(
            delta <= remaining,
            ExhaustedSnafu {
                requested: delta,
                remaining,
            }
        );
        let old_brk = self.brk;
        self.brk += delta;
        Ok(old_brk)
    }

    fn reset(&mut self) {
        self.brk = self.low;
    }

    fn bytes(&self) -> &[u8] {
        &self.backing.as_ref()[..self.brk]
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.backing.as_mut()[..self.brk]
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arena_low_is_aligned() {
        let region = ArenaRegion::with_capacity(256);
        let start = region.bytes().as_ptr().addr() + region.low();
        assert_eq!(start % REGION_ALIGN, 0);
        assert_eq!(region.low(), region.high());
        assert!(region.capacity() >= 256);
    }

    #[test]
    fn test_grow_returns_previous_break() {
        let mut region = ArenaRegion::with_capacity(256);
        let low = region.low();
        assert_eq!(region.grow(64).unwrap(), low);
        assert_eq!(region.grow(32).unwrap(), low + 64);
        assert_eq!(region.high(), low + 96);
        assert_eq!(region.bytes().len(), low + 96);
    }

    #[test]
    fn test_grow_past_capacity_fails_without_change() {
        let mut region = BrkRegion::new(vec![0u8; 128].into_boxed_slice());
        let remaining = region.remaining();
        let high = region.high();
        let err = region.grow(remaining + 1).unwrap_err();
        assert!(matches!(err, GrowError::Exhausted { requested, .. } if requested == remaining + 1));
        assert_eq!(region.high(), high);

        assert!(region.grow(remaining).is_ok());
        assert!(region.grow(1).is_err());
    }

    #[test]
    fn test_reset_moves_break_to_low() {
        let mut region = ArenaRegion::with_capacity(64);
        region.grow(48).unwrap();
        region.reset();
        assert_eq!(region.high(), region.low());
        assert_eq!(region.remaining(), region.capacity());
    }

    #[test]
    fn test_borrowed_backing_skips_misaligned_prefix() {
        let mut storage = [0u8; 100];
        let region = BrkRegion::new(&mut storage[3..]);
        let start = region.bytes().as_ptr().addr() + region.low();
        assert_eq!(start % REGION_ALIGN, 0);
        assert!(region.low() < REGION_ALIGN);
        assert_eq!(region.capacity(), 97 - region.low());
    }
}
