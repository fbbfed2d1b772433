//! Replays a trace against a heap and checks every result.

use std::collections::BTreeMap;

use segheap::{ALIGNMENT, Heap, HeapCorruption, HeapPtr, HeapRegion, InitError};
use snafu::{Location, OptionExt as _, ResultExt as _, Snafu, ensure};

use crate::trace::{Op, Trace};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReplayOptions {
    /// Run the heap validator after every operation.
    pub check: bool,
}

/// Outcome of one replayed trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceStats {
    pub ops: usize,
    /// Largest total of requested bytes live at the same time.
    pub peak_payload: usize,
    /// Heap size after the last operation.
    pub heap_bytes: usize,
}

impl TraceStats {
    #[expect(clippy::cast_precision_loss)]
    pub fn utilization(&self) -> f64 {
        if self.heap_bytes == 0 {
            return 0.0;
        }
        self.peak_payload as f64 / self.heap_bytes as f64
    }
}

#[derive(Debug, Snafu)]
pub enum ReplayError {
    #[snafu(display("failed to reset the heap"))]
    Reset {
        source: InitError,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("op {index}: allocating {size} bytes for id {id} failed"))]
    OutOfMemory {
        index: usize,
        id: usize,
        size: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("op {index}: payload {ptr} of id {id} is misaligned"))]
    Misaligned {
        index: usize,
        id: usize,
        ptr: HeapPtr,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("op {index}: payload {ptr} of id {id} lies outside the heap"))]
    OutsideHeap {
        index: usize,
        id: usize,
        ptr: HeapPtr,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("op {index}: payload {ptr} of id {id} overlaps the payload of id {other}"))]
    Overlap {
        index: usize,
        id: usize,
        ptr: HeapPtr,
        other: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("op {index}: payload of id {id} was overwritten"))]
    Clobbered {
        index: usize,
        id: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("op {index}: heap validation failed"))]
    Corrupted {
        index: usize,
        source: HeapCorruption,
        #[snafu(implicit)]
        location: Location,
    },
}

#[derive(Debug, Clone, Copy)]
struct Live {
    ptr: HeapPtr,
    size: usize,
}

/// Byte written to every payload byte of block `id`.
fn pattern(id: usize) -> u8 {
    id.to_le_bytes()[0] ^ 0xA5
}

struct Replayer<'a, R> {
    heap: &'a mut Heap<R>,
    options: ReplayOptions,
    live: Vec<Option<Live>>,
    /// Live payload ranges by start offset: end offset and id.
    ranges: BTreeMap<usize, (usize, usize)>,
    payload: usize,
    peak_payload: usize,
}

/// Runs `trace` on a freshly reset `heap`.
pub fn replay<R>(
    heap: &mut Heap<R>,
    trace: &Trace,
    options: ReplayOptions,
) -> Result<TraceStats, ReplayError>
where
    R: HeapRegion,
{
    heap.reset().context(ResetSnafu)?;
    let mut replayer = Replayer {
        heap,
        options,
        live: vec![None; trace.num_ids],
        ranges: BTreeMap::new(),
        payload: 0,
        peak_payload: 0,
    };
    for (index, &op) in trace.ops.iter().enumerate() {
        replayer.apply(index, op)?;
    }

    Ok(TraceStats {
        ops: trace.ops.len(),
        peak_payload: replayer.peak_payload,
        heap_bytes: replayer.heap.stats().heap_bytes,
    })
}

impl<R> Replayer<'_, R>
where
    R: HeapRegion,
{
    fn apply(&mut self, index: usize, op: Op) -> Result<(), ReplayError> {
        trace!("op {index}: {op:?}");
        match op {
            Op::Alloc { id, size } => {
                if let Some(old) = self.take(index, id)? {
                    warn!("op {index}: id {id} allocated twice, releasing the old block");
                    self.heap.release(old.ptr);
                }
                if size > 0 {
                    let ptr = self
                        .heap
                        .allocate(size)
                        .context(OutOfMemorySnafu { index, id, size })?;
                    self.insert(index, id, ptr, size)?;
                }
            }
            Op::Realloc { id, size } => {
                let old = self.take(index, id)?;
                let new = self.heap.reallocate(old.map(|old| old.ptr), size);
                if size > 0 {
                    let ptr = new.context(OutOfMemorySnafu { index, id, size })?;
                    let kept = old.map_or(0, |old| old.size.min(size));
                    ensure!(self.is_filled(ptr, kept, id), ClobberedSnafu { index, id });
                    self.insert(index, id, ptr, size)?;
                }
            }
            Op::Free { id } => {
                let old = self.take(index, id)?;
                self.heap.release(old.map(|old| old.ptr));
            }
        }

        if self.options.check {
            self.heap
                .validate(&format!("op {index}"))
                .context(CorruptedSnafu { index })?;
        }
        Ok(())
    }

    /// Removes `id` from the live set after checking its payload is intact.
    fn take(&mut self, index: usize, id: usize) -> Result<Option<Live>, ReplayError> {
        let Some(live) = self.live[id].take() else {
            return Ok(None);
        };
        ensure!(
            self.is_filled(live.ptr, live.size, id),
            ClobberedSnafu { index, id }
        );
        self.ranges.remove(&live.ptr.offset());
        self.payload -= live.size;
        Ok(Some(live))
    }

    /// Checks a new payload, fills it and records it as live.
    fn insert(
        &mut self,
        index: usize,
        id: usize,
        ptr: HeapPtr,
        size: usize,
    ) -> Result<(), ReplayError> {
        let low = self.heap.region().low();
        let start = ptr.offset();
        let end = start + size;

        ensure!(
            start >= low && end <= self.heap.region().high(),
            OutsideHeapSnafu { index, id, ptr }
        );
        ensure!(
            (start - low).is_multiple_of(ALIGNMENT),
            MisalignedSnafu { index, id, ptr }
        );
        let before = self.ranges.range(..start).next_back();
        let after = self.ranges.range(start..).next();
        let overlap = before
            .filter(|(_, (before_end, _))| *before_end > start)
            .or_else(|| after.filter(|(after_start, _)| **after_start < end));
        if let Some((_, &(_, other))) = overlap {
            return OverlapSnafu {
                index,
                id,
                ptr,
                other,
            }
            .fail();
        }

        let payload = self
            .heap
            .payload_mut(ptr)
            .context(OutsideHeapSnafu { index, id, ptr })?;
        payload[..size].fill(pattern(id));

        self.ranges.insert(start, (end, id));
        self.live[id] = Some(Live { ptr, size });
        self.payload += size;
        self.peak_payload = self.peak_payload.max(self.payload);
        debug!("op {index}: id {id} -> {ptr} ({size} bytes)");
        Ok(())
    }

    fn is_filled(&self, ptr: HeapPtr, len: usize, id: usize) -> bool {
        self.heap
            .payload(ptr)
            .and_then(|payload| payload.get(..len))
            .is_some_and(|bytes| bytes.iter().all(|&b| b == pattern(id)))
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use segheap::{ArenaRegion, HeapConfig};

    use super::*;

    fn test_heap(capacity: usize) -> Heap<ArenaRegion> {
        Heap::with_config(ArenaRegion::with_capacity(capacity), HeapConfig::new()).unwrap()
    }

    fn run(text: &str, capacity: usize, check: bool) -> Result<TraceStats, ReplayError> {
        let trace: Trace = text.parse().unwrap();
        let mut heap = test_heap(capacity);
        replay(&mut heap, &trace, ReplayOptions { check })
    }

    #[test]
    fn test_replay_reports_peak_and_heap_size() {
        let stats = run(
            "0 3 6 1\na 0 512\na 1 128\nr 0 640\nf 1\na 2 16\nf 0\n",
            1 << 16,
            true,
        )
        .unwrap();
        assert_eq!(stats.ops, 6);
        assert_eq!(stats.peak_payload, 640 + 128);
        assert!(stats.heap_bytes >= stats.peak_payload);
        assert!(stats.utilization() > 0.0 && stats.utilization() <= 1.0);
    }

    #[test]
    fn test_bundled_traces_replay_cleanly() {
        for text in [
            include_str!("../traces/mixed.rep"),
            include_str!("../traces/binary.rep"),
        ] {
            let stats = run(text, 1 << 20, true).unwrap();
            assert!(stats.peak_payload > 0);
            assert!(stats.utilization() <= 1.0);
        }
    }

    #[test]
    fn test_replay_resets_heap_between_traces() {
        let trace: Trace = "0 2 2 1\na 0 100\na 1 2000\n".parse().unwrap();
        let mut heap = test_heap(1 << 16);
        let first = replay(&mut heap, &trace, ReplayOptions::default()).unwrap();
        let second = replay(&mut heap, &trace, ReplayOptions::default()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_replay_handles_zero_sizes() {
        let stats = run("0 2 4 1\na 0 0\nr 1 24\nr 1 0\nf 0\n", 4096, true).unwrap();
        assert_eq!(stats.peak_payload, 24);
    }

    #[test]
    fn test_replay_reports_out_of_memory() {
        let err = run("0 1 1 1\na 0 100000\n", 4096, false).unwrap_err();
        assert!(matches!(
            err,
            ReplayError::OutOfMemory {
                index: 0,
                id: 0,
                size: 100_000,
                ..
            }
        ));
    }

    #[test]
    fn test_clobbered_payload_is_detected() {
        let trace: Trace = "0 1 1 1\na 0 64\n".parse().unwrap();
        let mut heap = test_heap(4096);
        heap.reset().unwrap();
        let mut replayer = Replayer {
            heap: &mut heap,
            options: ReplayOptions::default(),
            live: vec![None; trace.num_ids],
            ranges: BTreeMap::new(),
            payload: 0,
            peak_payload: 0,
        };
        replayer.apply(0, trace.ops[0]).unwrap();
        let ptr = replayer.live[0].unwrap().ptr;
        replayer.heap.payload_mut(ptr).unwrap()[10] = 0;

        let err = replayer.apply(1, Op::Free { id: 0 }).unwrap_err();
        assert!(matches!(err, ReplayError::Clobbered { index: 1, id: 0, .. }));
    }
}
