//! Per-branch value buffer that spills to storage past a threshold.
//!
//! A buffer starts in memory. Once its in-memory tail holds more than
//! `threshold` tuples the tail is written out as one segment and a fresh tail
//! is started. Reading chains every segment in write order, then the tail.

use std::sync::{Arc, Mutex, MutexGuard};

use tupleflow_core::id::SpillId;
use tupleflow_core::tuple::Tuple;
use tupleflow_mem::spill::SegmentMeta;
use tupleflow_mem::{BudgetGuardImpl, MemoryBudgetImpl, SegmentBatch, SpillManager};

use crate::traits::{OpError, Result};

/// Where a buffer spills to, shared by every buffer of an engine.
#[derive(Clone, Debug)]
pub struct SpillContext {
    manager: Arc<Mutex<SpillManager>>,
    budget: MemoryBudgetImpl,
}

impl SpillContext {
    pub fn new(manager: Arc<Mutex<SpillManager>>, budget: MemoryBudgetImpl) -> Self {
        Self { manager, budget }
    }

    pub fn manager(&self) -> &Arc<Mutex<SpillManager>> {
        &self.manager
    }

    pub fn budget(&self) -> &MemoryBudgetImpl {
        &self.budget
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, SpillManager>> {
        self.manager
            .lock()
            .map_err(|_| OpError::Exec("spill manager lock poisoned".into()))
    }
}

#[derive(Debug)]
enum BufferState {
    InMemory(Vec<Tuple>),
    Spilled {
        spill_id: SpillId,
        segments: Vec<SegmentMeta>,
        tail: Vec<Tuple>,
    },
}

#[derive(Debug)]
pub struct ValueBuffer {
    state: BufferState,
    threshold: usize,
    spill: Option<SpillContext>,
    len: usize,
    spill_events: u64,
    spilled_tuples: u64,
}

impl ValueBuffer {
    /// A buffer that never spills.
    pub fn in_memory() -> Self {
        Self::new(usize::MAX, None)
    }

    pub fn new(threshold: usize, spill: Option<SpillContext>) -> Self {
        Self {
            state: BufferState::InMemory(Vec::new()),
            threshold,
            spill,
            len: 0,
            spill_events: 0,
            spilled_tuples: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_spilled(&self) -> bool {
        matches!(self.state, BufferState::Spilled { .. })
    }

    /// Segments currently backing this buffer.
    pub fn segment_count(&self) -> usize {
        match &self.state {
            BufferState::InMemory(_) => 0,
            BufferState::Spilled { segments, .. } => segments.len(),
        }
    }

    /// Flushes since creation; survives `clear`.
    pub fn spill_events(&self) -> u64 {
        self.spill_events
    }

    pub fn spilled_tuples(&self) -> u64 {
        self.spilled_tuples
    }

    pub fn push(&mut self, tuple: Tuple) -> Result<()> {
        let tail_len = match &mut self.state {
            BufferState::InMemory(v) => {
                v.push(tuple);
                v.len()
            }
            BufferState::Spilled { tail, .. } => {
                tail.push(tuple);
                tail.len()
            }
        };
        self.len += 1;
        if tail_len > self.threshold && self.spill.is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        let Some(ctx) = &self.spill else {
            return Ok(());
        };
        let mut manager = ctx.lock()?;

        if let BufferState::InMemory(v) = &mut self.state {
            let tail = std::mem::take(v);
            self.state = BufferState::Spilled {
                spill_id: manager.next_spill_id(),
                segments: Vec::new(),
                tail,
            };
        }
        let BufferState::Spilled {
            spill_id,
            segments,
            tail,
        } = &mut self.state
        else {
            return Ok(());
        };

        let meta = manager.write_tuples(tail, *spill_id, segments.len() as u32)?;
        let flushed = tail.len() as u64;
        segments.push(meta);
        tail.clear();

        self.spill_events += 1;
        self.spilled_tuples += flushed;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            spill = %spill_id,
            segment = segments.len() - 1,
            tuples = flushed,
            "value buffer spilled"
        );
        Ok(())
    }

    /// Every buffered tuple in append order.
    pub fn iter(&self) -> BufferIter<'_> {
        BufferIter {
            buffer: self,
            cursor: Cursor::Draining(0),
            loaded: Loaded::Owned(Vec::new().into_iter()),
            charge: None,
        }
    }

    /// Drop all values and delete any segments. Allocations are kept.
    pub fn clear(&mut self) -> Result<()> {
        let previous = std::mem::replace(&mut self.state, BufferState::InMemory(Vec::new()));
        self.len = 0;
        match previous {
            BufferState::InMemory(mut v) => {
                v.clear();
                self.state = BufferState::InMemory(v);
                Ok(())
            }
            BufferState::Spilled {
                segments, mut tail, ..
            } => {
                tail.clear();
                self.state = BufferState::InMemory(tail);
                self.delete_segments(&segments)
            }
        }
    }

    fn delete_segments(&self, segments: &[SegmentMeta]) -> Result<()> {
        if segments.is_empty() {
            return Ok(());
        }
        let Some(ctx) = &self.spill else {
            return Ok(());
        };
        let mut manager = ctx.lock()?;
        for meta in segments {
            manager.delete_segment(&meta.name)?;
        }
        Ok(())
    }
}

impl Drop for ValueBuffer {
    fn drop(&mut self) {
        if let BufferState::Spilled { segments, .. } = &self.state {
            let _ = self.delete_segments(segments);
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    /// Next segment to load.
    Draining(usize),
    Tail,
    Done,
}

/// Tuples ready to hand out: borrowed from memory, or owned from a segment.
enum Loaded<'a> {
    Borrowed(std::slice::Iter<'a, Tuple>),
    Owned(std::vec::IntoIter<Tuple>),
}

impl Iterator for Loaded<'_> {
    type Item = Tuple;

    fn next(&mut self) -> Option<Tuple> {
        match self {
            Loaded::Borrowed(it) => it.next().cloned(),
            Loaded::Owned(it) => it.next(),
        }
    }
}

/// Reads a buffer back, one segment at a time.
///
/// In-memory values are cloned one tuple at a time, so restarting an
/// iterator costs nothing up front. A loaded segment stays charged to the
/// budget until the iterator moves past it or is dropped.
pub struct BufferIter<'a> {
    buffer: &'a ValueBuffer,
    cursor: Cursor,
    loaded: Loaded<'a>,
    charge: Option<BudgetGuardImpl>,
}

impl BufferIter<'_> {
    fn load(&self, meta: &SegmentMeta) -> Result<SegmentBatch> {
        let Some(ctx) = &self.buffer.spill else {
            return Err(OpError::Exec("spilled buffer without a spill manager".into()));
        };
        let manager = ctx.lock()?;
        Ok(manager.read_tuples(meta, ctx.budget())?)
    }
}

impl<'a> Iterator for BufferIter<'a> {
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        let buffer: &'a ValueBuffer = self.buffer;
        loop {
            if let Some(t) = self.loaded.next() {
                return Some(Ok(t));
            }
            match self.cursor {
                Cursor::Done => return None,
                Cursor::Tail => {
                    self.cursor = Cursor::Done;
                    return None;
                }
                Cursor::Draining(i) => match &buffer.state {
                    BufferState::InMemory(v) => {
                        self.cursor = Cursor::Done;
                        self.loaded = Loaded::Borrowed(v.iter());
                    }
                    BufferState::Spilled { segments, tail, .. } => {
                        // Release the previous segment before charging the next.
                        self.charge = None;
                        match segments.get(i) {
                            Some(meta) => match self.load(meta) {
                                Ok(batch) => {
                                    let (tuples, guard) = batch.into_parts();
                                    self.cursor = Cursor::Draining(i + 1);
                                    self.loaded = Loaded::Owned(tuples.into_iter());
                                    self.charge = Some(guard);
                                }
                                Err(e) => {
                                    self.cursor = Cursor::Done;
                                    return Some(Err(e));
                                }
                            },
                            None => {
                                self.cursor = Cursor::Tail;
                                self.loaded = Loaded::Borrowed(tail.iter());
                            }
                        }
                    }
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tupleflow_core::budget::MemoryBudget;
    use tupleflow_io::memory_storage::MemoryStorage;
    use tupleflow_mem::Codec;

    fn context() -> SpillContext {
        context_with_cap(64 << 20)
    }

    fn context_with_cap(cap: usize) -> SpillContext {
        let manager = SpillManager::new(Box::new(MemoryStorage::new()), Codec::None, "mem".into());
        SpillContext::new(Arc::new(Mutex::new(manager)), MemoryBudgetImpl::new(cap))
    }

    fn live(ctx: &SpillContext) -> usize {
        ctx.lock().unwrap().live_segments()
    }

    #[test]
    fn stays_in_memory_under_threshold() {
        let ctx = context();
        let mut buf = ValueBuffer::new(3, Some(ctx.clone()));
        for i in 0..3 {
            buf.push(Tuple::of([i])).unwrap();
        }
        assert!(!buf.is_spilled());
        assert_eq!(buf.spill_events(), 0);
        assert_eq!(live(&ctx), 0);
    }

    #[test]
    fn spills_and_reads_back_in_order() {
        let ctx = context();
        let mut buf = ValueBuffer::new(4, Some(ctx.clone()));
        for i in 0..13 {
            buf.push(Tuple::of([i])).unwrap();
        }
        assert!(buf.is_spilled());
        assert_eq!(buf.spill_events(), 2);
        assert_eq!(buf.spilled_tuples(), 10);
        assert_eq!(buf.len(), 13);

        let read: Vec<i32> = buf
            .iter()
            .map(|t| t.unwrap().get(0).and_then(|v| v.as_i64()).unwrap() as i32)
            .collect();
        assert_eq!(read, (0..13).collect::<Vec<_>>());

        // Reading twice yields the same values.
        assert_eq!(buf.iter().count(), 13);
    }

    #[test]
    fn clear_deletes_segments() {
        let ctx = context();
        let mut buf = ValueBuffer::new(1, Some(ctx.clone()));
        for i in 0..5 {
            buf.push(Tuple::of([i])).unwrap();
        }
        assert!(live(&ctx) > 0);
        buf.clear().unwrap();
        assert_eq!(live(&ctx), 0);
        assert!(buf.is_empty());
        assert_eq!(buf.iter().count(), 0);
        assert_eq!(buf.spill_events(), 2);
    }

    #[test]
    fn drop_deletes_segments() {
        let ctx = context();
        {
            let mut buf = ValueBuffer::new(1, Some(ctx.clone()));
            for i in 0..4 {
                buf.push(Tuple::of([i])).unwrap();
            }
            assert!(live(&ctx) > 0);
        }
        assert_eq!(live(&ctx), 0);
    }

    #[test]
    fn readers_hold_the_budget_for_loaded_segments() {
        // Threshold 2: every third push writes a three-tuple segment.
        let mut sizing = ValueBuffer::new(2, Some(context()));
        for i in 0..3 {
            sizing.push(Tuple::of([i])).unwrap();
        }
        let BufferState::Spilled { segments, .. } = &sizing.state else {
            panic!("expected a spilled buffer");
        };
        let segment_bytes = segments[0].uncompressed_len as usize;

        let ctx = context_with_cap(segment_bytes);
        let mut buf = ValueBuffer::new(2, Some(ctx.clone()));
        for i in 0..3 {
            buf.push(Tuple::of([i])).unwrap();
        }

        let mut first = buf.iter();
        assert!(first.next().unwrap().is_ok());
        assert_eq!(ctx.budget().used_bytes(), segment_bytes);

        let mut second = buf.iter();
        let err = second.next().unwrap().unwrap_err();
        assert!(matches!(err.core(), Some(tupleflow_core::Error::OutOfMemory(_))));

        drop(first);
        assert_eq!(ctx.budget().used_bytes(), 0);
        assert_eq!(buf.iter().filter(|t| t.is_ok()).count(), 3);
        assert_eq!(ctx.budget().used_bytes(), 0);
    }

    #[test]
    fn restarted_readers_see_the_same_values() {
        let mut buf = ValueBuffer::in_memory();
        for i in 0..4 {
            buf.push(Tuple::of([i])).unwrap();
        }
        for _ in 0..3 {
            let values: Vec<Tuple> = buf.iter().map(|t| t.unwrap()).collect();
            assert_eq!(values, (0..4).map(|i| Tuple::of([i])).collect::<Vec<_>>());
        }
    }

    #[test]
    fn no_manager_never_spills() {
        let mut buf = ValueBuffer::new(1, None);
        for i in 0..10 {
            buf.push(Tuple::of([i])).unwrap();
        }
        assert!(!buf.is_spilled());
        assert_eq!(buf.iter().count(), 10);
    }
}
