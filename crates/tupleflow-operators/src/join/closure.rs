//! Per-key assembly of splice values.
//!
//! [`JoinClosure`] is handed one key and the values of every branch for that
//! key, tagged with their branch index and ordered by descending branch. All
//! non-lead branches are buffered (and may spill); the lead branch (0) arrives
//! last and is streamed straight into the cross product without buffering.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use tupleflow_core::error::Error;
use tupleflow_core::tuple::Tuple;

use super::buffer::{BufferIter, SpillContext, ValueBuffer};
use super::joiner::{BranchMode, Joiner};
use crate::traits::Result;

/// Counters reported alongside joined output. Informational only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinStats {
    pub keys: u64,
    pub emitted: u64,
    pub spill_events: u64,
    pub spilled_tuples: u64,
    pub tuples_per_branch: Vec<u64>,
}

#[derive(Debug)]
pub struct JoinClosure {
    buffers: Vec<ValueBuffer>,
    joiner: Arc<dyn Joiner>,
    /// Width of every logical branch, for null padding.
    widths: Vec<Option<usize>>,
    num_self_joins: usize,
    stats: JoinStats,
}

impl JoinClosure {
    /// `branch_widths` holds one entry per physical branch. A self-join has a
    /// single physical branch seen `num_self_joins + 1` times.
    pub fn new(
        joiner: Arc<dyn Joiner>,
        branch_widths: Vec<Option<usize>>,
        num_self_joins: usize,
        threshold: usize,
        spill: Option<SpillContext>,
    ) -> Result<Self> {
        if branch_widths.is_empty() {
            return Err(Error::InvalidAssembly("a join needs at least one branch".into()).into());
        }
        if num_self_joins > 0 && branch_widths.len() != 1 {
            return Err(Error::InvalidAssembly(
                "a self-join reads exactly one physical branch".into(),
            )
            .into());
        }
        let physical = branch_widths.len();
        let widths = if num_self_joins > 0 {
            vec![branch_widths[0]; num_self_joins + 1]
        } else {
            branch_widths
        };
        let buffers = (0..physical)
            .map(|_| ValueBuffer::new(threshold, spill.clone()))
            .collect();
        Ok(Self {
            buffers,
            joiner,
            widths,
            num_self_joins,
            stats: JoinStats {
                tuples_per_branch: vec![0; physical],
                ..JoinStats::default()
            },
        })
    }

    pub fn is_self_join(&self) -> bool {
        self.num_self_joins > 0
    }

    /// Number of branches in the cross product.
    pub fn logical_branches(&self) -> usize {
        self.widths.len()
    }

    pub fn buffer(&self, branch: usize) -> Option<&ValueBuffer> {
        self.buffers.get(branch)
    }

    /// Counters so far, including spill activity of every buffer.
    pub fn stats(&self) -> JoinStats {
        let mut stats = self.stats.clone();
        stats.spill_events = self.buffers.iter().map(|b| b.spill_events()).sum();
        stats.spilled_tuples = self.buffers.iter().map(|b| b.spilled_tuples()).sum();
        stats
    }

    /// Join the values of one key.
    ///
    /// Buffers from the previous key are cleared first, deleting their
    /// segments.
    pub fn join<I>(&mut self, key: &Tuple, values: I) -> Result<JoinIter<'_, I>>
    where
        I: Iterator<Item = (usize, Tuple)>,
    {
        for buffer in &mut self.buffers {
            buffer.clear()?;
        }
        self.stats.keys += 1;

        let self_join = self.is_self_join();
        let mut values = values;
        let mut lead_first = None;
        for (branch, tuple) in values.by_ref() {
            if branch >= self.buffers.len() {
                return Err(Error::Invariant(format!(
                    "value tagged with branch {branch}, join has {}",
                    self.buffers.len()
                ))
                .into());
            }
            self.stats.tuples_per_branch[branch] += 1;
            if branch == 0 && !self_join {
                lead_first = Some(tuple);
                break;
            }
            self.buffers[branch].push(tuple)?;
        }

        let empty: Vec<bool> = (0..self.widths.len())
            .map(|i| {
                if self_join {
                    self.buffers[0].is_empty()
                } else if i == 0 {
                    lead_first.is_none()
                } else {
                    self.buffers[i].is_empty()
                }
            })
            .collect();
        let modes = self.joiner.plan(&empty);

        #[cfg(feature = "tracing")]
        tracing::trace!(
            %key,
            joiner = self.joiner.name(),
            ?empty,
            skipped = modes.is_none(),
            "joining key"
        );
        #[cfg(not(feature = "tracing"))]
        let _ = key;

        let Self {
            buffers,
            widths,
            stats,
            ..
        } = self;
        let buffers: &[ValueBuffer] = buffers;

        let Some(modes) = modes else {
            return Ok(JoinIter::skipped(buffers, stats));
        };
        if modes.len() != widths.len() {
            return Err(Error::Invariant(format!(
                "joiner planned {} branches for a join of {}",
                modes.len(),
                widths.len()
            ))
            .into());
        }
        let mut pads = Vec::with_capacity(modes.len());
        for (i, mode) in modes.iter().enumerate() {
            let pad = match mode {
                BranchMode::Values => Tuple::default(),
                BranchMode::NullPadded => match widths[i] {
                    Some(w) => Tuple::nulls(w),
                    None => {
                        return Err(Error::Invariant(format!(
                            "branch {i} must be null padded but its width is unknown"
                        ))
                        .into())
                    }
                },
            };
            pads.push(pad);
        }

        let lead = match modes[0] {
            BranchMode::NullPadded => Lead::Padded { emitted: false },
            BranchMode::Values if self_join => Lead::Buffered(buffers[0].iter()),
            BranchMode::Values => Lead::Stream {
                first: lead_first,
                rest: values,
            },
        };
        let physical = (0..modes.len())
            .map(|i| if self_join { 0 } else { i })
            .collect();

        Ok(JoinIter {
            buffers,
            physical,
            current: vec![Tuple::default(); modes.len()],
            iters: (0..modes.len()).map(|_| None).collect(),
            modes,
            pads,
            lead,
            has_lead: false,
            stats,
            done: false,
        })
    }

    /// Release every buffer after the last key.
    pub fn finish(&mut self) -> Result<()> {
        for buffer in &mut self.buffers {
            buffer.clear()?;
        }
        Ok(())
    }
}

enum Lead<'a, I> {
    Stream { first: Option<Tuple>, rest: I },
    Buffered(BufferIter<'a>),
    Padded { emitted: bool },
    Skipped,
}

/// Lazy cross product of one key's branches, lead branch outermost.
pub struct JoinIter<'a, I> {
    buffers: &'a [ValueBuffer],
    physical: Vec<usize>,
    modes: Vec<BranchMode>,
    pads: Vec<Tuple>,
    lead: Lead<'a, I>,
    has_lead: bool,
    iters: Vec<Option<BufferIter<'a>>>,
    current: Vec<Tuple>,
    stats: &'a mut JoinStats,
    done: bool,
}

impl<'a, I> JoinIter<'a, I>
where
    I: Iterator<Item = (usize, Tuple)>,
{
    fn skipped(buffers: &'a [ValueBuffer], stats: &'a mut JoinStats) -> Self {
        Self {
            buffers,
            physical: Vec::new(),
            modes: Vec::new(),
            pads: Vec::new(),
            lead: Lead::Skipped,
            has_lead: false,
            iters: Vec::new(),
            current: Vec::new(),
            stats,
            done: true,
        }
    }

    fn next_lead(&mut self) -> Option<Result<Tuple>> {
        match &mut self.lead {
            Lead::Stream { first, rest } => {
                if let Some(t) = first.take() {
                    return Some(Ok(t));
                }
                match rest.next()? {
                    (0, t) => {
                        self.stats.tuples_per_branch[0] += 1;
                        Some(Ok(t))
                    }
                    (branch, _) => Some(Err(Error::Invariant(format!(
                        "value of branch {branch} arrived after the lead branch"
                    ))
                    .into())),
                }
            }
            Lead::Buffered(iter) => iter.next(),
            Lead::Padded { emitted } => {
                if *emitted {
                    None
                } else {
                    *emitted = true;
                    Some(Ok(self.pads[0].clone()))
                }
            }
            Lead::Skipped => None,
        }
    }

    /// Restart logical branches `from..` at their first value.
    fn reset_from(&mut self, from: usize) -> Result<()> {
        let buffers = self.buffers;
        for i in from..self.modes.len() {
            match self.modes[i] {
                BranchMode::NullPadded => {
                    self.iters[i] = None;
                    self.current[i] = self.pads[i].clone();
                }
                BranchMode::Values => {
                    let mut iter = buffers[self.physical[i]].iter();
                    match iter.next() {
                        Some(t) => self.current[i] = t?,
                        None => {
                            return Err(Error::Invariant(format!(
                                "branch {i} emptied while joining"
                            ))
                            .into())
                        }
                    }
                    self.iters[i] = Some(iter);
                }
            }
        }
        Ok(())
    }

    /// Step the non-lead branches like an odometer. False once exhausted.
    fn advance(&mut self) -> Result<bool> {
        for i in (1..self.modes.len()).rev() {
            let Some(iter) = self.iters[i].as_mut() else {
                continue;
            };
            if let Some(t) = iter.next() {
                self.current[i] = t?;
                self.reset_from(i + 1)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn emit(&mut self) -> Tuple {
        self.stats.emitted += 1;
        let (lead, rest) = self.current.split_at(1);
        let others: Vec<&Tuple> = rest.iter().collect();
        lead[0].append(&others).frozen()
    }

    fn step(&mut self) -> Result<Option<Tuple>> {
        loop {
            if !self.has_lead {
                let Some(lead) = self.next_lead().transpose()? else {
                    return Ok(None);
                };
                self.reset_from(1)?;
                self.current[0] = lead;
                self.has_lead = true;
                return Ok(Some(self.emit()));
            }
            if self.advance()? {
                return Ok(Some(self.emit()));
            }
            self.has_lead = false;
        }
    }
}

impl<I> Iterator for JoinIter<'_, I>
where
    I: Iterator<Item = (usize, Tuple)>,
{
    type Item = Result<Tuple>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.step() {
            Ok(Some(t)) => Some(Ok(t)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Per-key pass-through for a GroupBy: values flow as they arrive.
#[derive(Debug, Default)]
pub struct GroupClosure {
    stats: JoinStats,
}

impl GroupClosure {
    pub fn new() -> Self {
        Self {
            stats: JoinStats {
                tuples_per_branch: vec![0],
                ..JoinStats::default()
            },
        }
    }

    pub fn stats(&self) -> &JoinStats {
        &self.stats
    }

    pub fn group<'a, I>(&'a mut self, key: &Tuple, values: I) -> GroupIter<'a, I>
    where
        I: Iterator<Item = Tuple>,
    {
        #[cfg(feature = "tracing")]
        tracing::trace!(%key, "grouping key");
        #[cfg(not(feature = "tracing"))]
        let _ = key;

        self.stats.keys += 1;
        if self.stats.tuples_per_branch.is_empty() {
            self.stats.tuples_per_branch.push(0);
        }
        GroupIter {
            values,
            stats: &mut self.stats,
        }
    }
}

pub struct GroupIter<'a, I> {
    values: I,
    stats: &'a mut JoinStats,
}

impl<I> Iterator for GroupIter<'_, I>
where
    I: Iterator<Item = Tuple>,
{
    type Item = Tuple;

    fn next(&mut self) -> Option<Tuple> {
        let t = self.values.next()?;
        self.stats.tuples_per_branch[0] += 1;
        self.stats.emitted += 1;
        Some(t.frozen())
    }
}
