//! Run mergers.
//!
//! [`BinaryHeapMerger`] and [`LinearScanMerger`] merge several sorted inputs into one sorted
//! stream; both emit equal items in input order (the lowest input index first).
//! [`RunMerger`] drives the merge rounds over a [`RunStore`].

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::error::Error;
use std::ops::Range;
use std::path::Path;

use log;
use rayon::prelude::*;

use crate::output;
use crate::run::{RunReader, RunWriter};
use crate::storage::{Role, RunStore};
use crate::SortError;

/// Default maximum number of runs merged by one group.
pub const DEFAULT_FAN_IN: usize = 10;

/// K-way selection algorithm used to merge a group of runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Min-heap keyed by (item, input index). *m* \* log(*n*) comparisons.
    BinaryHeap,
    /// Linear scan over the current head of every input. *m* \* *n* comparisons.
    LinearScan,
}

impl Default for MergeStrategy {
    fn default() -> Self {
        MergeStrategy::BinaryHeap
    }
}

/// Min-heap k-way merger over sorted fallible inputs.
/// Costs *m* \* log(*n*) comparisons for *m* items spread over *n* inputs.
///
/// The first input error is yielded once and ends the stream: later calls to `next`
/// return [`None`].
pub struct BinaryHeapMerger<T, E, C>
where
    T: Ord,
    E: Error,
    C: IntoIterator<Item = Result<T, E>>,
{
    // binary heap is max-heap by default so we reverse it to convert it to min-heap,
    // the input index breaks ties in favour of the earlier input
    items: BinaryHeap<Reverse<(T, usize)>>,
    inputs: Vec<C::IntoIter>,
    initiated: bool,
    failed: bool,
}

impl<T, E, C> BinaryHeapMerger<T, E, C>
where
    T: Ord,
    E: Error,
    C: IntoIterator<Item = Result<T, E>>,
{
    /// Creates an instance of a binary heap merger.
    /// Input items should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `inputs` - Inputs to be merged in a single sorted one
    pub fn new<I>(inputs: I) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let inputs = Vec::from_iter(inputs.into_iter().map(|c| c.into_iter()));
        let items = BinaryHeap::with_capacity(inputs.len());

        BinaryHeapMerger {
            inputs,
            items,
            initiated: false,
            failed: false,
        }
    }
}

impl<T, E, C> Iterator for BinaryHeapMerger<T, E, C>
where
    T: Ord,
    E: Error,
    C: IntoIterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if !self.initiated {
            self.initiated = true;
            for (idx, input) in self.inputs.iter_mut().enumerate() {
                match input.next() {
                    Some(Ok(item)) => self.items.push(Reverse((item, idx))),
                    Some(Err(err)) => {
                        self.failed = true;
                        return Some(Err(err));
                    }
                    None => {}
                }
            }
        }

        let Reverse((result, idx)) = self.items.pop()?;
        match self.inputs[idx].next() {
            Some(Ok(item)) => self.items.push(Reverse((item, idx))),
            Some(Err(err)) => {
                self.failed = true;
                return Some(Err(err));
            }
            None => {}
        }

        Some(Ok(result))
    }
}

/// Keeps the current head of every input and emits the smallest one, scanning the heads
/// in input order so that the lowest index wins among equal items.
/// Like [`BinaryHeapMerger`] it stops after yielding the first input error.
pub struct LinearScanMerger<T, E, C>
where
    T: Ord,
    E: Error,
    C: IntoIterator<Item = Result<T, E>>,
{
    heads: Vec<Option<T>>,
    inputs: Vec<C::IntoIter>,
    initiated: bool,
    failed: bool,
}

impl<T, E, C> LinearScanMerger<T, E, C>
where
    T: Ord,
    E: Error,
    C: IntoIterator<Item = Result<T, E>>,
{
    /// Creates an instance of a linear scan merger.
    /// Input items should be sorted in ascending order otherwise the result is undefined.
    pub fn new<I>(inputs: I) -> Self
    where
        I: IntoIterator<Item = C>,
    {
        let inputs = Vec::from_iter(inputs.into_iter().map(|c| c.into_iter()));
        let heads = inputs.iter().map(|_| None).collect();

        LinearScanMerger {
            heads,
            inputs,
            initiated: false,
            failed: false,
        }
    }

    fn advance(&mut self, idx: usize) -> Result<(), E> {
        match self.inputs[idx].next().transpose() {
            Ok(head) => {
                self.heads[idx] = head;
                Ok(())
            }
            Err(err) => {
                self.failed = true;
                Err(err)
            }
        }
    }
}

impl<T, E, C> Iterator for LinearScanMerger<T, E, C>
where
    T: Ord,
    E: Error,
    C: IntoIterator<Item = Result<T, E>>,
{
    type Item = Result<T, E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if !self.initiated {
            self.initiated = true;
            for idx in 0..self.inputs.len() {
                if let Err(err) = self.advance(idx) {
                    return Some(Err(err));
                }
            }
        }

        let mut smallest: Option<usize> = None;
        for (idx, head) in self.heads.iter().enumerate() {
            if let Some(item) = head {
                match smallest {
                    // strict comparison keeps the earliest of equal heads
                    Some(best) if self.heads[best].as_ref().map_or(false, |best| item >= best) => {}
                    _ => smallest = Some(idx),
                }
            }
        }

        let idx = smallest?;
        let result = self.heads[idx].take()?;
        if let Err(err) = self.advance(idx) {
            return Some(Err(err));
        }

        Some(Ok(result))
    }
}

/// Merge phase statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Group sizes of every round, in execution order.
    pub rounds: Vec<Vec<usize>>,
    /// Number of lines written to the output.
    pub lines: u64,
}

/// Splits `run_count` runs into contiguous groups of at most `fan_in` runs.
pub fn merge_groups(run_count: usize, fan_in: usize) -> Vec<Range<usize>> {
    (0..run_count)
        .step_by(fan_in)
        .map(|start| start..usize::min(start + fan_in, run_count))
        .collect()
}

/// Multi-round run merger.
pub struct RunMerger<'a> {
    fan_in: usize,
    strategy: MergeStrategy,
    /// Pool used to merge the groups of a round in parallel, if any.
    thread_pool: Option<&'a rayon::ThreadPool>,
}

impl<'a> RunMerger<'a> {
    pub fn new(fan_in: usize, strategy: MergeStrategy) -> Self {
        RunMerger {
            fan_in,
            strategy,
            thread_pool: None,
        }
    }

    /// Merges groups of a round concurrently using `thread_pool`.
    pub fn with_thread_pool(mut self, thread_pool: &'a rayon::ThreadPool) -> Self {
        self.thread_pool = Some(thread_pool);
        self
    }

    /// Merges read-role runs `0..run_count` of `store` into `output`.
    ///
    /// Rounds merge groups of up to `fan_in` runs into the write generation, which is then
    /// promoted, until a single group is left. That last group is written straight to
    /// `output`, any file already there being removed first. Zero runs execute no round
    /// and leave `output` untouched.
    pub fn merge_runs(&self, store: &mut RunStore, run_count: usize, output: &Path) -> Result<MergeStats, SortError> {
        if self.fan_in < 2 {
            return Err(SortError::InvalidConfig(format!("fan-in must be at least 2, got {}", self.fan_in)));
        }

        let mut stats = MergeStats::default();
        let mut current = run_count;

        while current > 0 {
            let groups = merge_groups(current, self.fan_in);
            stats.rounds.push(groups.iter().map(|group| group.len()).collect());
            log::debug!(
                "merge round {}: {} run(s) in {} group(s)",
                stats.rounds.len(),
                current,
                groups.len()
            );

            if groups.len() == 1 {
                stats.lines = self.merge_final(store, groups[0].clone(), output)?;
                break;
            }

            let shared: &RunStore = store;
            let written = match self.thread_pool {
                Some(thread_pool) => thread_pool.install(|| {
                    groups
                        .par_iter()
                        .enumerate()
                        .map(|(index, group)| self.merge_intermediate(shared, index, group.clone()))
                        .collect::<Result<Vec<u64>, SortError>>()
                })?,
                None => groups
                    .iter()
                    .enumerate()
                    .map(|(index, group)| self.merge_intermediate(shared, index, group.clone()))
                    .collect::<Result<Vec<u64>, SortError>>()?,
            };

            for (index, lines) in written.into_iter().enumerate() {
                store.seal_run(Role::Write, index, lines);
            }
            store.promote(groups.len())?;
            current = groups.len();
        }

        log::info!("merged {} run(s) in {} round(s)", run_count, stats.rounds.len());

        Ok(stats)
    }

    fn merge_intermediate(&self, store: &RunStore, index: usize, group: Range<usize>) -> Result<u64, SortError> {
        let mut writer = store.create_run(Role::Write, index)?;
        self.merge_group(store, group, &mut writer)?;
        writer.finish()
    }

    fn merge_final(&self, store: &RunStore, group: Range<usize>, output: &Path) -> Result<u64, SortError> {
        output::remove_existing(output)?;

        let result = RunWriter::create(output, store.rw_buf_size()).and_then(|mut writer| {
            self.merge_group(store, group, &mut writer)?;
            writer.finish()
        });
        if result.is_err() {
            output::discard_partial(output);
        }

        result
    }

    fn merge_group(&self, store: &RunStore, group: Range<usize>, writer: &mut RunWriter) -> Result<(), SortError> {
        let readers = group
            .clone()
            .map(|index| store.open_run(Role::Read, index))
            .collect::<Result<Vec<RunReader>, SortError>>()?;

        match self.strategy {
            MergeStrategy::BinaryHeap => write_merged(BinaryHeapMerger::new(readers), writer)?,
            MergeStrategy::LinearScan => write_merged(LinearScanMerger::new(readers), writer)?,
        }
        log::debug!(
            "runs {}..{} merged into {} ({} lines)",
            group.start,
            group.end,
            writer.path().display(),
            writer.lines()
        );

        Ok(())
    }
}

fn write_merged<I>(merged: I, writer: &mut RunWriter) -> Result<(), SortError>
where
    I: Iterator<Item = Result<crate::Line, SortError>>,
{
    for line in merged {
        writer.write_line(&line?)?;
    }
    Ok(())
}
