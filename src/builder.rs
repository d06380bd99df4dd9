//! Run builder.
//!
//! Splits an input stream into sorted runs of the read generation.

use std::io::prelude::*;
use std::path::Path;

use log;
use rayon::slice::ParallelSliceMut;

use crate::buffer::{RunBuffer, RunBufferBuilder};
use crate::run::SEPARATOR;
use crate::storage::{Role, RunStore};
use crate::SortError;

/// Split phase statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Number of runs written.
    pub runs: usize,
    /// Number of input lines.
    pub lines: u64,
}

pub struct RunBuilder<'a, B: RunBufferBuilder> {
    buffer_builder: &'a B,
    thread_pool: &'a rayon::ThreadPool,
}

impl<'a, B: RunBufferBuilder> RunBuilder<'a, B> {
    pub fn new(buffer_builder: &'a B, thread_pool: &'a rayon::ThreadPool) -> Self {
        RunBuilder {
            buffer_builder,
            thread_pool,
        }
    }

    /// Reads `input` to the end and stores it as sorted runs `0..runs` of the read role.
    /// An empty input produces no runs.
    ///
    /// # Arguments
    /// * `input` - Line stream to be split
    /// * `source` - Input location, used for error reporting
    /// * `store` - Run store the runs are written to
    pub fn build_runs<R: BufRead>(
        &self,
        input: R,
        source: &Path,
        store: &mut RunStore,
    ) -> Result<RunStats, SortError> {
        let mut stats = RunStats::default();
        let mut run_buf = self.buffer_builder.build();

        for line in input.split(SEPARATOR) {
            let line = line.map_err(|err| SortError::read(source, err))?;
            run_buf.push(line);
            stats.lines += 1;

            if run_buf.is_full() {
                self.flush_run(run_buf, stats.runs, store)?;
                stats.runs += 1;
                run_buf = self.buffer_builder.build();
            }
        }

        if !run_buf.is_empty() {
            self.flush_run(run_buf, stats.runs, store)?;
            stats.runs += 1;
        }

        log::info!("split {} line(s) into {} run(s)", stats.lines, stats.runs);

        Ok(stats)
    }

    fn flush_run(&self, mut buffer: B::Buffer, index: usize, store: &mut RunStore) -> Result<(), SortError> {
        log::debug!("sorting run {} ({} lines) ...", index, buffer.len());
        self.thread_pool.install(|| {
            buffer.par_sort_unstable();
        });

        let mut writer = store.create_run(Role::Read, index)?;
        for line in buffer {
            writer.write_line(&line)?;
        }
        let lines = writer.finish()?;
        store.seal_run(Role::Read, index, lines);
        log::debug!("run {} saved", index);

        Ok(())
    }
}
