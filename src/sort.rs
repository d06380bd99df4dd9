//! External sorter.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Instant;

use log;

use crate::builder::RunBuilder;
use crate::merger::{MergeStats, MergeStrategy, RunMerger, DEFAULT_FAN_IN};
use crate::output;
use crate::storage::RunStore;
use crate::{LimitedBufferBuilder, Phase, PipelineError, RunBufferBuilder, SortError};

/// Outcome of a successful sort.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SortSummary {
    /// Number of lines sorted.
    pub lines: u64,
    /// Number of runs produced by the split phase.
    pub initial_runs: usize,
    /// Group sizes of every merge round.
    pub rounds: Vec<Vec<usize>>,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
pub struct ExternalSorterBuilder<B = LimitedBufferBuilder>
where
    B: RunBufferBuilder,
{
    /// Number of threads to be used to sort runs in parallel.
    threads_number: Option<usize>,
    /// Directory the scratch directory is created in.
    work_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Run buffer builder.
    buffer_builder: B,
    /// Maximum number of runs merged at once.
    fan_in: usize,
    merge_strategy: MergeStrategy,
    parallel_merge: bool,
    cleanup_on_failure: bool,
}

impl<B> ExternalSorterBuilder<B>
where
    B: RunBufferBuilder,
{
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<B>, SortError> {
        self.buffer_builder.validate().map_err(SortError::InvalidConfig)?;
        if self.fan_in < 2 {
            return Err(SortError::InvalidConfig(format!(
                "fan-in must be at least 2, got {}",
                self.fan_in
            )));
        }
        if self.threads_number == Some(0) {
            return Err(SortError::InvalidConfig("threads number must be positive".into()));
        }

        Ok(ExternalSorter {
            thread_pool: ExternalSorter::<B>::init_thread_pool(self.threads_number)?,
            work_dir: self.work_dir,
            rw_buf_size: self.rw_buf_size,
            buffer_builder: self.buffer_builder,
            fan_in: self.fan_in,
            merge_strategy: self.merge_strategy,
            parallel_merge: self.parallel_merge,
            cleanup_on_failure: self.cleanup_on_failure,
        })
    }

    /// Sets number of threads to be used to sort data in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> ExternalSorterBuilder<B> {
        self.threads_number = Some(threads_number);
        self
    }

    /// Sets directory the scratch directory is created in.
    pub fn with_work_dir(mut self, path: &Path) -> ExternalSorterBuilder<B> {
        self.work_dir = Some(path.into());
        self
    }

    /// Sets run buffer builder.
    pub fn with_buffer(mut self, buffer_builder: B) -> ExternalSorterBuilder<B> {
        self.buffer_builder = buffer_builder;
        self
    }

    /// Sets run and output file read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<B> {
        self.rw_buf_size = Some(buf_size);
        self
    }

    /// Sets maximum number of runs merged at once.
    pub fn with_fan_in(mut self, fan_in: usize) -> ExternalSorterBuilder<B> {
        self.fan_in = fan_in;
        self
    }

    /// Sets k-way merge algorithm.
    pub fn with_merge_strategy(mut self, strategy: MergeStrategy) -> ExternalSorterBuilder<B> {
        self.merge_strategy = strategy;
        self
    }

    /// Merges independent groups of a round in parallel.
    /// Each worker holds `fan_in` open runs, so merge memory grows with the threads number.
    pub fn with_parallel_merge(mut self, parallel_merge: bool) -> ExternalSorterBuilder<B> {
        self.parallel_merge = parallel_merge;
        self
    }

    /// Removes scratch runs when a sort fails instead of leaving them for inspection.
    pub fn with_cleanup_on_failure(mut self, cleanup: bool) -> ExternalSorterBuilder<B> {
        self.cleanup_on_failure = cleanup;
        self
    }
}

impl ExternalSorterBuilder<LimitedBufferBuilder> {
    /// Sets number of lines held in memory per run.
    pub fn with_run_capacity(self, run_capacity: usize) -> ExternalSorterBuilder<LimitedBufferBuilder> {
        self.with_buffer(LimitedBufferBuilder::new(run_capacity, false))
    }
}

impl<B> Default for ExternalSorterBuilder<B>
where
    B: RunBufferBuilder,
{
    fn default() -> Self {
        ExternalSorterBuilder {
            threads_number: None,
            work_dir: None,
            rw_buf_size: None,
            buffer_builder: B::default(),
            fan_in: DEFAULT_FAN_IN,
            merge_strategy: MergeStrategy::default(),
            parallel_merge: false,
            cleanup_on_failure: false,
        }
    }
}

/// External line sorter.
pub struct ExternalSorter<B = LimitedBufferBuilder>
where
    B: RunBufferBuilder,
{
    /// Sorting thread pool.
    thread_pool: rayon::ThreadPool,
    /// Directory the scratch directory is created in.
    work_dir: Option<Box<Path>>,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Run buffer builder.
    buffer_builder: B,
    fan_in: usize,
    merge_strategy: MergeStrategy,
    parallel_merge: bool,
    cleanup_on_failure: bool,
}

impl<B> ExternalSorter<B>
where
    B: RunBufferBuilder,
{
    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, SortError> {
        let mut thread_pool_builder = rayon::ThreadPoolBuilder::new();

        if let Some(threads_number) = threads_number {
            log::info!("initializing thread-pool (threads: {})", threads_number);
            thread_pool_builder = thread_pool_builder.num_threads(threads_number);
        } else {
            log::info!("initializing thread-pool (threads: default)");
        }
        let thread_pool = thread_pool_builder
            .build()
            .map_err(|err| SortError::ThreadPoolBuildError(err))?;

        Ok(thread_pool)
    }

    /// Sorts the lines of `input` into `output`.
    ///
    /// Any file at `output` is replaced. It is removed only once the input has been fully
    /// split, so `input` and `output` may be the same path. On failure `output` either does
    /// not exist or still holds its previous content.
    ///
    /// # Arguments
    /// * `input` - File to be sorted
    /// * `output` - File the sorted lines are written to
    pub fn sort_file(&self, input: &Path, output: &Path) -> Result<SortSummary, PipelineError> {
        let started = Instant::now();
        let mut store = RunStore::new(self.work_dir.as_deref(), self.rw_buf_size)
            .map_err(|err| PipelineError::new(Phase::Setup, err))?;

        match self.run_pipeline(&mut store, input, output) {
            Ok(summary) => {
                store
                    .cleanup_all()
                    .map_err(|err| PipelineError::new(Phase::Cleanup, err))?;
                log::info!(
                    "sorted {} line(s) from {} into {} in {:.2?}",
                    summary.lines,
                    input.display(),
                    output.display(),
                    started.elapsed()
                );
                Ok(summary)
            }
            Err(err) => {
                log::error!("{}", err);
                if self.cleanup_on_failure {
                    if let Err(cleanup_err) = store.cleanup_all() {
                        log::warn!("scratch cleanup failed: {}", cleanup_err);
                    }
                } else {
                    let scratch = store.keep();
                    log::warn!("temporary runs left in {}", scratch.display());
                }
                Err(err)
            }
        }
    }

    fn run_pipeline(&self, store: &mut RunStore, input: &Path, output: &Path) -> Result<SortSummary, PipelineError> {
        let split = self
            .split(store, input)
            .map_err(|err| PipelineError::new(Phase::Split, err))?;

        let mut summary = SortSummary {
            lines: split.lines,
            initial_runs: split.runs,
            rounds: Vec::new(),
        };

        if split.runs == 0 {
            log::info!("input is empty, creating empty output");
            output::create_empty(output).map_err(|err| PipelineError::new(Phase::Merge, err))?;
            return Ok(summary);
        }

        let merged = self
            .merge(store, split.runs, output)
            .map_err(|err| PipelineError::new(Phase::Merge, err))?;
        summary.rounds = merged.rounds;

        Ok(summary)
    }

    fn merge(&self, store: &mut RunStore, runs: usize, output: &Path) -> Result<MergeStats, SortError> {
        let mut merger = RunMerger::new(self.fan_in, self.merge_strategy);
        if self.parallel_merge {
            merger = merger.with_thread_pool(&self.thread_pool);
        }
        merger.merge_runs(store, runs, output)
    }

    fn split(&self, store: &mut RunStore, input: &Path) -> Result<crate::builder::RunStats, SortError> {
        let file = fs::File::open(input).map_err(|err| SortError::read(input, err))?;
        let reader = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        RunBuilder::new(&self.buffer_builder, &self.thread_pool).build_runs(reader, input, store)
    }
}

/// Sorts `input` into `output` with default settings, using `work_dir` for scratch runs.
pub fn sort(input: &Path, output: &Path, work_dir: &Path) -> Result<SortSummary, PipelineError> {
    let sorter: ExternalSorter = ExternalSorterBuilder::new()
        .with_work_dir(work_dir)
        .build()
        .map_err(|err| PipelineError::new(Phase::Setup, err))?;

    sorter.sort_file(input, output)
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::fs;
    use std::path::Path;

    use rand::Rng;
    use rstest::*;

    use super::{sort, ExternalSorter, ExternalSorterBuilder};
    use crate::{MergeStrategy, Phase, PipelineError, Role, RunStore, SortError};

    #[fixture]
    fn work_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn sorter(run_capacity: usize, fan_in: usize, work_dir: &Path) -> ExternalSorter {
        ExternalSorterBuilder::new()
            .with_run_capacity(run_capacity)
            .with_fan_in(fan_in)
            .with_threads_number(2)
            .with_work_dir(work_dir)
            .build()
            .unwrap()
    }

    fn output_lines(path: &Path) -> Vec<Vec<u8>> {
        let content = fs::read(path).unwrap();
        if content.is_empty() {
            return Vec::new();
        }
        content.split(|byte| *byte == b'\n').map(|line| line.to_vec()).collect()
    }

    // the last line is never empty: joined, it would read back as a trailing newline
    fn random_lines(count: usize) -> Vec<Vec<u8>> {
        let mut rng = rand::thread_rng();
        let mut lines: Vec<Vec<u8>> = (0..count)
            .map(|_| {
                let len = rng.gen_range(0..12);
                (0..len).map(|_| rng.gen_range(b'a'..=b'f')).collect()
            })
            .collect();
        if let Some(last) = lines.last_mut() {
            last.push(b'z');
        }
        lines
    }

    fn histogram(lines: &[Vec<u8>]) -> HashMap<&[u8], usize> {
        let mut counts = HashMap::new();
        for line in lines {
            *counts.entry(line.as_slice()).or_insert(0) += 1;
        }
        counts
    }

    #[rstest]
    #[case(1, 2)]
    #[case(3, 2)]
    #[case(7, 3)]
    #[case(50, 10)]
    #[case(10_000, 10)]
    fn test_external_sorter(work_dir: tempfile::TempDir, #[case] run_capacity: usize, #[case] fan_in: usize) {
        let lines = random_lines(300);
        let input = work_dir.path().join("input.txt");
        let output = work_dir.path().join("output.txt");
        fs::write(&input, lines.join(&b'\n')).unwrap();

        let summary = sorter(run_capacity, fan_in, work_dir.path())
            .sort_file(&input, &output)
            .unwrap();

        let sorted = output_lines(&output);
        assert_eq!(summary.lines, 300);
        assert_eq!(sorted.len(), 300);
        assert!(sorted.windows(2).all(|pair| pair[0] <= pair[1]));
        assert_eq!(histogram(&sorted), histogram(&lines));
    }

    #[rstest]
    fn test_run_boundaries(work_dir: tempfile::TempDir) {
        let input = work_dir.path().join("input.txt");
        let output = work_dir.path().join("output.txt");
        fs::write(&input, b"d\nb\na\nc\ne").unwrap();

        let summary = sorter(3, 10, work_dir.path()).sort_file(&input, &output).unwrap();

        assert_eq!(summary.initial_runs, 2);
        assert_eq!(summary.rounds, vec![vec![2]]);
        assert_eq!(fs::read(&output).unwrap(), b"a\nb\nc\nd\ne");
    }

    #[rstest]
    fn test_fan_in_rounds(work_dir: tempfile::TempDir) {
        let input = work_dir.path().join("input.txt");
        let output = work_dir.path().join("output.txt");
        fs::write(&input, b"j\ni\nh\ng\nf\ne\nd\nc\nb\na").unwrap();

        let summary = sorter(2, 2, work_dir.path()).sort_file(&input, &output).unwrap();

        assert_eq!(summary.initial_runs, 5);
        assert_eq!(summary.rounds, vec![vec![2, 2, 1], vec![2, 1], vec![2]]);
        assert_eq!(fs::read(&output).unwrap(), b"a\nb\nc\nd\ne\nf\ng\nh\ni\nj");
    }

    #[rstest]
    #[case(1, 2)]
    #[case(3, 2)]
    #[case(100, 10)]
    fn test_empty_lines(work_dir: tempfile::TempDir, #[case] run_capacity: usize, #[case] fan_in: usize) {
        let input = work_dir.path().join("input.txt");
        let output = work_dir.path().join("output.txt");
        fs::write(&input, b"\n\nb\n\na\n\n\nc").unwrap();

        let summary = sorter(run_capacity, fan_in, work_dir.path())
            .sort_file(&input, &output)
            .unwrap();

        assert_eq!(summary.lines, 8);
        assert_eq!(fs::read(&output).unwrap(), b"\n\n\n\n\na\nb\nc");
    }

    #[rstest]
    fn test_parallel_linear_merge(work_dir: tempfile::TempDir) {
        let mut lines = random_lines(500);
        let input = work_dir.path().join("input.txt");
        let output = work_dir.path().join("output.txt");
        fs::write(&input, lines.join(&b'\n')).unwrap();

        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_run_capacity(16)
            .with_fan_in(3)
            .with_merge_strategy(MergeStrategy::LinearScan)
            .with_parallel_merge(true)
            .with_rw_buf_size(64)
            .with_threads_number(4)
            .with_work_dir(work_dir.path())
            .build()
            .unwrap();
        sorter.sort_file(&input, &output).unwrap();

        lines.sort();
        assert_eq!(output_lines(&output), lines);
    }

    #[rstest]
    #[case(b"".as_slice())]
    #[case(b"single".as_slice())]
    #[case(b"a\nb\nb\nc".as_slice())]
    fn test_identity_inputs(work_dir: tempfile::TempDir, #[case] content: &[u8]) {
        let input = work_dir.path().join("input.txt");
        let output = work_dir.path().join("output.txt");
        fs::write(&input, content).unwrap();

        sorter(2, 2, work_dir.path()).sort_file(&input, &output).unwrap();

        assert_eq!(fs::read(&output).unwrap(), content);
    }

    #[rstest]
    fn test_empty_input_replaces_output(work_dir: tempfile::TempDir) {
        let input = work_dir.path().join("input.txt");
        let output = work_dir.path().join("output.txt");
        fs::write(&input, b"").unwrap();
        fs::write(&output, b"old").unwrap();

        let summary = sorter(2, 2, work_dir.path()).sort_file(&input, &output).unwrap();

        assert_eq!(summary.initial_runs, 0);
        assert!(summary.rounds.is_empty());
        assert_eq!(fs::read(&output).unwrap(), b"");
    }

    #[rstest]
    fn test_sort_in_place(work_dir: tempfile::TempDir) {
        let path = work_dir.path().join("data.txt");
        fs::write(&path, b"c\na\nb\n").unwrap();

        sorter(1, 2, work_dir.path()).sort_file(&path, &path).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"a\nb\nc");
    }

    #[rstest]
    fn test_scratch_removed_after_success(work_dir: tempfile::TempDir) {
        let scratch = work_dir.path().join("scratch");
        fs::create_dir(&scratch).unwrap();
        let input = work_dir.path().join("input.txt");
        let output = work_dir.path().join("output.txt");
        fs::write(&input, b"z\ny\nx\nw").unwrap();

        sort(&input, &output, &scratch).unwrap();

        assert_eq!(fs::read_dir(&scratch).unwrap().count(), 0);
        assert_eq!(fs::read(&output).unwrap(), b"w\nx\ny\nz");
    }

    #[rstest]
    #[case(false, 1)]
    #[case(true, 0)]
    fn test_missing_input(work_dir: tempfile::TempDir, #[case] cleanup: bool, #[case] leftovers: usize) {
        let scratch = work_dir.path().join("scratch");
        fs::create_dir(&scratch).unwrap();
        let output = work_dir.path().join("output.txt");
        fs::write(&output, b"previous").unwrap();

        let sorter: ExternalSorter = ExternalSorterBuilder::new()
            .with_work_dir(&scratch)
            .with_cleanup_on_failure(cleanup)
            .build()
            .unwrap();
        let err = sorter
            .sort_file(&work_dir.path().join("absent.txt"), &output)
            .unwrap_err();

        assert_eq!(err.phase(), Phase::Split);
        assert!(matches!(err.error(), SortError::Read { .. }));
        assert_eq!(fs::read(&output).unwrap(), b"previous");
        assert_eq!(fs::read_dir(&scratch).unwrap().count(), leftovers);
    }

    #[rstest]
    fn test_failed_intermediate_round_keeps_output(work_dir: tempfile::TempDir) {
        let input = work_dir.path().join("input.txt");
        let output = work_dir.path().join("output.txt");
        fs::write(&input, b"d\nc\nb\na").unwrap();
        fs::write(&output, b"previous").unwrap();

        let sorter = sorter(1, 2, work_dir.path());
        let mut store = RunStore::new(Some(work_dir.path()), None).unwrap();
        let split = sorter.split(&mut store, &input).unwrap();
        assert_eq!(split.runs, 4);
        fs::remove_file(store.run_path(Role::Read, 2)).unwrap();

        let err = sorter
            .merge(&mut store, split.runs, &output)
            .map_err(|err| PipelineError::new(Phase::Merge, err))
            .unwrap_err();

        assert_eq!(err.phase(), Phase::Merge);
        assert!(matches!(err.error(), SortError::Read { .. }));
        assert_eq!(fs::read(&output).unwrap(), b"previous");
        store.cleanup_all().unwrap();
    }

    #[rstest]
    #[case(0, 10)]
    #[case(10, 1)]
    fn test_invalid_config(#[case] run_capacity: usize, #[case] fan_in: usize) {
        let result = ExternalSorterBuilder::new()
            .with_run_capacity(run_capacity)
            .with_fan_in(fan_in)
            .build();

        assert!(matches!(result, Err(SortError::InvalidConfig(_))));
    }
}
