//! `ext-line-sort` sorts line-oriented text files that do not fit into memory.
//!
//! Sorting is achieved in two phases. The split phase reads the input sequentially and
//! writes it as runs: chunks of at most a fixed number of lines, each sorted in memory.
//! The merge phase then repeatedly merges groups of at most *fan-in* runs into longer runs
//! until a single group is left, which is merged straight into the output file. For more
//! information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Bounded memory:**
//!   memory use is bounded by the run capacity and the fan-in, independently of the input
//!   size. Runs can also be bounded by their byte size (`memory-limit` feature required).
//! * **Byte-wise ordering:**
//!   lines are separated by `\n` and compared as raw bytes, no encoding is assumed.
//!   Duplicates are preserved.
//! * **Multithreading support:**
//!   runs are sorted in a thread pool and, optionally, independent merge groups are merged
//!   in parallel.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use ext_line_sort::{ExternalSorter, ExternalSorterBuilder};
//!
//! fn main() {
//!     let sorter: ExternalSorter = ExternalSorterBuilder::new()
//!         .with_work_dir(Path::new("./"))
//!         .with_run_capacity(100_000)
//!         .with_fan_in(16)
//!         .build()
//!         .unwrap();
//!
//!     let summary = sorter.sort_file(Path::new("input.txt"), Path::new("output.txt")).unwrap();
//!     println!("sorted {} lines", summary.lines);
//! }
//! ```

pub mod buffer;
pub mod builder;
pub mod error;
pub mod merger;
pub mod output;
pub mod run;
pub mod sort;
pub mod storage;

/// A single line without its separator.
pub type Line = Vec<u8>;

pub use buffer::{LimitedBuffer, LimitedBufferBuilder, RunBuffer, RunBufferBuilder, DEFAULT_RUN_CAPACITY};
pub use builder::{RunBuilder, RunStats};
pub use error::{Phase, PipelineError, SortError};
pub use merger::{BinaryHeapMerger, LinearScanMerger, MergeStats, MergeStrategy, RunMerger, DEFAULT_FAN_IN};
pub use run::{RunReader, RunWriter};
pub use sort::{sort, ExternalSorter, ExternalSorterBuilder, SortSummary};
pub use storage::{Role, RunStore};
