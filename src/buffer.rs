//! Bounded run buffers.
//!
//! A run buffer accumulates input lines until it reports itself full, at which point the
//! run builder sorts it and flushes it to disk as one run.

use rayon;

use crate::Line;

/// Default number of lines held in memory per run.
pub const DEFAULT_RUN_CAPACITY: usize = 10_000;

/// Factory of empty run buffers, shared by the split phase.
pub trait RunBufferBuilder: Default + Sync {
    type Buffer: RunBuffer;

    fn build(&self) -> Self::Buffer;

    /// Rejects limits no run could be built with.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// In-memory lines of the run being built. Sorted in place, then drained into a run file.
pub trait RunBuffer: IntoIterator<Item = Line> + rayon::slice::ParallelSliceMut<Line> + Send {
    fn push(&mut self, line: Line);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True once the run must be flushed before another line is pushed.
    fn is_full(&self) -> bool;
}

/// Builds [`LimitedBuffer`]s holding at most `run_capacity` lines.
pub struct LimitedBufferBuilder {
    run_capacity: usize,
    preallocate: bool,
}

impl LimitedBufferBuilder {
    /// With `preallocate` set, every run reserves room for `run_capacity` lines up front.
    pub fn new(run_capacity: usize, preallocate: bool) -> Self {
        LimitedBufferBuilder {
            run_capacity,
            preallocate,
        }
    }

    pub fn run_capacity(&self) -> usize {
        self.run_capacity
    }
}

impl RunBufferBuilder for LimitedBufferBuilder {
    type Buffer = LimitedBuffer;

    fn build(&self) -> Self::Buffer {
        LimitedBuffer::new(self.run_capacity, self.preallocate)
    }

    fn validate(&self) -> Result<(), String> {
        match self.run_capacity {
            0 => Err("run capacity must be at least 1 line".into()),
            _ => Ok(()),
        }
    }
}

impl Default for LimitedBufferBuilder {
    fn default() -> Self {
        LimitedBufferBuilder::new(DEFAULT_RUN_CAPACITY, false)
    }
}

/// Run of at most `max_lines` lines.
pub struct LimitedBuffer {
    max_lines: usize,
    lines: Vec<Line>,
}

impl LimitedBuffer {
    pub fn new(max_lines: usize, preallocate: bool) -> Self {
        let lines = if preallocate {
            Vec::with_capacity(max_lines)
        } else {
            Vec::new()
        };

        LimitedBuffer { max_lines, lines }
    }
}

impl RunBuffer for LimitedBuffer {
    fn push(&mut self, line: Line) {
        self.lines.push(line);
    }

    fn len(&self) -> usize {
        self.lines.len()
    }

    fn is_full(&self) -> bool {
        self.len() >= self.max_lines
    }
}

impl IntoIterator for LimitedBuffer {
    type Item = Line;
    type IntoIter = std::vec::IntoIter<Line>;

    fn into_iter(self) -> Self::IntoIter {
        self.lines.into_iter()
    }
}

impl rayon::slice::ParallelSliceMut<Line> for LimitedBuffer {
    fn as_parallel_slice_mut(&mut self) -> &mut [Line] {
        &mut self.lines
    }
}


/// Runs bounded by the heap footprint of their lines instead of their line count.
#[cfg(feature = "memory-limit")]
pub mod mem {
    use deepsize::DeepSizeOf;
    use rayon;

    use super::{RunBuffer, RunBufferBuilder};
    use crate::Line;

    /// Builds [`MemoryLimitedBuffer`]s closing a run once it holds `max_bytes`.
    pub struct MemoryLimitedBufferBuilder {
        max_bytes: u64,
    }

    impl MemoryLimitedBufferBuilder {
        pub fn new(max_bytes: u64) -> Self {
            MemoryLimitedBufferBuilder { max_bytes }
        }
    }

    impl RunBufferBuilder for MemoryLimitedBufferBuilder {
        type Buffer = MemoryLimitedBuffer;

        fn build(&self) -> Self::Buffer {
            MemoryLimitedBuffer::new(self.max_bytes)
        }

        fn validate(&self) -> Result<(), String> {
            match self.max_bytes {
                0 => Err("run memory limit must be positive".into()),
                _ => Ok(()),
            }
        }
    }

    impl Default for MemoryLimitedBufferBuilder {
        fn default() -> Self {
            MemoryLimitedBufferBuilder::new(u64::MAX)
        }
    }

    /// Run accounting every line at its deep size: the `Vec` header plus its bytes.
    /// A single line larger than the limit still makes a run of its own.
    pub struct MemoryLimitedBuffer {
        max_bytes: u64,
        used_bytes: u64,
        lines: Vec<Line>,
    }

    impl MemoryLimitedBuffer {
        pub fn new(max_bytes: u64) -> Self {
            MemoryLimitedBuffer {
                max_bytes,
                used_bytes: 0,
                lines: Vec::new(),
            }
        }

        /// Bytes accounted to the lines pushed so far.
        pub fn used_bytes(&self) -> u64 {
            self.used_bytes
        }
    }

    impl RunBuffer for MemoryLimitedBuffer {
        fn push(&mut self, line: Line) {
            self.used_bytes += line.deep_size_of() as u64;
            self.lines.push(line);
        }

        fn len(&self) -> usize {
            self.lines.len()
        }

        fn is_full(&self) -> bool {
            self.used_bytes >= self.max_bytes
        }
    }

    impl IntoIterator for MemoryLimitedBuffer {
        type Item = Line;
        type IntoIter = std::vec::IntoIter<Line>;

        fn into_iter(self) -> Self::IntoIter {
            self.lines.into_iter()
        }
    }

    impl rayon::slice::ParallelSliceMut<Line> for MemoryLimitedBuffer {
        fn as_parallel_slice_mut(&mut self) -> &mut [Line] {
            &mut self.lines
        }
    }

}
