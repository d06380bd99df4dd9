//! Sorting errors.

use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::io;
use std::path::{Path, PathBuf};

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Scratch directory creation error.
    TempDir(io::Error),
    /// Workers thread pool initialization error.
    ThreadPoolBuildError(rayon::ThreadPoolBuildError),
    /// Sorter configuration rejected by the builder.
    InvalidConfig(String),
    /// Input, run or output file could not be read.
    Read { path: PathBuf, source: io::Error },
    /// Run or output file could not be written.
    Write { path: PathBuf, source: io::Error },
    /// Run, scratch directory or stale output could not be deleted.
    Delete { path: PathBuf, source: io::Error },
    /// Run could not be promoted to the next generation.
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },
}

impl SortError {
    pub(crate) fn read(path: &Path, source: io::Error) -> Self {
        SortError::Read {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn write(path: &Path, source: io::Error) -> Self {
        SortError::Write {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn delete(path: &Path, source: io::Error) -> Self {
        SortError::Delete {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Returns the underlying I/O error if the failure came from the file system.
    pub fn io_error(&self) -> Option<&io::Error> {
        match self {
            SortError::TempDir(err) => Some(err),
            SortError::Read { source, .. }
            | SortError::Write { source, .. }
            | SortError::Delete { source, .. }
            | SortError::Rename { source, .. } => Some(source),
            SortError::ThreadPoolBuildError(_) | SortError::InvalidConfig(_) => None,
        }
    }
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::ThreadPoolBuildError(err) => Some(err),
            SortError::InvalidConfig(_) => None,
            _ => self.io_error().map(|err| err as &(dyn Error + 'static)),
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::TempDir(err) => write!(f, "scratch directory not created: {}", err),
            SortError::ThreadPoolBuildError(err) => write!(f, "thread pool initialization failed: {}", err),
            SortError::InvalidConfig(reason) => write!(f, "invalid sorter configuration: {}", reason),
            SortError::Read { path, source } => write!(f, "failed to read {}: {}", path.display(), source),
            SortError::Write { path, source } => write!(f, "failed to write {}: {}", path.display(), source),
            SortError::Delete { path, source } => write!(f, "failed to delete {}: {}", path.display(), source),
            SortError::Rename { from, to, source } => write!(
                f,
                "failed to rename {} to {}: {}",
                from.display(),
                to.display(),
                source
            ),
        }
    }
}

/// Pipeline phase a failure occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Scratch directory preparation.
    Setup,
    /// Splitting the input into sorted runs.
    Split,
    /// Merge rounds and the final output write.
    Merge,
    /// Removal of the scratch directory after success.
    Cleanup,
}

impl Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Setup => "setup",
            Phase::Split => "split",
            Phase::Merge => "merge",
            Phase::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// Aggregate failure of a whole sort.
#[derive(Debug)]
pub struct PipelineError {
    phase: Phase,
    error: SortError,
}

impl PipelineError {
    pub fn new(phase: Phase, error: SortError) -> Self {
        PipelineError { phase, error }
    }

    /// Phase the sort failed in.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The error that aborted the sort.
    pub fn error(&self) -> &SortError {
        &self.error
    }

    pub fn into_error(self) -> SortError {
        self.error
    }
}

impl Error for PipelineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.error)
    }
}

impl Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} phase failed: {}", self.phase, self.error)
    }
}

#[cfg(test)]
mod test {
    use std::error::Error;
    use std::io;
    use std::path::Path;

    use super::{Phase, PipelineError, SortError};

    #[test]
    fn test_pipeline_error_display() {
        let err = SortError::read(Path::new("input.txt"), io::Error::new(io::ErrorKind::NotFound, "missing"));
        let err = PipelineError::new(Phase::Split, err);

        assert_eq!(err.to_string(), "split phase failed: failed to read input.txt: missing");
        assert_eq!(err.phase(), Phase::Split);
        assert!(err.source().is_some());
        assert_eq!(err.error().io_error().map(|e| e.kind()), Some(io::ErrorKind::NotFound));
    }

    #[test]
    fn test_invalid_config_has_no_source() {
        let err = SortError::InvalidConfig("fan-in must be at least 2".into());
        assert!(err.source().is_none());
        assert!(err.io_error().is_none());
    }
}
