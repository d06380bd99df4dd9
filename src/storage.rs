//! Temporary run storage.
//!
//! [`RunStore`] owns every run file of a sort. Runs live in a private scratch directory and
//! are addressed by `(Role, index)`: merge rounds read the [`Role::Read`] generation and
//! write the [`Role::Write`] one, then [`RunStore::promote`] makes the written generation
//! readable for the next round.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log;
use tempfile;

use crate::run::{RunReader, RunWriter};
use crate::SortError;

/// Generation role of a run file within a merge round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Generation consumed by the current round.
    Read,
    /// Generation produced by the current round.
    Write,
}

impl Role {
    fn prefix(&self) -> &'static str {
        match self {
            Role::Read => "read",
            Role::Write => "write",
        }
    }
}

/// Run file store of a single sort.
pub struct RunStore {
    dir: tempfile::TempDir,
    rw_buf_size: Option<usize>,
    /// Line counts of sealed runs, by index.
    read_runs: Vec<u64>,
    write_runs: Vec<u64>,
}

impl RunStore {
    /// Creates a store with a fresh scratch directory inside `work_dir`.
    /// If `work_dir` is [`None`] the default OS temporary directory is used.
    pub fn new(work_dir: Option<&Path>, rw_buf_size: Option<usize>) -> Result<Self, SortError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ext-line-sort-");

        let dir = if let Some(work_dir) = work_dir {
            builder.tempdir_in(work_dir)
        } else {
            builder.tempdir()
        }
        .map_err(|err| SortError::TempDir(err))?;

        log::info!("using {} as a scratch directory", dir.path().display());

        Ok(RunStore {
            dir,
            rw_buf_size,
            read_runs: Vec::new(),
            write_runs: Vec::new(),
        })
    }

    /// Scratch directory holding the run files.
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn rw_buf_size(&self) -> Option<usize> {
        self.rw_buf_size
    }

    /// Path of run `index` in the generation playing `role`.
    pub fn run_path(&self, role: Role, index: usize) -> PathBuf {
        self.dir.path().join(format!("{}-{:06}.run", role.prefix(), index))
    }

    /// Number of sealed runs in the generation playing `role`.
    pub fn run_count(&self, role: Role) -> usize {
        self.runs(role).len()
    }

    /// Creates run `index` of the `role` generation for writing.
    pub fn create_run(&self, role: Role, index: usize) -> Result<RunWriter, SortError> {
        RunWriter::create(&self.run_path(role, index), self.rw_buf_size)
    }

    /// Registers a fully written run. Runs of a generation are sealed in index order.
    pub fn seal_run(&mut self, role: Role, index: usize, lines: u64) {
        let runs = self.runs_mut(role);
        debug_assert_eq!(index, runs.len(), "runs must be sealed in index order");
        runs.push(lines);
    }

    /// Opens sealed run `index` of the `role` generation.
    pub fn open_run(&self, role: Role, index: usize) -> Result<RunReader, SortError> {
        let lines = self.runs(role).get(index).copied().ok_or_else(|| {
            SortError::read(
                &self.run_path(role, index),
                io::Error::new(io::ErrorKind::NotFound, "run is not sealed"),
            )
        })?;

        RunReader::open(&self.run_path(role, index), lines, self.rw_buf_size)
    }

    /// Deletes every read-role run and renames write-role runs `0..after_count` into the
    /// read role.
    pub fn promote(&mut self, after_count: usize) -> Result<(), SortError> {
        debug_assert_eq!(after_count, self.write_runs.len());

        for index in 0..self.read_runs.len() {
            let path = self.run_path(Role::Read, index);
            fs::remove_file(&path).map_err(|err| SortError::delete(&path, err))?;
        }

        for index in 0..after_count {
            let from = self.run_path(Role::Write, index);
            let to = self.run_path(Role::Read, index);
            fs::rename(&from, &to).map_err(|source| SortError::Rename { from, to, source })?;
        }

        self.read_runs = std::mem::take(&mut self.write_runs);
        self.read_runs.truncate(after_count);
        log::debug!("promoted {} run(s) to the read generation", after_count);

        Ok(())
    }

    /// Deletes all run files of both generations and the scratch directory itself.
    pub fn cleanup_all(self) -> Result<(), SortError> {
        for role in [Role::Read, Role::Write] {
            for index in 0..self.run_count(role) {
                let path = self.run_path(role, index);
                match fs::remove_file(&path) {
                    Ok(()) => {}
                    Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                    Err(err) => return Err(SortError::delete(&path, err)),
                }
            }
        }

        let path = self.dir.path().to_path_buf();
        self.dir.close().map_err(|err| SortError::delete(&path, err))?;
        log::debug!("scratch directory {} removed", path.display());

        Ok(())
    }

    /// Gives up ownership of the scratch directory, leaving its files on disk.
    pub fn keep(self) -> PathBuf {
        self.dir.into_path()
    }

    fn runs(&self, role: Role) -> &Vec<u64> {
        match role {
            Role::Read => &self.read_runs,
            Role::Write => &self.write_runs,
        }
    }

    fn runs_mut(&mut self, role: Role) -> &mut Vec<u64> {
        match role {
            Role::Read => &mut self.read_runs,
            Role::Write => &mut self.write_runs,
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use rstest::*;

    use super::{Role, RunStore};
    use crate::{Line, SortError};

    #[fixture]
    fn work_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn write(store: &mut RunStore, role: Role, index: usize, lines: &[&str]) {
        let mut writer = store.create_run(role, index).unwrap();
        for line in lines {
            writer.write_line(line.as_bytes()).unwrap();
        }
        let count = writer.finish().unwrap();
        store.seal_run(role, index, count);
    }

    fn read(store: &RunStore, role: Role, index: usize) -> Vec<Line> {
        store.open_run(role, index).unwrap().map(Result::unwrap).collect()
    }

    #[rstest]
    fn test_run_paths_are_distinct(work_dir: tempfile::TempDir) {
        let store = RunStore::new(Some(work_dir.path()), None).unwrap();

        assert!(store.path().starts_with(work_dir.path()));
        assert_ne!(store.run_path(Role::Read, 0), store.run_path(Role::Write, 0));
        assert_ne!(store.run_path(Role::Read, 0), store.run_path(Role::Read, 1));
    }

    #[rstest]
    fn test_promote(work_dir: tempfile::TempDir) {
        let mut store = RunStore::new(Some(work_dir.path()), None).unwrap();
        write(&mut store, Role::Read, 0, &["a", "c"]);
        write(&mut store, Role::Read, 1, &["b"]);
        write(&mut store, Role::Read, 2, &["d"]);
        write(&mut store, Role::Write, 0, &["a", "b", "c"]);
        write(&mut store, Role::Write, 1, &["d"]);

        store.promote(2).unwrap();

        assert_eq!(store.run_count(Role::Read), 2);
        assert_eq!(store.run_count(Role::Write), 0);
        assert_eq!(read(&store, Role::Read, 0), vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert_eq!(read(&store, Role::Read, 1), vec![b"d".to_vec()]);
        assert!(!store.run_path(Role::Read, 2).exists());
        assert!(!store.run_path(Role::Write, 0).exists());
    }

    #[rstest]
    fn test_promote_fails_on_missing_read_run(work_dir: tempfile::TempDir) {
        let mut store = RunStore::new(Some(work_dir.path()), None).unwrap();
        write(&mut store, Role::Read, 0, &["a"]);
        write(&mut store, Role::Read, 1, &["b"]);
        write(&mut store, Role::Write, 0, &["a", "b"]);
        fs::remove_file(store.run_path(Role::Read, 1)).unwrap();

        let result = store.promote(1);

        match result {
            Err(SortError::Delete { path, .. }) => assert_eq!(path, store.run_path(Role::Read, 1)),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[rstest]
    fn test_promote_fails_on_missing_write_run(work_dir: tempfile::TempDir) {
        let mut store = RunStore::new(Some(work_dir.path()), None).unwrap();
        write(&mut store, Role::Read, 0, &["a"]);
        write(&mut store, Role::Write, 0, &["a"]);
        fs::remove_file(store.run_path(Role::Write, 0)).unwrap();

        let result = store.promote(1);

        match result {
            Err(SortError::Rename { from, to, .. }) => {
                assert_eq!(from, store.run_path(Role::Write, 0));
                assert_eq!(to, store.run_path(Role::Read, 0));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[rstest]
    fn test_unsealed_run_not_readable(work_dir: tempfile::TempDir) {
        let store = RunStore::new(Some(work_dir.path()), None).unwrap();
        let writer = store.create_run(Role::Write, 0).unwrap();
        writer.finish().unwrap();

        assert!(store.open_run(Role::Write, 0).is_err());
    }

    #[rstest]
    fn test_cleanup_all(work_dir: tempfile::TempDir) {
        let mut store = RunStore::new(Some(work_dir.path()), None).unwrap();
        write(&mut store, Role::Read, 0, &["a"]);
        write(&mut store, Role::Write, 0, &["b"]);
        let scratch = store.path().to_path_buf();

        store.cleanup_all().unwrap();

        assert!(!scratch.exists());
        assert_eq!(fs::read_dir(work_dir.path()).unwrap().count(), 0);
    }

    #[rstest]
    fn test_keep_leaves_runs(work_dir: tempfile::TempDir) {
        let mut store = RunStore::new(Some(work_dir.path()), None).unwrap();
        write(&mut store, Role::Read, 0, &["a"]);
        let run = store.run_path(Role::Read, 0);

        let scratch = store.keep();

        assert!(run.exists());
        fs::remove_dir_all(scratch).unwrap();
    }
}
