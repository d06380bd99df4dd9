//! Output path handling.
//!
//! The final merge writes straight to the output path, so any previous file there is
//! removed right before that write starts and a partially written result is removed if
//! the write fails.

use std::fs;
use std::io;
use std::path::Path;

use log;

use crate::run::RunWriter;
use crate::SortError;

/// Removes a pre-existing file at `path`. A missing file is not an error.
pub fn remove_existing(path: &Path) -> Result<(), SortError> {
    match fs::remove_file(path) {
        Ok(()) => {
            log::debug!("removed previous output {}", path.display());
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SortError::delete(path, err)),
    }
}

/// Replaces whatever is at `path` with an empty file.
pub fn create_empty(path: &Path) -> Result<(), SortError> {
    remove_existing(path)?;
    RunWriter::create(path, None)?.finish()?;
    Ok(())
}

/// Best-effort removal of an incomplete output after a failed final write.
pub fn discard_partial(path: &Path) {
    if let Err(err) = remove_existing(path) {
        log::warn!("incomplete output left behind: {}", err);
    } else {
        log::warn!("incomplete output {} discarded", path.display());
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use super::{create_empty, discard_partial, remove_existing};

    #[test]
    fn test_create_empty_replaces_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        fs::write(&path, b"stale\ncontent").unwrap();

        create_empty(&path).unwrap();

        assert_eq!(fs::read(&path).unwrap(), b"");
    }

    #[test]
    fn test_remove_missing_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.txt");

        remove_existing(&path).unwrap();
        discard_partial(&path);

        assert!(!path.exists());
    }
}
