use std::io::Write;
use std::path::{Path, PathBuf};

use crate::TransferError;

/// A temporary file next to its final destination.
///
/// Content is written to the stage and moved into place with a single
/// `rename` on [`commit`](Self::commit), so readers only ever see the
/// old file or the complete new one. A stage that is dropped without
/// being committed is deleted.
#[derive(Debug)]
pub struct StagedFile {
    path: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Reserves a stage path for `dest`.
    ///
    /// The stage lives in the same directory as `dest` so the final rename
    /// never crosses a filesystem. The file itself is created by the writer.
    pub fn new(dest: &Path) -> Result<Self, TransferError> {
        let file_name = dest
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidName(dest.display().to_string()))?;
        let dir = match dest.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let path = dir.join(format!(".{file_name}.part-{}", uuid::Uuid::new_v4().simple()));
        Ok(Self {
            path,
            dest: dest.to_path_buf(),
            committed: false,
        })
    }

    /// Path of the temporary file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Final destination.
    pub fn dest(&self) -> &Path {
        &self.dest
    }

    /// Moves the stage into place, replacing any existing destination.
    pub fn commit(mut self) -> Result<PathBuf, TransferError> {
        std::fs::rename(&self.path, &self.dest)?;
        self.committed = true;
        Ok(self.dest.clone())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Writes `data` to `path` atomically (write stage, fsync, rename).
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), TransferError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let stage = StagedFile::new(path)?;
    {
        let mut file = std::fs::File::create(stage.path())?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    stage.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn stage_is_hidden_sibling() {
        let dir = TempDir::new().unwrap();
        let stage = StagedFile::new(&dir.path().join("a.dm4")).unwrap();
        assert_eq!(stage.path().parent(), Some(dir.path()));
        let name = stage.path().file_name().unwrap().to_string_lossy();
        assert!(name.starts_with(".a.dm4.part-"));
    }

    #[test]
    fn commit_moves_into_place() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("a.dm4");
        let stage = StagedFile::new(&dest).unwrap();
        std::fs::write(stage.path(), b"payload").unwrap();

        let final_path = stage.commit().unwrap();
        assert_eq!(final_path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
        assert_eq!(entries(dir.path()), vec!["a.dm4"]);
    }

    #[test]
    fn drop_without_commit_cleans_up() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("a.dm4");
        {
            let stage = StagedFile::new(&dest).unwrap();
            std::fs::write(stage.path(), b"half").unwrap();
        }
        assert!(entries(dir.path()).is_empty());
    }

    #[test]
    fn commit_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("a.dm4");
        std::fs::write(&dest, b"old").unwrap();
        let stage = StagedFile::new(&dest).unwrap();
        std::fs::write(stage.path(), b"new").unwrap();
        stage.commit().unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"new");
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("markers").join("m.json");
        atomic_write(&path, b"{}").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"{}");
        assert_eq!(entries(&dir.path().join("markers")), vec!["m.json"]);
    }
}
