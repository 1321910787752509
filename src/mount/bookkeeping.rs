//! On-disk mount bookkeeping.
//!
//! Layout: `<mount_root>/simloc-XXXX/{active/<token>, finished, mnt/}`. The
//! files mirror the in-process state for other processes looking at the
//! same mount.

use crate::types::{new_identity, short_identity};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

pub const DIR_PREFIX: &str = "simloc-";
pub const MOUNT_DIR: &str = "mnt";
const ACTIVE_DIR: &str = "active";
const FINISHED_FILE: &str = "finished";

/// One bookkeeping directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountDir {
    root: PathBuf,
}

impl MountDir {
    /// Create a new empty bookkeeping directory under `mount_root`.
    pub fn create(mount_root: &Path) -> io::Result<Self> {
        fs::create_dir_all(mount_root)?;
        loop {
            let root = mount_root.join(format!("{}{}", DIR_PREFIX, short_identity(&new_identity())));
            match fs::create_dir(&root) {
                Ok(()) => {
                    let dir = Self { root };
                    fs::create_dir(dir.active_dir())?;
                    fs::create_dir(dir.mount_point())?;
                    return Ok(dir);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Bookkeeping directory owning an existing mount point.
    pub fn adopt(mount_point: &Path) -> Option<Self> {
        if mount_point.file_name()? != MOUNT_DIR {
            return None;
        }
        let root = mount_point.parent()?.to_path_buf();
        if !root.file_name()?.to_str()?.starts_with(DIR_PREFIX) {
            return None;
        }
        Some(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mount_point(&self) -> PathBuf {
        self.root.join(MOUNT_DIR)
    }

    fn active_dir(&self) -> PathBuf {
        self.root.join(ACTIVE_DIR)
    }

    pub fn add_token(&self, token: &str) -> io::Result<()> {
        fs::create_dir_all(self.active_dir())?;
        fs::write(self.active_dir().join(token), b"")
    }

    pub fn remove_token(&self, token: &str) -> io::Result<()> {
        match fs::remove_file(self.active_dir().join(token)) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Number of clients registered on disk, any process.
    pub fn active_count(&self) -> io::Result<usize> {
        match fs::read_dir(self.active_dir()) {
            Ok(entries) => Ok(entries.filter_map(Result::ok).count()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e),
        }
    }

    pub fn touch_finished(&self) -> io::Result<()> {
        fs::write(self.root.join(FINISHED_FILE), b"")
    }

    /// When the last client left, if one ever did.
    pub fn finished_at(&self) -> Option<SystemTime> {
        fs::metadata(self.root.join(FINISHED_FILE))
            .and_then(|m| m.modified())
            .ok()
    }

    /// Remove the whole directory. The mount point must be unmounted first.
    pub fn remove_all(&self) -> io::Result<()> {
        match fs::remove_dir_all(&self.root) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_create_layout() {
        let temp = TempDir::new().unwrap();
        let dir = MountDir::create(temp.path()).unwrap();
        let name = dir.root().file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with(DIR_PREFIX));
        assert!(dir.mount_point().is_dir());
        assert_eq!(dir.active_count().unwrap(), 0);
        assert!(dir.finished_at().is_none());

        let other = MountDir::create(temp.path()).unwrap();
        assert_ne!(dir, other);
    }

    #[test]
    fn test_tokens_and_finished() {
        let temp = TempDir::new().unwrap();
        let dir = MountDir::create(temp.path()).unwrap();
        dir.add_token("t1").unwrap();
        dir.add_token("t2").unwrap();
        assert_eq!(dir.active_count().unwrap(), 2);
        dir.remove_token("t1").unwrap();
        dir.remove_token("t1").unwrap();
        assert_eq!(dir.active_count().unwrap(), 1);

        dir.touch_finished().unwrap();
        assert!(dir.finished_at().is_some());

        dir.remove_all().unwrap();
        assert!(!dir.root().exists());
        assert_eq!(dir.active_count().unwrap(), 0);
    }

    #[test]
    fn test_adopt() {
        let temp = TempDir::new().unwrap();
        let dir = MountDir::create(temp.path()).unwrap();
        assert_eq!(MountDir::adopt(&dir.mount_point()), Some(dir.clone()));
        assert!(MountDir::adopt(dir.root()).is_none());
        assert!(MountDir::adopt(&temp.path().join("manual/mnt")).is_none());
    }
}
