//! Config file backups and atomic writes.
//!
//! A timestamp-named backup is taken beside the config file before every
//! mutating write, and the write itself goes through a temp-file-then-rename
//! so a crash mid-write can never leave a half-written config.  Backups are
//! kept forever; rotation is deliberately out of scope.

use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::info;

use crate::errors::ReplicadmError;

/// An immutable pre-edit copy of the config file.
#[derive(Debug, Clone)]
pub struct ConfigBackup {
    path: PathBuf,
}

impl ConfigBackup {
    /// Copy `config_path` to a timestamped sibling
    /// (`mongod.conf.bak.YYYYMMDDHHMMSS`).  Returns `None` when no live
    /// file exists -- rollback then means deleting whatever gets written.
    ///
    /// The backup is a separate, completed step before any edit: if the
    /// process dies between backup and write, the live file is untouched
    /// and the backup is merely redundant.
    pub fn create(config_path: &Path) -> Result<Option<Self>, ReplicadmError> {
        if !config_path.exists() {
            return Ok(None);
        }
        let stamp = Local::now().format("%Y%m%d%H%M%S");
        let mut candidate = sibling(config_path, &format!("bak.{stamp}"));
        // Same-second reruns get a disambiguating suffix instead of
        // overwriting an earlier backup.
        let mut attempt = 1u32;
        while candidate.exists() {
            candidate = sibling(config_path, &format!("bak.{stamp}.{attempt}"));
            attempt += 1;
        }
        std::fs::copy(config_path, &candidate)
            .map_err(|e| ReplicadmError::io(&candidate, e))?;
        info!(backup = %candidate.display(), "config backed up");
        Ok(Some(Self { path: candidate }))
    }

    /// Location of the backup file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Copy the backup back over `config_path`.
    pub fn restore(&self, config_path: &Path) -> Result<(), ReplicadmError> {
        std::fs::copy(&self.path, config_path)
            .map_err(|e| ReplicadmError::io(config_path, e))?;
        info!(backup = %self.path.display(), "config restored from backup");
        Ok(())
    }
}

fn sibling(config_path: &Path, suffix: &str) -> PathBuf {
    let name = config_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "mongod.conf".to_string());
    config_path.with_file_name(format!("{name}.{suffix}"))
}

/// Write `contents` to `path` atomically: temp file in the same directory,
/// fsync, rename into place.
pub fn write_atomic(path: &Path, contents: &str) -> Result<(), ReplicadmError> {
    use std::io::Write;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
    let result = (|| {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();
    if let Err(e) = result {
        // Leave no stray temp file behind.
        let _ = std::fs::remove_file(&tmp);
        return Err(ReplicadmError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backup_of_absent_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("mongod.conf");
        assert!(ConfigBackup::create(&config).unwrap().is_none());
    }

    #[test]
    fn test_backup_and_restore_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("mongod.conf");
        std::fs::write(&config, "original contents\n").unwrap();

        let backup = ConfigBackup::create(&config).unwrap().unwrap();
        assert!(backup.path().exists());
        assert!(backup
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("mongod.conf.bak."));

        std::fs::write(&config, "clobbered\n").unwrap();
        backup.restore(&config).unwrap();
        assert_eq!(
            std::fs::read_to_string(&config).unwrap(),
            "original contents\n"
        );
    }

    #[test]
    fn test_same_second_backups_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("mongod.conf");
        std::fs::write(&config, "v1\n").unwrap();

        let first = ConfigBackup::create(&config).unwrap().unwrap();
        let second = ConfigBackup::create(&config).unwrap().unwrap();
        assert_ne!(first.path(), second.path());
        assert!(second.path().exists());
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mongod.conf");
        write_atomic(&path, "first\n").unwrap();
        write_atomic(&path, "second\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "second\n");
        // No temp droppings left in the directory.
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(entries, vec!["mongod.conf".to_string()]);
    }
}
