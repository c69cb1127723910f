//! Run state persisted between invocations: the watermark and the folders still
//! waiting for a successful sync.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{IntakeError, Result};
use crate::mail::parse_timestamp;
use crate::paths::ModifiedFolders;
use crate::store::write_atomic;

#[derive(Debug, Serialize, Deserialize)]
struct LastRunFile {
    last_run: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ModifiedFile {
    folders: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunState {
    /// `None` on the very first run.
    pub last_run: Option<DateTime<Utc>>,
    pub modified: ModifiedFolders,
}

#[derive(Debug, Clone)]
pub struct RunStateStore {
    run_state_file: PathBuf,
    modified_file: PathBuf,
}

impl RunStateStore {
    pub fn new(run_state_file: impl Into<PathBuf>, modified_file: impl Into<PathBuf>) -> Self {
        Self {
            run_state_file: run_state_file.into(),
            modified_file: modified_file.into(),
        }
    }

    /// Missing files mean a first run. Unreadable ones are logged and treated the same way.
    pub fn load(&self) -> Result<RunState> {
        Ok(RunState {
            last_run: self.load_watermark()?,
            modified: self.load_modified()?,
        })
    }

    fn load_watermark(&self) -> Result<Option<DateTime<Utc>>> {
        let path = &self.run_state_file;
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|e| IntakeError::io(path, e))?;
        let parsed = serde_json::from_str::<LastRunFile>(&contents)
            .ok()
            .and_then(|f| parse_timestamp(&f.last_run));
        if parsed.is_none() {
            warn!(path = %path.display(), "unreadable run-state file, treating this as a first run");
        }
        Ok(parsed)
    }

    fn load_modified(&self) -> Result<ModifiedFolders> {
        let path = &self.modified_file;
        if !path.exists() {
            return Ok(ModifiedFolders::new());
        }
        let contents = std::fs::read_to_string(path).map_err(|e| IntakeError::io(path, e))?;
        match serde_json::from_str::<ModifiedFile>(&contents) {
            Ok(file) => Ok(file.folders.into_iter().collect()),
            Err(e) => {
                let backup = backup_path(path);
                warn!(
                    path = %path.display(),
                    backup = %backup.display(),
                    error = %e,
                    "unreadable modified-folder file, keeping a backup and starting empty"
                );
                std::fs::rename(path, &backup).map_err(|e| IntakeError::io(path, e))?;
                Ok(ModifiedFolders::new())
            }
        }
    }

    pub fn save_watermark(&self, at: DateTime<Utc>) -> Result<()> {
        let file = LastRunFile {
            last_run: at.to_rfc3339(),
        };
        self.write_json(&self.run_state_file, &file)
    }

    pub fn save_modified(&self, modified: &ModifiedFolders) -> Result<()> {
        let file = ModifiedFile {
            folders: modified.iter().cloned().collect(),
        };
        self.write_json(&self.modified_file, &file)
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_vec_pretty(value)
            .map_err(|e| IntakeError::io(path, std::io::Error::other(e)))?;
        write_atomic(path, &json)
    }
}

/// `modified_folders.json` -> `modified_folders.json.bak`
fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Next watermark: now, unless a previous one lies in the future.
pub fn advance_watermark(previous: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if prev > now => prev,
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn store(dir: &std::path::Path) -> RunStateStore {
        RunStateStore::new(dir.join("last_run.json"), dir.join("modified_folders.json"))
    }

    #[test]
    fn test_first_run_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = store(dir.path()).load().unwrap();
        assert!(state.last_run.is_none());
        assert!(state.modified.is_empty());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let at = Utc.with_ymd_and_hms(2024, 3, 2, 14, 5, 0).unwrap();
        let modified: ModifiedFolders = vec!["Applicants/USA/Other/Jane: --".to_string()]
            .into_iter()
            .collect();

        store.save_watermark(at).unwrap();
        store.save_modified(&modified).unwrap();

        let state = store.load().unwrap();
        assert_eq!(state.last_run, Some(at));
        assert_eq!(state.modified, modified);

        let raw = std::fs::read_to_string(dir.path().join("modified_folders.json")).unwrap();
        assert!(raw.contains("\"folders\""));
    }

    #[test]
    fn test_reads_offset_with_microseconds() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("last_run.json"),
            r#"{"last_run": "2024-03-02T14:05:00.123456+00:00"}"#,
        )
        .unwrap();
        let state = store(dir.path()).load().unwrap();
        assert!(state.last_run.is_some());
    }

    #[test]
    fn test_corrupt_run_state_is_first_run() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("last_run.json"), "not json").unwrap();
        std::fs::write(dir.path().join("modified_folders.json"), "{").unwrap();
        let state = store(dir.path()).load().unwrap();
        assert!(state.last_run.is_none());
        assert!(state.modified.is_empty());
    }

    #[test]
    fn test_unreadable_modified_file_is_kept_as_backup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("modified_folders.json");
        std::fs::write(&path, r#"{"folders": ["Applicants/USA/Other/Jane: --""#).unwrap();

        let store = store(dir.path());
        assert!(store.load().unwrap().modified.is_empty());
        assert!(!path.exists());
        store.save_modified(&ModifiedFolders::new()).unwrap();

        let backup = std::fs::read_to_string(dir.path().join("modified_folders.json.bak")).unwrap();
        assert!(backup.contains("Applicants/USA/Other/Jane: --"));
    }

    #[test]
    fn test_watermark_never_regresses() {
        let now = Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap();
        let future = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        let past = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(advance_watermark(None, now), now);
        assert_eq!(advance_watermark(Some(past), now), now);
        assert_eq!(advance_watermark(Some(future), now), future);
    }
}
