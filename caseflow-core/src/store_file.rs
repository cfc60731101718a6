use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tempfile::NamedTempFile;

use crate::store::CaseStore;
use crate::types::{CaseId, CaseState};

/// File-backed `CaseStore`: one JSON document per case.
///
/// `put` writes to a temporary file in the same directory and renames it
/// over the target, which gives the atomic-replace guarantee the engine
/// relies on (a crash mid-write leaves the previous snapshot intact).
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating snapshot directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn case_path(&self, case_id: CaseId) -> PathBuf {
        self.dir.join(format!("{case_id}.json"))
    }

    fn write_atomic(&self, target: &Path, bytes: &[u8]) -> Result<()> {
        let mut tmp = NamedTempFile::new_in(&self.dir)
            .with_context(|| format!("creating temp file in {}", self.dir.display()))?;
        tmp.write_all(bytes).context("writing snapshot bytes")?;
        tmp.as_file().sync_all().context("syncing snapshot")?;
        tmp.persist(target)
            .with_context(|| format!("replacing {}", target.display()))?;
        Ok(())
    }
}

#[async_trait]
impl CaseStore for FileStore {
    async fn put(&self, state: &CaseState) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(state).context("serializing snapshot")?;
        self.write_atomic(&self.case_path(state.case_id), &bytes)
    }

    async fn get(&self, case_id: CaseId) -> Result<Option<CaseState>> {
        let target = self.case_path(case_id);
        let bytes = match fs::read(&target) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("reading {}", target.display()));
            }
        };
        let state = serde_json::from_slice(&bytes)
            .with_context(|| format!("decoding {}", target.display()))?;
        Ok(Some(state))
    }

    async fn delete(&self, case_id: CaseId) -> Result<()> {
        let target = self.case_path(case_id);
        match fs::remove_file(&target) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("deleting {}", target.display())),
        }
    }
}
