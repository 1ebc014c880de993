//! Durable per-file status ledger.
//!
//! The whole ledger lives in one JSON document. Every mutation is applied to
//! a copy of the in-memory state, written to a sibling temporary file, synced
//! and renamed over the ledger file, and the directory is synced; only then
//! does the in-memory state change. A crash therefore leaves either the old or the new document on
//! disk, never a torn one.
//!
//! Mutations are serialized by a single async mutex. Updates to different
//! records never lose each other; updates to the same record are applied in
//! lock-acquisition order.

mod error;

use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
};

use data_model::{FileId, JobId, StoredFile};
pub use error::{LedgerError, LedgerResult};
use serde::{Deserialize, Serialize};
use tokio::{io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, info};

#[derive(Default, Serialize, Deserialize)]
struct LedgerDocument {
    files: Vec<StoredFile>,
}

#[derive(Default, Clone)]
struct LedgerState {
    files: BTreeMap<FileId, StoredFile>,
    by_job: HashMap<JobId, FileId>,
}

impl LedgerState {
    fn insert(&mut self, record: StoredFile) -> LedgerResult<()> {
        if let Some(job_id) = &record.job_id {
            match self.by_job.get(job_id) {
                Some(owner) if owner != &record.id => {
                    return Err(LedgerError::JobIdInUse {
                        job_id: job_id.clone(),
                        file_id: owner.clone(),
                    });
                }
                _ => {
                    self.by_job.insert(job_id.clone(), record.id.clone());
                }
            }
        }
        self.files.insert(record.id.clone(), record);
        Ok(())
    }

    fn document(&self) -> LedgerDocument {
        LedgerDocument {
            files: self.files.values().cloned().collect(),
        }
    }
}

pub struct FileLedger {
    path: PathBuf,
    state: Mutex<LedgerState>,
}

impl FileLedger {
    /// Opens the ledger at `path`, starting empty when the file does not
    /// exist yet.
    pub async fn open(path: impl AsRef<Path>) -> LedgerResult<Self> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source: std::io::Error| LedgerError::Io {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let mut state = LedgerState::default();
        match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let document: LedgerDocument =
                    serde_json::from_slice(&bytes).map_err(|source| LedgerError::Decode {
                        path: path.clone(),
                        source,
                    })?;
                for record in document.files {
                    record.check_invariants()?;
                    if state.files.contains_key(&record.id) {
                        return Err(LedgerError::Duplicate(record.id));
                    }
                    state.insert(record)?;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(err)),
        }

        info!(path = %path.display(), records = state.files.len(), "opened file ledger");
        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Adds a new record. Fails on a duplicate id.
    pub async fn create(&self, record: StoredFile) -> LedgerResult<StoredFile> {
        record.check_invariants()?;
        let mut state = self.state.lock().await;
        if state.files.contains_key(&record.id) {
            return Err(LedgerError::Duplicate(record.id));
        }

        let mut next = state.clone();
        next.insert(record.clone())?;
        self.persist(&next).await?;
        *state = next;
        debug!(file_id = record.id.get(), "created ledger record");
        Ok(record)
    }

    pub async fn get(&self, id: &FileId) -> Option<StoredFile> {
        self.state.lock().await.files.get(id).cloned()
    }

    pub async fn get_by_job(&self, job_id: &JobId) -> Option<StoredFile> {
        let state = self.state.lock().await;
        state
            .by_job
            .get(job_id)
            .and_then(|id| state.files.get(id))
            .cloned()
    }

    pub async fn list(&self) -> Vec<StoredFile> {
        self.state.lock().await.files.values().cloned().collect()
    }

    /// Applies `mutate` to the current record and stores the result.
    ///
    /// The mutated record must be a legal successor of the current one
    /// (see [`StoredFile::check_transition`]); otherwise nothing is written.
    pub async fn update<F>(&self, id: &FileId, mutate: F) -> LedgerResult<StoredFile>
    where
        F: FnOnce(&mut StoredFile),
    {
        let mut state = self.state.lock().await;
        let current = state
            .files
            .get(id)
            .ok_or_else(|| LedgerError::NotFound(id.clone()))?;

        let mut updated = current.clone();
        mutate(&mut updated);
        current.check_transition(&updated)?;
        if &updated == current {
            return Ok(updated);
        }

        let mut next = state.clone();
        next.insert(updated.clone())?;
        self.persist(&next).await?;
        *state = next;
        debug!(
            file_id = id.get(),
            status = %updated.status,
            "updated ledger record"
        );
        Ok(updated)
    }

    async fn persist(&self, state: &LedgerState) -> LedgerResult<()> {
        let bytes = serde_json::to_vec_pretty(&state.document())
            .map_err(|source| LedgerError::Encode { source })?;

        let tmp_path = self.path.with_extension("json.tmp");
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| LedgerError::Io { path, source }
        };

        let mut file = tokio::fs::File::create(&tmp_path)
            .await
            .map_err(io_err(&tmp_path))?;
        file.write_all(&bytes).await.map_err(io_err(&tmp_path))?;
        file.sync_all().await.map_err(io_err(&tmp_path))?;
        drop(file);

        tokio::fs::rename(&tmp_path, &self.path)
            .await
            .map_err(io_err(&self.path))?;

        // The rename is only durable once the directory entry is synced.
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        tokio::fs::File::open(dir)
            .await
            .map_err(io_err(dir))?
            .sync_all()
            .await
            .map_err(io_err(dir))?;
        Ok(())
    }
}
