// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! File-backed job store: one JSON document per row.
//!
//! Writes go to a temp file in the same directory and are renamed into
//! place, which is the single-row atomicity the scheduler requires.

use crate::{matches, sort_and_clip, JobStore, ListQuery, StoreError};
use loft_core::JobRecord;
use std::fs;
use std::path::{Path, PathBuf};

pub struct FileStore {
    jobs_dir: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let jobs_dir = dir.as_ref().join("jobs");
        fs::create_dir_all(&jobs_dir)?;
        Ok(Self { jobs_dir })
    }

    fn row_path(&self, id: &str) -> PathBuf {
        self.jobs_dir.join(format!("{}.json", id))
    }

    fn write_row(&self, record: &JobRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record)?;
        let tmp = self.jobs_dir.join(format!(".{}.tmp", record.id.as_str()));
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, self.row_path(record.id.as_str()))?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<JobRecord>, StoreError> {
        let mut rows = Vec::new();
        for entry in fs::read_dir(&self.jobs_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match fs::read(&path).map_err(StoreError::from).and_then(|bytes| {
                serde_json::from_slice::<JobRecord>(&bytes).map_err(StoreError::from)
            }) {
                Ok(record) => rows.push(record),
                Err(err) => {
                    // A torn or foreign file must not take down a listing.
                    tracing::warn!(path = %path.display(), error = %err, "skipping unreadable job row");
                }
            }
        }
        Ok(rows)
    }
}

impl JobStore for FileStore {
    fn insert(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.write_row(record)
    }

    fn update(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.write_row(record)
    }

    fn load(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        let path = self.row_path(id);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    fn list(&self, query: &ListQuery) -> Result<Vec<JobRecord>, StoreError> {
        let rows = self.scan()?.into_iter().filter(|r| matches(r, query)).collect();
        Ok(sort_and_clip(rows, query.limit))
    }

    fn daemons_in_flight(&self) -> Result<Vec<JobRecord>, StoreError> {
        Ok(self.scan()?.into_iter().filter(JobRecord::is_restorable_daemon).collect())
    }
}

#[cfg(test)]
#[path = "file_tests.rs"]
mod tests;
