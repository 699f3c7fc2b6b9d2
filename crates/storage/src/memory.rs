// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory job store for tests.

use crate::{matches, sort_and_clip, JobStore, ListQuery, StoreError};
use loft_core::JobRecord;
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<String, JobRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows ever inserted and still present.
    pub fn row_count(&self) -> usize {
        self.rows.lock().len()
    }
}

impl JobStore for MemoryStore {
    fn insert(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.rows.lock().insert(record.id.as_str().to_string(), record.clone());
        Ok(())
    }

    fn update(&self, record: &JobRecord) -> Result<(), StoreError> {
        self.rows.lock().insert(record.id.as_str().to_string(), record.clone());
        Ok(())
    }

    fn load(&self, id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.rows.lock().get(id).cloned())
    }

    fn list(&self, query: &ListQuery) -> Result<Vec<JobRecord>, StoreError> {
        let rows =
            self.rows.lock().values().filter(|r| matches(r, query)).cloned().collect();
        Ok(sort_and_clip(rows, query.limit))
    }

    fn daemons_in_flight(&self) -> Result<Vec<JobRecord>, StoreError> {
        Ok(self
            .rows
            .lock()
            .values()
            .filter(|r| r.is_restorable_daemon())
            .cloned()
            .collect())
    }
}
