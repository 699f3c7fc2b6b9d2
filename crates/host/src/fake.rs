// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scriptable fakes for the host capabilities.
//!
//! `FakeEngine` stands in for a real scripting engine in tests: the
//! "script" is a Rust closure that drives the bound host functions the
//! way evaluated handler code would, with the same interrupt check
//! between steps.

use crate::adapters::{JobSpawner, KvAdapter, ReadError, SourceReader};
use crate::script::{
    EngineError, EngineFactory, HostError, HostFn, HostValue, InterruptHandle, ScriptEngine,
};
use loft_core::{JobRecord, JobStatus, TenantId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

type Behavior = Arc<dyn Fn(&mut FakeRun<'_>) -> Result<HostValue, EngineError> + Send + Sync>;

/// Factory whose engines run a single scripted behavior.
///
/// Tests that serve several handlers dispatch on [`FakeRun::source`].
#[derive(Clone)]
pub struct FakeFactory {
    behavior: Behavior,
}

impl FakeFactory {
    pub fn new(
        behavior: impl Fn(&mut FakeRun<'_>) -> Result<HostValue, EngineError> + Send + Sync + 'static,
    ) -> Self {
        Self { behavior: Arc::new(behavior) }
    }

    /// Engines that immediately return the given value.
    pub fn returning(value: HostValue) -> Self {
        Self::new(move |_| Ok(value.clone()))
    }

    /// Engines that immediately fail with a script error.
    pub fn failing(message: &str) -> Self {
        let message = message.to_string();
        Self::new(move |_| Err(EngineError::Script(message.clone())))
    }
}

impl EngineFactory for FakeFactory {
    type Engine = FakeEngine;

    fn create(&self) -> Result<FakeEngine, EngineError> {
        Ok(FakeEngine {
            values: HashMap::new(),
            fns: HashMap::new(),
            interrupt: InterruptHandle::new(),
            behavior: self.behavior.clone(),
        })
    }
}

pub struct FakeEngine {
    values: HashMap<(String, String), HostValue>,
    fns: HashMap<(String, String), HostFn>,
    interrupt: InterruptHandle,
    behavior: Behavior,
}

impl ScriptEngine for FakeEngine {
    fn bind_value(&mut self, namespace: &str, name: &str, value: HostValue) {
        self.values.insert((namespace.to_string(), name.to_string()), value);
    }

    fn bind_fn(&mut self, namespace: &str, name: &str, f: HostFn) {
        self.fns.insert((namespace.to_string(), name.to_string()), f);
    }

    fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    fn eval(&mut self, source: &str) -> Result<HostValue, EngineError> {
        if self.interrupt.fired() {
            return Err(EngineError::Interrupted);
        }
        let behavior = self.behavior.clone();
        let mut run = FakeRun { engine: self, source };
        behavior(&mut run)
    }
}

/// The view a scripted behavior gets of its engine, mirroring what
/// evaluated handler code can reach.
pub struct FakeRun<'a> {
    engine: &'a mut FakeEngine,
    source: &'a str,
}

impl FakeRun<'_> {
    pub fn source(&self) -> &str {
        self.source
    }

    /// A value bound by the host, e.g. `("job", "attempt")`.
    pub fn value(&self, namespace: &str, name: &str) -> Option<HostValue> {
        self.engine.values.get(&(namespace.to_string(), name.to_string())).cloned()
    }

    /// Call a bound host function, checking the interrupt first the way a
    /// real engine checks between evaluation steps. A raised [`HostError`]
    /// becomes an uncaught script exception.
    pub fn call(
        &mut self,
        namespace: &str,
        name: &str,
        args: &[HostValue],
    ) -> Result<HostValue, EngineError> {
        if self.engine.interrupt.fired() {
            return Err(EngineError::Interrupted);
        }
        let f = self
            .engine
            .fns
            .get(&(namespace.to_string(), name.to_string()))
            .ok_or_else(|| EngineError::Script(format!("no host fn {}.{}", namespace, name)))?;
        f(args).map_err(|e| EngineError::Script(e.to_string()))
    }

    pub fn interrupted(&self) -> bool {
        self.engine.interrupt.fired()
    }
}

/// Source reader over an in-memory path → source map.
#[derive(Default)]
pub struct FakeReader {
    sources: Mutex<HashMap<(String, String), String>>,
}

impl FakeReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, tenant: &str, path: &str, source: &str) {
        self.sources
            .lock()
            .insert((tenant.to_string(), path.to_string()), source.to_string());
    }
}

impl SourceReader for FakeReader {
    fn read(&self, tenant: &TenantId, path: &str) -> Result<String, ReadError> {
        self.sources
            .lock()
            .get(&(tenant.as_str().to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| ReadError::NotFound(path.to_string()))
    }
}

/// Tenant-scoped in-memory key-value store.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<(String, String), HostValue>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvAdapter for MemoryKv {
    fn get(&self, tenant: &TenantId, key: &str) -> Result<Option<HostValue>, HostError> {
        Ok(self
            .entries
            .lock()
            .get(&(tenant.as_str().to_string(), key.to_string()))
            .cloned())
    }

    fn put(&self, tenant: &TenantId, key: &str, value: HostValue) -> Result<(), HostError> {
        self.entries
            .lock()
            .insert((tenant.as_str().to_string(), key.to_string()), value);
        Ok(())
    }

    fn delete(&self, tenant: &TenantId, key: &str) -> Result<(), HostError> {
        self.entries.lock().remove(&(tenant.as_str().to_string(), key.to_string()));
        Ok(())
    }

    fn list(&self, tenant: &TenantId, prefix: &str) -> Result<Vec<String>, HostError> {
        let mut keys: Vec<String> = self
            .entries
            .lock()
            .keys()
            .filter(|(t, k)| t == tenant.as_str() && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Records spawn/cancel calls and serves canned job records.
#[derive(Default)]
pub struct FakeSpawner {
    pub spawned: Mutex<Vec<(String, String, HostValue)>>,
    pub cancelled: Mutex<Vec<String>>,
    records: Mutex<HashMap<String, JobRecord>>,
}

impl FakeSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_record(&self, record: JobRecord) {
        self.records.lock().insert(record.id.as_str().to_string(), record);
    }
}

impl JobSpawner for FakeSpawner {
    fn spawn(
        &self,
        tenant: &TenantId,
        handler: &str,
        config: &HostValue,
    ) -> Result<JobRecord, HostError> {
        self.spawned.lock().push((
            tenant.as_str().to_string(),
            handler.to_string(),
            config.clone(),
        ));
        let record = JobRecord::builder()
            .tenant_id(tenant.clone())
            .handler(handler)
            .build();
        self.put_record(record.clone());
        Ok(record)
    }

    fn get(&self, _tenant: &TenantId, id: &str) -> Result<Option<JobRecord>, HostError> {
        Ok(self.records.lock().get(id).cloned())
    }

    fn list(
        &self,
        tenant: &TenantId,
        status: Option<JobStatus>,
        limit: usize,
    ) -> Result<Vec<JobRecord>, HostError> {
        let mut rows: Vec<JobRecord> = self
            .records
            .lock()
            .values()
            .filter(|r| r.tenant_id == *tenant && status.map_or(true, |s| r.status == s))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        if limit > 0 {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn cancel(&self, _tenant: &TenantId, id: &str) -> Result<bool, HostError> {
        self.cancelled.lock().push(id.to_string());
        Ok(self.records.lock().contains_key(id))
    }
}
