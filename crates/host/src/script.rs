// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scripting-engine contract.
//!
//! An engine is constructed per dispatched attempt, has host values and
//! functions bound onto it, evaluates one module source, and can be told
//! to abandon evaluation at the next step via the interrupt handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Values crossing the engine boundary are plain JSON.
pub type HostValue = serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The interrupt fired; evaluation was abandoned mid-step.
    #[error("evaluation interrupted")]
    Interrupted,
    /// The script threw, or the source failed to evaluate.
    #[error("{0}")]
    Script(String),
}

/// Error raised from a host function into the running script.
///
/// Engines surface it as a catchable script exception; an uncaught one
/// ends evaluation as [`EngineError::Script`].
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A host function callable from script code.
pub type HostFn = Box<dyn Fn(&[HostValue]) -> Result<HostValue, HostError> + Send + 'static>;

/// Shared flag that tells an engine to stop at its next evaluation step.
#[derive(Clone, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn fired(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// One isolated engine instance.
///
/// Engines are single-threaded and evaluated on a blocking thread; nothing
/// is shared between instances, so a `Send` bound is all that is needed.
pub trait ScriptEngine: Send + 'static {
    /// Bind a plain value under `namespace.name`.
    fn bind_value(&mut self, namespace: &str, name: &str, value: HostValue);

    /// Bind a host function under `namespace.name`.
    fn bind_fn(&mut self, namespace: &str, name: &str, f: HostFn);

    /// Handle that makes the next evaluation step fail with
    /// [`EngineError::Interrupted`].
    fn interrupt_handle(&self) -> InterruptHandle;

    /// Evaluate the module source.
    ///
    /// If the module exports a function, the engine invokes it with the
    /// bound `job` namespace as its argument; otherwise the exported value
    /// is returned as-is.
    fn eval(&mut self, source: &str) -> Result<HostValue, EngineError>;
}

/// Constructs isolated engines, one per dispatched attempt.
pub trait EngineFactory: Send + Sync + 'static {
    type Engine: ScriptEngine;

    fn create(&self) -> Result<Self::Engine, EngineError>;
}
