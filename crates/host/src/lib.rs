// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! loft-host: the capability seams between the worker pool and its host.
//!
//! The scheduler core never talks to a scripting engine, the tenant file
//! tree, or the listener registry directly; it consumes the small traits
//! defined here, and the host supplies implementations at wiring time.

pub mod adapters;
pub mod executor;
pub mod script;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use adapters::{JobSpawner, KvAdapter, ReadError, SourceReader};
pub use executor::{ExecError, Executor, JobExecutor};
pub use script::{EngineError, EngineFactory, HostError, HostFn, HostValue, InterruptHandle, ScriptEngine};

#[cfg(any(test, feature = "test-support"))]
pub use fake::{FakeEngine, FakeFactory, FakeReader, FakeRun, FakeSpawner, MemoryKv};
