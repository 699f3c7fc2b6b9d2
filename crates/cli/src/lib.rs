// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! loft: operational command surface for the worker subsystem.

pub mod commands;
pub mod exit_error;
pub mod output;

pub use commands::worker::{handle, WorkerArgs, WorkerCommand, WorkerCtx};
pub use exit_error::ExitError;
