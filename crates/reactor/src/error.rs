// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error types for the reactor

use std::io;
use thiserror::Error;

/// Errors surfaced by the event loop and watcher registration.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("poller error: {0}")]
    Poll(#[source] io::Error),
    #[error("watcher registration failed: {0}")]
    Register(#[source] io::Error),
    #[error("signal setup failed: {0}")]
    Signal(#[source] io::Error),
}
