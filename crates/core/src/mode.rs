// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Run and break modes for the event loop.

/// How a `run` call drives the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    /// Run until a break is requested or no pending work remains.
    #[default]
    Default,
    /// Process one batch of events (blocking for it if necessary) and return.
    Once,
    /// Process whatever is already ready and return immediately.
    NoWait,
}

/// How a `stop` call unwinds `run` frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakMode {
    /// Unset a pending break request.
    Cancel,
    /// Exit the innermost `run` frame.
    One,
    /// Exit all nested `run` frames.
    All,
}
