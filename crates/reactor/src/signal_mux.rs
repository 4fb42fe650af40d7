// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process signal multiplexing for the event loop.
//!
//! A single `signal-hook` source feeds every signal watcher on the loop.
//! The source is created lazily on the first signal subscription and
//! registered with the poller under a reserved token; fired signums fan out
//! to the subscribed watcher tokens.

use std::collections::HashMap;

use mio::{Interest, Registry, Token};
use signal_hook_mio::v1_0::Signals;

use crate::error::LoopError;

#[derive(Default)]
pub(crate) struct SignalMux {
    source: Option<Signals>,
    subs: HashMap<i32, Vec<Token>>,
}

impl SignalMux {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Create and register the signal source if it does not exist yet.
    pub(crate) fn ensure_source(
        &mut self,
        registry: &Registry,
        token: Token,
    ) -> Result<(), LoopError> {
        if self.source.is_some() {
            return Ok(());
        }
        let mut source = Signals::new(std::iter::empty::<i32>()).map_err(LoopError::Signal)?;
        registry
            .register(&mut source, token, Interest::READABLE)
            .map_err(LoopError::Signal)?;
        self.source = Some(source);
        Ok(())
    }

    /// Route `signum` to `token`. Installs the process-wide handler for the
    /// signum on first subscription.
    pub(crate) fn subscribe(&mut self, signum: i32, token: Token) -> Result<(), LoopError> {
        let Some(source) = self.source.as_mut() else {
            return Err(LoopError::Signal(std::io::Error::other(
                "signal source not initialized",
            )));
        };
        source.add_signal(signum).map_err(LoopError::Signal)?;
        self.subs.entry(signum).or_default().push(token);
        tracing::debug!(signum, token = token.0, "signal subscribed");
        Ok(())
    }

    /// Stop routing `signum` to `token`.
    ///
    /// signal-hook has no per-signal unregister, so the process-wide handler
    /// stays installed; signums with no subscribers are simply discarded on
    /// arrival.
    pub(crate) fn unsubscribe(&mut self, signum: i32, token: Token) {
        if let Some(tokens) = self.subs.get_mut(&signum) {
            tokens.retain(|t| *t != token);
            if tokens.is_empty() {
                self.subs.remove(&signum);
            }
        }
    }

    /// Drain the signums that arrived since the last poll wake-up.
    pub(crate) fn drain_pending(&mut self) -> Vec<i32> {
        match self.source.as_mut() {
            Some(source) => source.pending().collect(),
            None => Vec::new(),
        }
    }

    /// Watcher tokens subscribed to `signum`.
    pub(crate) fn subscribers(&self, signum: i32) -> &[Token] {
        self.subs.get(&signum).map(Vec::as_slice).unwrap_or(&[])
    }
}
