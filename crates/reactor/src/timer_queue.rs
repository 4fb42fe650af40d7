// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer deadline bookkeeping for the event loop.

use mio::Token;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Timer entry
#[derive(Debug, Clone)]
struct Timer {
    fires_at: Instant,
    repeat: Option<Duration>,
}

/// Tracks the deadline (and optional repeat interval) of every armed timer
/// watcher, keyed by its loop token.
#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    timers: HashMap<Token, Timer>,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Arm a timer. Replaces any previous deadline for the token.
    pub(crate) fn set(
        &mut self,
        token: Token,
        after: Duration,
        repeat: Option<Duration>,
        now: Instant,
    ) {
        let fires_at = now + after;
        self.timers.insert(token, Timer { fires_at, repeat });
    }

    /// Disarm a timer.
    pub(crate) fn cancel(&mut self, token: Token) {
        self.timers.remove(&token);
    }

    pub(crate) fn contains(&self, token: Token) -> bool {
        self.timers.contains_key(&token)
    }

    /// Tokens of all timers due at `now`, earliest deadline first.
    ///
    /// Repeating timers are rescheduled at `now + repeat`; one-shot timers
    /// leave the queue.
    pub(crate) fn fired(&mut self, now: Instant) -> Vec<Token> {
        let mut due: Vec<(Instant, Token)> = self
            .timers
            .iter()
            .filter(|(_, timer)| timer.fires_at <= now)
            .map(|(token, timer)| (timer.fires_at, *token))
            .collect();
        due.sort_by_key(|(fires_at, token)| (*fires_at, token.0));

        for (_, token) in &due {
            match self.timers.get_mut(token).and_then(|t| t.repeat) {
                Some(repeat) => {
                    if let Some(timer) = self.timers.get_mut(token) {
                        timer.fires_at = now + repeat;
                    }
                }
                None => {
                    self.timers.remove(token);
                }
            }
        }

        due.into_iter().map(|(_, token)| token).collect()
    }

    /// Get the next timer fire time
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.fires_at).min()
    }
}

#[cfg(test)]
#[path = "timer_queue_tests.rs"]
mod tests;
