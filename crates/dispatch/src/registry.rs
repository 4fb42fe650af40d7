// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-target watcher sequences and the reuse scan.

use std::os::fd::RawFd;

use gale_core::Clock;
use gale_reactor::{IoWatcher, SignalWatcher, TimerWatcher};

/// A watcher of any kind, as stored in a target's sequence.
pub(crate) enum AnyWatcher<C: Clock> {
    Timer(TimerWatcher<C>),
    Io(IoWatcher<C>),
    Signal(SignalWatcher<C>),
}

impl<C: Clock> AnyWatcher<C> {
    pub(crate) fn is_active(&self) -> bool {
        match self {
            AnyWatcher::Timer(w) => w.is_active(),
            AnyWatcher::Io(w) => w.is_active(),
            AnyWatcher::Signal(w) => w.is_active(),
        }
    }

    pub(crate) fn stop(&self) {
        match self {
            AnyWatcher::Timer(w) => w.stop(),
            AnyWatcher::Io(w) => w.stop(),
            AnyWatcher::Signal(w) => w.stop(),
        }
    }

    pub(crate) fn rearm(&self) -> bool {
        match self {
            AnyWatcher::Timer(w) => w.rearm(),
            AnyWatcher::Io(w) => w.rearm(),
            AnyWatcher::Signal(w) => w.rearm(),
        }
    }
}

/// Insertion-ordered watcher sequence of one target.
///
/// The reuse scan keeps the sequence at one timer, one io watcher per fd
/// and one signal watcher per signum.
pub(crate) struct WatcherSet<C: Clock> {
    watchers: Vec<AnyWatcher<C>>,
}

impl<C: Clock> Default for WatcherSet<C> {
    fn default() -> Self {
        Self {
            watchers: Vec::new(),
        }
    }
}

impl<C: Clock> WatcherSet<C> {
    pub(crate) fn push(&mut self, watcher: AnyWatcher<C>) {
        self.watchers.push(watcher);
    }

    pub(crate) fn len(&self) -> usize {
        self.watchers.len()
    }

    /// First timer watcher in insertion order; any timer is compatible.
    pub(crate) fn timer(&self) -> Option<&TimerWatcher<C>> {
        self.watchers.iter().find_map(|w| match w {
            AnyWatcher::Timer(timer) => Some(timer),
            _ => None,
        })
    }

    /// First io watcher bound to `fd`, or one that was never bound.
    pub(crate) fn io_for(&self, fd: RawFd) -> Option<&IoWatcher<C>> {
        self.watchers.iter().find_map(|w| match w {
            AnyWatcher::Io(io) if io.fileno() == fd || io.fileno() < 0 => Some(io),
            _ => None,
        })
    }

    /// First signal watcher for `signum`, or one that was never bound.
    pub(crate) fn signal_for(&self, signum: i32) -> Option<&SignalWatcher<C>> {
        self.watchers.iter().find_map(|w| match w {
            AnyWatcher::Signal(sig) if sig.signum() == signum || sig.signum() < 0 => Some(sig),
            _ => None,
        })
    }

    pub(crate) fn any_active(&self) -> bool {
        self.watchers.iter().any(AnyWatcher::is_active)
    }

    pub(crate) fn stop_all(&self) {
        for watcher in &self.watchers {
            watcher.stop();
        }
    }

    /// Arm every watcher that is currently inactive.
    pub(crate) fn rearm_inactive(&self) {
        for watcher in &self.watchers {
            if !watcher.is_active() {
                watcher.rearm();
            }
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
