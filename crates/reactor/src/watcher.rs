// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watchers: one registration with the event loop per event source.
//!
//! Each watcher owns at most one live registration. `start` stops any
//! current registration, applies the new parameters and arms the watcher,
//! returning whether it is active afterwards; invalid parameters (negative
//! fd, negative signum, negative timer delay, empty io mask) leave it
//! unarmed. `rearm` arms again with the stored parameters, which is what
//! the dispatcher's enable path uses after a delivery.

use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use gale_core::{Clock, Revents, SystemClock};
use mio::Token;

use crate::event_loop::EventLoop;

/// Callback invoked with the fired event mask.
pub(crate) type Callback = Rc<RefCell<dyn FnMut(Revents)>>;

/// Registration state shared between a watcher and its loop slot, so the
/// loop can deactivate a fired one-shot without reaching into the watcher.
#[derive(Default)]
pub(crate) struct WatcherState {
    pub(crate) token: Cell<Option<Token>>,
}

/// Timer deadlines clamp far below `Instant` overflow.
const MAX_TIMER_SECS: f64 = 86_400.0 * 365.0 * 30.0;

fn seconds(value: f64) -> Option<Duration> {
    if value < 0.0 || value.is_nan() {
        return None;
    }
    Some(Duration::from_secs_f64(value.min(MAX_TIMER_SECS)))
}

struct WatcherBase<C: Clock> {
    ev: EventLoop<C>,
    state: Rc<WatcherState>,
    cb: Callback,
}

impl<C: Clock> WatcherBase<C> {
    fn new(ev: &EventLoop<C>, cb: impl FnMut(Revents) + 'static) -> Self {
        Self {
            ev: ev.clone(),
            state: Rc::new(WatcherState::default()),
            cb: Rc::new(RefCell::new(cb)),
        }
    }

    fn is_active(&self) -> bool {
        self.state.token.get().is_some()
    }

    fn stop(&self) {
        if let Some(token) = self.state.token.take() {
            self.ev.deregister(token);
        }
    }
}

impl<C: Clock> Drop for WatcherBase<C> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fires after a delay, then optionally on a repeat interval.
pub struct TimerWatcher<C: Clock = SystemClock> {
    base: WatcherBase<C>,
    after: Cell<f64>,
    repeat: Cell<f64>,
}

impl<C: Clock> TimerWatcher<C> {
    pub fn new(ev: &EventLoop<C>, cb: impl FnMut(Revents) + 'static) -> Self {
        Self {
            base: WatcherBase::new(ev, cb),
            after: Cell::new(-1.0),
            repeat: Cell::new(0.0),
        }
    }

    pub fn is_active(&self) -> bool {
        self.base.is_active()
    }

    /// Arm to fire once after `after` seconds, then every `repeat` seconds
    /// (0 = one-shot). Negative `after` normalises to -1 (do not arm),
    /// negative `repeat` to 0.
    pub fn start(&self, after: f64, repeat: f64) -> bool {
        self.base.stop();
        self.after.set(if after < 0.0 { -1.0 } else { after });
        self.repeat.set(if repeat < 0.0 { 0.0 } else { repeat });
        self.rearm()
    }

    /// Arm again with the stored delay and repeat.
    pub fn rearm(&self) -> bool {
        self.base.stop();
        let Some(after) = seconds(self.after.get()) else {
            return false;
        };
        let repeat = seconds(self.repeat.get()).filter(|d| !d.is_zero());
        let token = self.base.ev.register_timer(
            Rc::clone(&self.base.cb),
            Rc::clone(&self.base.state),
            after,
            repeat,
        );
        self.base.state.token.set(Some(token));
        true
    }

    /// Deregister if active; idempotent.
    pub fn stop(&self) {
        self.base.stop();
    }
}

/// Fires on fd readiness.
pub struct IoWatcher<C: Clock = SystemClock> {
    base: WatcherBase<C>,
    fd: Cell<RawFd>,
    events: Cell<Revents>,
}

impl<C: Clock> IoWatcher<C> {
    pub fn new(ev: &EventLoop<C>, cb: impl FnMut(Revents) + 'static) -> Self {
        Self {
            base: WatcherBase::new(ev, cb),
            fd: Cell::new(-1),
            events: Cell::new(Revents::empty()),
        }
    }

    pub fn is_active(&self) -> bool {
        self.base.is_active()
    }

    /// Arm for readiness on `fd`; `events` is a READ/WRITE mask. A negative
    /// fd or an empty mask leaves the watcher unarmed.
    pub fn start(&self, fd: RawFd, events: Revents) -> bool {
        self.base.stop();
        let events = events.io_bits();
        if fd < 0 || events.is_empty() {
            return false;
        }
        self.fd.set(fd);
        self.events.set(events);
        self.rearm()
    }

    /// Arm again with the stored fd and readiness mask.
    pub fn rearm(&self) -> bool {
        self.base.stop();
        let fd = self.fd.get();
        let events = self.events.get();
        if fd < 0 || events.is_empty() {
            return false;
        }
        match self.base.ev.register_io(
            Rc::clone(&self.base.cb),
            Rc::clone(&self.base.state),
            fd,
            events,
        ) {
            Ok(token) => {
                self.base.state.token.set(Some(token));
                true
            }
            Err(error) => {
                tracing::warn!(fd, %error, "io watcher registration failed");
                false
            }
        }
    }

    pub fn stop(&self) {
        self.base.stop();
    }

    /// The bound fd, or -1 when never bound.
    pub fn fileno(&self) -> RawFd {
        self.fd.get()
    }
}

/// Fires when a process signal arrives.
pub struct SignalWatcher<C: Clock = SystemClock> {
    base: WatcherBase<C>,
    signum: Cell<i32>,
}

impl<C: Clock> SignalWatcher<C> {
    pub fn new(ev: &EventLoop<C>, cb: impl FnMut(Revents) + 'static) -> Self {
        Self {
            base: WatcherBase::new(ev, cb),
            signum: Cell::new(-1),
        }
    }

    pub fn is_active(&self) -> bool {
        self.base.is_active()
    }

    /// Arm for `signum`. A negative signum leaves the watcher unarmed.
    pub fn start(&self, signum: i32) -> bool {
        self.base.stop();
        if signum < 0 {
            return false;
        }
        self.signum.set(signum);
        self.rearm()
    }

    /// Arm again with the stored signum.
    pub fn rearm(&self) -> bool {
        self.base.stop();
        let signum = self.signum.get();
        if signum < 0 {
            return false;
        }
        match self.base.ev.register_signal(
            Rc::clone(&self.base.cb),
            Rc::clone(&self.base.state),
            signum,
        ) {
            Ok(token) => {
                self.base.state.token.set(Some(token));
                true
            }
            Err(error) => {
                tracing::warn!(signum, %error, "signal watcher registration failed");
                false
            }
        }
    }

    pub fn stop(&self) {
        self.base.stop();
    }

    /// The watched signum, or -1 when never bound.
    pub fn signum(&self) -> i32 {
        self.signum.get()
    }
}

/// Fires once when the loop is about to finish.
///
/// Cleanup watchers do not count as pending work, so a loop whose only
/// registrations are cleanup watchers is considered idle.
pub struct CleanupWatcher<C: Clock = SystemClock> {
    base: WatcherBase<C>,
}

impl<C: Clock> CleanupWatcher<C> {
    pub fn new(ev: &EventLoop<C>, cb: impl FnMut(Revents) + 'static) -> Self {
        Self {
            base: WatcherBase::new(ev, cb),
        }
    }

    pub fn is_active(&self) -> bool {
        self.base.is_active()
    }

    pub fn start(&self) -> bool {
        self.base.stop();
        let token = self
            .base
            .ev
            .register_cleanup(Rc::clone(&self.base.cb), Rc::clone(&self.base.state));
        self.base.state.token.set(Some(token));
        true
    }

    pub fn stop(&self) {
        self.base.stop();
    }
}

#[cfg(test)]
#[path = "watcher_tests.rs"]
mod tests;
