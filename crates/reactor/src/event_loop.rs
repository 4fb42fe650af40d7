// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The event loop: readiness polling, timers, signals, cleanup hooks.
//!
//! `EventLoop` is a cheap clone handle over shared loop state. One `run`
//! frame per call; frames nest when a callback runs the loop again. Event
//! collection and callback invocation are separate phases so a callback can
//! freely start, stop and drop watchers — fired events are re-validated
//! against the slot table (token + generation) immediately before each
//! callback, which suppresses events for watchers a sibling stopped in the
//! same batch.

use std::cell::RefCell;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use gale_core::{BreakMode, Clock, Revents, RunMode, SystemClock};
use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use slab::Slab;

use crate::error::LoopError;
use crate::signal_mux::SignalMux;
use crate::timer_queue::TimerQueue;
use crate::watcher::{Callback, WatcherState};

/// Token reserved for the shared signal source.
const SIGNAL_TOKEN: Token = Token(usize::MAX - 1);

enum SlotKind {
    Timer,
    Io { fd: RawFd },
    Signal { signum: i32 },
    Cleanup,
}

/// One live watcher registration.
struct Slot {
    gen: u64,
    kind: SlotKind,
    state: Rc<WatcherState>,
    cb: Callback,
}

enum PendingBreak {
    One,
    All,
}

/// A collected event, revalidated before its callback runs.
struct Fired {
    token: Token,
    gen: u64,
    revents: Revents,
}

struct LoopCore<C: Clock> {
    clock: C,
    poll: Poll,
    events: Events,
    slots: Slab<Slot>,
    timers: TimerQueue,
    signals: SignalMux,
    depth: u32,
    brk: Option<PendingBreak>,
    next_gen: u64,
}

impl<C: Clock> LoopCore<C> {
    /// Cleanup watchers do not keep the loop alive.
    fn has_pending_work(&self) -> bool {
        self.slots
            .iter()
            .any(|(_, slot)| !matches!(slot.kind, SlotKind::Cleanup))
    }

    fn bump_gen(&mut self) -> u64 {
        self.next_gen += 1;
        self.next_gen
    }

    fn remove_slot(&mut self, token: Token) {
        let Some(slot) = self.slots.try_remove(token.0) else {
            return;
        };
        slot.state.token.set(None);
        match slot.kind {
            SlotKind::Timer => self.timers.cancel(token),
            SlotKind::Io { fd } => {
                // The fd may already be closed by the caller; epoll drops
                // closed fds on its own, so a failure here is harmless.
                if let Err(error) = self.poll.registry().deregister(&mut SourceFd(&fd)) {
                    tracing::debug!(fd, %error, "poll deregistration failed");
                }
            }
            SlotKind::Signal { signum } => self.signals.unsubscribe(signum, token),
            SlotKind::Cleanup => {}
        }
    }
}

/// Handle to a single-threaded event loop.
///
/// Clones refer to the same loop instance; watchers hold one.
pub struct EventLoop<C: Clock = SystemClock> {
    core: Rc<RefCell<LoopCore<C>>>,
}

impl<C: Clock> Clone for EventLoop<C> {
    fn clone(&self) -> Self {
        Self {
            core: Rc::clone(&self.core),
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<EventLoop>> = const { RefCell::new(None) };
}

impl EventLoop {
    /// Create a fresh loop on the real clock.
    pub fn new() -> Result<Self, LoopError> {
        Self::with_clock(SystemClock)
    }

    /// The thread's default loop, created on first use.
    pub fn current() -> Result<Self, LoopError> {
        CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if let Some(ev) = current.as_ref() {
                return Ok(ev.clone());
            }
            let ev = Self::new()?;
            *current = Some(ev.clone());
            Ok(ev)
        })
    }
}

impl<C: Clock> EventLoop<C> {
    /// Create a loop on the given clock.
    pub fn with_clock(clock: C) -> Result<Self, LoopError> {
        let poll = Poll::new().map_err(LoopError::Poll)?;
        Ok(Self {
            core: Rc::new(RefCell::new(LoopCore {
                clock,
                poll,
                events: Events::with_capacity(256),
                slots: Slab::new(),
                timers: TimerQueue::new(),
                signals: SignalMux::new(),
                depth: 0,
                brk: None,
                next_gen: 0,
            })),
        })
    }

    /// Drive the loop.
    ///
    /// `Default` runs until a break is requested or no pending work remains,
    /// `Once` processes one batch (blocking for it), `NoWait` processes
    /// whatever is already ready. Returns `Ok(true)` iff pending work
    /// remains when the frame ends. Cleanup watchers fire when the
    /// outermost `Default` frame returns.
    pub fn run(&self, mode: RunMode) -> Result<bool, LoopError> {
        self.core.borrow_mut().depth += 1;
        let frame = {
            let _depth = DepthGuard { core: &self.core };
            self.run_frame(mode)
        };
        let fire_cleanups = {
            let mut core = self.core.borrow_mut();
            match core.brk {
                Some(PendingBreak::One) => core.brk = None,
                Some(PendingBreak::All) if core.depth == 0 => core.brk = None,
                _ => {}
            }
            core.depth == 0 && matches!(mode, RunMode::Default)
        };
        frame?;
        if fire_cleanups {
            self.fire_cleanups();
        }
        Ok(self.core.borrow().has_pending_work())
    }

    /// Request loop termination.
    ///
    /// `Cancel` unsets a pending break, `One` exits the innermost `run`
    /// frame, `All` exits every nested frame. A no-op when the loop is not
    /// running.
    pub fn stop(&self, how: BreakMode) {
        let mut core = self.core.borrow_mut();
        match how {
            BreakMode::Cancel => core.brk = None,
            BreakMode::One | BreakMode::All if core.depth == 0 => {
                tracing::debug!(?how, "stop on idle loop ignored");
            }
            BreakMode::One => core.brk = Some(PendingBreak::One),
            BreakMode::All => core.brk = Some(PendingBreak::All),
        }
    }

    fn run_frame(&self, mode: RunMode) -> Result<(), LoopError> {
        loop {
            {
                let core = self.core.borrow();
                if core.brk.is_some() || !core.has_pending_work() {
                    return Ok(());
                }
            }
            let fired = self.collect(mode)?;
            self.dispatch(fired);
            if !matches!(mode, RunMode::Default) {
                return Ok(());
            }
        }
    }

    /// Poll the OS and gather one batch of fired events.
    fn collect(&self, mode: RunMode) -> Result<Vec<Fired>, LoopError> {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;

        let now = core.clock.now();
        let timeout = match mode {
            RunMode::NoWait => Some(Duration::ZERO),
            _ => core
                .timers
                .next_deadline()
                .map(|deadline| deadline.saturating_duration_since(now)),
        };

        loop {
            match core.poll.poll(&mut core.events, timeout) {
                Ok(()) => break,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(LoopError::Poll(error)),
            }
        }

        let mut fired = Vec::new();
        let mut pending_signals = None;
        for event in core.events.iter() {
            let token = event.token();
            if token == SIGNAL_TOKEN {
                pending_signals = Some(core.signals.drain_pending());
                continue;
            }
            let Some(slot) = core.slots.get(token.0) else {
                continue;
            };
            let mut revents = Revents::empty();
            if event.is_readable() || event.is_read_closed() {
                revents |= Revents::READ;
            }
            if event.is_writable() || event.is_write_closed() {
                revents |= Revents::WRITE;
            }
            if event.is_error() {
                revents |= Revents::ERROR;
            }
            if !revents.is_empty() {
                fired.push(Fired {
                    token,
                    gen: slot.gen,
                    revents,
                });
            }
        }

        if let Some(signums) = pending_signals {
            for signum in signums {
                for &token in core.signals.subscribers(signum) {
                    if let Some(slot) = core.slots.get(token.0) {
                        fired.push(Fired {
                            token,
                            gen: slot.gen,
                            revents: Revents::SIGNAL,
                        });
                    }
                }
            }
        }

        let now = core.clock.now();
        for token in core.timers.fired(now) {
            if let Some(slot) = core.slots.get(token.0) {
                fired.push(Fired {
                    token,
                    gen: slot.gen,
                    revents: Revents::TIMER,
                });
            }
        }

        Ok(fired)
    }

    /// Invoke callbacks for a collected batch, one at a time, revalidating
    /// each event against the slot table first.
    fn dispatch(&self, fired: Vec<Fired>) {
        for f in fired {
            let cb = {
                let mut core = self.core.borrow_mut();
                let found = core
                    .slots
                    .get(f.token.0)
                    .filter(|slot| slot.gen == f.gen)
                    .map(|slot| (Rc::clone(&slot.cb), matches!(slot.kind, SlotKind::Timer)));
                match found {
                    Some((cb, is_timer)) => {
                        // A one-shot timer that left the queue is spent.
                        if is_timer && !core.timers.contains(f.token) {
                            core.remove_slot(f.token);
                        }
                        Some(cb)
                    }
                    None => None,
                }
            };
            let Some(cb) = cb else {
                continue;
            };
            tracing::trace!(token = f.token.0, revents = ?f.revents, "dispatching");
            match cb.try_borrow_mut() {
                Ok(mut cb) => (&mut *cb)(f.revents),
                Err(_) => {
                    tracing::debug!(token = f.token.0, "re-entrant watcher callback skipped")
                }
            };
        }
    }

    /// Fire and retire every cleanup watcher.
    fn fire_cleanups(&self) {
        let callbacks: Vec<Callback> = {
            let mut core = self.core.borrow_mut();
            let tokens: Vec<Token> = core
                .slots
                .iter()
                .filter(|(_, slot)| matches!(slot.kind, SlotKind::Cleanup))
                .map(|(key, _)| Token(key))
                .collect();
            tokens
                .into_iter()
                .filter_map(|token| {
                    let slot = core.slots.try_remove(token.0)?;
                    slot.state.token.set(None);
                    Some(slot.cb)
                })
                .collect()
        };
        if callbacks.is_empty() {
            return;
        }
        tracing::debug!(count = callbacks.len(), "running cleanup watchers");
        for cb in callbacks {
            match cb.try_borrow_mut() {
                Ok(mut cb) => (&mut *cb)(Revents::CLEANUP),
                Err(_) => tracing::debug!("re-entrant cleanup callback skipped"),
            }
        }
    }

    pub(crate) fn register_timer(
        &self,
        cb: Callback,
        state: Rc<WatcherState>,
        after: Duration,
        repeat: Option<Duration>,
    ) -> Token {
        let mut core = self.core.borrow_mut();
        let gen = core.bump_gen();
        let now = core.clock.now();
        let token = Token(core.slots.insert(Slot {
            gen,
            kind: SlotKind::Timer,
            state,
            cb,
        }));
        core.timers.set(token, after, repeat, now);
        tracing::debug!(token = token.0, "timer watcher armed");
        token
    }

    pub(crate) fn register_io(
        &self,
        cb: Callback,
        state: Rc<WatcherState>,
        fd: RawFd,
        events: Revents,
    ) -> Result<Token, LoopError> {
        let mut core = self.core.borrow_mut();
        let interest = match (events.wants_read(), events.wants_write()) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (true, false) => Interest::READABLE,
            (false, true) => Interest::WRITABLE,
            (false, false) => {
                return Err(LoopError::Register(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "empty readiness mask",
                )))
            }
        };
        let gen = core.bump_gen();
        let token = Token(core.slots.insert(Slot {
            gen,
            kind: SlotKind::Io { fd },
            state,
            cb,
        }));
        if let Err(error) = core.poll.registry().register(&mut SourceFd(&fd), token, interest) {
            let _ = core.slots.try_remove(token.0);
            return Err(LoopError::Register(error));
        }
        tracing::debug!(token = token.0, fd, "io watcher armed");
        Ok(token)
    }

    pub(crate) fn register_signal(
        &self,
        cb: Callback,
        state: Rc<WatcherState>,
        signum: i32,
    ) -> Result<Token, LoopError> {
        let mut core = self.core.borrow_mut();
        let core = &mut *core;
        core.signals
            .ensure_source(core.poll.registry(), SIGNAL_TOKEN)?;
        let gen = core.bump_gen();
        let token = Token(core.slots.insert(Slot {
            gen,
            kind: SlotKind::Signal { signum },
            state,
            cb,
        }));
        if let Err(error) = core.signals.subscribe(signum, token) {
            let _ = core.slots.try_remove(token.0);
            return Err(error);
        }
        tracing::debug!(token = token.0, signum, "signal watcher armed");
        Ok(token)
    }

    pub(crate) fn register_cleanup(&self, cb: Callback, state: Rc<WatcherState>) -> Token {
        let mut core = self.core.borrow_mut();
        let gen = core.bump_gen();
        let token = Token(core.slots.insert(Slot {
            gen,
            kind: SlotKind::Cleanup,
            state,
            cb,
        }));
        tracing::debug!(token = token.0, "cleanup watcher armed");
        token
    }

    pub(crate) fn deregister(&self, token: Token) {
        self.core.borrow_mut().remove_slot(token);
    }
}

/// Restores the frame depth even when a callback panics out of `run`.
struct DepthGuard<'a, C: Clock> {
    core: &'a Rc<RefCell<LoopCore<C>>>,
}

impl<C: Clock> Drop for DepthGuard<'_, C> {
    fn drop(&mut self) {
        self.core.borrow_mut().depth -= 1;
    }
}

#[cfg(test)]
#[path = "event_loop_tests.rs"]
mod tests;
