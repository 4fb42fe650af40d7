// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The dispatcher: target registry, delivery rule, cleanup protocol.

use std::cell::RefCell;
use std::fmt;
use std::hash::Hash;
use std::os::fd::RawFd;
use std::rc::{Rc, Weak};

use gale_core::{Clock, Revents, SystemClock};
use gale_reactor::{CleanupWatcher, EventLoop, IoWatcher, SignalWatcher, TimerWatcher};
use indexmap::IndexMap;

use crate::registry::{AnyWatcher, WatcherSet};

/// Kind-specific event payload handed to the handler: the fd for io
/// events, the signum for signal events. Timer and cleanup deliveries
/// carry none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    Fd(RawFd),
    Signal(i32),
}

type EventHandler<T> = Box<dyn FnMut(&T, Revents, Option<Payload>) -> bool>;
type TargetHook<T> = Box<dyn FnMut(&T)>;

struct DispatchState<T, C: Clock> {
    registry: IndexMap<T, WatcherSet<C>>,
    cleaning: bool,
}

struct Shared<T, C: Clock> {
    ev: EventLoop<C>,
    state: RefCell<DispatchState<T, C>>,
    on_event: RefCell<EventHandler<T>>,
    on_apply: Option<RefCell<TargetHook<T>>>,
    on_free: Option<RefCell<TargetHook<T>>>,
}

impl<T, C> Shared<T, C>
where
    T: Clone + Eq + Hash + fmt::Debug + 'static,
    C: Clock,
{
    /// Deliver one event: stop all of the target's watchers, run the
    /// handler, re-arm on a truthy return. During cleanup the return value
    /// is ignored. A release from inside the handler is authoritative —
    /// the re-arm pass looks the target up again and finds nothing.
    fn deliver(&self, target: &T, revents: Revents, payload: Option<Payload>) {
        {
            let mut state = self.state.borrow_mut();
            let Some(set) = state.registry.get_mut(target) else {
                return;
            };
            set.stop_all();
        }
        tracing::trace!(key = ?target, ?revents, "delivering");
        let keep = match self.on_event.try_borrow_mut() {
            Ok(mut handler) => (&mut *handler)(target, revents, payload),
            Err(_) => {
                tracing::debug!(key = ?target, "re-entrant delivery skipped");
                return;
            }
        };
        let mut state = self.state.borrow_mut();
        if state.cleaning || !keep {
            return;
        }
        if let Some(set) = state.registry.get_mut(target) {
            set.rearm_inactive();
        }
    }

    fn try_enable(&self, target: &T) -> bool {
        let mut state = self.state.borrow_mut();
        if state.cleaning {
            return false;
        }
        match state.registry.get_mut(target) {
            Some(set) => {
                set.rearm_inactive();
                true
            }
            None => false,
        }
    }

    fn try_disable(&self, target: &T) -> bool {
        let mut state = self.state.borrow_mut();
        if state.cleaning {
            return false;
        }
        match state.registry.get_mut(target) {
            Some(set) => {
                set.stop_all();
                true
            }
            None => false,
        }
    }

    fn try_release(&self, target: &T) -> bool {
        if self.state.borrow().cleaning {
            return false;
        }
        self.release(target)
    }

    /// Remove the target's entry, stop its watchers, fire the free hook.
    fn release(&self, target: &T) -> bool {
        let removed = {
            let mut state = self.state.borrow_mut();
            state.registry.shift_remove_entry(target)
        };
        let Some((key, set)) = removed else {
            return false;
        };
        set.stop_all();
        drop(set);
        tracing::debug!(key = ?key, "target released");
        self.free_hook(&key);
        true
    }

    /// The terminal scan: one CLEANUP delivery per active target, then a
    /// release (with free hook) for every target. New registrations are
    /// refused while this runs.
    fn run_cleanup(&self) {
        {
            let mut state = self.state.borrow_mut();
            if state.cleaning || state.registry.is_empty() {
                return;
            }
            state.cleaning = true;
        }
        let span = tracing::debug_span!("cleanup");
        let _guard = span.enter();

        let (all, active) = {
            let state = self.state.borrow();
            let all: Vec<T> = state.registry.keys().cloned().collect();
            let active: Vec<T> = state
                .registry
                .iter()
                .filter(|(_, set)| set.any_active())
                .map(|(key, _)| key.clone())
                .collect();
            (all, active)
        };
        tracing::debug!(targets = all.len(), active = active.len(), "cleanup started");

        for target in &active {
            self.deliver(target, Revents::CLEANUP, None);
        }
        for target in &all {
            self.release(target);
        }

        self.state.borrow_mut().cleaning = false;
        tracing::debug!("cleanup finished");
    }

    fn apply_hook(&self, target: &T) {
        if let Some(hook) = &self.on_apply {
            (&mut *hook.borrow_mut())(target);
        }
    }

    fn free_hook(&self, target: &T) {
        if let Some(hook) = &self.on_free {
            (&mut *hook.borrow_mut())(target);
        }
    }

    /// Append a freshly started watcher, firing the apply hook when this
    /// is the target's first.
    fn insert(shared: &Rc<Self>, target: T, watcher: AnyWatcher<C>) {
        let is_new = {
            let mut state = shared.state.borrow_mut();
            let is_new = !state.registry.contains_key(&target);
            state
                .registry
                .entry(target.clone())
                .or_default()
                .push(watcher);
            is_new
        };
        if is_new {
            tracing::debug!(key = ?target, "target applied");
            shared.apply_hook(&target);
        }
    }

    /// Callback installed into a watcher; carries the target key and the
    /// kind-specific payload back into the dispatcher.
    fn delivery(
        shared: &Rc<Self>,
        target: T,
        payload: Option<Payload>,
    ) -> impl FnMut(Revents) + 'static {
        let weak = Rc::downgrade(shared);
        move |revents| {
            if let Some(shared) = weak.upgrade() {
                shared.deliver(&target, revents, payload);
            }
        }
    }

    fn watch_timer(shared: &Rc<Self>, target: T, timeout: f64) -> bool {
        {
            let mut state = shared.state.borrow_mut();
            if state.cleaning {
                tracing::warn!(key = ?target, "watch_timer refused during cleanup");
                return false;
            }
            if let Some(set) = state.registry.get_mut(&target) {
                if let Some(timer) = set.timer() {
                    return timer.start(timeout, timeout);
                }
            }
        }
        let watcher = TimerWatcher::new(&shared.ev, Self::delivery(shared, target.clone(), None));
        if !watcher.start(timeout, timeout) {
            return false;
        }
        Self::insert(shared, target, AnyWatcher::Timer(watcher));
        true
    }

    fn watch_io(shared: &Rc<Self>, target: T, fd: RawFd, events: Revents) -> bool {
        {
            let mut state = shared.state.borrow_mut();
            if state.cleaning {
                tracing::warn!(key = ?target, "watch_io refused during cleanup");
                return false;
            }
            if let Some(set) = state.registry.get_mut(&target) {
                if let Some(io) = set.io_for(fd) {
                    return io.start(fd, events);
                }
            }
        }
        let watcher = IoWatcher::new(
            &shared.ev,
            Self::delivery(shared, target.clone(), Some(Payload::Fd(fd))),
        );
        if !watcher.start(fd, events) {
            return false;
        }
        Self::insert(shared, target, AnyWatcher::Io(watcher));
        true
    }

    fn watch_signal(shared: &Rc<Self>, target: T, signum: i32) -> bool {
        {
            let mut state = shared.state.borrow_mut();
            if state.cleaning {
                tracing::warn!(key = ?target, "watch_signal refused during cleanup");
                return false;
            }
            if let Some(set) = state.registry.get_mut(&target) {
                if let Some(sig) = set.signal_for(signum) {
                    return sig.start(signum);
                }
            }
        }
        let watcher = SignalWatcher::new(
            &shared.ev,
            Self::delivery(shared, target.clone(), Some(Payload::Signal(signum))),
        );
        if !watcher.start(signum) {
            return false;
        }
        Self::insert(shared, target, AnyWatcher::Signal(watcher));
        true
    }

    fn any_active(&self, target: &T) -> bool {
        self.state
            .borrow()
            .registry
            .get(target)
            .is_some_and(WatcherSet::any_active)
    }
}

/// Routes loop events to a single handler under caller-chosen target
/// identities.
///
/// Targets are keyed by value (`Eq + Hash`); each holds an
/// insertion-ordered watcher sequence with at most one timer, one io
/// watcher per fd and one signal watcher per signum. Dropping the
/// dispatcher runs the cleanup protocol if the loop never did.
pub struct Dispatcher<T, C: Clock = SystemClock>
where
    T: Clone + Eq + Hash + fmt::Debug + 'static,
{
    shared: Rc<Shared<T, C>>,
    _cleanup: CleanupWatcher<C>,
}

impl<T, C> Dispatcher<T, C>
where
    T: Clone + Eq + Hash + fmt::Debug + 'static,
    C: Clock,
{
    /// Dispatcher without apply/free hooks.
    pub fn new(
        ev: &EventLoop<C>,
        on_event: impl FnMut(&T, Revents, Option<Payload>) -> bool + 'static,
    ) -> Self {
        Self::build(ev, Box::new(on_event), None, None)
    }

    /// Dispatcher with first-appearance and last-departure hooks.
    ///
    /// `on_apply` runs exactly once when a target first enters the
    /// registry, `on_free` exactly once when it leaves; callers use the
    /// pair to pin target lifetime for the observation window.
    pub fn with_hooks(
        ev: &EventLoop<C>,
        on_event: impl FnMut(&T, Revents, Option<Payload>) -> bool + 'static,
        on_apply: impl FnMut(&T) + 'static,
        on_free: impl FnMut(&T) + 'static,
    ) -> Self {
        Self::build(
            ev,
            Box::new(on_event),
            Some(Box::new(on_apply)),
            Some(Box::new(on_free)),
        )
    }

    fn build(
        ev: &EventLoop<C>,
        on_event: EventHandler<T>,
        on_apply: Option<TargetHook<T>>,
        on_free: Option<TargetHook<T>>,
    ) -> Self {
        let shared = Rc::new(Shared {
            ev: ev.clone(),
            state: RefCell::new(DispatchState {
                registry: IndexMap::new(),
                cleaning: false,
            }),
            on_event: RefCell::new(on_event),
            on_apply: on_apply.map(RefCell::new),
            on_free: on_free.map(RefCell::new),
        });
        let weak = Rc::downgrade(&shared);
        let cleanup = CleanupWatcher::new(ev, move |_revents| {
            if let Some(shared) = weak.upgrade() {
                shared.run_cleanup();
            }
        });
        cleanup.start();
        Self {
            shared,
            _cleanup: cleanup,
        }
    }

    /// Install or reuse a timer watcher firing every `timeout` seconds.
    pub fn watch_timer(&self, target: T, timeout: f64) -> bool {
        Shared::watch_timer(&self.shared, target, timeout)
    }

    /// Install or reuse an io watcher bound to `fd` for a READ/WRITE mask.
    pub fn watch_io(&self, target: T, fd: RawFd, events: Revents) -> bool {
        Shared::watch_io(&self.shared, target, fd, events)
    }

    /// Install or reuse a signal watcher for `signum`.
    pub fn watch_signal(&self, target: T, signum: i32) -> bool {
        Shared::watch_signal(&self.shared, target, signum)
    }

    /// Arm all of the target's inactive watchers. Returns whether the
    /// target existed.
    pub fn enable_watching(&self, target: &T) -> bool {
        self.shared.try_enable(target)
    }

    /// Stop all of the target's watchers. Returns whether the target
    /// existed.
    pub fn disable_watching(&self, target: &T) -> bool {
        self.shared.try_disable(target)
    }

    /// Stop and drop the target's watchers, remove it from the registry
    /// and fire the free hook. Returns whether the target existed.
    pub fn release_watching(&self, target: &T) -> bool {
        self.shared.try_release(target)
    }

    /// Run the cleanup protocol now.
    ///
    /// Normally driven by the loop when it finishes; exposed for drivers
    /// that step the loop manually.
    pub fn cleanup(&self) {
        self.shared.run_cleanup();
    }

    /// A weak handle for use inside event handlers.
    pub fn handle(&self) -> DispatcherHandle<T, C> {
        DispatcherHandle {
            shared: Rc::downgrade(&self.shared),
        }
    }

    /// Number of targets currently in the registry.
    pub fn target_count(&self) -> usize {
        self.shared.state.borrow().registry.len()
    }

    /// Number of watchers in the target's sequence (0 when unknown).
    pub fn watcher_count(&self, target: &T) -> usize {
        self.shared
            .state
            .borrow()
            .registry
            .get(target)
            .map_or(0, WatcherSet::len)
    }

    /// Whether the target is in the registry (its watchers may be stopped).
    pub fn is_watching(&self, target: &T) -> bool {
        self.shared.state.borrow().registry.contains_key(target)
    }

    /// Whether the target has at least one armed watcher.
    pub fn is_armed(&self, target: &T) -> bool {
        self.shared.any_active(target)
    }
}

impl<T, C> Drop for Dispatcher<T, C>
where
    T: Clone + Eq + Hash + fmt::Debug + 'static,
    C: Clock,
{
    fn drop(&mut self) {
        self.shared.run_cleanup();
    }
}

/// Weak handle to a dispatcher, safe to capture in event handlers.
///
/// Every operation is a no-op returning `false` once the dispatcher is
/// gone.
pub struct DispatcherHandle<T, C: Clock = SystemClock>
where
    T: Clone + Eq + Hash + fmt::Debug + 'static,
{
    shared: Weak<Shared<T, C>>,
}

impl<T, C> Clone for DispatcherHandle<T, C>
where
    T: Clone + Eq + Hash + fmt::Debug + 'static,
    C: Clock,
{
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<T, C> DispatcherHandle<T, C>
where
    T: Clone + Eq + Hash + fmt::Debug + 'static,
    C: Clock,
{
    pub fn watch_timer(&self, target: T, timeout: f64) -> bool {
        match self.shared.upgrade() {
            Some(shared) => Shared::watch_timer(&shared, target, timeout),
            None => false,
        }
    }

    pub fn watch_io(&self, target: T, fd: RawFd, events: Revents) -> bool {
        match self.shared.upgrade() {
            Some(shared) => Shared::watch_io(&shared, target, fd, events),
            None => false,
        }
    }

    pub fn watch_signal(&self, target: T, signum: i32) -> bool {
        match self.shared.upgrade() {
            Some(shared) => Shared::watch_signal(&shared, target, signum),
            None => false,
        }
    }

    pub fn enable_watching(&self, target: &T) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.try_enable(target))
    }

    pub fn disable_watching(&self, target: &T) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.try_disable(target))
    }

    pub fn release_watching(&self, target: &T) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.try_release(target))
    }

    /// Whether the target has at least one armed watcher.
    pub fn is_armed(&self, target: &T) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| shared.any_active(target))
    }
}

#[cfg(test)]
#[path = "dispatcher_tests.rs"]
mod tests;
