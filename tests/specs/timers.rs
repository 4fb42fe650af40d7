// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Timer dispatch behavior on a real loop.

use crate::prelude::*;
use gale_core::Revents;
use gale_dispatch::Dispatcher;
use gale_reactor::EventLoop;
use std::time::Duration;

/// Two targets with different periods fire at their own cadence and keep
/// repeating, because the watch timeout doubles as the repeat interval.
#[test]
fn repeating_timers_fire_per_target() {
    let ev = EventLoop::new().unwrap();
    let log = new_log();
    let dispatcher = Dispatcher::new(&ev, recording_handler(&log, true));

    assert!(dispatcher.watch_timer("alesh".to_string(), 0.02));
    assert!(dispatcher.watch_timer("world".to_string(), 0.06));

    run_for(&ev, Duration::from_millis(100));

    let alesh = fires(&log, "alesh", Revents::TIMER);
    let world = fires(&log, "world", Revents::TIMER);
    assert!(alesh >= 2, "fast target fired {alesh} times");
    assert!(world >= 1, "slow target fired {world} times");
    assert!(alesh > world, "cadences must differ ({alesh} vs {world})");

    let log = log.borrow();
    let first_timer = log
        .iter()
        .find(|(_, revents, _)| revents.contains(Revents::TIMER))
        .unwrap();
    assert_eq!(first_timer.0, "alesh");
}

/// Re-watching a target's timer replaces the deadline instead of adding a
/// second watcher, so the old (shorter) period never fires.
#[test]
fn rewatching_replaces_the_timer_period() {
    let ev = EventLoop::new().unwrap();
    let log = new_log();
    let dispatcher = Dispatcher::new(&ev, recording_handler(&log, true));
    let target = "t".to_string();

    assert!(dispatcher.watch_timer(target.clone(), 0.02));
    assert!(dispatcher.watch_timer(target.clone(), 0.08));

    // The window ends before the new deadline; with the stale 20ms period
    // still armed this would have fired twice.
    run_for(&ev, Duration::from_millis(50));

    assert_eq!(fires(&log, "t", Revents::TIMER), 0);
    assert_eq!(fires(&log, "t", Revents::CLEANUP), 1, "still active at exit");
}

/// A falsy handler return parks the target: one delivery, then silence.
#[test]
fn falsy_return_parks_the_target() {
    let ev = EventLoop::new().unwrap();
    let log = new_log();
    let dispatcher = Dispatcher::new(&ev, recording_handler(&log, false));

    assert!(dispatcher.watch_timer("t".to_string(), 0.01));

    run_for(&ev, Duration::from_millis(60));

    assert_eq!(fires(&log, "t", Revents::TIMER), 1);
    assert_eq!(fires(&log, "t", Revents::CLEANUP), 0, "parked targets get no cleanup event");
}
