// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Signal dispatch behavior. Serialized: signal handlers are process-wide.

use crate::prelude::*;
use gale_core::{BreakMode, Revents};
use gale_dispatch::{Dispatcher, Payload};
use gale_reactor::EventLoop;
use serial_test::serial;
use signal_hook::consts::{SIGUSR1, SIGUSR2};
use signal_hook::low_level::raise;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Duration;

/// A signal delivery stops the loop; the still-armed timer target gets its
/// terminal cleanup event and every target is freed.
#[test]
#[serial]
fn signal_stops_the_loop_and_cleanup_follows() {
    let ev = EventLoop::new().unwrap();
    let log = new_log();
    let freed = Rc::new(Cell::new(0usize));

    let sink = Rc::clone(&log);
    let freed_in = Rc::clone(&freed);
    let raised = Rc::new(Cell::new(false));
    let raised_in = Rc::clone(&raised);
    let stopper = ev.clone();
    let dispatcher = Dispatcher::with_hooks(
        &ev,
        move |target: &String, revents, payload| {
            sink.borrow_mut().push((target.clone(), revents, payload));
            match target.as_str() {
                "ticker" => {
                    if !raised_in.get() {
                        raised_in.set(true);
                        raise(SIGUSR1).unwrap();
                    }
                    true
                }
                "usr1" => {
                    assert!(revents.contains(Revents::SIGNAL));
                    assert_eq!(payload, Some(Payload::Signal(SIGUSR1)));
                    stopper.stop(BreakMode::One);
                    false
                }
                _ => true,
            }
        },
        |_| {},
        move |_| freed_in.set(freed_in.get() + 1),
    );

    assert!(dispatcher.watch_timer("ticker".to_string(), 0.005));
    assert!(dispatcher.watch_signal("usr1".to_string(), SIGUSR1));

    run_for(&ev, Duration::from_secs(2));

    assert_eq!(fires(&log, "usr1", Revents::SIGNAL), 1);
    assert_eq!(fires(&log, "ticker", Revents::CLEANUP), 1);
    assert_eq!(fires(&log, "usr1", Revents::CLEANUP), 0, "parked by its falsy return");
    assert_eq!(freed.get(), 2);
}

/// Two targets watching the same signum both hear one raise.
#[test]
#[serial]
fn one_signum_fans_out_to_every_watcher() {
    let ev = EventLoop::new().unwrap();
    let log = new_log();

    let sink = Rc::clone(&log);
    let stopper = ev.clone();
    let dispatcher = Dispatcher::new(&ev, move |target: &String, revents, payload| {
        sink.borrow_mut().push((target.clone(), revents, payload));
        let seen = sink
            .borrow()
            .iter()
            .filter(|(_, revents, _)| revents.contains(Revents::SIGNAL))
            .count();
        if seen >= 2 {
            stopper.stop(BreakMode::One);
        }
        false
    });

    assert!(dispatcher.watch_signal("a".to_string(), SIGUSR2));
    assert!(dispatcher.watch_signal("b".to_string(), SIGUSR2));

    raise(SIGUSR2).unwrap();
    run_for(&ev, Duration::from_secs(2));

    assert_eq!(fires(&log, "a", Revents::SIGNAL), 1);
    assert_eq!(fires(&log, "b", Revents::SIGNAL), 1);
}
