// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fd readiness dispatch behavior.

use crate::prelude::*;
use gale_core::Revents;
use gale_dispatch::{Dispatcher, DispatcherHandle, Payload};
use gale_reactor::EventLoop;
use std::cell::RefCell;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::Duration;

#[test]
fn read_readiness_carries_the_fd_payload() {
    let ev = EventLoop::new().unwrap();
    let log = new_log();
    let dispatcher = Dispatcher::new(&ev, recording_handler(&log, false));
    let (mut tx, rx) = UnixStream::pair().unwrap();
    rx.set_nonblocking(true).unwrap();

    assert!(dispatcher.watch_io("reader".to_string(), rx.as_raw_fd(), Revents::READ));
    tx.write_all(b"ping").unwrap();

    run_for(&ev, Duration::from_millis(40));

    assert_eq!(fires(&log, "reader", Revents::READ), 1);
    let log = log.borrow();
    let (_, _, payload) = log
        .iter()
        .find(|(_, revents, _)| revents.contains(Revents::READ))
        .unwrap();
    assert_eq!(*payload, Some(Payload::Fd(rx.as_raw_fd())));
}

#[test]
fn write_readiness_fires_for_an_open_socket() {
    let ev = EventLoop::new().unwrap();
    let log = new_log();
    let dispatcher = Dispatcher::new(&ev, recording_handler(&log, false));
    let (tx, _rx) = UnixStream::pair().unwrap();
    tx.set_nonblocking(true).unwrap();

    assert!(dispatcher.watch_io("writer".to_string(), tx.as_raw_fd(), Revents::WRITE));

    run_for(&ev, Duration::from_millis(40));

    assert_eq!(fires(&log, "writer", Revents::WRITE), 1);
}

#[test]
fn hangup_reports_read_readiness() {
    let ev = EventLoop::new().unwrap();
    let log = new_log();
    let dispatcher = Dispatcher::new(&ev, recording_handler(&log, false));
    let (tx, rx) = UnixStream::pair().unwrap();
    rx.set_nonblocking(true).unwrap();

    assert!(dispatcher.watch_io("reader".to_string(), rx.as_raw_fd(), Revents::READ));
    drop(tx);

    run_for(&ev, Duration::from_millis(40));

    assert!(fires(&log, "reader", Revents::READ) >= 1, "EOF surfaces as readable");
}

/// Releasing the target from inside its own handler is authoritative:
/// no re-arm despite the truthy return, the free hook fires, and further
/// readiness goes nowhere.
#[test]
fn release_from_the_handler_is_final() {
    let ev = EventLoop::new().unwrap();
    let handle_slot: Rc<RefCell<Option<DispatcherHandle<String>>>> = Rc::new(RefCell::new(None));
    let reads = Rc::new(RefCell::new(0usize));
    let freed = Rc::new(RefCell::new(Vec::new()));

    let slot = Rc::clone(&handle_slot);
    let reads_in = Rc::clone(&reads);
    let freed_in = Rc::clone(&freed);
    let dispatcher = Dispatcher::with_hooks(
        &ev,
        move |target: &String, revents, _payload| {
            if revents.contains(Revents::READ) {
                *reads_in.borrow_mut() += 1;
                if let Some(handle) = slot.borrow().as_ref() {
                    assert!(handle.release_watching(target));
                }
            }
            true
        },
        |_| {},
        move |target: &String| freed_in.borrow_mut().push(target.clone()),
    );
    *handle_slot.borrow_mut() = Some(dispatcher.handle());

    let (mut tx, rx) = UnixStream::pair().unwrap();
    rx.set_nonblocking(true).unwrap();
    assert!(dispatcher.watch_io("reader".to_string(), rx.as_raw_fd(), Revents::READ));

    tx.write_all(b"one").unwrap();
    run_for(&ev, Duration::from_millis(40));

    // Still readable, but nobody is watching anymore.
    tx.write_all(b"two").unwrap();
    run_for(&ev, Duration::from_millis(20));

    assert_eq!(*reads.borrow(), 1);
    assert_eq!(*freed.borrow(), vec!["reader".to_string()]);
}
