// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! gale-dispatch: target registry and event dispatcher
//!
//! A [`Dispatcher`] groups watchers under caller-chosen target identities
//! and routes every fired event through a single handler. Delivery stops
//! all of the target's watchers, invokes the handler, and re-arms them only
//! on a truthy return; when the loop winds down each live target receives a
//! terminal `CLEANUP` event before its registration is released.

mod dispatcher;
mod registry;

pub use dispatcher::{Dispatcher, DispatcherHandle, Payload};
