// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event mask delivered to watcher callbacks and event handlers.

use bitflags::bitflags;

bitflags! {
    /// Bitwise OR of the event kinds a delivery carries.
    ///
    /// `READ`/`WRITE` report fd readiness, `TIMER` a timer expiry and
    /// `SIGNAL` a process signal. `ERROR` and `CLEANUP` are out-of-band:
    /// `ERROR` means the underlying poller reported a failed registration,
    /// `CLEANUP` is the terminal event synthesized when the loop winds down.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Revents: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const TIMER = 1 << 2;
        const SIGNAL = 1 << 3;
        const ERROR = 1 << 4;
        const CLEANUP = 1 << 5;
    }
}

impl Revents {
    /// Restrict the mask to the fd-readiness bits an I/O watcher can be
    /// armed with.
    pub fn io_bits(self) -> Revents {
        self & (Revents::READ | Revents::WRITE)
    }

    /// Returns true if the mask requests read readiness.
    pub fn wants_read(self) -> bool {
        self.contains(Revents::READ)
    }

    /// Returns true if the mask requests write readiness.
    pub fn wants_write(self) -> bool {
        self.contains(Revents::WRITE)
    }
}

#[cfg(test)]
#[path = "mask_tests.rs"]
mod tests;
