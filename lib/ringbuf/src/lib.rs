// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for debugging drivers.
//!
//! This provides static ring buffers that can be used to instrument
//! arbitrary contexts. The buffers are named statics, so they can be read out
//! with a debugger even when there is no console to print to -- which is the
//! normal situation on the radio targets this code runs on.
//!
//! ## Creating a ring buffer
//!
//! Ring buffers are instantiated with the [`ringbuf!`] macro, to which one
//! must provide the type of per-entry payload, the number of entries, and a
//! static initializer. For example, to define a 16-entry ring buffer with
//! each entry containing a `u32`:
//!
//! ```
//! ringbuf!(u32, 16, 0);
//! ```
//!
//! Entries are recorded with [`ringbuf_entry!`]:
//!
//! ```
//! ringbuf_entry!(isr.bits());
//! ```
//!
//! You can also provide a name for the ring buffer, to distinguish between
//! them if you have more than one per module:
//!
//! ```
//! ringbuf!(MY_RINGBUF, u32, 16, 0);
//! ringbuf_entry!(MY_RINGBUF, isr.bits());
//! ```
//!
//! ## Entry de-duplication
//!
//! When the same value is recorded several times in a row, the repeats are
//! recorded by incrementing a count stored in the initial entry, rather than
//! by burning a fresh entry per repeat. This keeps a busy loop that logs the
//! same state from flushing out the interesting history. This requires the
//! payload type to implement `PartialEq`.
//!
//! ## Concurrency
//!
//! Recording an entry is best-effort: if two contexts race on the same
//! buffer, the loser drops its entry rather than blocking or panicking. This
//! matters here because entries get recorded from driver receive callbacks
//! that run concurrently with the rest of the system.

#![no_std]

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

/// A `RefCell`-style container usable in a static, for cases where only a
/// single borrow needs to happen at any given time.
///
/// This only provides `mut` access because that's all the ring buffer needs.
#[derive(Default)]
pub struct StaticCell<T> {
    borrowed: AtomicBool,
    cell: UnsafeCell<T>,
}

impl<T> StaticCell<T> {
    /// Creates a `StaticCell` containing `contents`.
    pub const fn new(contents: T) -> Self {
        Self {
            borrowed: AtomicBool::new(false),
            cell: UnsafeCell::new(contents),
        }
    }

    /// Gets mutable access to the contents of `self`, if nobody else is
    /// currently using it. There is deliberately no panicking variant: a
    /// caller that loses the race drops its entry and moves on.
    pub fn try_borrow_mut(&self) -> Option<StaticRef<'_, T>> {
        let already_borrowed = self.borrowed.swap(true, Ordering::Acquire);
        if already_borrowed {
            return None;
        }
        // Safety: the check above ensures that we are not producing an
        // aliasing &mut to our contents.
        unsafe {
            Some(StaticRef {
                contents: &mut *self.cell.get(),
                borrow: &self.borrowed,
            })
        }
    }
}

unsafe impl<T> Sync for StaticCell<T> where for<'a> &'a mut T: Send {}

pub struct StaticRef<'a, T> {
    contents: &'a mut T,
    borrow: &'a AtomicBool,
}

impl<T> Drop for StaticRef<'_, T> {
    fn drop(&mut self) {
        self.borrow.store(false, Ordering::Release);
    }
}

impl<T> core::ops::Deref for StaticRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &*self.contents
    }
}

impl<T> core::ops::DerefMut for StaticRef<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.contents
    }
}

/// One recorded entry in a ring buffer.
#[derive(Copy, Clone, Debug)]
pub struct RingbufEntry<T: Copy> {
    /// Source line that recorded the entry.
    pub line: u16,
    /// Bumped each time this slot is overwritten, to disambiguate wraps.
    pub generation: u16,
    /// Number of consecutive repeats folded into this entry.
    pub count: u16,
    pub payload: T,
}

/// A ring buffer of entries, plus the index of the most recent one.
#[derive(Debug)]
pub struct Ringbuf<T: Copy, const N: usize> {
    pub last: Option<usize>,
    pub buffer: [RingbufEntry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub fn entry(&mut self, line: u16, payload: T) {
        // If this is a repeat of the most recent entry, fold it in.
        if let Some(last) = self.last {
            let ent = &mut self.buffer[last];
            if ent.line == line
                && ent.payload == payload
                && ent.count < u16::MAX
            {
                ent.count += 1;
                return;
            }
        }

        let ndx = match self.last {
            Some(last) if last + 1 < N => last + 1,
            _ => 0,
        };
        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            line,
            generation: ent.generation.wrapping_add(1),
            count: 1,
            payload,
        };
        self.last = Some(ndx);
    }
}

/// Declares a ring buffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ring buffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all of
/// which are initialized to `expr`.
///
/// The resulting buffer will be static, so `NAME` should be uppercase. If you
/// omit the name, it will default to `__RINGBUF`, which supports the common
/// case of one quickly-installed ring buffer per module.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        static $name: $crate::StaticCell<$crate::Ringbuf<$t, $n>> =
            $crate::StaticCell::new($crate::Ringbuf {
                last: None,
                buffer: [$crate::RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: 0,
                    payload: $init,
                }; $n],
            });
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
        static $name: () = ();
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

/// Records an entry in a ring buffer declared with [`ringbuf!`].
///
/// `ringbuf_entry!(NAME, expr)` records `expr` in the buffer `NAME`;
/// `ringbuf_entry!(expr)` records into the module's default buffer. If the
/// buffer is busy being recorded to or read from another context, the entry
/// is dropped.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($name:ident, $payload:expr) => {{
        if let Some(mut buf) = $name.try_borrow_mut() {
            buf.entry(line!() as u16, $payload);
        }
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($name:ident, $payload:expr) => {{
        let _ = &$name;
        let _ = $payload;
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

/// Records an entry in the default ring buffer at the *crate root*, from any
/// module within the crate. Useful when a crate keeps one buffer for all of
/// its modules.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry_root {
    ($payload:expr) => {{
        if let Some(mut buf) = crate::__RINGBUF.try_borrow_mut() {
            buf.entry(line!() as u16, $payload);
        }
    }};
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry_root {
    ($payload:expr) => {{
        let _ = $payload;
    }};
}
