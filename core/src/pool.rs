// Copyright (C) 2019-2020  Pierre Krieger
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Bounded pools of reusable commands.
//!
//! Every bus transaction needs a command object with a scratch buffer. Instead of allocating one
//! per packet, commands are taken from a [`CommandPool`] and given back once the bus layer has
//! reported the completion of the transaction.
//!
//! A pool creates commands lazily, up to a hard cap. Once the cap is reached and all commands are
//! checked out, [`CommandPool::try_acquire`] returns `None` and [`CommandPool::acquire`] waits
//! for a command to be released. This is what bounds the number of transactions in flight.
//!
//! The blocking flavour must never be awaited from a completion callback, as the release it waits
//! for can only come from a completion callback.

use crate::pool::wakers::WaitList;
use core::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
    task::Poll,
};
use crossbeam_queue::ArrayQueue;
use futures::prelude::*;

mod wakers;


/// Object that can be stored in a [`CommandPool`].
pub trait Recycle {
    /// Resets the transient fields of the object before it goes back to its pool.
    fn recycle(&mut self);
}

/// Bounded collection of reusable commands.
pub struct CommandPool<T> {
    /// Name of the pool, for logging purposes.
    name: &'static str,
    /// Commands that aren't checked out.
    free: ArrayQueue<T>,
    /// Number of commands that currently exist, checked out or not.
    live: AtomicUsize,
    /// Maximum value of `live`.
    cap: usize,
    /// Builds a new command.
    factory: Box<dyn Fn() -> T + Send + Sync>,
    /// Tasks waiting for a command to be released.
    available: WaitList,
    /// Tasks waiting for all commands to be released.
    idle: WaitList,
}

impl<T: Recycle> CommandPool<T> {
    /// Builds a new empty pool that will contain at most `cap` commands.
    ///
    /// # Panic
    ///
    /// Panics if `cap` is 0.
    ///
    pub fn new(
        name: &'static str,
        cap: usize,
        factory: impl Fn() -> T + Send + Sync + 'static,
    ) -> Self {
        assert_ne!(cap, 0);

        CommandPool {
            name,
            free: ArrayQueue::new(cap),
            live: AtomicUsize::new(0),
            cap,
            factory: Box::new(factory),
            available: WaitList::default(),
            idle: WaitList::default(),
        }
    }

    /// Returns the maximum number of commands of this pool.
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Returns the number of commands that have been created and not discarded.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Returns the number of commands currently checked out.
    pub fn in_use(&self) -> usize {
        self.live().saturating_sub(self.free.len())
    }

    /// Creates commands until the cap is reached.
    pub fn prefill(&self) {
        while let Some(command) = self.create() {
            if self.free.push(command).is_err() {
                self.live.fetch_sub(1, Ordering::AcqRel);
                break;
            }
        }
    }

    /// Returns a command, or `None` if the cap has been reached and no command is available.
    pub fn try_acquire(&self) -> Option<T> {
        if let Some(command) = self.free.pop() {
            return Some(command);
        }

        self.create()
    }

    /// Returns a command, waiting for one to be released if necessary.
    pub async fn acquire(&self) -> T {
        let mut waiter = self.available.waiter();
        future::poll_fn(move |cx| {
            if let Some(command) = self.try_acquire() {
                return Poll::Ready(command);
            }
            waiter.park(cx.waker());
            match self.try_acquire() {
                Some(command) => Poll::Ready(command),
                None => Poll::Pending,
            }
        })
        .await
    }

    /// Gives back a command to the pool.
    pub fn release(&self, mut command: T) {
        command.recycle();
        if self.free.push(command).is_err() {
            // More commands have been released than created.
            log::error!("{} pool overflow", self.name);
            self.live.fetch_sub(1, Ordering::AcqRel);
        }

        self.available.wake_oldest();
        if self.in_use() == 0 {
            self.idle.wake_all();
        }
    }

    /// Waits until no command is checked out.
    pub async fn wait_idle(&self) {
        let mut waiter = self.idle.waiter();
        future::poll_fn(move |cx| {
            if self.in_use() == 0 {
                return Poll::Ready(());
            }
            waiter.park(cx.waker());
            if self.in_use() == 0 {
                Poll::Ready(())
            } else {
                Poll::Pending
            }
        })
        .await
    }

    /// Destroys all the commands that aren't checked out. Returns the number of commands
    /// destroyed.
    pub fn drain(&self) -> usize {
        let mut num = 0;
        while self.free.pop().is_some() {
            self.live.fetch_sub(1, Ordering::AcqRel);
            num += 1;
        }
        if num != 0 {
            log::trace!("{} pool: discarded {} commands", self.name, num);
        }
        num
    }

    fn create(&self) -> Option<T> {
        let mut live = self.live.load(Ordering::Acquire);
        loop {
            if live >= self.cap {
                return None;
            }
            match self.live.compare_exchange_weak(
                live,
                live + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => live = actual,
            }
        }

        Some((self.factory)())
    }
}

impl<T> fmt::Debug for CommandPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("CommandPool")
            .field("name", &self.name)
            .field("live", &self.live.load(Ordering::Relaxed))
            .field("free", &self.free.len())
            .field("cap", &self.cap)
            .finish()
    }
}
