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

//! Tasks waiting for a pool to change state.
//!
//! Waiters are woken up in the order in which they started waiting.

use core::{fmt, task::Waker};
use slab::Slab;
use spinning_top::Spinlock;

#[derive(Default)]
pub struct WaitList {
    inner: Spinlock<Inner>,
}

#[derive(Default)]
struct Inner {
    waiters: Slab<Slot>,
    next_ticket: u64,
}

struct Slot {
    /// Position in the arrival order. Assigned on the first call to `park`.
    ticket: Option<u64>,
    waker: Option<Waker>,
}

impl WaitList {
    pub fn waiter(&self) -> Waiter {
        let index = self.inner.lock().waiters.insert(Slot {
            ticket: None,
            waker: None,
        });
        Waiter { list: self, index }
    }

    /// Wakes up the waiter that has been parked the longest, if any.
    pub fn wake_oldest(&self) {
        let waker = {
            let mut inner = self.inner.lock();
            Self::take_oldest(&mut inner)
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    pub fn wake_all(&self) {
        let wakers = {
            let mut inner = self.inner.lock();
            inner
                .waiters
                .iter_mut()
                .filter_map(|(_, slot)| slot.waker.take())
                .collect::<Vec<_>>()
        };
        for waker in wakers {
            waker.wake();
        }
    }

    fn take_oldest(inner: &mut Inner) -> Option<Waker> {
        let index = inner
            .waiters
            .iter()
            .filter(|(_, slot)| slot.waker.is_some())
            .min_by_key(|(_, slot)| slot.ticket)
            .map(|(index, _)| index)?;
        inner.waiters[index].waker.take()
    }
}

impl fmt::Debug for WaitList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("WaitList")
            .field("waiters", &inner.waiters.len())
            .finish()
    }
}

/// Entry in a [`WaitList`]. Removed from the list when dropped.
pub struct Waiter<'a> {
    list: &'a WaitList,
    index: usize,
}

impl<'a> Waiter<'a> {
    /// Stores the waker to invoke when this waiter's turn comes.
    pub fn park(&mut self, waker: &Waker) {
        let mut inner = self.list.inner.lock();
        let ticket = match inner.waiters[self.index].ticket {
            Some(ticket) => ticket,
            None => {
                let ticket = inner.next_ticket;
                inner.next_ticket += 1;
                ticket
            }
        };
        let slot = &mut inner.waiters[self.index];
        slot.ticket = Some(ticket);
        match &slot.waker {
            Some(current) if current.will_wake(waker) => {}
            _ => slot.waker = Some(waker.clone()),
        }
    }
}

impl<'a> fmt::Debug for Waiter<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("Waiter").field(&self.index).finish()
    }
}

impl<'a> Drop for Waiter<'a> {
    fn drop(&mut self) {
        let handoff = {
            let mut inner = self.list.inner.lock();
            let slot = inner.waiters.remove(self.index);
            // A parked waiter whose waker was taken had been woken up. Hand the wake up over
            // to the next one in line.
            if slot.ticket.is_some() && slot.waker.is_none() {
                WaitList::take_oldest(&mut inner)
            } else {
                None
            }
        };
        if let Some(waker) = handoff {
            waker.wake();
        }
    }
}
