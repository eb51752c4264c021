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

//! Reassembly of fragmented datagrams.
//!
//! Each datagram being reassembled is identified by the node that sent it and by its datagram
//! label, and is tracked by a [`Rcb`]. The buffer of the datagram is allocated when the first
//! fragment arrives, with the total size announced in the fragment header. Fragments are then
//! written at the offset they announce, in whatever order they arrive.
//!
//! Datagrams that never complete are discarded by [`ReassemblyCache::age_tick`], which is
//! called periodically.

use crate::{
    buffer::{copy_into_chain, PacketChain},
    pool::{CommandPool, Recycle},
};
use fnv::FnvBuildHasher;
use fwip_ieee1394_interface::NodeId;
use hashbrown::HashMap;
use core::ops::Range;
use smallvec::SmallVec;

#[cfg(test)]
mod tests;

/// Reassembly control block. Tracks one partially-received datagram.
#[derive(Debug)]
pub struct Rcb {
    source: NodeId,
    label: u16,
    ether_type: u16,
    total_size: usize,
    /// Number of bytes not received yet.
    residual: usize,
    /// Byte ranges received so far, sorted and with adjacent ranges merged.
    received: SmallVec<[Range<usize>; 4]>,
    /// Datagram being rebuilt. `None` once taken by [`ReassemblyCache::complete`].
    buffer: Option<PacketChain>,
    /// Number of ticks before the datagram is discarded.
    expiration: u8,
}

impl Rcb {
    fn empty() -> Self {
        Rcb {
            source: NodeId::from(0),
            label: 0,
            ether_type: 0,
            total_size: 0,
            residual: 0,
            received: SmallVec::new(),
            buffer: None,
            expiration: 0,
        }
    }

    pub fn source(&self) -> NodeId {
        self.source
    }

    pub fn label(&self) -> u16 {
        self.label
    }

    pub fn ether_type(&self) -> u16 {
        self.ether_type
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn residual(&self) -> usize {
        self.residual
    }

    pub fn expiration(&self) -> u8 {
        self.expiration
    }

    fn overlaps(&self, range: &Range<usize>) -> bool {
        self.received
            .iter()
            .any(|r| range.start < r.end && r.start < range.end)
    }

    /// Records `range` as received. Must not overlap a range already received.
    fn mark_received(&mut self, range: Range<usize>) {
        if range.start == range.end {
            return;
        }
        let pos = self
            .received
            .iter()
            .position(|r| r.start > range.start)
            .unwrap_or(self.received.len());
        self.received.insert(pos, range);

        let mut merged = SmallVec::<[Range<usize>; 4]>::new();
        for r in self.received.drain(..) {
            match merged.last_mut() {
                Some(last) if last.end == r.start => last.end = r.end,
                _ => merged.push(r),
            }
        }
        self.received = merged;
    }
}

impl Recycle for Rcb {
    fn recycle(&mut self) {
        *self = Rcb::empty();
    }
}

/// Error that can happen while reassembling.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReassemblyError {
    /// All the reassembly slots are in use.
    #[error("no reassembly slot available")]
    Exhausted,
    /// A datagram with this source and label is already being reassembled.
    #[error("datagram {label} from {node} is already being reassembled")]
    Duplicate { node: NodeId, label: u16 },
    /// The fragment doesn't fit in the datagram, or overlaps bytes already received.
    #[error("fragment of {len} bytes at offset {offset} doesn't fit in the datagram")]
    Corrupt { offset: usize, len: usize },
    /// No datagram with this source and label is being reassembled.
    #[error("no datagram being reassembled with this source and label")]
    UnknownDatagram,
}

/// Whether a datagram has been fully received.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FragmentOutcome {
    Incomplete,
    Complete,
}

/// Collection of the datagrams being reassembled.
#[derive(Debug)]
pub struct ReassemblyCache {
    active: HashMap<(NodeId, u16), Rcb, FnvBuildHasher>,
    slots: CommandPool<Rcb>,
    /// Initial value of [`Rcb::expiration`].
    timeout: u8,
}

impl ReassemblyCache {
    /// Builds a cache that reassembles at most `max_slots` datagrams at a time, and discards a
    /// datagram `timeout` ticks after its first fragment.
    pub fn new(max_slots: usize, timeout: u8) -> Self {
        ReassemblyCache {
            active: HashMap::default(),
            slots: CommandPool::new("reassembly", max_slots, Rcb::empty),
            timeout,
        }
    }

    pub fn find(&self, source: NodeId, label: u16) -> Option<&Rcb> {
        self.active.get(&(source, label))
    }

    /// Starts reassembling a datagram of `total_size` bytes into `buffer`.
    pub fn begin(
        &mut self,
        source: NodeId,
        label: u16,
        ether_type: u16,
        total_size: usize,
        buffer: PacketChain,
    ) -> Result<&mut Rcb, ReassemblyError> {
        debug_assert_eq!(buffer.len(), total_size);

        let key = (source, label);
        if self.active.contains_key(&key) {
            return Err(ReassemblyError::Duplicate {
                node: source,
                label,
            });
        }

        let mut rcb = self
            .slots
            .try_acquire()
            .ok_or(ReassemblyError::Exhausted)?;
        rcb.source = source;
        rcb.label = label;
        rcb.ether_type = ether_type;
        rcb.total_size = total_size;
        rcb.residual = total_size;
        rcb.received.clear();
        rcb.buffer = Some(buffer);
        rcb.expiration = self.timeout;

        Ok(self.active.entry(key).or_insert(rcb))
    }

    /// Writes a fragment at `offset` in the datagram.
    ///
    /// A fragment that overlaps bytes already received is refused. On error, the datagram is left untouched. The caller is expected to discard it.
    pub fn accept_fragment(
        &mut self,
        source: NodeId,
        label: u16,
        offset: usize,
        payload: &[u8],
    ) -> Result<FragmentOutcome, ReassemblyError> {
        let rcb = self
            .active
            .get_mut(&(source, label))
            .ok_or(ReassemblyError::UnknownDatagram)?;

        let corrupt = ReassemblyError::Corrupt {
            offset,
            len: payload.len(),
        };
        if payload.len() > rcb.residual {
            return Err(corrupt);
        }
        let range = match offset.checked_add(payload.len()) {
            Some(end) if end <= rcb.total_size => offset..end,
            _ => return Err(corrupt),
        };
        if rcb.overlaps(&range) {
            return Err(corrupt);
        }

        let buffer = rcb
            .buffer
            .as_mut()
            .ok_or(ReassemblyError::UnknownDatagram)?;
        copy_into_chain(buffer, offset, payload).map_err(|_| corrupt)?;
        rcb.residual -= payload.len();
        rcb.mark_received(range);

        if rcb.residual == 0 {
            Ok(FragmentOutcome::Complete)
        } else {
            Ok(FragmentOutcome::Incomplete)
        }
    }

    /// Takes the buffer of a fully-received datagram, along with its ether type.
    ///
    /// Returns `None` if the datagram isn't complete. The entry must then be destroyed with
    /// [`ReassemblyCache::release`].
    pub fn complete(&mut self, source: NodeId, label: u16) -> Option<(PacketChain, u16)> {
        let rcb = self.active.get_mut(&(source, label))?;
        if rcb.residual != 0 {
            return None;
        }
        let buffer = rcb.buffer.take()?;
        Some((buffer, rcb.ether_type))
    }

    /// Destroys an entry and gives its slot back.
    ///
    /// If `free_buffer` is false, the buffer, if it hasn't been taken, is returned.
    pub fn release(
        &mut self,
        source: NodeId,
        label: u16,
        free_buffer: bool,
    ) -> Result<Option<PacketChain>, ReassemblyError> {
        let mut rcb = self
            .active
            .remove(&(source, label))
            .ok_or(ReassemblyError::UnknownDatagram)?;
        let buffer = rcb.buffer.take();
        self.slots.release(rcb);
        Ok(if free_buffer { None } else { buffer })
    }

    /// Decrements the expiration of every entry, and discards the ones that reach zero.
    ///
    /// Returns the number of datagrams discarded.
    pub fn age_tick(&mut self) -> usize {
        let mut expired = SmallVec::<[(NodeId, u16); 8]>::new();
        for (key, rcb) in self.active.iter_mut() {
            rcb.expiration = rcb.expiration.saturating_sub(1);
            if rcb.expiration == 0 {
                expired.push(*key);
            }
        }

        for (source, label) in &expired {
            log::debug!(
                "reassembly of datagram {} from {} timed out",
                label,
                source
            );
            let _ = self.release(*source, *label, true);
        }

        expired.len()
    }

    /// Number of datagrams being reassembled.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Discards all the datagrams being reassembled. Returns the number of datagrams discarded.
    pub fn clear(&mut self) -> usize {
        let num = self.active.len();
        for (_, rcb) in self.active.drain() {
            self.slots.release(rcb);
        }
        num
    }

    /// Destroys the free slots.
    pub fn drain_slots(&mut self) -> usize {
        self.slots.drain()
    }
}
