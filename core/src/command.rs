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

//! Commands exchanged with the bus layer.
//!
//! A command is checked out of its pool by the transmit path, filled, and handed over by value to
//! the [`Bus`](crate::bus::Bus). The bus gives it back by value when reporting the completion,
//! at which point the command returns to its pool.

use crate::{
    buffer::{copy_from_chain, ChainError, PacketChain},
    pool::Recycle,
};
use core::{
    fmt,
    sync::atomic::{AtomicUsize, Ordering},
};
use fwip_ieee1394_interface::{Channel, DeviceRef, FifoAddress, Speed};
use spinning_top::Spinlock;
use std::sync::Arc;

/// Block write to the unicast FIFO of a peer.
pub struct UnicastWriteCommand {
    device: Option<DeviceRef>,
    address: FifoAddress,
    speed: Speed,
    generation: u32,
    /// Scratch buffer containing the encapsulation header and the payload.
    buffer: Vec<u8>,
    /// Packet this command is a fragment of. Holds one reference.
    wrapper: Option<Arc<PacketWrapper>>,
}

impl UnicastWriteCommand {
    pub(crate) fn new(capacity: usize) -> Self {
        UnicastWriteCommand {
            device: None,
            address: FifoAddress::default(),
            speed: Speed::S100,
            generation: 0,
            buffer: Vec::with_capacity(capacity),
            wrapper: None,
        }
    }

    /// Sets the target of the write and returns a zeroed buffer of `len` bytes to fill.
    pub(crate) fn prepare(
        &mut self,
        device: DeviceRef,
        address: FifoAddress,
        speed: Speed,
        generation: u32,
        len: usize,
    ) -> &mut [u8] {
        self.device = Some(device);
        self.address = address;
        self.speed = speed;
        self.generation = generation;
        self.buffer.clear();
        self.buffer.resize(len, 0);
        &mut self.buffer
    }

    pub(crate) fn attach_wrapper(&mut self, wrapper: &Arc<PacketWrapper>) {
        debug_assert!(self.wrapper.is_none());
        wrapper.retain();
        self.wrapper = Some(wrapper.clone());
    }

    pub(crate) fn take_wrapper(&mut self) -> Option<Arc<PacketWrapper>> {
        self.wrapper.take()
    }

    /// Device to write to.
    pub fn device(&self) -> Option<DeviceRef> {
        self.device
    }

    /// Address of the FIFO of the device.
    pub fn address(&self) -> FifoAddress {
        self.address
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    /// Bus generation the target was resolved in.
    pub fn generation(&self) -> u32 {
        self.generation
    }

    /// Bytes to write.
    pub fn payload(&self) -> &[u8] {
        &self.buffer
    }
}

impl Recycle for UnicastWriteCommand {
    fn recycle(&mut self) {
        debug_assert!(self.wrapper.is_none());
        self.device = None;
        self.buffer.clear();
        self.wrapper = None;
    }
}

impl fmt::Debug for UnicastWriteCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("UnicastWriteCommand")
            .field("device", &self.device)
            .field("address", &self.address)
            .field("len", &self.buffer.len())
            .finish()
    }
}

/// Asynchronous stream packet.
pub struct StreamWriteCommand {
    channel: Channel,
    speed: Speed,
    /// Scratch buffer containing the GASP header, the encapsulation header and the payload.
    buffer: Vec<u8>,
}

impl StreamWriteCommand {
    pub(crate) fn new(capacity: usize) -> Self {
        StreamWriteCommand {
            channel: Channel::DEFAULT_BROADCAST,
            speed: Speed::S100,
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Sets the channel and speed and returns a zeroed buffer of `len` bytes to fill.
    pub(crate) fn prepare(&mut self, channel: Channel, speed: Speed, len: usize) -> &mut [u8] {
        self.channel = channel;
        self.speed = speed;
        self.buffer.clear();
        self.buffer.resize(len, 0);
        &mut self.buffer
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    /// Payload of the stream packet, GASP header included. The stream header quadlet is added
    /// by the bus layer, with a tag of [`GASP_TAG`](crate::wire::gasp::GASP_TAG).
    pub fn payload(&self) -> &[u8] {
        &self.buffer
    }
}

impl Recycle for StreamWriteCommand {
    fn recycle(&mut self) {
        self.channel = Channel::DEFAULT_BROADCAST;
        self.buffer.clear();
    }
}

impl fmt::Debug for StreamWriteCommand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("StreamWriteCommand")
            .field("channel", &self.channel)
            .field("len", &self.buffer.len())
            .finish()
    }
}

/// Keeps a packet alive while its fragments are in flight.
///
/// The transmit path holds one reference while it issues the fragments, and each fragment's
/// command holds one more until its completion. Whoever drops the last reference, as reported by
/// [`PacketWrapper::release_if_last`], must give the wrapper back to its pool. After calling
/// `release_if_last`, a holder must not touch the wrapper anymore.
pub struct PacketWrapper {
    holders: AtomicUsize,
    packet: Spinlock<Option<PacketChain>>,
}

impl PacketWrapper {
    pub(crate) fn new() -> Self {
        PacketWrapper {
            holders: AtomicUsize::new(0),
            packet: Spinlock::new(None),
        }
    }

    /// Stores the packet and sets the number of holders to one.
    pub(crate) fn attach(&self, packet: PacketChain) {
        *self.packet.lock() = Some(packet);
        self.holders.store(1, Ordering::Release);
    }

    /// Adds a holder.
    pub(crate) fn retain(&self) {
        self.holders.fetch_add(1, Ordering::AcqRel);
    }

    /// Removes a holder. Returns true if it was the last one.
    pub(crate) fn release_if_last(&self) -> bool {
        let previous = self.holders.fetch_sub(1, Ordering::AcqRel);
        debug_assert_ne!(previous, 0);
        previous == 1
    }

    /// Copies `dst.len()` bytes of the packet, starting at `offset`, into `dst`.
    pub(crate) fn read(&self, offset: usize, dst: &mut [u8]) -> Result<(), ChainError> {
        let len = dst.len();
        let packet = self.packet.lock();
        match packet.as_ref() {
            Some(packet) => copy_from_chain(packet, offset, dst, len).map(|_| ()),
            None => Err(ChainError::OutOfBounds {
                offset,
                len,
                chain_len: 0,
            }),
        }
    }

    /// Takes the packet back, for example to requeue it.
    pub(crate) fn take_packet(&self) -> Option<PacketChain> {
        self.packet.lock().take()
    }

    pub(crate) fn holders(&self) -> usize {
        self.holders.load(Ordering::Acquire)
    }
}

impl Recycle for Arc<PacketWrapper> {
    fn recycle(&mut self) {
        self.packet.lock().take();
        self.holders.store(0, Ordering::Release);
    }
}

impl fmt::Debug for PacketWrapper {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PacketWrapper")
            .field("holders", &self.holders())
            .finish()
    }
}
