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

//! Simulated 1394 bus segment, for running several interfaces within a single process.
//!
//! A [`Segment`] holds the state of every node. Each node is given a [`SimBus`], which implements
//! the [`Bus`] trait by queuing the writes it is asked to perform. Nothing is delivered until
//! [`Segment::pump`] is called, which hands the queued writes over to the interfaces of the
//! target nodes and then reports their completion to the interface of the sender.
//!
//! Node `n` has physical ID `n`, and is seen by the other nodes as the device whose reference is
//! `n + 1`.

// Implementation notes:
//
// Interfaces call the `SimBus` from within their own entry points, and `pump` calls these entry
// points. The segment lock is therefore never held while calling an interface.

use fwip_core::{
    bus::{Bus, BusError, InboundFrame, LocalNode, NetworkStack, Rejected, SubmitError},
    command::{StreamWriteCommand, UnicastWriteCommand},
    resolve::DeviceInfo,
    wire::gasp::{StreamHeader, ASYNC_STREAM_TCODE, GASP_TAG, STREAM_HEADER_LEN},
    FwIpInterface, TransactionStatus,
};
use fwip_ieee1394_interface::{
    Channel, DeviceRef, Eui64, FifoAddress, NodeId, Speed, StreamHandle,
};
use parking_lot::Mutex;
use std::{
    collections::VecDeque,
    convert::TryFrom as _,
    fmt,
    num::NonZeroU64,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

#[cfg(test)]
mod tests;

/// Address at which every node registers its unicast FIFO.
pub const FIFO_ADDRESS: FifoAddress = FifoAddress {
    hi: 0xffff,
    lo: 0xf000_0000,
};

/// Number of transaction labels of a node.
pub const TRANSACTION_LABELS: usize = 64;

/// Collection of nodes connected to the same bus.
#[derive(Clone)]
pub struct Segment {
    state: Arc<Mutex<SegmentState>>,
}

struct SegmentState {
    nodes: Vec<NodeState>,
    /// Writes submitted and not delivered yet, in submission order.
    pending: VecDeque<Pending>,
    /// Maximum number of unicast writes in flight per node.
    max_in_flight: usize,
    generation: u32,
    next_handle: u64,
}

struct NodeState {
    eui64: Eui64,
    max_payload_log2: u8,
    speed: Speed,
    /// False once the node has been disconnected from the segment.
    connected: bool,
    /// Size of the registered unicast FIFO, if any.
    fifo_size: Option<usize>,
    listeners: Vec<(Channel, StreamHandle)>,
    in_flight: usize,
}

enum Pending {
    Unicast {
        from: usize,
        command: UnicastWriteCommand,
    },
    Stream {
        from: usize,
        command: StreamWriteCommand,
    },
}

impl Segment {
    /// Builds an empty segment.
    pub fn new() -> Self {
        Segment {
            state: Arc::new(Mutex::new(SegmentState {
                nodes: Vec::new(),
                pending: VecDeque::new(),
                max_in_flight: TRANSACTION_LABELS,
                generation: 1,
                next_handle: 0,
            })),
        }
    }

    /// Limits the number of unicast writes that each node can have in flight. Further writes are
    /// rejected with [`SubmitError::OutOfTransactionLabels`].
    pub fn set_max_in_flight(&self, max: usize) {
        self.state.lock().max_in_flight = max;
    }

    /// Connects a new node and returns its bus.
    pub fn add_node(&self, eui64: Eui64, max_payload_log2: u8, speed: Speed) -> SimBus {
        let mut state = self.state.lock();
        let index = state.nodes.len();
        assert!(index < 63, "too many nodes on the segment");
        state.nodes.push(NodeState {
            eui64,
            max_payload_log2,
            speed,
            connected: true,
            fifo_size: None,
            listeners: Vec::new(),
            in_flight: 0,
        });
        log::debug!("node {} connected as {}", eui64, NodeId::local(index as u8));

        SimBus {
            state: self.state.clone(),
            index,
        }
    }

    /// Disconnects a node. Writes to that node now fail, and it no longer receives stream
    /// packets.
    pub fn disconnect(&self, index: usize) {
        let mut state = self.state.lock();
        if let Some(node) = state.nodes.get_mut(index) {
            node.connected = false;
            log::debug!("node {} disconnected", node.eui64);
        }
    }

    /// Starts a new bus generation. Writes submitted during the previous one fail.
    pub fn bus_reset(&self) {
        let mut state = self.state.lock();
        state.generation = state.generation.wrapping_add(1);
        log::debug!("bus reset, generation {}", state.generation);
    }

    /// Number of nodes ever connected.
    pub fn node_count(&self) -> usize {
        self.state.lock().nodes.len()
    }

    /// Number of writes waiting to be delivered.
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Returns what node `index` looks like from the other nodes, or `None` if it isn't
    /// connected.
    pub fn device_info(&self, index: usize) -> Option<DeviceInfo> {
        let state = self.state.lock();
        let node = state.nodes.get(index).filter(|n| n.connected)?;
        Some(DeviceInfo {
            eui64: node.eui64,
            device: device_ref(index),
            is_mac_peer: true,
            max_payload_log2: node.max_payload_log2,
            max_speed: node.speed,
        })
    }

    /// Reports every connected node to the interfaces of all the other nodes. `interfaces[n]`
    /// must be the interface of node `n`.
    pub fn attach_all<TStack>(&self, interfaces: &[&FwIpInterface<SimBus, TStack>])
    where
        TStack: NetworkStack,
    {
        for (index, iface) in interfaces.iter().enumerate() {
            for other in (0..interfaces.len()).filter(|o| *o != index) {
                if let Some(info) = self.device_info(other) {
                    iface.attach_device(info);
                }
            }
        }
    }

    /// Delivers the queued writes until there is none left, including the ones submitted while
    /// delivering. `interfaces[n]` must be the interface of node `n`.
    ///
    /// Returns the number of writes processed.
    pub fn pump<TStack>(&self, interfaces: &[&FwIpInterface<SimBus, TStack>]) -> usize
    where
        TStack: NetworkStack,
    {
        let mut processed = 0;
        loop {
            let next = self.state.lock().pending.pop_front();
            match next {
                Some(Pending::Unicast { from, command }) => {
                    let status = self.deliver_unicast(interfaces, from, &command);
                    self.state.lock().nodes[from].in_flight -= 1;
                    if let Some(iface) = interfaces.get(from) {
                        iface.on_unicast_write_complete(command, status);
                    }
                }
                Some(Pending::Stream { from, command }) => {
                    self.deliver_stream(interfaces, from, &command);
                    if let Some(iface) = interfaces.get(from) {
                        iface.on_stream_write_complete(command, TransactionStatus::Success);
                    }
                }
                None => return processed,
            }
            processed += 1;
        }
    }

    fn deliver_unicast<TStack>(
        &self,
        interfaces: &[&FwIpInterface<SimBus, TStack>],
        from: usize,
        command: &UnicastWriteCommand,
    ) -> TransactionStatus
    where
        TStack: NetworkStack,
    {
        let target = {
            let state = self.state.lock();
            let target = command
                .device()
                .and_then(|d| usize::try_from(d.raw() - 1).ok())
                .filter(|t| *t < state.nodes.len());
            let target = match target {
                Some(t) => t,
                None => return TransactionStatus::Failed,
            };

            let node = &state.nodes[target];
            if !node.connected || command.generation() != state.generation {
                return TransactionStatus::Failed;
            }
            if command.address() != FIFO_ADDRESS
                || node.fifo_size.map_or(true, |size| command.payload().len() > size)
            {
                log::debug!("write from {} to {} rejected", from, target);
                return TransactionStatus::Failed;
            }
            target
        };

        match interfaces.get(target) {
            Some(iface) => {
                log::trace!("{} bytes from {} to {}", command.payload().len(), from, target);
                iface.on_unicast(NodeId::local(from as u8), command.payload());
                TransactionStatus::Success
            }
            None => TransactionStatus::Failed,
        }
    }

    fn deliver_stream<TStack>(
        &self,
        interfaces: &[&FwIpInterface<SimBus, TStack>],
        from: usize,
        command: &StreamWriteCommand,
    ) where
        TStack: NetworkStack,
    {
        let channel = command.channel();
        let targets = {
            let state = self.state.lock();
            state
                .nodes
                .iter()
                .enumerate()
                .filter(|(index, node)| {
                    *index != from
                        && node.connected
                        && node.listeners.iter().any(|(c, _)| *c == channel)
                })
                .map(|(index, _)| index)
                .collect::<Vec<_>>()
        };

        let mut packet = vec![0; STREAM_HEADER_LEN + command.payload().len()];
        StreamHeader {
            data_length: command.payload().len() as u16,
            tag: GASP_TAG,
            channel: channel.number(),
            tcode: ASYNC_STREAM_TCODE,
            sy: 0,
        }
        .write(&mut packet[..STREAM_HEADER_LEN]);
        packet[STREAM_HEADER_LEN..].copy_from_slice(command.payload());

        for target in targets {
            if let Some(iface) = interfaces.get(target) {
                iface.on_broadcast_stream(&packet);
            }
        }
    }
}

impl Default for Segment {
    fn default() -> Self {
        Segment::new()
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Segment")
            .field("nodes", &state.nodes.len())
            .field("pending", &state.pending.len())
            .field("generation", &state.generation)
            .finish()
    }
}

fn device_ref(index: usize) -> DeviceRef {
    DeviceRef::from(NonZeroU64::new(index as u64 + 1).unwrap_or_else(|| unreachable!()))
}

/// Access to a [`Segment`] from one of its nodes.
#[derive(Clone)]
pub struct SimBus {
    state: Arc<Mutex<SegmentState>>,
    index: usize,
}

impl SimBus {
    /// Index of the node in its segment.
    pub fn index(&self) -> usize {
        self.index
    }
}

impl fmt::Debug for SimBus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_tuple("SimBus").field(&self.index).finish()
    }
}

impl Bus for SimBus {
    fn local_node(&self) -> LocalNode {
        let state = self.state.lock();
        let node = &state.nodes[self.index];
        LocalNode {
            node_id: NodeId::local(self.index as u8),
            generation: state.generation,
            eui64: node.eui64,
            max_payload_log2: node.max_payload_log2,
            speed: node.speed,
        }
    }

    fn submit_unicast_write(
        &self,
        command: UnicastWriteCommand,
    ) -> Result<(), Rejected<UnicastWriteCommand>> {
        let mut state = self.state.lock();
        let max_in_flight = state.max_in_flight;
        let node = &mut state.nodes[self.index];
        if !node.connected {
            return Err(Rejected {
                command,
                error: SubmitError::Failed,
            });
        }
        if node.in_flight >= max_in_flight {
            return Err(Rejected {
                command,
                error: SubmitError::OutOfTransactionLabels,
            });
        }

        node.in_flight += 1;
        state.pending.push_back(Pending::Unicast {
            from: self.index,
            command,
        });
        Ok(())
    }

    fn submit_stream_write(
        &self,
        command: StreamWriteCommand,
    ) -> Result<(), Rejected<StreamWriteCommand>> {
        let mut state = self.state.lock();
        if !state.nodes[self.index].connected {
            return Err(Rejected {
                command,
                error: SubmitError::Failed,
            });
        }
        state.pending.push_back(Pending::Stream {
            from: self.index,
            command,
        });
        Ok(())
    }

    fn allocate_fifo(&self, size: usize) -> Result<FifoAddress, BusError> {
        let mut state = self.state.lock();
        let node = &mut state.nodes[self.index];
        if node.fifo_size.is_some() {
            return Err(BusError::AddressSpaceExhausted { size });
        }
        node.fifo_size = Some(size);
        Ok(FIFO_ADDRESS)
    }

    fn release_fifo(&self, address: FifoAddress) {
        debug_assert_eq!(address, FIFO_ADDRESS);
        self.state.lock().nodes[self.index].fifo_size = None;
    }

    fn open_stream_listener(&self, channel: Channel) -> Result<StreamHandle, BusError> {
        let mut state = self.state.lock();
        state.next_handle += 1;
        let handle = StreamHandle::from(
            NonZeroU64::new(state.next_handle).unwrap_or_else(|| unreachable!()),
        );
        state.nodes[self.index].listeners.push((channel, handle));
        Ok(handle)
    }

    fn close_stream_listener(&self, handle: StreamHandle) {
        let mut state = self.state.lock();
        state.nodes[self.index]
            .listeners
            .retain(|(_, h)| *h != handle);
    }
}

/// Network stack that stores the datagrams it receives.
#[derive(Debug, Default)]
pub struct RecordingStack {
    frames: Mutex<Vec<InboundFrame>>,
    queue_len: AtomicUsize,
    serviced: AtomicUsize,
}

impl RecordingStack {
    pub fn new() -> Self {
        RecordingStack::default()
    }

    /// Removes and returns the datagrams received so far.
    pub fn take_frames(&self) -> Vec<InboundFrame> {
        std::mem::take(&mut *self.frames.lock())
    }

    /// Sets the length of the transmit queue reported to the interface.
    pub fn set_queue_len(&self, len: usize) {
        self.queue_len.store(len, Ordering::Relaxed);
    }

    /// Number of times the interface asked for the transmit queue to be serviced.
    pub fn serviced(&self) -> usize {
        self.serviced.load(Ordering::Relaxed)
    }
}

impl NetworkStack for RecordingStack {
    fn input(&self, frame: InboundFrame) {
        self.frames.lock().push(frame);
    }

    fn transmit_queue_len(&self) -> usize {
        self.queue_len.load(Ordering::Relaxed)
    }

    fn service_transmit_queue(&self) {
        self.serviced.fetch_add(1, Ordering::Relaxed);
    }
}
