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

//! Collaborators of an interface.
//!
//! An [`FwIpInterface`](crate::FwIpInterface) sits between two collaborators that it doesn't
//! implement:
//!
//! - The [`Bus`], which performs the actual transactions on the 1394 bus.
//! - The [`NetworkStack`], which produces outgoing datagrams and consumes incoming ones.
//!
//! Commands are handed over to the bus by value. Once a transaction is over, the bus must give
//! the command back by calling
//! [`FwIpInterface::on_unicast_write_complete`](crate::FwIpInterface::on_unicast_write_complete)
//! or [`FwIpInterface::on_stream_write_complete`](crate::FwIpInterface::on_stream_write_complete).
//! Inbound packets are reported with [`FwIpInterface::on_unicast`](crate::FwIpInterface::on_unicast)
//! and [`FwIpInterface::on_broadcast_stream`](crate::FwIpInterface::on_broadcast_stream).

use crate::{
    buffer::PacketChain,
    command::{StreamWriteCommand, UnicastWriteCommand},
};
use fwip_ieee1394_interface::{Channel, Eui64, FifoAddress, LinkAddress, NodeId, Speed, StreamHandle};

/// Identity and capabilities of the local node, as known by the bus layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct LocalNode {
    /// Node ID in the current bus generation.
    pub node_id: NodeId,
    /// Incremented by the bus layer at each bus reset.
    pub generation: u32,
    pub eui64: Eui64,
    /// The local link layer accepts block writes of up to `2^max_payload_log2` bytes.
    pub max_payload_log2: u8,
    pub speed: Speed,
}

/// Outcome of a transaction, reported along with the command.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    Success,
    /// The target was busy. The transaction wasn't retried.
    Stall,
    Failed,
}

/// Reason why the bus refused a command.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    /// Every transaction label is in use. The submission can be retried later.
    #[error("out of transaction labels")]
    OutOfTransactionLabels,
    #[error("submission failed")]
    Failed,
}

/// Command refused by the bus, given back to the caller.
#[derive(Debug)]
pub struct Rejected<T> {
    pub command: T,
    pub error: SubmitError,
}

/// Error while reserving a resource of the bus layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    #[error("no free address range of {size} bytes")]
    AddressSpaceExhausted { size: usize },
    #[error("cannot listen on channel {0}")]
    ChannelUnavailable(Channel),
    #[error("bus layer is shut down")]
    Shutdown,
}

/// Access to the 1394 bus.
pub trait Bus {
    /// Returns the identity of the local node in the current bus generation.
    fn local_node(&self) -> LocalNode;

    /// Starts a block write. On success, the command must later be passed to
    /// [`FwIpInterface::on_unicast_write_complete`](crate::FwIpInterface::on_unicast_write_complete).
    fn submit_unicast_write(
        &self,
        command: UnicastWriteCommand,
    ) -> Result<(), Rejected<UnicastWriteCommand>>;

    /// Starts an asynchronous stream write. On success, the command must later be passed to
    /// [`FwIpInterface::on_stream_write_complete`](crate::FwIpInterface::on_stream_write_complete).
    fn submit_stream_write(
        &self,
        command: StreamWriteCommand,
    ) -> Result<(), Rejected<StreamWriteCommand>>;

    /// Reserves an address range in which peers write unicast datagrams.
    fn allocate_fifo(&self, size: usize) -> Result<FifoAddress, BusError>;

    fn release_fifo(&self, address: FifoAddress);

    /// Starts receiving the stream packets sent on `channel`.
    fn open_stream_listener(&self, channel: Channel) -> Result<StreamHandle, BusError>;

    fn close_stream_listener(&self, handle: StreamHandle);
}

/// Datagram delivered to the network stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub ether_type: u16,
    /// Node that sent the datagram.
    pub source: NodeId,
    /// True if the datagram was received on a stream channel.
    pub broadcast: bool,
    pub payload: PacketChain,
}

/// Datagram that the network stack wants to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    pub destination: LinkAddress,
    pub ether_type: u16,
    pub payload: PacketChain,
}

/// Reason why an outbound datagram was dropped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutputError {
    #[error("interface isn't running")]
    NotRunning,
    #[error("destination is unreachable")]
    HostUnreachable,
    #[error("datagram too large")]
    TooLarge,
    #[error("no command available")]
    NoCommand,
    #[error("bus failure")]
    BusFailure,
    #[error("unsupported ether type {0:#06x}")]
    UnsupportedEtherType(u16),
    #[error("transmit queue overflow")]
    QueueOverflow,
}

/// Outcome of [`FwIpInterface::output`](crate::FwIpInterface::output).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputStatus {
    /// The datagram has been handed over to the bus.
    Sent,
    /// The bus is congested. The frame must be queued again and retried the next time
    /// [`NetworkStack::service_transmit_queue`] is called.
    Stall(OutboundFrame),
    Dropped(OutputError),
}

/// Network stack on top of the interface.
pub trait NetworkStack {
    /// Delivers a datagram received from the bus.
    fn input(&self, frame: InboundFrame);

    /// Number of datagrams waiting in the transmit queue of the stack.
    fn transmit_queue_len(&self) -> usize {
        0
    }

    /// Called when the interface can accept more datagrams. The stack is expected to call
    /// [`FwIpInterface::output`](crate::FwIpInterface::output) for its queued datagrams.
    fn service_transmit_queue(&self) {}
}

impl<'a, T: ?Sized + Bus> Bus for &'a T {
    fn local_node(&self) -> LocalNode {
        (**self).local_node()
    }

    fn submit_unicast_write(
        &self,
        command: UnicastWriteCommand,
    ) -> Result<(), Rejected<UnicastWriteCommand>> {
        (**self).submit_unicast_write(command)
    }

    fn submit_stream_write(
        &self,
        command: StreamWriteCommand,
    ) -> Result<(), Rejected<StreamWriteCommand>> {
        (**self).submit_stream_write(command)
    }

    fn allocate_fifo(&self, size: usize) -> Result<FifoAddress, BusError> {
        (**self).allocate_fifo(size)
    }

    fn release_fifo(&self, address: FifoAddress) {
        (**self).release_fifo(address)
    }

    fn open_stream_listener(&self, channel: Channel) -> Result<StreamHandle, BusError> {
        (**self).open_stream_listener(channel)
    }

    fn close_stream_listener(&self, handle: StreamHandle) {
        (**self).close_stream_listener(handle)
    }
}

impl<'a, T: ?Sized + NetworkStack> NetworkStack for &'a T {
    fn input(&self, frame: InboundFrame) {
        (**self).input(frame)
    }

    fn transmit_queue_len(&self) -> usize {
        (**self).transmit_queue_len()
    }

    fn service_transmit_queue(&self) {
        (**self).service_transmit_queue()
    }
}
