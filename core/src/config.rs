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

//! Configuration of an interface.

use fwip_ieee1394_interface::Channel;

/// Tunables of an [`FwIpInterface`](crate::FwIpInterface).
///
/// All durations are expressed in watchdog ticks. The embedder is expected to call
/// [`FwIpInterface::watchdog_tick`](crate::FwIpInterface::watchdog_tick) once per second.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Largest datagram accepted from the network stack or from the bus.
    pub mtu: usize,
    /// Size of the unicast FIFO registered when the interface starts.
    pub fifo_size: usize,
    /// Maximum number of unicast writes in flight.
    pub max_unicast_commands: usize,
    /// Maximum number of stream writes in flight.
    pub max_stream_commands: usize,
    /// Maximum number of packets whose fragments are in flight.
    pub max_packet_wrappers: usize,
    /// Maximum number of datagrams being reassembled at the same time.
    pub max_reassembly_slots: usize,
    /// Ticks after which a partially received datagram is discarded.
    pub reassembly_timeout: u8,
    /// When fewer than this many commands are outstanding, the network stack is asked to push
    /// more packets.
    pub low_water_mark: usize,
    /// Minimum capacity of the transmit queue of the network stack. Packets that stall while
    /// the queue is longer than the current capacity are dropped.
    pub transmit_queue_size: usize,
    /// Channel of broadcast datagrams.
    pub broadcast_channel: Channel,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mtu: 1500,
            fifo_size: 4096,
            max_unicast_commands: 127,
            max_stream_commands: 8,
            max_packet_wrappers: 127,
            max_reassembly_slots: 127,
            reassembly_timeout: 3,
            low_water_mark: 48,
            transmit_queue_size: 1200,
            broadcast_channel: Channel::DEFAULT_BROADCAST,
        }
    }
}
