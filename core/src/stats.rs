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

/// Counters of an interface.
///
/// Errors are always counted twice: once in [`Statistics::output_errors`] or
/// [`Statistics::input_errors`], and once in the counter of the specific cause.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Statistics {
    /// Datagrams handed over to the bus, fragmented or not.
    pub output_packets: u64,
    /// Datagrams that the network stack asked to send and that were dropped.
    pub output_errors: u64,
    /// Datagrams delivered to the network stack.
    pub input_packets: u64,
    /// Packets received from the bus and dropped.
    pub input_errors: u64,

    pub unicast_sent: u64,
    pub broadcast_sent: u64,
    pub unicast_received: u64,
    pub broadcast_received: u64,

    /// Fragments written to the bus.
    pub fragments_sent: u64,
    /// Fragments received from the bus, including the ones later discarded.
    pub fragments_received: u64,
    pub datagrams_reassembled: u64,
    /// Partially-received datagrams discarded by the watchdog.
    pub reassembly_timeouts: u64,
    /// First fragments dropped because every reassembly slot was in use.
    pub reassembly_exhausted: u64,
    /// First fragments dropped because the same datagram was already being reassembled.
    pub reassembly_duplicates: u64,
    /// Fragments that belong to no datagram being reassembled.
    pub late_fragments: u64,
    /// Fragments that don't fit in their datagram.
    pub corrupt_fragments: u64,

    pub unicast_commands_exhausted: u64,
    pub stream_commands_exhausted: u64,
    pub packet_wrappers_exhausted: u64,

    /// Stream packets with a tag other than the GASP tag.
    pub gasp_bad_tag: u64,
    /// Stream packets too short to contain the GASP and encapsulation headers.
    pub gasp_too_short: u64,
    /// Stream packets with a specifier ID or version other than IP over 1394.
    pub gasp_bad_specifier: u64,
    /// Stream packets sent from another bus.
    pub gasp_remote_bus: u64,
    /// Stream packets carrying a fragment.
    pub gasp_fragmented: u64,

    /// Writes that the bus layer refused because it ran out of transaction labels.
    pub stalls: u64,
    /// Stalled packets dropped because the transmit queue was too long.
    pub queue_overflows: u64,
    /// Number of times the network stack was asked to service its transmit queue.
    pub queue_service_requests: u64,
    pub host_unreachable: u64,
    /// Datagrams with an ether type that can't be sent or received.
    pub unsupported_ether_type: u64,
    pub oversized: u64,

    pub arp_received: u64,
    pub mcap_received: u64,
    pub mcap_sent: u64,
    /// Neighbor discovery options consumed from inbound IPv6 packets.
    pub ndp_options_consumed: u64,

    /// Size of the largest datagram sent.
    pub largest_packet_sent: usize,
}
