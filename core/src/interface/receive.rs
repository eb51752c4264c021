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

//! Receive path.

use super::FwIpInterface;
use crate::{
    buffer::PacketChain,
    bus::{Bus, InboundFrame, NetworkStack},
    reassembly::{FragmentOutcome, ReassemblyError},
    stats::Statistics,
    wire::{
        arp::ArpPacket,
        encap::{EncapsulationHeader, FragmentHeader, FragmentPosition, UNFRAGMENTED_HEADER_LEN},
        gasp::{GaspHeader, StreamHeader, GASP_HEADER_LEN, GASP_TAG, STREAM_HEADER_LEN},
        mcap::McapMessage,
        ndp, ETHER_TYPE_ARP, ETHER_TYPE_IPV4, ETHER_TYPE_IPV6, ETHER_TYPE_MCAP, IPV4_HEADER_LEN,
    },
};
use core::cmp;
use fwip_ieee1394_interface::NodeId;

impl<TBus, TStack> FwIpInterface<TBus, TStack>
where
    TBus: Bus,
    TStack: NetworkStack,
{
    /// Handles a block write into the unicast FIFO of this node. `source` is the node that
    /// performed the write.
    pub fn on_unicast(&self, source: NodeId, payload: &[u8]) {
        let _serialized = self.inner.lock();
        if !self.with_inner(|inner| inner.running) {
            return;
        }

        let (header, header_len) = match EncapsulationHeader::parse(payload) {
            Ok(h) => h,
            Err(err) => {
                log::debug!("bad unicast packet from {}: {}", source, err);
                self.count_input_error(|_| {});
                return;
            }
        };

        let data = &payload[header_len..];
        match header {
            EncapsulationHeader::Unfragmented { ether_type } => {
                if data.len() > self.max_receive_size() {
                    self.count_input_error(|stats| stats.oversized += 1);
                    return;
                }
                self.with_inner(|inner| inner.stats.unicast_received += 1);
                self.deliver(source, ether_type, PacketChain::from(data.to_vec()), false);
            }
            EncapsulationHeader::Fragment(fragment) => self.on_fragment(source, fragment, data),
        }
    }

    /// Handles a stream packet received on the broadcast channel or on a multicast channel.
    ///
    /// `packet` starts with the stream packet header.
    pub fn on_broadcast_stream(&self, packet: &[u8]) {
        let _serialized = self.inner.lock();
        if !self.with_inner(|inner| inner.running) {
            return;
        }

        let header = match StreamHeader::parse(packet) {
            Ok(h) => h,
            Err(_) => {
                self.count_input_error(|stats| stats.gasp_too_short += 1);
                return;
            }
        };
        if header.tag != GASP_TAG {
            self.count_input_error(|stats| stats.gasp_bad_tag += 1);
            return;
        }

        let end = cmp::min(
            packet.len(),
            STREAM_HEADER_LEN + usize::from(header.data_length),
        );
        let body = &packet[STREAM_HEADER_LEN..end];
        if body.len() < GASP_HEADER_LEN + UNFRAGMENTED_HEADER_LEN {
            self.count_input_error(|stats| stats.gasp_too_short += 1);
            return;
        }

        let gasp = match GaspHeader::parse(body) {
            Ok(g) => g,
            Err(_) => {
                self.count_input_error(|stats| stats.gasp_too_short += 1);
                return;
            }
        };
        if !gasp.is_rfc2734() {
            self.count_input_error(|stats| stats.gasp_bad_specifier += 1);
            return;
        }
        if !gasp.source.is_local_bus() {
            self.count_input_error(|stats| stats.gasp_remote_bus += 1);
            return;
        }

        match EncapsulationHeader::parse(&body[GASP_HEADER_LEN..]) {
            Ok((EncapsulationHeader::Unfragmented { ether_type }, header_len)) => {
                let data = &body[GASP_HEADER_LEN + header_len..];
                if data.len() > self.max_receive_size() {
                    self.count_input_error(|stats| stats.oversized += 1);
                    return;
                }
                self.with_inner(|inner| inner.stats.broadcast_received += 1);
                self.deliver(gasp.source, ether_type, PacketChain::from(data.to_vec()), true);
            }
            Ok((EncapsulationHeader::Fragment(_), _)) => {
                self.count_input_error(|stats| stats.gasp_fragmented += 1);
            }
            Err(_) => self.count_input_error(|stats| stats.gasp_too_short += 1),
        }
    }

    fn on_fragment(&self, source: NodeId, fragment: FragmentHeader, data: &[u8]) {
        let size = usize::from(fragment.datagram_size);
        let label = fragment.label;
        let max_size = self.max_receive_size();

        let completed = self.with_inner(|inner| {
            inner.stats.fragments_received += 1;

            // Checked before anything gets allocated.
            if size > max_size {
                inner.stats.oversized += 1;
                inner.stats.input_errors += 1;
                return None;
            }

            if let FragmentPosition::First { ether_type } = fragment.position {
                let buffer = PacketChain::zeroed(size);
                if let Err(err) = inner
                    .reassembly
                    .begin(source, label, ether_type, size, buffer)
                {
                    log::debug!("dropping first fragment of {} from {}: {}", label, source, err);
                    match err {
                        ReassemblyError::Duplicate { .. } => inner.stats.reassembly_duplicates += 1,
                        ReassemblyError::Exhausted => inner.stats.reassembly_exhausted += 1,
                        ReassemblyError::Corrupt { .. } | ReassemblyError::UnknownDatagram => {}
                    }
                    inner.stats.input_errors += 1;
                    return None;
                }
            } else if inner.reassembly.find(source, label).is_none() {
                inner.stats.late_fragments += 1;
                inner.stats.input_errors += 1;
                return None;
            }

            match inner
                .reassembly
                .accept_fragment(source, label, fragment.offset(), data)
            {
                Ok(FragmentOutcome::Incomplete) => None,
                Ok(FragmentOutcome::Complete) => {
                    let completed = inner.reassembly.complete(source, label);
                    let _ = inner.reassembly.release(source, label, true);
                    if completed.is_some() {
                        inner.stats.datagrams_reassembled += 1;
                    }
                    completed
                }
                Err(err) => {
                    log::debug!("discarding datagram {} from {}: {}", label, source, err);
                    inner.stats.corrupt_fragments += 1;
                    inner.stats.input_errors += 1;
                    let _ = inner.reassembly.release(source, label, true);
                    None
                }
            }
        });

        let (payload, ether_type) = match completed {
            Some(c) => c,
            None => return,
        };

        // Only IP datagrams can be fragmented.
        match ether_type {
            ETHER_TYPE_IPV4 | ETHER_TYPE_IPV6 => {
                self.with_inner(|inner| inner.stats.unicast_received += 1);
                self.deliver(source, ether_type, payload, false);
            }
            _ => self.count_input_error(|stats| stats.unsupported_ether_type += 1),
        }
    }

    /// Handles a complete datagram.
    ///
    /// ARP packets and neighbor discovery options update the address cache before being passed
    /// to the network stack. MCAP messages are consumed.
    fn deliver(&self, source: NodeId, ether_type: u16, mut payload: PacketChain, broadcast: bool) {
        match ether_type {
            ETHER_TYPE_IPV4 => {
                if payload.len() < IPV4_HEADER_LEN {
                    self.count_input_error(|_| {});
                    return;
                }
            }
            ETHER_TYPE_IPV6 => match ndp::narrow_link_option(payload.make_contiguous()) {
                Ok(Some(address)) => self.with_inner(|inner| {
                    inner.cache.update_unicast(&address);
                    inner.stats.ndp_options_consumed += 1;
                }),
                Ok(None) => {}
                Err(err) => {
                    log::debug!("bad IPv6 datagram from {}: {}", source, err);
                    self.count_input_error(|_| {});
                    return;
                }
            },
            ETHER_TYPE_ARP => {
                let arp = ArpPacket::parse(payload.make_contiguous())
                    .and_then(|arp| arp.check_header().map(|()| arp));
                match arp {
                    Ok(arp) => self.with_inner(|inner| {
                        inner.cache.update_unicast(&arp.sender);
                        inner.stats.arp_received += 1;
                    }),
                    Err(err) => {
                        log::debug!("bad ARP packet from {}: {}", source, err);
                        self.count_input_error(|_| {});
                        return;
                    }
                }
            }
            ETHER_TYPE_MCAP => {
                match McapMessage::parse(payload.make_contiguous()) {
                    Ok(message) => {
                        let mut actions = Vec::new();
                        self.with_inner(|inner| {
                            inner.stats.mcap_received += 1;
                            inner
                                .mcap
                                .on_message(&mut inner.cache, source, &message, &mut actions);
                        });
                        self.apply_mcap_actions(actions);
                    }
                    Err(err) => {
                        log::debug!("bad MCAP message from {}: {}", source, err);
                        self.count_input_error(|_| {});
                    }
                }
                return;
            }
            other => {
                log::trace!("ignoring datagram with ether type {:#06x}", other);
                self.count_input_error(|stats| stats.unsupported_ether_type += 1);
                return;
            }
        }

        self.with_inner(|inner| inner.stats.input_packets += 1);
        self.stack.input(InboundFrame {
            ether_type,
            source,
            broadcast,
            payload,
        });
    }

    /// Largest datagram accepted from the bus. Neighbor discovery packets are allowed to
    /// exceed the MTU by the size of the option that is stripped on reception.
    fn max_receive_size(&self) -> usize {
        self.config.mtu + ndp::OPTION_GROWTH
    }

    fn count_input_error(&self, cause: impl FnOnce(&mut Statistics)) {
        self.with_inner(|inner| {
            inner.stats.input_errors += 1;
            cause(&mut inner.stats);
        });
    }
}
