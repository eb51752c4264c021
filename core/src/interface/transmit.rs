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

//! Transmit path.
//!
//! Datagrams to a group address are sent as a single asynchronous stream packet. Datagrams to a
//! unicast address are written into the unicast FIFO of the peer, split into fragments if they
//! don't fit in a single block write.

use super::{FwIpInterface, Inner};
use crate::{
    buffer::{copy_from_chain, PacketChain},
    bus::{Bus, NetworkStack, OutboundFrame, OutputError, OutputStatus, Rejected, SubmitError},
    command::UnicastWriteCommand,
    wire::{
        encap::{
            EncapsulationHeader, FragmentHeader, FragmentPosition, FRAGMENT_HEADER_LEN,
            MAX_DATAGRAM_SIZE, UNFRAGMENTED_HEADER_LEN,
        },
        gasp::{GaspHeader, GASP_HEADER_LEN},
        mcap::McapMessage,
        ndp, ETHER_TYPE_ARP, ETHER_TYPE_IPV4, ETHER_TYPE_IPV6, ETHER_TYPE_MCAP,
    },
};
use core::{cmp, mem};
use fwip_ieee1394_interface::{Channel, DeviceRef, Eui64, FifoAddress, Speed};
use std::net::Ipv4Addr;

/// Where to write a unicast datagram.
#[derive(Debug, Copy, Clone)]
struct UnicastTarget {
    device: DeviceRef,
    fifo: FifoAddress,
    speed: Speed,
    generation: u32,
    /// Largest block write that the peer, the device and the local node all accept.
    max_payload: usize,
}

/// Outcome of handing a command over to the bus.
#[derive(Debug)]
enum Submission {
    Sent,
    /// The bus ran out of transaction labels.
    Stalled,
    Failed(OutputError),
}

/// Converts a payload size expressed as a power of two.
fn payload_size(log2: u8) -> usize {
    1usize
        .checked_shl(u32::from(log2))
        .unwrap_or(usize::max_value())
}

/// Reads the destination address of an IPv4 datagram.
fn ipv4_destination(payload: &PacketChain) -> Option<Ipv4Addr> {
    let mut addr = [0; 4];
    copy_from_chain(payload, 16, &mut addr, 4).ok()?;
    Some(Ipv4Addr::from(addr))
}

fn unicast_target(inner: &mut Inner, eui64: Eui64) -> Option<UnicastTarget> {
    let local = inner.local;
    let arb = inner.cache.resolve_unicast(eui64);
    let device = arb.binding().device()?;
    let peer = arb.hardware_address();
    if peer.fifo == FifoAddress::default() {
        return None;
    }

    let (device_log2, device_speed) = match inner.cache.find_device(eui64) {
        Some(drb) => (drb.max_payload_log2(), drb.max_speed()),
        None => (local.max_payload_log2, local.speed),
    };

    let max_payload = cmp::min(
        peer.max_payload(),
        cmp::min(
            payload_size(local.max_payload_log2),
            payload_size(device_log2),
        ),
    );
    let speed = cmp::min(peer.speed, cmp::min(local.speed, device_speed));

    Some(UnicastTarget {
        device,
        fifo: peer.fifo,
        speed,
        generation: local.generation,
        max_payload,
    })
}

impl<TBus, TStack> FwIpInterface<TBus, TStack>
where
    TBus: Bus,
    TStack: NetworkStack,
{
    /// Sends a datagram.
    ///
    /// IPv4, ARP and IPv6 datagrams are accepted. The link-layer address option of outgoing
    /// neighbor solicitations and advertisements is rewritten to describe this node.
    pub fn output(&self, mut frame: OutboundFrame) -> OutputStatus {
        let _serialized = self.inner.lock();

        if !self.with_inner(|inner| inner.running) {
            return self.drop_output(OutputError::NotRunning);
        }

        match frame.ether_type {
            ETHER_TYPE_IPV4 | ETHER_TYPE_ARP | ETHER_TYPE_IPV6 => {}
            other => {
                self.with_inner(|inner| inner.stats.unsupported_ether_type += 1);
                return self.drop_output(OutputError::UnsupportedEtherType(other));
            }
        }

        if frame.payload.is_empty() || frame.payload.len() > self.config.mtu {
            self.with_inner(|inner| inner.stats.oversized += 1);
            return self.drop_output(OutputError::TooLarge);
        }

        if frame.ether_type == ETHER_TYPE_IPV6 {
            let own = self.with_inner(|inner| inner.hardware_address());
            if let Err(err) = ndp::widen_link_option(frame.payload.make_contiguous(), &own) {
                log::trace!("IPv6 datagram sent as is: {}", err);
            }
        }

        if frame.destination.is_group() {
            self.output_stream(frame)
        } else {
            self.output_unicast(frame)
        }
    }

    fn output_stream(&self, frame: OutboundFrame) -> OutputStatus {
        let (channel, speed) = self.with_inner(|inner| {
            let broadcast = (self.config.broadcast_channel, inner.broadcast_speed);
            if frame.ether_type != ETHER_TYPE_IPV4 || !frame.destination.is_ipv4_multicast() {
                return broadcast;
            }
            ipv4_destination(&frame.payload)
                .and_then(|group| inner.cache.find_multicast(group))
                .map(|marb| (marb.channel, marb.speed))
                .unwrap_or(broadcast)
        });

        match self.transmit_stream(channel, speed, frame.ether_type, &frame.payload) {
            Submission::Sent => {
                let len = frame.payload.len();
                self.with_inner(|inner| {
                    inner.stats.broadcast_sent += 1;
                    inner.stats.output_packets += 1;
                    inner.stats.largest_packet_sent = cmp::max(inner.stats.largest_packet_sent, len);
                });
                OutputStatus::Sent
            }
            Submission::Stalled => self.stall(frame),
            Submission::Failed(err) => self.drop_output(err),
        }
    }

    fn output_unicast(&self, frame: OutboundFrame) -> OutputStatus {
        let eui64 = Eui64::from(frame.destination);
        let target = match self.with_inner(|inner| unicast_target(inner, eui64)) {
            Some(t) => t,
            None => {
                self.with_inner(|inner| inner.stats.host_unreachable += 1);
                return self.drop_output(OutputError::HostUnreachable);
            }
        };

        if frame.payload.len() + UNFRAGMENTED_HEADER_LEN > target.max_payload {
            return self.output_fragmented(target, frame);
        }

        match self.send_unfragmented(&target, frame.ether_type, &frame.payload) {
            Submission::Sent => {
                self.record_unicast_sent(frame.payload.len());
                OutputStatus::Sent
            }
            Submission::Stalled => self.stall(frame),
            Submission::Failed(err) => self.drop_output(err),
        }
    }

    fn send_unfragmented(
        &self,
        target: &UnicastTarget,
        ether_type: u16,
        payload: &PacketChain,
    ) -> Submission {
        let mut command = match self.unicast_pool.try_acquire() {
            Some(c) => c,
            None => {
                self.with_inner(|inner| inner.stats.unicast_commands_exhausted += 1);
                return Submission::Failed(OutputError::NoCommand);
            }
        };

        let buf = command.prepare(
            target.device,
            target.fifo,
            target.speed,
            target.generation,
            UNFRAGMENTED_HEADER_LEN + payload.len(),
        );
        let header_len = EncapsulationHeader::Unfragmented { ether_type }.write(buf);
        if let Err(err) = copy_from_chain(payload, 0, &mut buf[header_len..], payload.len()) {
            log::error!("failed to copy datagram: {}", err);
            self.unicast_pool.release(command);
            return Submission::Failed(OutputError::TooLarge);
        }

        self.submit_unicast(command)
    }

    /// Splits a datagram into fragments and sends them in order.
    ///
    /// If a fragment can't be sent, the following ones aren't either. A datagram whose first
    /// fragment stalls is given back to the network stack.
    fn output_fragmented(&self, target: UnicastTarget, frame: OutboundFrame) -> OutputStatus {
        let OutboundFrame {
            destination,
            ether_type,
            payload,
        } = frame;
        let len = payload.len();

        if len > MAX_DATAGRAM_SIZE || target.max_payload <= FRAGMENT_HEADER_LEN {
            self.with_inner(|inner| inner.stats.oversized += 1);
            return self.drop_output(OutputError::TooLarge);
        }

        let wrapper = match self.wrapper_pool.try_acquire() {
            Some(w) => w,
            None => {
                self.with_inner(|inner| inner.stats.packet_wrappers_exhausted += 1);
                return self.drop_output(OutputError::NoCommand);
            }
        };

        let label = self.with_inner(|inner| {
            let label = inner.next_label;
            inner.next_label = label.wrapping_add(1);
            label
        });

        wrapper.attach(payload);

        let fragment_max = target.max_payload - FRAGMENT_HEADER_LEN;
        let mut offset = 0;
        let mut fragments_sent = 0;
        let mut outcome = Submission::Sent;

        while offset < len {
            let chunk = cmp::min(fragment_max, len - offset);
            let position = if offset == 0 {
                FragmentPosition::First { ether_type }
            } else if offset + chunk == len {
                FragmentPosition::Last {
                    offset: offset as u16,
                }
            } else {
                FragmentPosition::Interior {
                    offset: offset as u16,
                }
            };
            let header = EncapsulationHeader::Fragment(FragmentHeader {
                position,
                datagram_size: len as u16,
                label,
            });

            let mut command = match self.unicast_pool.try_acquire() {
                Some(c) => c,
                None => {
                    self.with_inner(|inner| inner.stats.unicast_commands_exhausted += 1);
                    outcome = Submission::Failed(OutputError::NoCommand);
                    break;
                }
            };

            let buf = command.prepare(
                target.device,
                target.fifo,
                target.speed,
                target.generation,
                FRAGMENT_HEADER_LEN + chunk,
            );
            let header_len = header.write(buf);
            if let Err(err) = wrapper.read(offset, &mut buf[header_len..]) {
                log::error!("failed to copy fragment: {}", err);
                self.unicast_pool.release(command);
                outcome = Submission::Failed(OutputError::TooLarge);
                break;
            }

            command.attach_wrapper(&wrapper);
            match self.submit_unicast(command) {
                Submission::Sent => fragments_sent += 1,
                other => {
                    outcome = other;
                    break;
                }
            }

            offset += chunk;
        }

        let requeue = match outcome {
            Submission::Stalled if fragments_sent == 0 => wrapper.take_packet(),
            _ => None,
        };
        if wrapper.release_if_last() {
            self.wrapper_pool.release(wrapper);
        }

        self.with_inner(|inner| inner.stats.fragments_sent += fragments_sent);

        match (outcome, requeue) {
            (Submission::Sent, _) => {
                self.record_unicast_sent(len);
                OutputStatus::Sent
            }
            (Submission::Stalled, Some(payload)) => self.stall(OutboundFrame {
                destination,
                ether_type,
                payload,
            }),
            (Submission::Stalled, None) => {
                log::debug!("datagram {} stalled after {} fragments", label, fragments_sent);
                self.drop_output(OutputError::BusFailure)
            }
            (Submission::Failed(err), _) => {
                if fragments_sent != 0 {
                    log::debug!("datagram {} aborted after {} fragments", label, fragments_sent);
                }
                self.drop_output(err)
            }
        }
    }

    fn submit_unicast(&self, command: UnicastWriteCommand) -> Submission {
        match self.bus.submit_unicast_write(command) {
            Ok(()) => {
                self.with_inner(|inner| inner.active_commands += 1);
                Submission::Sent
            }
            Err(Rejected { mut command, error }) => {
                if let Some(wrapper) = command.take_wrapper() {
                    if wrapper.release_if_last() {
                        self.wrapper_pool.release(wrapper);
                    }
                }
                self.unicast_pool.release(command);
                match error {
                    SubmitError::OutOfTransactionLabels => Submission::Stalled,
                    SubmitError::Failed => Submission::Failed(OutputError::BusFailure),
                }
            }
        }
    }

    /// Sends a single stream packet on `channel`.
    fn transmit_stream(
        &self,
        channel: Channel,
        speed: Speed,
        ether_type: u16,
        payload: &PacketChain,
    ) -> Submission {
        let len = GASP_HEADER_LEN + UNFRAGMENTED_HEADER_LEN + payload.len();
        let (max_payload, source, fill) = self.with_inner(|inner| {
            let log2 = cmp::min(inner.broadcast_max_payload_log2, inner.local.max_payload_log2);
            let fill = !mem::replace(&mut inner.stream_pool_filled, true);
            (payload_size(log2), inner.local.node_id, fill)
        });

        // Stream packets are never fragmented.
        if len > max_payload {
            self.with_inner(|inner| inner.stats.oversized += 1);
            return Submission::Failed(OutputError::TooLarge);
        }

        if fill {
            self.stream_pool.prefill();
        }
        let mut command = match self.stream_pool.try_acquire() {
            Some(c) => c,
            None => {
                self.with_inner(|inner| inner.stats.stream_commands_exhausted += 1);
                return Submission::Failed(OutputError::NoCommand);
            }
        };

        let buf = command.prepare(channel, speed, len);
        GaspHeader::rfc2734(source).write(&mut buf[..GASP_HEADER_LEN]);
        let header_end = GASP_HEADER_LEN
            + EncapsulationHeader::Unfragmented { ether_type }.write(&mut buf[GASP_HEADER_LEN..]);
        if let Err(err) = copy_from_chain(payload, 0, &mut buf[header_end..], payload.len()) {
            log::error!("failed to copy datagram: {}", err);
            self.stream_pool.release(command);
            return Submission::Failed(OutputError::TooLarge);
        }

        match self.bus.submit_stream_write(command) {
            Ok(()) => {
                self.with_inner(|inner| inner.active_commands += 1);
                Submission::Sent
            }
            Err(Rejected { command, error }) => {
                self.stream_pool.release(command);
                match error {
                    SubmitError::OutOfTransactionLabels => Submission::Stalled,
                    SubmitError::Failed => Submission::Failed(OutputError::BusFailure),
                }
            }
        }
    }

    /// Broadcasts a multicast channel allocation message.
    pub(super) fn send_mcap(&self, message: &McapMessage) {
        let speed = self.with_inner(|inner| inner.broadcast_speed);
        let payload = PacketChain::from(message.to_vec());
        match self.transmit_stream(self.config.broadcast_channel, speed, ETHER_TYPE_MCAP, &payload)
        {
            Submission::Sent => self.with_inner(|inner| inner.stats.mcap_sent += 1),
            Submission::Stalled => {
                log::debug!("MCAP message stalled");
                self.with_inner(|inner| inner.stats.stalls += 1);
            }
            Submission::Failed(err) => log::debug!("failed to send MCAP message: {}", err),
        }
    }

    /// Gives a datagram back to the network stack, or drops it if the transmit queue is too long.
    fn stall(&self, frame: OutboundFrame) -> OutputStatus {
        let queue_len = self.stack.transmit_queue_len();
        let overflow = self.with_inner(|inner| {
            inner.stats.stalls += 1;
            // Without any command in flight, nothing would ever service the queue again.
            queue_len > inner.max_queue_size || inner.outstanding() == 0
        });

        if overflow {
            self.with_inner(|inner| inner.stats.queue_overflows += 1);
            self.drop_output(OutputError::QueueOverflow)
        } else {
            OutputStatus::Stall(frame)
        }
    }

    fn record_unicast_sent(&self, len: usize) {
        self.with_inner(|inner| {
            inner.stats.unicast_sent += 1;
            inner.stats.output_packets += 1;
            inner.stats.largest_packet_sent = cmp::max(inner.stats.largest_packet_sent, len);
            inner.sends_since_tick += 1;
        });
    }

    fn drop_output(&self, err: OutputError) -> OutputStatus {
        log::debug!("dropping outbound datagram: {}", err);
        self.with_inner(|inner| inner.stats.output_errors += 1);
        OutputStatus::Dropped(err)
    }
}
