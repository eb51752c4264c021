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

use super::{RecordingStack, Segment, SimBus};
use fwip_core::{
    buffer::PacketChain,
    mcap::ChannelState,
    wire::{
        arp::ArpPacket,
        encap::EncapsulationHeader,
        gasp::{GaspHeader, StreamHeader, ASYNC_STREAM_TCODE, GASP_TAG},
        mcap::{McapDescriptor, McapMessage, McapOpcode},
        ETHER_TYPE_ARP, ETHER_TYPE_IPV4, ETHER_TYPE_MCAP,
    },
    FwIpInterface, FwIpInterfaceBuilder, OutboundFrame, OutputError, OutputStatus,
};
use fwip_ieee1394_interface::{Channel, Eui64, LinkAddress, NodeId, Speed};
use smallvec::smallvec;
use std::net::Ipv4Addr;

type Interface = FwIpInterface<SimBus, RecordingStack>;

fn eui(n: usize) -> Eui64 {
    Eui64::from(0x0800_4600_0000_0000 | n as u64)
}

fn network(count: usize) -> (Segment, Vec<Interface>) {
    let segment = Segment::new();
    let interfaces = (0..count)
        .map(|n| {
            let bus = segment.add_node(eui(n), 11, Speed::S400);
            let iface = FwIpInterfaceBuilder::new()
                .with_mtu(4000)
                .build(bus, RecordingStack::new())
                .unwrap();
            iface.start().unwrap();
            iface
        })
        .collect::<Vec<_>>();
    segment.attach_all(&refs(&interfaces));
    (segment, interfaces)
}

fn refs(interfaces: &[Interface]) -> Vec<&Interface> {
    interfaces.iter().collect()
}

/// Gives every interface the hardware address of every other one, as ARP would.
fn exchange_addresses(interfaces: &[Interface]) {
    for iface in interfaces {
        for other in interfaces {
            if iface.mac_address() != other.mac_address() {
                iface.update_arp_cache(&other.hardware_address());
            }
        }
    }
}

fn datagram(len: usize) -> Vec<u8> {
    let mut data = (0..len).map(|n| n as u8).collect::<Vec<_>>();
    data[0] = 0x45;
    data
}

fn frame(destination: LinkAddress, payload: Vec<u8>) -> OutboundFrame {
    OutboundFrame {
        destination,
        ether_type: ETHER_TYPE_IPV4,
        payload: PacketChain::from(payload),
    }
}

/// Builds an advertisement as received on the broadcast channel, stream header included.
fn advertisement(source: NodeId, group: Ipv4Addr, channel: u8, expiration: u8) -> Vec<u8> {
    let message = McapMessage {
        opcode: McapOpcode::Advertise,
        descriptors: smallvec![McapDescriptor {
            expiration,
            channel,
            speed: Speed::S400.code(),
            bandwidth: 0,
            group,
        }],
    }
    .to_vec();

    let mut packet = vec![0; 16 + message.len()];
    StreamHeader {
        data_length: (packet.len() - 4) as u16,
        tag: GASP_TAG,
        channel: 31,
        tcode: ASYNC_STREAM_TCODE,
        sy: 0,
    }
    .write(&mut packet[..4]);
    GaspHeader::rfc2734(source).write(&mut packet[4..12]);
    EncapsulationHeader::Unfragmented {
        ether_type: ETHER_TYPE_MCAP,
    }
    .write(&mut packet[12..16]);
    packet[16..].copy_from_slice(&message);
    packet
}

#[test]
fn arp_exchange() {
    let (segment, ifaces) = network(2);
    let (a, b) = (&ifaces[0], &ifaces[1]);

    let request = ArpPacket::request(
        a.hardware_address(),
        Ipv4Addr::new(10, 0, 0, 1),
        Ipv4Addr::new(10, 0, 0, 2),
    );
    let status = a.output(OutboundFrame {
        destination: LinkAddress::BROADCAST,
        ether_type: ETHER_TYPE_ARP,
        payload: PacketChain::from(request.to_bytes().to_vec()),
    });
    assert_eq!(status, OutputStatus::Sent);
    assert_eq!(segment.pump(&refs(&ifaces)), 1);

    assert!(a.stack().take_frames().is_empty());
    let frames = b.stack().take_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].ether_type, ETHER_TYPE_ARP);
    assert_eq!(frames[0].source, NodeId::local(0));
    assert!(frames[0].broadcast);
    assert_eq!(
        b.with_address_cache(|cache| cache
            .find_unicast(eui(0))
            .map(|arb| arb.hardware_address())),
        Some(a.hardware_address())
    );

    // The reply is sent directly to the FIFO advertised in the request.
    let received = ArpPacket::parse(&frames[0].payload.to_vec()).unwrap();
    let reply = ArpPacket::reply(b.hardware_address(), received.target_ip, received.sender_ip);
    let status = b.output(OutboundFrame {
        destination: received.sender.eui64.to_link_address(),
        ether_type: ETHER_TYPE_ARP,
        payload: PacketChain::from(reply.to_bytes().to_vec()),
    });
    assert_eq!(status, OutputStatus::Sent);
    assert_eq!(segment.pump(&refs(&ifaces)), 1);

    let frames = a.stack().take_frames();
    assert_eq!(frames.len(), 1);
    assert!(!frames[0].broadcast);
    assert_eq!(
        a.with_address_cache(|cache| cache
            .find_unicast(eui(1))
            .map(|arb| arb.hardware_address())),
        Some(b.hardware_address())
    );
}

#[test]
fn fragmented_unicast() {
    let (segment, ifaces) = network(2);
    exchange_addresses(&ifaces);
    let (a, b) = (&ifaces[0], &ifaces[1]);

    assert_eq!(
        a.output(frame(b.mac_address(), datagram(3000))),
        OutputStatus::Sent
    );
    // 2048 bytes per block write, minus the fragment header.
    assert_eq!(segment.pump(&refs(&ifaces)), 2);

    let frames = b.stack().take_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].payload.to_vec(), datagram(3000));
    assert_eq!(b.statistics().datagrams_reassembled, 1);
    assert_eq!(a.statistics().fragments_sent, 2);
    assert_eq!(a.statistics().output_errors, 0);
    assert!(a.can_accept_output());
}

#[test]
fn broadcast_reaches_every_other_node() {
    let (segment, ifaces) = network(3);
    let status = ifaces[0].output(frame(LinkAddress::BROADCAST, datagram(100)));
    assert_eq!(status, OutputStatus::Sent);
    assert_eq!(segment.pump(&refs(&ifaces)), 1);

    assert!(ifaces[0].stack().take_frames().is_empty());
    for iface in &ifaces[1..] {
        let frames = iface.stack().take_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.to_vec(), datagram(100));
    }
}

#[test]
fn congestion_stalls_and_services_queue() {
    let (segment, ifaces) = network(2);
    exchange_addresses(&ifaces);
    segment.set_max_in_flight(1);
    let (a, b) = (&ifaces[0], &ifaces[1]);

    assert_eq!(
        a.output(frame(b.mac_address(), datagram(100))),
        OutputStatus::Sent
    );
    let stalled = frame(b.mac_address(), datagram(200));
    assert_eq!(a.output(stalled.clone()), OutputStatus::Stall(stalled.clone()));

    // The stack holds the stalled datagram and gets told once the bus catches up.
    a.stack().set_queue_len(1);
    segment.pump(&refs(&ifaces));
    assert_eq!(a.stack().serviced(), 1);

    a.stack().set_queue_len(0);
    assert_eq!(a.output(stalled), OutputStatus::Sent);
    segment.pump(&refs(&ifaces));
    assert_eq!(b.stack().take_frames().len(), 2);
}

#[test]
fn bus_reset_fails_stale_writes() {
    let (segment, ifaces) = network(2);
    exchange_addresses(&ifaces);
    let (a, b) = (&ifaces[0], &ifaces[1]);

    assert_eq!(
        a.output(frame(b.mac_address(), datagram(100))),
        OutputStatus::Sent
    );
    segment.bus_reset();
    segment.pump(&refs(&ifaces));
    assert!(b.stack().take_frames().is_empty());
    assert_eq!(a.statistics().output_errors, 1);

    for iface in &ifaces {
        iface.bus_reset();
    }
    assert_eq!(
        a.output(frame(b.mac_address(), datagram(100))),
        OutputStatus::Dropped(OutputError::HostUnreachable)
    );

    segment.attach_all(&refs(&ifaces));
    assert_eq!(
        a.output(frame(b.mac_address(), datagram(100))),
        OutputStatus::Sent
    );
    segment.pump(&refs(&ifaces));
    assert_eq!(b.stack().take_frames().len(), 1);
}

#[test]
fn departed_node() {
    let (segment, ifaces) = network(3);
    exchange_addresses(&ifaces);
    let (a, b) = (&ifaces[0], &ifaces[1]);
    let device = segment.device_info(1).unwrap().device;

    segment.disconnect(1);
    assert!(segment.device_info(1).is_none());
    assert_eq!(
        a.output(frame(b.mac_address(), datagram(100))),
        OutputStatus::Sent
    );
    segment.pump(&refs(&ifaces));
    assert_eq!(a.statistics().output_errors, 1);

    assert!(a.detach_device(device));
    assert_eq!(
        a.output(frame(b.mac_address(), datagram(100))),
        OutputStatus::Dropped(OutputError::HostUnreachable)
    );

    a.output(frame(LinkAddress::BROADCAST, datagram(100)));
    segment.pump(&refs(&ifaces));
    assert!(b.stack().take_frames().is_empty());
    assert_eq!(ifaces[2].stack().take_frames().len(), 1);
}

#[test]
fn shutdown_releases_fifo() {
    let (segment, ifaces) = network(2);
    exchange_addresses(&ifaces);
    let (a, b) = (&ifaces[0], &ifaces[1]);

    futures::executor::block_on(b.shutdown());
    assert_eq!(
        a.output(frame(b.mac_address(), datagram(100))),
        OutputStatus::Sent
    );
    segment.pump(&refs(&ifaces));
    assert!(b.stack().take_frames().is_empty());
    assert_eq!(a.statistics().output_errors, 1);
    assert_eq!(segment.pending(), 0);

    // Can be started again.
    b.start().unwrap();
    a.output(frame(b.mac_address(), datagram(100)));
    segment.pump(&refs(&ifaces));
    assert_eq!(b.stack().take_frames().len(), 1);
}

#[test]
fn multicast_solicitation_seen_by_peers() {
    let (segment, ifaces) = network(2);
    assert!(ifaces[1].join_multicast_group(Ipv4Addr::new(239, 0, 0, 1)));
    segment.pump(&refs(&ifaces));

    assert_eq!(ifaces[1].statistics().mcap_sent, 1);
    assert_eq!(ifaces[0].statistics().mcap_received, 1);
    assert!(ifaces[0].stack().take_frames().is_empty());
}

#[test]
fn mcap_takeover_lowest_node_wins() {
    let (segment, ifaces) = network(2);
    let group = Ipv4Addr::new(239, 1, 1, 1);
    let channel = Channel::new(5).unwrap();
    // Node that owns the channel at first and isn't part of the segment.
    let owner = NodeId::local(7);

    for iface in &ifaces {
        assert!(iface.join_multicast_group(group));
    }
    segment.pump(&refs(&ifaces));

    for iface in &ifaces {
        iface.on_broadcast_stream(&advertisement(owner, group, 5, 60));
        assert_eq!(iface.channel_state(channel), ChannelState::Contested);
    }

    // The owner sends its final warning. Both members take the channel over and advertise it.
    for iface in &ifaces {
        iface.on_broadcast_stream(&advertisement(owner, group, 5, 0));
        assert_eq!(iface.channel_state(channel), ChannelState::OwnedActive);
        iface.watchdog_tick();
    }
    segment.pump(&refs(&ifaces));

    assert_eq!(ifaces[0].channel_state(channel), ChannelState::OwnedActive);
    assert_eq!(ifaces[1].channel_state(channel), ChannelState::Contested);

    // Datagrams to the group now go on the allocated channel.
    let mut payload = datagram(100);
    payload[16..20].copy_from_slice(&group.octets());
    let destination = LinkAddress([0x01, 0x00, 0x5e, 0x01, 0x01, 0x01, 0x00, 0x00]);
    assert_eq!(
        ifaces[1].output(frame(destination, payload.clone())),
        OutputStatus::Sent
    );
    segment.pump(&refs(&ifaces));

    let frames = ifaces[0].stack().take_frames();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].broadcast);
    assert_eq!(frames[0].payload.to_vec(), payload);
}
