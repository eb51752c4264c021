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

use super::{
    arp::ArpPacket,
    encap::{EncapsulationHeader, FragmentHeader, FragmentPosition},
    gasp::{GaspHeader, StreamHeader},
    mcap::{McapDescriptor, McapMessage, McapOpcode},
    ndp, HardwareAddress, WireError,
};
use fwip_ieee1394_interface::{Eui64, FifoAddress, NodeId, Speed};
use smallvec::smallvec;
use smoltcp::wire::{IpAddress, Icmpv6Packet, Ipv6Address, Ipv6Packet};
use std::net::Ipv4Addr;

fn hardware_address() -> HardwareAddress {
    HardwareAddress {
        eui64: Eui64::from(0x0800_4601_0203_0405),
        max_rec: 10,
        speed: Speed::S400,
        fifo: FifoAddress {
            hi: 0xfffe,
            lo: 0x8000_0000,
        },
    }
}

#[test]
fn unfragmented_header_layout() {
    let mut out = [0; 4];
    EncapsulationHeader::Unfragmented { ether_type: 0x0800 }.write(&mut out);
    assert_eq!(out, [0x00, 0x00, 0x08, 0x00]);
}

#[test]
fn fragment_header_layout() {
    let header = EncapsulationHeader::Fragment(FragmentHeader {
        position: FragmentPosition::Interior { offset: 0x1f0 },
        datagram_size: 1500,
        label: 7,
    });
    let mut out = [0; 8];
    assert_eq!(header.write(&mut out), 8);
    // lf = 3, size - 1 = 1499 = 0x5db.
    assert_eq!(out, [0xc5, 0xdb, 0x01, 0xf0, 0x00, 0x07, 0x00, 0x00]);

    let (decoded, len) = EncapsulationHeader::parse(&out).unwrap();
    assert_eq!(len, 8);
    assert_eq!(decoded, header);
}

#[test]
fn first_fragment_carries_ether_type() {
    let bytes = [0x45, 0xdb, 0x86, 0xdd, 0x12, 0x34, 0x00, 0x00];
    match EncapsulationHeader::parse(&bytes).unwrap() {
        (EncapsulationHeader::Fragment(header), 8) => {
            assert!(header.is_first());
            assert_eq!(header.offset(), 0);
            assert_eq!(header.datagram_size, 1500);
            assert_eq!(header.label, 0x1234);
            assert_eq!(
                header.position,
                FragmentPosition::First { ether_type: 0x86dd }
            );
        }
        other => panic!("{:?}", other),
    }
}

#[test]
fn truncated_fragment_header() {
    assert!(matches!(
        EncapsulationHeader::parse(&[0x80, 0x10, 0x00, 0x00, 0x00]),
        Err(WireError::Truncated { .. })
    ));
}

#[test]
fn gasp_header_layout() {
    let mut out = [0; 8];
    GaspHeader::rfc2734(NodeId::local(2)).write(&mut out);
    assert_eq!(out, [0xff, 0xc2, 0x00, 0x00, 0x5e, 0x00, 0x00, 0x01]);

    let decoded = GaspHeader::parse(&out).unwrap();
    assert!(decoded.is_rfc2734());
    assert_eq!(decoded.source, NodeId::local(2));
}

#[test]
fn stream_header_layout() {
    let header = StreamHeader {
        data_length: 40,
        tag: 3,
        channel: 31,
        tcode: 0xa,
        sy: 0,
    };
    let mut out = [0; 4];
    header.write(&mut out);
    assert_eq!(out, [0x00, 0x28, 0xdf, 0xa0]);
    assert_eq!(StreamHeader::parse(&out).unwrap(), header);
}

#[test]
fn arp_layout() {
    let packet = ArpPacket::request(
        hardware_address(),
        Ipv4Addr::new(169, 254, 0, 1),
        Ipv4Addr::new(169, 254, 0, 2),
    );
    let bytes = packet.to_bytes();
    assert_eq!(&bytes[0..8], &[0x00, 0x18, 0x08, 0x00, 16, 4, 0x00, 0x01]);
    assert_eq!(&bytes[8..16], &[0x08, 0x00, 0x46, 0x01, 0x02, 0x03, 0x04, 0x05]);
    assert_eq!(&bytes[16..24], &[10, 2, 0xff, 0xfe, 0x80, 0x00, 0x00, 0x00]);
    assert_eq!(&bytes[24..32], &[169, 254, 0, 1, 169, 254, 0, 2]);

    let decoded = ArpPacket::parse(&bytes).unwrap();
    assert!(decoded.check_header().is_ok());
    assert_eq!(decoded, packet);
}

#[test]
fn arp_bad_hardware_type() {
    let mut bytes = ArpPacket::announcement(hardware_address(), Ipv4Addr::new(10, 0, 0, 1))
        .to_bytes();
    bytes[1] = 0x01;
    let decoded = ArpPacket::parse(&bytes).unwrap();
    assert_eq!(
        decoded.check_header(),
        Err(WireError::Invalid("ARP hardware type"))
    );
}

#[test]
fn arp_too_short() {
    assert!(ArpPacket::parse(&[0; 31]).is_err());
}

#[test]
fn mcap_advertisement() {
    let message = McapMessage {
        opcode: McapOpcode::Advertise,
        descriptors: smallvec![McapDescriptor {
            expiration: 60,
            channel: 5,
            speed: 2,
            bandwidth: 0,
            group: Ipv4Addr::new(224, 0, 0, 9),
        }],
    };
    let bytes = message.to_vec();
    assert_eq!(bytes.len(), 20);
    assert_eq!(&bytes[0..4], &[0x00, 20, 0x00, 0x00]);
    assert_eq!(&bytes[4..8], &[16, 1, 0, 0]);
    assert_eq!(&bytes[8..12], &[60, 5, 2, 0]);
    assert_eq!(&bytes[16..20], &[224, 0, 0, 9]);
    assert_eq!(McapMessage::parse(&bytes).unwrap(), message);
}

#[test]
fn mcap_skips_unknown_descriptor_types() {
    let mut bytes = vec![0x00, 28, 0x00, 0x01];
    // 8 bytes descriptor of an unknown type.
    bytes.extend_from_slice(&[8, 9, 0, 0, 1, 2, 3, 4]);
    bytes.extend_from_slice(&[16, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 239, 1, 2, 3]);
    let message = McapMessage::parse(&bytes).unwrap();
    assert_eq!(message.opcode, McapOpcode::Solicit);
    assert_eq!(message.descriptors.len(), 1);
    assert_eq!(message.descriptors[0].group, Ipv4Addr::new(239, 1, 2, 3));
}

#[test]
fn mcap_stops_at_bogus_descriptor_length() {
    let mut bytes = vec![0x00, 36, 0x00, 0x00];
    bytes.extend_from_slice(&[16, 1, 0, 0, 30, 3, 0, 0, 0, 0, 0, 0, 239, 0, 0, 1]);
    bytes.extend_from_slice(&[200, 1, 0, 0, 30, 4, 0, 0, 0, 0, 0, 0, 239, 0, 0, 2]);
    let message = McapMessage::parse(&bytes).unwrap();
    assert_eq!(message.descriptors.len(), 1);
    assert_eq!(message.descriptors[0].channel, 3);
}

/// Builds a neighbor solicitation the way a network stack would, with an Ethernet-sized link
/// address option.
fn neighbor_solicitation(lladdr: [u8; 8]) -> Vec<u8> {
    let src = Ipv6Address::new(0xfe80, 0, 0, 0, 0x0a00, 0x46ff, 0xfe01, 0x0203);
    let dst = Ipv6Address::new(0xff02, 0, 0, 0, 0, 1, 0xff00, 0x0002);

    let mut packet = vec![0; 40 + 24 + 16];
    {
        let mut ip = Ipv6Packet::new_unchecked(&mut packet[..]);
        ip.set_version(6);
        ip.set_payload_len(40);
        ip.set_next_header(smoltcp::wire::IpProtocol::Icmpv6);
        ip.set_hop_limit(255);
        ip.set_src_addr(src);
        ip.set_dst_addr(dst);
    }
    packet[40] = 135;
    packet[48..64].copy_from_slice(&[0xfe, 0x80, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2]);
    packet[64] = 1;
    packet[65] = 2;
    packet[66..74].copy_from_slice(&lladdr);
    Icmpv6Packet::new_unchecked(&mut packet[40..])
        .fill_checksum(&IpAddress::Ipv6(src), &IpAddress::Ipv6(dst));
    packet
}

fn checksum_ok(packet: &[u8]) -> bool {
    let ip = Ipv6Packet::new_checked(packet).unwrap();
    let end = 40 + usize::from(ip.payload_len());
    Icmpv6Packet::new_unchecked(&packet[40..end]).verify_checksum(
        &IpAddress::Ipv6(ip.src_addr()),
        &IpAddress::Ipv6(ip.dst_addr()),
    )
}

#[test]
fn ndp_option_widened_then_narrowed() {
    let own = hardware_address();
    let original = neighbor_solicitation(own.eui64.raw().to_be_bytes());
    assert!(checksum_ok(&original));

    let mut packet = original.clone();
    assert!(ndp::widen_link_option(&mut packet, &own).unwrap());
    assert_eq!(packet.len(), original.len() + 8);
    assert_eq!(Ipv6Packet::new_checked(&packet[..]).unwrap().payload_len(), 48);
    assert_eq!(packet[65], 3);
    assert_eq!(&packet[74..82], &[10, 2, 0xff, 0xfe, 0x80, 0x00, 0x00, 0x00]);
    assert!(checksum_ok(&packet));

    let advertised = ndp::narrow_link_option(&mut packet).unwrap();
    assert_eq!(advertised, Some(own));
    assert_eq!(packet, original);
    assert!(checksum_ok(&packet));
}

#[test]
fn ndp_leaves_other_packets_alone() {
    let own = hardware_address();
    let mut packet = neighbor_solicitation([1; 8]);
    // Turn it into an echo request.
    packet[40] = 128;
    let before = packet.clone();
    assert!(!ndp::widen_link_option(&mut packet, &own).unwrap());
    assert_eq!(ndp::narrow_link_option(&mut packet).unwrap(), None);
    assert_eq!(packet, before);
}

#[test]
fn ndp_truncated_packet() {
    let mut packet = vec![0x60, 0, 0, 0];
    assert!(ndp::narrow_link_option(&mut packet).is_err());
}
