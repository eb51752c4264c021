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

//! Simulates a 1394 segment and sends IP datagrams from its first node to every other node.

use fwip_bus_hosted::{RecordingStack, Segment, SimBus};
use fwip_core::{
    buffer::PacketChain,
    wire::{arp::ArpPacket, ETHER_TYPE_ARP, ETHER_TYPE_IPV4, IPV4_HEADER_LEN},
    FwIpInterface, FwIpInterfaceBuilder, OutboundFrame, OutputStatus,
};
use fwip_ieee1394_interface::{Eui64, LinkAddress, Speed};
use smoltcp::wire::{IpProtocol, Ipv4Address, Ipv4Packet};
use std::{cmp, net::Ipv4Addr, process};
use structopt::StructOpt;

type Interface = FwIpInterface<SimBus, RecordingStack>;

/// EUI-64 of the first node. The following nodes count up from there.
const EUI64_BASE: u64 = 0x0001_4f00_0000_0000;

#[derive(Debug, StructOpt)]
#[structopt(name = "fwip", about = "IP over 1394 segment simulator.")]
struct CliOptions {
    /// Number of nodes on the segment.
    #[structopt(long, default_value = "3")]
    nodes: usize,
    /// Size of the datagrams sent to each node.
    #[structopt(long, default_value = "3000")]
    size: usize,
    /// Number of datagrams sent to each node.
    #[structopt(long, default_value = "4")]
    count: usize,
    /// Maximum transmission unit of the interfaces.
    #[structopt(long, default_value = "4000")]
    mtu: usize,
    /// Largest block write accepted by the nodes, as a power of two.
    #[structopt(long, default_value = "11")]
    max_payload_log2: u8,
    /// Maximum level of the logs being printed.
    #[structopt(long, default_value = "info")]
    log_level: log::LevelFilter,
}

fn main() {
    futures::executor::block_on(async_main());
}

async fn async_main() {
    let cli_opts = CliOptions::from_args();
    if let Err(err) = fwip_log_hosted::init(cli_opts.log_level) {
        eprintln!("failed to initialize logging: {}", err);
    }

    if cli_opts.nodes < 2 || cli_opts.nodes > 62 {
        log::error!("the number of nodes must be between 2 and 62");
        process::exit(1);
    }

    let segment = Segment::new();
    let mut interfaces = Vec::with_capacity(cli_opts.nodes);
    for n in 0..cli_opts.nodes {
        let bus = segment.add_node(
            Eui64::from(EUI64_BASE | n as u64),
            cli_opts.max_payload_log2,
            Speed::S400,
        );
        let iface = FwIpInterfaceBuilder::new()
            .with_mtu(cli_opts.mtu)
            .build(bus, RecordingStack::new())
            .and_then(|iface| iface.start().map(|()| iface));
        match iface {
            Ok(iface) => interfaces.push(iface),
            Err(err) => {
                log::error!("failed to initialize node {}: {}", n, err);
                process::exit(1);
            }
        }
    }

    let refs = interfaces.iter().collect::<Vec<_>>();
    segment.attach_all(&refs);

    // Peers learn about each other from the announcements.
    for (n, iface) in interfaces.iter().enumerate() {
        let announcement = ArpPacket::announcement(iface.hardware_address(), node_ip(n));
        send(
            iface,
            LinkAddress::BROADCAST,
            ETHER_TYPE_ARP,
            announcement.to_bytes().to_vec(),
        );
    }
    segment.pump(&refs);

    for _ in 0..cli_opts.count {
        for (n, target) in interfaces.iter().enumerate().skip(1) {
            let datagram = ipv4_datagram(node_ip(0), node_ip(n), cli_opts.size);
            send(&interfaces[0], target.mac_address(), ETHER_TYPE_IPV4, datagram);
        }
        segment.pump(&refs);
        for iface in &interfaces {
            iface.watchdog_tick();
        }
    }

    for (n, iface) in interfaces.iter().enumerate() {
        let received = iface
            .stack()
            .take_frames()
            .into_iter()
            .filter(|frame| frame.ether_type == ETHER_TYPE_IPV4)
            .count();
        log::info!(
            "node {} ({}): {} datagrams received",
            n,
            node_ip(n),
            received
        );
        log::debug!("node {} statistics: {:?}", n, iface.statistics());
    }

    for iface in &interfaces {
        iface.shutdown().await;
    }
}

fn node_ip(n: usize) -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, n as u8 + 1)
}

fn send(iface: &Interface, destination: LinkAddress, ether_type: u16, payload: Vec<u8>) {
    let status = iface.output(OutboundFrame {
        destination,
        ether_type,
        payload: PacketChain::from(payload),
    });
    match status {
        OutputStatus::Sent => {}
        OutputStatus::Stall(_) => log::warn!("datagram to {} stalled", destination),
        OutputStatus::Dropped(err) => log::warn!("datagram to {} dropped: {}", destination, err),
    }
}

/// Builds an IPv4 datagram of `len` bytes, header included, with an experimental protocol number.
fn ipv4_datagram(src: Ipv4Addr, dst: Ipv4Addr, len: usize) -> Vec<u8> {
    let len = cmp::max(len, IPV4_HEADER_LEN);
    let mut buf = vec![0; len];
    let mut packet = Ipv4Packet::new_unchecked(&mut buf[..]);
    packet.set_version(4);
    packet.set_header_len(IPV4_HEADER_LEN as u8);
    packet.set_total_len(len as u16);
    packet.set_hop_limit(64);
    packet.set_protocol(IpProtocol::Unknown(253));
    packet.set_src_addr(Ipv4Address::from_bytes(&src.octets()));
    packet.set_dst_addr(Ipv4Address::from_bytes(&dst.octets()));
    packet.fill_checksum();
    buf
}
