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

//! Link-layer address option of IPv6 neighbor discovery.
//!
//! The network stack builds neighbor solicitations and advertisements as if the link was
//! Ethernet-like, with a 16 bytes link-layer address option carrying an 8 bytes address. On a
//! 1394 link, this option must be 24 bytes long and also carry the max_rec, speed and unicast FIFO
//! of the node:
//!
//! ```text
//! | type:8 | length:8 (3) | node_unique_ID:64 ...
//! ... | max_rec:8 | spd:8 | unicast_FIFO_hi:16 |
//! | unicast_FIFO_lo:32 | reserved:48 |
//! ```
//!
//! Outgoing packets are widened with [`widen_link_option`] and incoming packets narrowed with
//! [`narrow_link_option`]. Both keep the IPv6 payload length and the ICMPv6 checksum
//! consistent.

use super::{read_u64, HardwareAddress, WireError};
use fwip_ieee1394_interface::Eui64;
use smoltcp::wire::{Icmpv6Message, Icmpv6Packet, IpAddress, IpProtocol, Ipv6Packet};

/// Option type of the source link-layer address, found in neighbor solicitations.
pub const OPTION_SOURCE_LINK_ADDRESS: u8 = 1;
/// Option type of the target link-layer address, found in neighbor advertisements.
pub const OPTION_TARGET_LINK_ADDRESS: u8 = 2;

/// Number of bytes that [`widen_link_option`] adds to a packet.
pub const OPTION_GROWTH: usize = LONG_OPTION_LEN - SHORT_OPTION_LEN;

const IPV6_HEADER_LEN: usize = 40;
// Type, code, checksum, reserved, target address.
const NEIGHBOR_BODY_LEN: usize = 24;
const SHORT_OPTION_LEN: usize = 16;
const LONG_OPTION_LEN: usize = 24;

/// Returns the offset of the link-layer option if `packet` is a neighbor solicitation or
/// advertisement whose first option is the expected link-layer address option.
fn locate_option(packet: &[u8]) -> Result<Option<usize>, WireError> {
    let ip = Ipv6Packet::new_checked(packet).map_err(|_| WireError::Truncated {
        what: "IPv6 packet",
        len: packet.len(),
    })?;

    if ip.next_header() != IpProtocol::Icmpv6 {
        return Ok(None);
    }

    let payload_len = usize::from(ip.payload_len());
    if payload_len < NEIGHBOR_BODY_LEN + 2 {
        return Ok(None);
    }

    let icmp = Icmpv6Packet::new_unchecked(&packet[IPV6_HEADER_LEN..]);
    let expected_option = match icmp.msg_type() {
        Icmpv6Message::NeighborSolicit => OPTION_SOURCE_LINK_ADDRESS,
        Icmpv6Message::NeighborAdvert => OPTION_TARGET_LINK_ADDRESS,
        _ => return Ok(None),
    };

    let option = IPV6_HEADER_LEN + NEIGHBOR_BODY_LEN;
    if packet[option] != expected_option {
        return Ok(None);
    }

    Ok(Some(option))
}

/// Recomputes the ICMPv6 checksum after the payload has been modified.
fn refresh_checksum(packet: &mut [u8]) {
    let (src, dst, payload_len) = {
        let ip = Ipv6Packet::new_unchecked(&*packet);
        (ip.src_addr(), ip.dst_addr(), ip.payload_len())
    };

    let end = IPV6_HEADER_LEN + usize::from(payload_len);
    let mut icmp = Icmpv6Packet::new_unchecked(&mut packet[IPV6_HEADER_LEN..end]);
    icmp.fill_checksum(&IpAddress::Ipv6(src), &IpAddress::Ipv6(dst));
}

fn adjust_payload_len(packet: &mut [u8], grow: bool) {
    let mut ip = Ipv6Packet::new_unchecked(packet);
    let len = ip.payload_len();
    let new_len = if grow {
        len + OPTION_GROWTH as u16
    } else {
        len - OPTION_GROWTH as u16
    };
    ip.set_payload_len(new_len);
}

/// Turns the Ethernet-sized link-layer option of an outgoing neighbor solicitation or
/// advertisement into a 1394 one describing `own`.
///
/// Returns `Ok(false)` and leaves the packet untouched if it isn't a neighbor discovery packet
/// with a short link-layer option.
pub fn widen_link_option(packet: &mut Vec<u8>, own: &HardwareAddress) -> Result<bool, WireError> {
    let option = match locate_option(packet)? {
        Some(o) => o,
        None => return Ok(false),
    };

    let payload_end = {
        let ip = Ipv6Packet::new_unchecked(&packet[..]);
        IPV6_HEADER_LEN + usize::from(ip.payload_len())
    };
    if packet[option + 1] != 2 || option + SHORT_OPTION_LEN > payload_end {
        return Ok(false);
    }

    let insert_at = option + SHORT_OPTION_LEN;
    packet.splice(insert_at..insert_at, core::iter::repeat(0).take(OPTION_GROWTH));

    packet[option + 1] = 3;
    packet[option + 2..option + 10].copy_from_slice(&own.eui64.raw().to_be_bytes());
    own.encode(&mut packet[option + 10..option + 18]);
    for byte in &mut packet[option + 18..option + LONG_OPTION_LEN] {
        *byte = 0;
    }

    adjust_payload_len(packet, true);
    refresh_checksum(packet);
    Ok(true)
}

/// Turns the 1394 link-layer option of an incoming neighbor solicitation or advertisement back
/// into an Ethernet-sized one, and returns what the option described.
///
/// Returns `Ok(None)` and leaves the packet untouched if it isn't a neighbor discovery packet
/// with a 1394 link-layer option.
pub fn narrow_link_option(packet: &mut Vec<u8>) -> Result<Option<HardwareAddress>, WireError> {
    let option = match locate_option(packet)? {
        Some(o) => o,
        None => return Ok(None),
    };

    let payload_end = {
        let ip = Ipv6Packet::new_unchecked(&packet[..]);
        IPV6_HEADER_LEN + usize::from(ip.payload_len())
    };
    if packet[option + 1] != 3 || option + LONG_OPTION_LEN > payload_end {
        return Ok(None);
    }

    let eui64 = Eui64::from(read_u64(&packet[option + 2..option + 10]));
    let address = HardwareAddress::decode(eui64, &packet[option + 10..option + 18])?;

    packet.drain(option + SHORT_OPTION_LEN..option + LONG_OPTION_LEN);
    packet[option + 1] = 2;
    for byte in &mut packet[option + 10..option + SHORT_OPTION_LEN] {
        *byte = 0;
    }

    adjust_payload_len(packet, false);
    refresh_checksum(packet);
    Ok(Some(address))
}
