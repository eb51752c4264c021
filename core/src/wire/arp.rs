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

//! IPv4 ARP packets for 1394.
//!
//! Unlike Ethernet ARP, the packet only contains the hardware address of the sender. A reply
//! is also broadcast, and the target hardware address is implied.

use super::{read_u16, read_u64, HardwareAddress, WireError};
use fwip_ieee1394_interface::Eui64;
use std::net::Ipv4Addr;

/// Size of an ARP packet.
pub const ARP_PACKET_LEN: usize = 32;
/// Hardware type of IEEE 1394.
pub const HARDWARE_TYPE_IEEE1394: u16 = 0x0018;
/// Value of the hardware address length field.
pub const HARDWARE_ADDRESS_LEN: u8 = 16;
/// Value of the IP address length field.
pub const IP_ADDRESS_LEN: u8 = 4;

pub const OPCODE_REQUEST: u16 = 1;
pub const OPCODE_REPLY: u16 = 2;

/// Decoded ARP packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArpPacket {
    pub hardware_type: u16,
    pub protocol_type: u16,
    pub hardware_address_len: u8,
    pub ip_address_len: u8,
    pub opcode: u16,
    pub sender: HardwareAddress,
    pub sender_ip: Ipv4Addr,
    pub target_ip: Ipv4Addr,
}

impl ArpPacket {
    /// Builds a request asking who owns `target_ip`.
    pub fn request(sender: HardwareAddress, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        ArpPacket::new(OPCODE_REQUEST, sender, sender_ip, target_ip)
    }

    /// Builds the answer to a request emitted by `target_ip`.
    pub fn reply(sender: HardwareAddress, sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Self {
        ArpPacket::new(OPCODE_REPLY, sender, sender_ip, target_ip)
    }

    /// Builds a gratuitous request announcing our own address.
    pub fn announcement(sender: HardwareAddress, ip: Ipv4Addr) -> Self {
        ArpPacket::new(OPCODE_REQUEST, sender, ip, ip)
    }

    fn new(
        opcode: u16,
        sender: HardwareAddress,
        sender_ip: Ipv4Addr,
        target_ip: Ipv4Addr,
    ) -> Self {
        ArpPacket {
            hardware_type: HARDWARE_TYPE_IEEE1394,
            protocol_type: super::ETHER_TYPE_IPV4,
            hardware_address_len: HARDWARE_ADDRESS_LEN,
            ip_address_len: IP_ADDRESS_LEN,
            opcode,
            sender,
            sender_ip,
            target_ip,
        }
    }

    /// Decodes a packet. Only the length is checked; see [`ArpPacket::check_header`].
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < ARP_PACKET_LEN {
            return Err(WireError::Truncated {
                what: "ARP packet",
                len: bytes.len(),
            });
        }

        let eui64 = Eui64::from(read_u64(&bytes[8..16]));
        Ok(ArpPacket {
            hardware_type: read_u16(&bytes[0..2]),
            protocol_type: read_u16(&bytes[2..4]),
            hardware_address_len: bytes[4],
            ip_address_len: bytes[5],
            opcode: read_u16(&bytes[6..8]),
            sender: HardwareAddress::decode(eui64, &bytes[16..24])?,
            sender_ip: Ipv4Addr::new(bytes[24], bytes[25], bytes[26], bytes[27]),
            target_ip: Ipv4Addr::new(bytes[28], bytes[29], bytes[30], bytes[31]),
        })
    }

    /// Checks the fixed fields of the header.
    pub fn check_header(&self) -> Result<(), WireError> {
        if self.hardware_type != HARDWARE_TYPE_IEEE1394 {
            return Err(WireError::Invalid("ARP hardware type"));
        }
        if self.protocol_type != super::ETHER_TYPE_IPV4 {
            return Err(WireError::Invalid("ARP protocol type"));
        }
        if self.hardware_address_len != HARDWARE_ADDRESS_LEN {
            return Err(WireError::Invalid("ARP hardware address length"));
        }
        if self.ip_address_len != IP_ADDRESS_LEN {
            return Err(WireError::Invalid("ARP IP address length"));
        }
        Ok(())
    }

    /// Encodes the packet.
    pub fn to_bytes(&self) -> [u8; ARP_PACKET_LEN] {
        let mut out = [0; ARP_PACKET_LEN];
        out[0..2].copy_from_slice(&self.hardware_type.to_be_bytes());
        out[2..4].copy_from_slice(&self.protocol_type.to_be_bytes());
        out[4] = self.hardware_address_len;
        out[5] = self.ip_address_len;
        out[6..8].copy_from_slice(&self.opcode.to_be_bytes());
        out[8..16].copy_from_slice(&self.sender.eui64.raw().to_be_bytes());
        self.sender.encode(&mut out[16..24]);
        out[24..28].copy_from_slice(&self.sender_ip.octets());
        out[28..32].copy_from_slice(&self.target_ip.octets());
        out
    }
}
