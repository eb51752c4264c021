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

//! On-wire formats of IP over 1394.
//!
//! See [RFC 2734](https://tools.ietf.org/html/rfc2734) for IPv4 and
//! [RFC 3146](https://tools.ietf.org/html/rfc3146) for IPv6. Everything is big endian.
//!
//! A datagram sent to a single node is written in that node's unicast FIFO, preceded with an
//! encapsulation header. A datagram sent to a group is an asynchronous stream packet whose
//! payload starts with a GASP header, followed with an unfragmented encapsulation header.

use core::convert::TryFrom as _;
use fwip_ieee1394_interface::{Eui64, FifoAddress, Speed};

pub mod arp;
pub mod encap;
pub mod gasp;
pub mod mcap;
pub mod ndp;

/// Ether type of IPv4 datagrams.
pub const ETHER_TYPE_IPV4: u16 = 0x0800;
/// Ether type of ARP packets.
pub const ETHER_TYPE_ARP: u16 = 0x0806;
/// Ether type of IPv6 datagrams.
pub const ETHER_TYPE_IPV6: u16 = 0x86dd;
/// Ether type of MCAP messages.
pub const ETHER_TYPE_MCAP: u16 = 0x8861;

/// Minimum size of an IPv4 datagram.
pub const IPV4_HEADER_LEN: usize = 20;

/// Error while decoding a packet.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Not enough bytes for the structure being decoded.
    #[error("{what} truncated to {len} bytes")]
    Truncated { what: &'static str, len: usize },
    /// A field has a value that isn't allowed.
    #[error("invalid {0}")]
    Invalid(&'static str),
}

/// What a node advertises about itself in ARP packets and NDP options.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HardwareAddress {
    /// Unique identifier of the node.
    pub eui64: Eui64,
    /// The node accepts block writes of up to `2^(max_rec + 1)` bytes.
    pub max_rec: u8,
    /// Maximum speed of the node.
    pub speed: Speed,
    /// Where to write unicast datagrams.
    pub fifo: FifoAddress,
}

impl HardwareAddress {
    /// Largest block write, in bytes, that the node accepts.
    pub fn max_payload(&self) -> usize {
        1usize
            .checked_shl(u32::from(self.max_rec) + 1)
            .unwrap_or(usize::max_value())
    }

    /// Decodes the 16 bytes after the EUI-64: max_rec, sspd, FIFO hi, FIFO lo.
    pub(crate) fn decode(eui64: Eui64, bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < 8 {
            return Err(WireError::Truncated {
                what: "hardware address",
                len: bytes.len(),
            });
        }

        Ok(HardwareAddress {
            eui64,
            max_rec: bytes[0],
            speed: Speed::try_from(bytes[1]).map_err(|_| WireError::Invalid("speed"))?,
            fifo: FifoAddress {
                hi: read_u16(&bytes[2..4]),
                lo: read_u32(&bytes[4..8]),
            },
        })
    }

    /// Writes max_rec, sspd, FIFO hi and FIFO lo in the first 8 bytes of `out`.
    pub(crate) fn encode(&self, out: &mut [u8]) {
        out[0] = self.max_rec;
        out[1] = self.speed.code();
        out[2..4].copy_from_slice(&self.fifo.hi.to_be_bytes());
        out[4..8].copy_from_slice(&self.fifo.lo.to_be_bytes());
    }
}

pub(crate) fn read_u16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

pub(crate) fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

pub(crate) fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

#[cfg(test)]
mod tests;
