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

//! Multicast channel allocation protocol messages.
//!
//! ```text
//! | length:16 | reserved:8 | opcode:8 |
//! descriptors, each:
//! | length:8 | type:8 | reserved:16 |
//! | expiration:8 | channel:8 | speed:8 | reserved:8 |
//! | bandwidth:32 |
//! | group_address:32 |
//! ```
//!
//! Only IPv4 group descriptors are understood. Descriptors of other types are skipped using
//! their length field.

use super::{read_u16, read_u32, WireError};
use smallvec::SmallVec;
use std::net::Ipv4Addr;

/// Size of the message header.
pub const MCAP_HEADER_LEN: usize = 4;
/// Size of an IPv4 group descriptor.
pub const DESCRIPTOR_LEN: usize = 16;
/// Descriptor type of IPv4 multicast groups.
pub const MCAST_TYPE_IPV4: u8 = 1;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum McapOpcode {
    /// The sender owns the channels of the descriptors.
    Advertise,
    /// The sender asks the owners of the descriptors' groups to advertise.
    Solicit,
}

/// IPv4 group descriptor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct McapDescriptor {
    /// Remaining lifetime of the channel allocation, in seconds.
    pub expiration: u8,
    /// Channel carrying the group. Not validated.
    pub channel: u8,
    /// Speed code at which the group is sent. Not validated.
    pub speed: u8,
    pub bandwidth: u32,
    pub group: Ipv4Addr,
}

/// Decoded message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McapMessage {
    pub opcode: McapOpcode,
    pub descriptors: SmallVec<[McapDescriptor; 4]>,
}

impl McapMessage {
    /// Decodes a message.
    ///
    /// The length field limits the descriptors being read if it is smaller than `bytes`. A
    /// descriptor whose length field is too small or points past the end of the message ends the
    /// decoding, and the descriptors read so far are kept.
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < MCAP_HEADER_LEN {
            return Err(WireError::Truncated {
                what: "MCAP header",
                len: bytes.len(),
            });
        }

        let length = usize::from(read_u16(&bytes[0..2]));
        let opcode = match bytes[3] {
            0 => McapOpcode::Advertise,
            1 => McapOpcode::Solicit,
            _ => return Err(WireError::Invalid("MCAP opcode")),
        };

        let end = if length >= MCAP_HEADER_LEN && length < bytes.len() {
            length
        } else {
            bytes.len()
        };
        let mut data = &bytes[MCAP_HEADER_LEN..end];

        let mut descriptors = SmallVec::new();
        while data.len() >= 4 {
            let descriptor_len = usize::from(data[0]);
            if descriptor_len < 4 || descriptor_len > data.len() {
                break;
            }

            if data[1] == MCAST_TYPE_IPV4 && descriptor_len >= DESCRIPTOR_LEN {
                descriptors.push(McapDescriptor {
                    expiration: data[4],
                    channel: data[5],
                    speed: data[6],
                    bandwidth: read_u32(&data[8..12]),
                    group: Ipv4Addr::new(data[12], data[13], data[14], data[15]),
                });
            }

            data = &data[descriptor_len..];
        }

        Ok(McapMessage {
            opcode,
            descriptors,
        })
    }

    /// Number of bytes of the encoded message.
    pub fn encoded_len(&self) -> usize {
        MCAP_HEADER_LEN + self.descriptors.len() * DESCRIPTOR_LEN
    }

    /// Encodes the message at the end of `out`.
    pub fn write(&self, out: &mut Vec<u8>) {
        let len = self.encoded_len();
        out.reserve(len);
        out.extend_from_slice(&(len as u16).to_be_bytes());
        out.push(0);
        out.push(match self.opcode {
            McapOpcode::Advertise => 0,
            McapOpcode::Solicit => 1,
        });

        for descriptor in &self.descriptors {
            out.push(DESCRIPTOR_LEN as u8);
            out.push(MCAST_TYPE_IPV4);
            out.extend_from_slice(&[0, 0]);
            out.push(descriptor.expiration);
            out.push(descriptor.channel);
            out.push(descriptor.speed);
            out.push(0);
            out.extend_from_slice(&descriptor.bandwidth.to_be_bytes());
            out.extend_from_slice(&descriptor.group.octets());
        }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out);
        out
    }
}
