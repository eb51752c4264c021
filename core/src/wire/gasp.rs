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

//! Asynchronous stream packets and the GASP header.
//!
//! ```text
//! stream header: | data_length:16 | tag:2 | channel:6 | tcode:4 | sy:4 |
//! GASP header:   | source_ID:16   | specifier_ID_hi:16 |
//!                | specifier_ID_lo:8 | version:24 |
//! ```
//!
//! The stream header is produced and consumed by the bus hardware. It is decoded here because
//! the receive path gets the raw packet and must check its tag.

use super::{read_u16, read_u32, WireError};
use fwip_ieee1394_interface::NodeId;

/// Size of the stream packet header quadlet.
pub const STREAM_HEADER_LEN: usize = 4;
/// Size of the GASP header.
pub const GASP_HEADER_LEN: usize = 8;
/// Tag of stream packets carrying a GASP header.
pub const GASP_TAG: u8 = 3;
/// Transaction code of asynchronous stream packets.
pub const ASYNC_STREAM_TCODE: u8 = 0xa;
/// IANA specifier ID found in IP-over-1394 GASP headers.
pub const RFC2734_SPECIFIER_ID: u32 = 0x00_005e;
/// Version found in IP-over-1394 GASP headers.
pub const RFC2734_VERSION: u32 = 0x00_0001;

/// First quadlet of an asynchronous stream packet.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct StreamHeader {
    /// Number of bytes following the header.
    pub data_length: u16,
    pub tag: u8,
    pub channel: u8,
    pub tcode: u8,
    pub sy: u8,
}

impl StreamHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < STREAM_HEADER_LEN {
            return Err(WireError::Truncated {
                what: "stream header",
                len: bytes.len(),
            });
        }

        Ok(StreamHeader {
            data_length: read_u16(&bytes[0..2]),
            tag: bytes[2] >> 6,
            channel: bytes[2] & 0x3f,
            tcode: bytes[3] >> 4,
            sy: bytes[3] & 0xf,
        })
    }

    pub fn write(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.data_length.to_be_bytes());
        out[2] = (self.tag << 6) | (self.channel & 0x3f);
        out[3] = (self.tcode << 4) | (self.sy & 0xf);
    }
}

/// Global asynchronous stream packet header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct GaspHeader {
    /// Node that sent the packet.
    pub source: NodeId,
    /// 24 bits specifier ID.
    pub specifier_id: u32,
    /// 24 bits version.
    pub version: u32,
}

impl GaspHeader {
    /// Builds the header that IP over 1394 puts in front of every broadcast datagram.
    pub fn rfc2734(source: NodeId) -> Self {
        GaspHeader {
            source,
            specifier_id: RFC2734_SPECIFIER_ID,
            version: RFC2734_VERSION,
        }
    }

    /// Returns true if the specifier ID and version are the ones of IP over 1394.
    pub fn is_rfc2734(&self) -> bool {
        self.specifier_id == RFC2734_SPECIFIER_ID && self.version == RFC2734_VERSION
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < GASP_HEADER_LEN {
            return Err(WireError::Truncated {
                what: "GASP header",
                len: bytes.len(),
            });
        }

        let quadlet1 = read_u32(&bytes[4..8]);
        Ok(GaspHeader {
            source: NodeId::from(read_u16(&bytes[0..2])),
            specifier_id: (u32::from(read_u16(&bytes[2..4])) << 8) | (quadlet1 >> 24),
            version: quadlet1 & 0x00ff_ffff,
        })
    }

    pub fn write(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.source.raw().to_be_bytes());
        out[2..4].copy_from_slice(&((self.specifier_id >> 8) as u16).to_be_bytes());
        let quadlet1 = (self.specifier_id << 24) | (self.version & 0x00ff_ffff);
        out[4..8].copy_from_slice(&quadlet1.to_be_bytes());
    }
}
