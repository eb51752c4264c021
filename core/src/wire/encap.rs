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

//! Link fragment encapsulation headers.
//!
//! ```text
//! unfragmented:  | lf:2 | reserved:14          | ether_type:16         |
//! fragment:      | lf:2 | datagram_size - 1:14 | ether_type or offset:16 |
//!                | dgl:16                      | reserved:16             |
//! ```
//!
//! The first fragment of a datagram carries its ether type. The others carry the byte offset of
//! their payload within the datagram.

use super::{read_u16, WireError};

/// Size of the header of an unfragmented datagram.
pub const UNFRAGMENTED_HEADER_LEN: usize = 4;
/// Size of the header of a fragment.
pub const FRAGMENT_HEADER_LEN: usize = 8;
/// Largest datagram size that a fragment header can describe.
pub const MAX_DATAGRAM_SIZE: usize = 0x4000;

const LF_UNFRAGMENTED: u16 = 0;
const LF_FIRST: u16 = 1;
const LF_LAST: u16 = 2;
const LF_INTERIOR: u16 = 3;

/// Decoded encapsulation header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EncapsulationHeader {
    /// The datagram fits in a single packet.
    Unfragmented { ether_type: u16 },
    /// Part of a larger datagram.
    Fragment(FragmentHeader),
}

/// Header of a fragment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FragmentHeader {
    /// Which part of the datagram this is.
    pub position: FragmentPosition,
    /// Size of the whole datagram. Between 1 and [`MAX_DATAGRAM_SIZE`].
    pub datagram_size: u16,
    /// Datagram label shared by all the fragments of a datagram.
    pub label: u16,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FragmentPosition {
    First { ether_type: u16 },
    Interior { offset: u16 },
    Last { offset: u16 },
}

impl FragmentHeader {
    /// Offset of the payload of this fragment within the datagram.
    pub fn offset(&self) -> usize {
        match self.position {
            FragmentPosition::First { .. } => 0,
            FragmentPosition::Interior { offset } | FragmentPosition::Last { offset } => {
                usize::from(offset)
            }
        }
    }

    pub fn is_first(&self) -> bool {
        matches!(self.position, FragmentPosition::First { .. })
    }
}

impl EncapsulationHeader {
    /// Decodes the header at the start of `bytes`. Returns the header and its length.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize), WireError> {
        if bytes.len() < UNFRAGMENTED_HEADER_LEN {
            return Err(WireError::Truncated {
                what: "encapsulation header",
                len: bytes.len(),
            });
        }

        let word0 = read_u16(&bytes[0..2]);
        let word1 = read_u16(&bytes[2..4]);
        let lf = word0 >> 14;

        if lf == LF_UNFRAGMENTED {
            let header = EncapsulationHeader::Unfragmented { ether_type: word1 };
            return Ok((header, UNFRAGMENTED_HEADER_LEN));
        }

        if bytes.len() < FRAGMENT_HEADER_LEN {
            return Err(WireError::Truncated {
                what: "fragment header",
                len: bytes.len(),
            });
        }

        let position = match lf {
            LF_FIRST => FragmentPosition::First { ether_type: word1 },
            LF_LAST => FragmentPosition::Last { offset: word1 },
            LF_INTERIOR => FragmentPosition::Interior { offset: word1 },
            _ => unreachable!(),
        };

        let header = FragmentHeader {
            position,
            datagram_size: (word0 & 0x3fff) + 1,
            label: read_u16(&bytes[4..6]),
        };

        Ok((EncapsulationHeader::Fragment(header), FRAGMENT_HEADER_LEN))
    }

    /// Length of the encoded header.
    pub fn len(&self) -> usize {
        match self {
            EncapsulationHeader::Unfragmented { .. } => UNFRAGMENTED_HEADER_LEN,
            EncapsulationHeader::Fragment(_) => FRAGMENT_HEADER_LEN,
        }
    }

    /// Writes the header at the start of `out`. Returns the number of bytes written.
    ///
    /// # Panic
    ///
    /// Panics if `out` is smaller than [`EncapsulationHeader::len`].
    ///
    pub fn write(&self, out: &mut [u8]) -> usize {
        match self {
            EncapsulationHeader::Unfragmented { ether_type } => {
                out[0..2].copy_from_slice(&(LF_UNFRAGMENTED << 14).to_be_bytes());
                out[2..4].copy_from_slice(&ether_type.to_be_bytes());
                UNFRAGMENTED_HEADER_LEN
            }
            EncapsulationHeader::Fragment(header) => {
                debug_assert!(header.datagram_size >= 1);
                let (lf, word1) = match header.position {
                    FragmentPosition::First { ether_type } => (LF_FIRST, ether_type),
                    FragmentPosition::Last { offset } => (LF_LAST, offset),
                    FragmentPosition::Interior { offset } => (LF_INTERIOR, offset),
                };
                let word0 = (lf << 14) | (header.datagram_size.wrapping_sub(1) & 0x3fff);
                out[0..2].copy_from_slice(&word0.to_be_bytes());
                out[2..4].copy_from_slice(&word1.to_be_bytes());
                out[4..6].copy_from_slice(&header.label.to_be_bytes());
                out[6..8].copy_from_slice(&[0, 0]);
                FRAGMENT_HEADER_LEN
            }
        }
    }
}
