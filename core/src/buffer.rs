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

//! Chained packet buffers and the copy routines that move bytes in and out of them.
//!
//! Packets handed over by the network stack are not necessarily contiguous in memory. A
//! [`PacketChain`] is a list of segments that together form one logical buffer. Segments can be
//! of any size, including zero.
//!
//! The [`copy_into_chain`] and [`copy_from_chain`] functions are the only place where offsets
//! within a chain are translated into positions within segments. Everything that marshals
//! payloads into bus commands, or reassembles fragments into a datagram, goes through them.

use core::{cmp, fmt};
use smallvec::SmallVec;

/// Logical buffer made of a list of segments.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PacketChain {
    segments: SmallVec<[Vec<u8>; 2]>,
}

/// Location of a byte within a [`PacketChain`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ChainPosition {
    /// Index of the segment.
    pub segment: usize,
    /// Offset within that segment.
    pub offset: usize,
}

/// Error that can happen when copying from or into a chain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    /// The requested range goes past the end of the chain.
    #[error("range of {len} bytes at offset {offset} exceeds chain length {chain_len}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        chain_len: usize,
    },
    /// The destination buffer is smaller than the requested length.
    #[error("destination of {capacity} bytes is too small for {len} bytes")]
    DestinationTooSmall { capacity: usize, len: usize },
}

impl PacketChain {
    /// Builds an empty chain.
    pub fn new() -> Self {
        PacketChain {
            segments: SmallVec::new(),
        }
    }

    /// Builds a chain made of a single segment of `len` zero bytes.
    pub fn zeroed(len: usize) -> Self {
        let mut segments = SmallVec::new();
        segments.push(vec![0; len]);
        PacketChain { segments }
    }

    /// Builds a chain from a list of segments.
    pub fn from_segments(segments: impl IntoIterator<Item = Vec<u8>>) -> Self {
        PacketChain {
            segments: segments.into_iter().collect(),
        }
    }

    /// Appends a segment at the end of the chain.
    pub fn push_segment(&mut self, segment: Vec<u8>) {
        self.segments.push(segment);
    }

    /// Total number of bytes in the chain.
    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.len()).sum()
    }

    /// Returns true if the chain doesn't contain any byte.
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|s| s.is_empty())
    }

    /// Iterates over the segments of the chain, including empty ones.
    pub fn segments(&self) -> impl ExactSizeIterator<Item = &[u8]> {
        self.segments.iter().map(|s| &s[..])
    }

    /// Copies the whole chain into a new contiguous buffer.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for segment in &self.segments {
            out.extend_from_slice(segment);
        }
        out
    }

    /// Merges all the segments into one and returns it.
    pub fn make_contiguous(&mut self) -> &mut Vec<u8> {
        if self.segments.len() != 1 {
            let merged = self.to_vec();
            self.segments.clear();
            self.segments.push(merged);
        }
        &mut self.segments[0]
    }

    /// Returns the location of the byte at `offset`, skipping empty segments. Returns `None` if
    /// `offset` is at or past the end of the chain.
    pub fn position_of(&self, offset: usize) -> Option<ChainPosition> {
        let mut skip = offset;
        for (index, segment) in self.segments.iter().enumerate() {
            if skip < segment.len() {
                return Some(ChainPosition {
                    segment: index,
                    offset: skip,
                });
            }
            skip -= segment.len();
        }
        None
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<(), ChainError> {
        let chain_len = self.len();
        match offset.checked_add(len) {
            Some(end) if end <= chain_len => Ok(()),
            _ => Err(ChainError::OutOfBounds {
                offset,
                len,
                chain_len,
            }),
        }
    }
}

impl From<Vec<u8>> for PacketChain {
    fn from(data: Vec<u8>) -> Self {
        let mut segments = SmallVec::new();
        segments.push(data);
        PacketChain { segments }
    }
}

impl fmt::Debug for PacketChain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("PacketChain")
            .field("len", &self.len())
            .field("segments", &self.segments.len())
            .finish()
    }
}

/// Copies `src` into `chain`, starting at the logical `offset`.
///
/// The chain is never grown. Returns an error and leaves the chain untouched if the chain is too
/// short.
pub fn copy_into_chain(
    chain: &mut PacketChain,
    offset: usize,
    src: &[u8],
) -> Result<(), ChainError> {
    chain.check_range(offset, src.len())?;

    let mut skip = offset;
    let mut copied = 0;
    for segment in chain.segments.iter_mut() {
        if copied == src.len() {
            break;
        }
        if skip >= segment.len() {
            skip -= segment.len();
            continue;
        }

        let n = cmp::min(segment.len() - skip, src.len() - copied);
        segment[skip..skip + n].copy_from_slice(&src[copied..copied + n]);
        copied += n;
        skip = 0;
    }

    debug_assert_eq!(copied, src.len());
    Ok(())
}

/// Copies `len` bytes of `chain`, starting at the logical `offset`, to the beginning of `dst`.
///
/// On success, returns the location of the first byte following the copied range, or `None` if
/// the copy reached the end of the chain.
pub fn copy_from_chain(
    chain: &PacketChain,
    offset: usize,
    dst: &mut [u8],
    len: usize,
) -> Result<Option<ChainPosition>, ChainError> {
    if len > dst.len() {
        return Err(ChainError::DestinationTooSmall {
            capacity: dst.len(),
            len,
        });
    }
    chain.check_range(offset, len)?;

    let mut skip = offset;
    let mut copied = 0;
    for segment in chain.segments.iter() {
        if copied == len {
            break;
        }
        if skip >= segment.len() {
            skip -= segment.len();
            continue;
        }

        let n = cmp::min(segment.len() - skip, len - copied);
        dst[copied..copied + n].copy_from_slice(&segment[skip..skip + n]);
        copied += n;
        skip = 0;
    }

    debug_assert_eq!(copied, len);
    Ok(chain.position_of(offset + len))
}
