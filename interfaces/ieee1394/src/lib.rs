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

//! IEEE 1394 bus identifiers.
//!
//! This crate contains the vocabulary shared between the IP-over-FireWire engine and whatever
//! drives the actual bus: node identifiers, globally unique device identifiers, speeds, channels,
//! and the opaque handles that the bus layer gives out for attached devices and stream listeners.
//!
//! # Bus overview
//!
//! A FireWire bus is made of up to 63 nodes. After each bus reset, every node receives a 16 bits
//! *node ID* made of a 10 bits bus number and a 6 bits physical ID. The bus number `0x3ff` means
//! "the local bus". Node IDs are only valid until the next bus reset, which is why devices are
//! instead identified by their *EUI-64*, a globally unique 64 bits identifier burnt into the
//! device's configuration ROM.
//!
//! Two kinds of packets are relevant for IP traffic:
//!
//! - *Asynchronous block writes*, directed to one node. The target is a 48 bits address in the
//! memory space of the target node. For IP, each node exposes a *unicast FIFO* at an address of
//! its choice and advertises that address through ARP or NDP.
//! - *Asynchronous stream packets*, sent on one of 64 channels and received by every node
//! listening on that channel. IP broadcast and multicast use these.

use core::{convert::TryFrom, fmt, num::NonZeroU64};

/// Bus number designating the local bus.
pub const LOCAL_BUS: u16 = 0x3ff;

/// Identifier of a node on the bus. Only valid until the next bus reset.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::From)]
pub struct NodeId(u16);

impl NodeId {
    /// Builds the identifier of the node with the given physical ID on the local bus.
    pub fn local(physical_id: u8) -> Self {
        NodeId((LOCAL_BUS << 6) | u16::from(physical_id & 0x3f))
    }

    /// Returns the raw 16 bits value.
    pub fn raw(&self) -> u16 {
        self.0
    }

    /// Returns the 10 bits bus number.
    pub fn bus(&self) -> u16 {
        self.0 >> 6
    }

    /// Returns the 6 bits physical ID.
    pub fn physical_id(&self) -> u8 {
        (self.0 & 0x3f) as u8
    }

    /// Returns true if the bus number designates the local bus.
    pub fn is_local_bus(&self) -> bool {
        self.bus() == LOCAL_BUS
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "NodeId({:#06x})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// Globally unique 64 bits identifier of a device.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::From)]
pub struct Eui64(u64);

impl Eui64 {
    /// Returns the raw value.
    pub fn raw(&self) -> u64 {
        self.0
    }

    /// Returns the link-layer address derived from this identifier.
    ///
    /// IP over 1394 uses the EUI-64 itself, in network byte order, as hardware address.
    pub fn to_link_address(&self) -> LinkAddress {
        LinkAddress(self.0.to_be_bytes())
    }
}

impl From<LinkAddress> for Eui64 {
    fn from(addr: LinkAddress) -> Eui64 {
        Eui64(u64::from_be_bytes(addr.0))
    }
}

impl fmt::Debug for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Eui64({:016x})", self.0)
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// 8 bytes link-layer address, as seen by the network stack.
#[derive(Copy, Clone, PartialEq, Eq, Hash, derive_more::From)]
pub struct LinkAddress(pub [u8; 8]);

impl LinkAddress {
    /// Address that designates every node of the bus.
    pub const BROADCAST: LinkAddress = LinkAddress([0xff; 8]);

    /// Returns true if this is the broadcast address.
    pub fn is_broadcast(&self) -> bool {
        *self == LinkAddress::BROADCAST
    }

    /// Returns true if this address was derived from an IPv4 multicast group (`01:00:5e` prefix).
    pub fn is_ipv4_multicast(&self) -> bool {
        self.0[..3] == [0x01, 0x00, 0x5e]
    }

    /// Returns true if this address was derived from an IPv6 multicast group (`33:33` prefix).
    pub fn is_ipv6_multicast(&self) -> bool {
        self.0[..2] == [0x33, 0x33]
    }

    /// Returns true if datagrams to this address go out as asynchronous stream packets.
    pub fn is_group(&self) -> bool {
        self.is_broadcast() || self.is_ipv4_multicast() || self.is_ipv6_multicast()
    }
}

impl fmt::Debug for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for LinkAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (n, byte) in self.0.iter().enumerate() {
            if n != 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// Transmission speed of the bus, as encoded in `sspd` fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub enum Speed {
    S100 = 0,
    S200 = 1,
    S400 = 2,
    S800 = 3,
    S1600 = 4,
    S3200 = 5,
}

impl Speed {
    /// Returns the on-wire encoding of this speed.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for Speed {
    type Error = InvalidSpeed;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Speed::S100,
            1 => Speed::S200,
            2 => Speed::S400,
            3 => Speed::S800,
            4 => Speed::S1600,
            5 => Speed::S3200,
            _ => return Err(InvalidSpeed(code)),
        })
    }
}

/// Speed code that doesn't correspond to any known speed.
#[derive(Debug, Copy, Clone, PartialEq, Eq, derive_more::Display)]
#[display(fmt = "invalid speed code {}", _0)]
pub struct InvalidSpeed(pub u8);

/// Number of a stream channel. Always in the range `0..64`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display)]
pub struct Channel(u8);

impl Channel {
    /// Number of channels on a bus.
    pub const COUNT: usize = 64;

    /// Channel on which broadcast datagrams are sent unless configured otherwise.
    pub const DEFAULT_BROADCAST: Channel = Channel(31);

    /// Builds a channel. Returns `None` if the number is out of range.
    pub fn new(num: u8) -> Option<Self> {
        if usize::from(num) < Channel::COUNT {
            Some(Channel(num))
        } else {
            None
        }
    }

    /// Returns the channel number.
    pub fn number(&self) -> u8 {
        self.0
    }

    /// Returns the channel number as an index in a table of [`Channel::COUNT`] elements.
    pub fn index(&self) -> usize {
        usize::from(self.0)
    }
}

/// 48 bits address of a unicast FIFO in the memory space of a node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct FifoAddress {
    /// Upper 16 bits.
    pub hi: u16,
    /// Lower 32 bits.
    pub lo: u32,
}

impl fmt::Display for FifoAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04x}.{:08x}", self.hi, self.lo)
    }
}

/// Opaque identifier of a device attached to the bus, given out by the bus layer.
///
/// The bus layer guarantees that a given value is never reused for another device while the
/// first one is still attached.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, derive_more::From)]
pub struct DeviceRef(NonZeroU64);

impl DeviceRef {
    /// Returns the raw value.
    pub fn raw(&self) -> u64 {
        self.0.get()
    }
}

/// Opaque identifier of an open stream listener, given out by the bus layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, derive_more::From)]
pub struct StreamHandle(NonZeroU64);

impl StreamHandle {
    /// Returns the raw value.
    pub fn raw(&self) -> u64 {
        self.0.get()
    }
}

#[cfg(test)]
mod tests;
