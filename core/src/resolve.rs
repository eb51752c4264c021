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

//! Address resolution caches.
//!
//! Three tables live here:
//!
//! - The unicast table, made of [`Arb`]s, maps the EUI-64 of a peer to the information required
//! to write in its unicast FIFO. Entries are created the first time a peer is resolved, and are
//! refreshed by every ARP packet and neighbor discovery option received from that peer.
//! - The multicast table, made of [`Marb`]s, maps an IPv4 multicast group to the channel that
//! carries it.
//! - The device table, made of [`Drb`]s, maps the EUI-64 of an attached device to the handle the
//! bus layer gave out for it.
//!
//! When a device goes away, its [`Drb`] is removed and the [`Arb`] of the same peer is kept but
//! marked as [`DeviceBinding::Invalidated`]. This makes it possible to tell apart a peer that was
//! never reachable from one that used to be.

use crate::wire::HardwareAddress;
use fnv::FnvBuildHasher;
use fwip_ieee1394_interface::{Channel, DeviceRef, Eui64, FifoAddress, LinkAddress, Speed};
use hashbrown::HashMap;
use smallvec::SmallVec;
use std::net::Ipv4Addr;

#[cfg(test)]
mod tests;

/// Link between an [`Arb`] and the device of the bus layer.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceBinding {
    /// No device has ever been associated with this entry.
    Unresolved,
    /// The peer is reachable through this device.
    Bound(DeviceRef),
    /// The device that used to be associated with this entry is gone.
    Invalidated,
}

impl DeviceBinding {
    /// Returns the device if the binding is valid.
    pub fn device(&self) -> Option<DeviceRef> {
        match self {
            DeviceBinding::Bound(device) => Some(*device),
            DeviceBinding::Unresolved | DeviceBinding::Invalidated => None,
        }
    }
}

/// Unicast address resolution entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arb {
    eui64: Eui64,
    link_address: LinkAddress,
    max_rec: u8,
    speed: Speed,
    fifo: FifoAddress,
    binding: DeviceBinding,
    is_mac_peer: bool,
}

impl Arb {
    pub fn eui64(&self) -> Eui64 {
        self.eui64
    }

    pub fn link_address(&self) -> LinkAddress {
        self.link_address
    }

    pub fn binding(&self) -> DeviceBinding {
        self.binding
    }

    pub fn is_mac_peer(&self) -> bool {
        self.is_mac_peer
    }

    /// What the peer last advertised about itself.
    pub fn hardware_address(&self) -> HardwareAddress {
        HardwareAddress {
            eui64: self.eui64,
            max_rec: self.max_rec,
            speed: self.speed,
            fifo: self.fifo,
        }
    }
}

/// Multicast address resolution entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marb {
    group: Ipv4Addr,
    /// Channel the group is sent on.
    pub channel: Channel,
    pub speed: Speed,
    pub max_rec: u8,
}

impl Marb {
    pub fn group(&self) -> Ipv4Addr {
        self.group
    }
}

/// What the bus layer reports about an attached device.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub eui64: Eui64,
    pub device: DeviceRef,
    /// True if the device is known to run the same IP over 1394 implementation as us.
    pub is_mac_peer: bool,
    /// The device accepts block writes of up to `2^max_payload_log2` bytes.
    pub max_payload_log2: u8,
    pub max_speed: Speed,
}

/// Device reference entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Drb {
    info: DeviceInfo,
    link_address: LinkAddress,
}

impl Drb {
    pub fn eui64(&self) -> Eui64 {
        self.info.eui64
    }

    pub fn device(&self) -> DeviceRef {
        self.info.device
    }

    pub fn link_address(&self) -> LinkAddress {
        self.link_address
    }

    pub fn is_mac_peer(&self) -> bool {
        self.info.is_mac_peer
    }

    pub fn max_payload_log2(&self) -> u8 {
        self.info.max_payload_log2
    }

    pub fn max_speed(&self) -> Speed {
        self.info.max_speed
    }
}

/// Ways to designate a device to invalidate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DeviceKey {
    Eui64(Eui64),
    LinkAddress(LinkAddress),
    Device(DeviceRef),
}

/// The three address resolution tables of an interface.
#[derive(Debug, Default)]
pub struct AddressCache {
    unicast: HashMap<Eui64, Arb, FnvBuildHasher>,
    multicast: HashMap<Ipv4Addr, Marb, FnvBuildHasher>,
    devices: HashMap<Eui64, Drb, FnvBuildHasher>,
}

impl AddressCache {
    pub fn new() -> Self {
        AddressCache::default()
    }

    /// Returns the entry of the given peer, creating it if necessary.
    ///
    /// A newly-created entry is bound to the device of the same EUI-64 if there is one.
    pub fn resolve_unicast(&mut self, eui64: Eui64) -> &mut Arb {
        let devices = &self.devices;
        self.unicast.entry(eui64).or_insert_with(|| {
            let (binding, is_mac_peer) = match devices.get(&eui64) {
                Some(drb) => (DeviceBinding::Bound(drb.device()), drb.is_mac_peer()),
                None => (DeviceBinding::Unresolved, false),
            };

            Arb {
                eui64,
                link_address: eui64.to_link_address(),
                max_rec: 0,
                speed: Speed::S100,
                fifo: FifoAddress::default(),
                binding,
                is_mac_peer,
            }
        })
    }

    /// Stores what a peer advertised about itself, for example in an ARP packet.
    pub fn update_unicast(&mut self, address: &HardwareAddress) -> &Arb {
        let device = self.devices.get(&address.eui64).map(|drb| drb.info);
        let arb = self.resolve_unicast(address.eui64);
        arb.max_rec = address.max_rec;
        arb.speed = address.speed;
        arb.fifo = address.fifo;
        match device {
            Some(info) => {
                arb.binding = DeviceBinding::Bound(info.device);
                arb.is_mac_peer = info.is_mac_peer;
            }
            None if arb.binding != DeviceBinding::Unresolved => {
                arb.binding = DeviceBinding::Invalidated;
            }
            None => {}
        }
        arb
    }

    pub fn find_unicast(&self, eui64: Eui64) -> Option<&Arb> {
        self.unicast.get(&eui64)
    }

    pub fn find_unicast_by_link_address(&self, address: &LinkAddress) -> Option<&Arb> {
        self.unicast.get(&Eui64::from(*address))
    }

    /// Creates or updates the entry of an attached device.
    ///
    /// The unicast entry of the same peer, if any, is bound to the device.
    pub fn bind_device(&mut self, info: DeviceInfo) -> &Drb {
        if let Some(arb) = self.unicast.get_mut(&info.eui64) {
            arb.binding = DeviceBinding::Bound(info.device);
            arb.is_mac_peer = info.is_mac_peer;
        }

        let drb = Drb {
            info,
            link_address: info.eui64.to_link_address(),
        };
        match self.devices.entry(info.eui64) {
            hashbrown::hash_map::Entry::Occupied(mut entry) => {
                entry.insert(drb);
                entry.into_mut()
            }
            hashbrown::hash_map::Entry::Vacant(entry) => entry.insert(drb),
        }
    }

    pub fn find_device(&self, eui64: Eui64) -> Option<&Drb> {
        self.devices.get(&eui64)
    }

    pub fn find_device_by_link_address(&self, address: &LinkAddress) -> Option<&Drb> {
        self.devices.get(&Eui64::from(*address))
    }

    pub fn find_device_by_ref(&self, device: DeviceRef) -> Option<&Drb> {
        self.devices.values().find(|drb| drb.device() == device)
    }

    /// Iterates over the attached devices.
    pub fn devices(&self) -> impl Iterator<Item = &Drb> {
        self.devices.values()
    }

    /// Removes the device entry matching `key` and invalidates the unicast entries bound to it.
    ///
    /// Returns the removed entry, if any.
    pub fn invalidate_device(&mut self, key: DeviceKey) -> Option<Drb> {
        let eui64 = match key {
            DeviceKey::Eui64(eui64) => Some(eui64),
            DeviceKey::LinkAddress(address) => Some(Eui64::from(address)),
            DeviceKey::Device(device) => self.find_device_by_ref(device).map(|drb| drb.eui64()),
        };

        let removed = eui64.and_then(|eui64| self.devices.remove(&eui64));
        let stale_device = match (key, &removed) {
            (DeviceKey::Device(device), _) => Some(device),
            (_, Some(drb)) => Some(drb.device()),
            (_, None) => None,
        };

        for arb in self.unicast.values_mut() {
            let matches = Some(arb.eui64) == eui64
                || (stale_device.is_some() && arb.binding.device() == stale_device);
            if matches && arb.binding != DeviceBinding::Unresolved {
                arb.binding = DeviceBinding::Invalidated;
            }
        }

        removed
    }

    /// Invalidates the device binding of every unicast entry. Device entries are kept.
    pub fn invalidate_all_bindings(&mut self) {
        for arb in self.unicast.values_mut() {
            if let DeviceBinding::Bound(_) = arb.binding {
                arb.binding = DeviceBinding::Invalidated;
            }
        }
    }

    pub fn find_multicast(&self, group: Ipv4Addr) -> Option<&Marb> {
        self.multicast.get(&group)
    }

    pub fn find_multicast_mut(&mut self, group: Ipv4Addr) -> Option<&mut Marb> {
        self.multicast.get_mut(&group)
    }

    /// Returns the entry of a group, creating it on `channel` if necessary.
    pub fn join_multicast(
        &mut self,
        group: Ipv4Addr,
        channel: Channel,
        speed: Speed,
        max_rec: u8,
    ) -> &mut Marb {
        self.multicast.entry(group).or_insert_with(|| Marb {
            group,
            channel,
            speed,
            max_rec,
        })
    }

    pub fn remove_multicast(&mut self, group: Ipv4Addr) -> Option<Marb> {
        self.multicast.remove(&group)
    }

    /// Iterates over the groups carried by `channel`.
    pub fn multicast_on(&self, channel: Channel) -> impl Iterator<Item = &Marb> {
        self.multicast
            .values()
            .filter(move |marb| marb.channel == channel)
    }

    /// Removes every group carried by `channel`. Returns the groups removed.
    pub fn release_multicast_channel(&mut self, channel: Channel) -> SmallVec<[Ipv4Addr; 4]> {
        let mut removed = SmallVec::new();
        self.multicast.retain(|group, marb| {
            if marb.channel == channel {
                removed.push(*group);
                false
            } else {
                true
            }
        });
        removed
    }

    /// Moves every group carried by `from` to `to`. Returns the number of groups moved.
    pub fn move_multicast_channel(&mut self, from: Channel, to: Channel) -> usize {
        let mut num = 0;
        for marb in self.multicast.values_mut().filter(|m| m.channel == from) {
            marb.channel = to;
            num += 1;
        }
        num
    }

    /// Removes all the entries.
    pub fn clear(&mut self) {
        self.unicast.clear();
        self.multicast.clear();
        self.devices.clear();
    }
}
