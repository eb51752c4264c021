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

use super::{AddressCache, DeviceBinding, DeviceInfo, DeviceKey};
use crate::wire::HardwareAddress;
use core::num::NonZeroU64;
use fwip_ieee1394_interface::{Channel, DeviceRef, Eui64, FifoAddress, Speed};
use std::net::Ipv4Addr;

fn device_ref(n: u64) -> DeviceRef {
    DeviceRef::from(NonZeroU64::new(n).unwrap())
}

fn device(eui64: u64, n: u64) -> DeviceInfo {
    DeviceInfo {
        eui64: Eui64::from(eui64),
        device: device_ref(n),
        is_mac_peer: true,
        max_payload_log2: 11,
        max_speed: Speed::S400,
    }
}

fn advertised(eui64: u64) -> HardwareAddress {
    HardwareAddress {
        eui64: Eui64::from(eui64),
        max_rec: 9,
        speed: Speed::S200,
        fifo: FifoAddress {
            hi: 0x1,
            lo: 0x2000,
        },
    }
}

#[test]
fn resolve_is_lookup_or_create() {
    let mut cache = AddressCache::new();
    let eui64 = Eui64::from(0xaa);
    assert!(cache.find_unicast(eui64).is_none());

    let arb = cache.resolve_unicast(eui64);
    assert_eq!(arb.binding(), DeviceBinding::Unresolved);
    assert_eq!(arb.link_address(), eui64.to_link_address());

    cache.resolve_unicast(eui64);
    assert!(cache.find_unicast(eui64).is_some());
    assert!(cache
        .find_unicast_by_link_address(&eui64.to_link_address())
        .is_some());
}

#[test]
fn new_entry_picks_up_attached_device() {
    let mut cache = AddressCache::new();
    cache.bind_device(device(0xbb, 3));
    let arb = cache.resolve_unicast(Eui64::from(0xbb));
    assert_eq!(arb.binding(), DeviceBinding::Bound(device_ref(3)));
    assert!(arb.is_mac_peer());
}

#[test]
fn update_refreshes_fields_and_binding() {
    let mut cache = AddressCache::new();
    let arb = cache.update_unicast(&advertised(0xcc));
    assert_eq!(arb.binding(), DeviceBinding::Unresolved);
    assert_eq!(arb.hardware_address(), advertised(0xcc));

    cache.bind_device(device(0xcc, 4));
    assert_eq!(
        cache.find_unicast(Eui64::from(0xcc)).unwrap().binding(),
        DeviceBinding::Bound(device_ref(4))
    );
}

#[test]
fn bind_device_rederives_link_address() {
    let mut cache = AddressCache::new();
    let drb = cache.bind_device(device(0x0102_0304_0506_0708, 1));
    assert_eq!(drb.link_address().0, [1, 2, 3, 4, 5, 6, 7, 8]);

    // Rebinding replaces the entry.
    cache.bind_device(device(0x0102_0304_0506_0708, 2));
    assert_eq!(cache.devices().count(), 1);
    assert!(cache.find_device_by_ref(device_ref(1)).is_none());
    assert!(cache.find_device_by_ref(device_ref(2)).is_some());
}

#[test]
fn invalidate_by_each_key() {
    let keys = [
        DeviceKey::Eui64(Eui64::from(0xdd)),
        DeviceKey::LinkAddress(Eui64::from(0xdd).to_link_address()),
        DeviceKey::Device(device_ref(7)),
    ];

    for key in keys.iter() {
        let mut cache = AddressCache::new();
        cache.bind_device(device(0xdd, 7));
        cache.update_unicast(&advertised(0xdd));

        let removed = cache.invalidate_device(*key).unwrap();
        assert_eq!(removed.device(), device_ref(7));
        assert!(cache.find_device(Eui64::from(0xdd)).is_none());

        let arb = cache.find_unicast(Eui64::from(0xdd)).unwrap();
        assert_eq!(arb.binding(), DeviceBinding::Invalidated);
        assert_eq!(arb.binding().device(), None);
    }
}

#[test]
fn invalidate_leaves_other_peers_alone() {
    let mut cache = AddressCache::new();
    cache.bind_device(device(0x1, 1));
    cache.bind_device(device(0x2, 2));
    cache.update_unicast(&advertised(0x1));
    cache.update_unicast(&advertised(0x2));
    cache.update_unicast(&advertised(0x3));

    cache.invalidate_device(DeviceKey::Device(device_ref(1)));
    assert_eq!(
        cache.find_unicast(Eui64::from(0x2)).unwrap().binding(),
        DeviceBinding::Bound(device_ref(2))
    );
    assert_eq!(
        cache.find_unicast(Eui64::from(0x3)).unwrap().binding(),
        DeviceBinding::Unresolved
    );
}

#[test]
fn update_after_departure_stays_invalid() {
    let mut cache = AddressCache::new();
    cache.bind_device(device(0xee, 1));
    cache.update_unicast(&advertised(0xee));
    cache.invalidate_device(DeviceKey::Eui64(Eui64::from(0xee)));

    let arb = cache.update_unicast(&advertised(0xee));
    assert_eq!(arb.binding(), DeviceBinding::Invalidated);
}

#[test]
fn multicast_channel_release() {
    let mut cache = AddressCache::new();
    let channel = Channel::new(5).unwrap();
    let a = Ipv4Addr::new(224, 0, 0, 1);
    let b = Ipv4Addr::new(224, 0, 0, 2);
    let c = Ipv4Addr::new(224, 0, 0, 3);
    cache.join_multicast(a, channel, Speed::S100, 8);
    cache.join_multicast(b, channel, Speed::S100, 8);
    cache.join_multicast(c, Channel::DEFAULT_BROADCAST, Speed::S100, 8);
    assert_eq!(cache.multicast_on(channel).count(), 2);

    let mut removed = cache.release_multicast_channel(channel).into_vec();
    removed.sort();
    assert_eq!(removed, vec![a, b]);
    assert!(cache.find_multicast(a).is_none());
    assert!(cache.find_multicast(c).is_some());
}

#[test]
fn multicast_join_keeps_existing_entry() {
    let mut cache = AddressCache::new();
    let group = Ipv4Addr::new(239, 1, 1, 1);
    cache
        .join_multicast(group, Channel::DEFAULT_BROADCAST, Speed::S100, 8)
        .channel = Channel::new(9).unwrap();
    let marb = cache.join_multicast(group, Channel::DEFAULT_BROADCAST, Speed::S100, 8);
    assert_eq!(marb.channel.number(), 9);
}
