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

use super::{Channel, Eui64, LinkAddress, NodeId, Speed};
use core::convert::TryFrom as _;

#[test]
fn local_node_ids() {
    let id = NodeId::local(5);
    assert_eq!(id.raw(), 0xffc5);
    assert!(id.is_local_bus());
    assert_eq!(id.physical_id(), 5);
    assert!(!NodeId::from(0x0005).is_local_bus());
}

#[test]
fn link_address_derivation() {
    let eui = Eui64::from(0x0011_2233_4455_6677);
    let addr = eui.to_link_address();
    assert_eq!(addr.0, [0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77]);
    assert_eq!(Eui64::from(addr), eui);
    assert_eq!(addr.to_string(), "00:11:22:33:44:55:66:77");
}

#[test]
fn group_addresses() {
    assert!(LinkAddress::BROADCAST.is_group());
    assert!(LinkAddress([0x01, 0x00, 0x5e, 0, 0, 1, 0, 0]).is_ipv4_multicast());
    assert!(LinkAddress([0x33, 0x33, 0, 0, 0, 1, 0, 0]).is_ipv6_multicast());
    assert!(!LinkAddress([0x00, 0x00, 0x5e, 0, 0, 1, 0, 0]).is_group());
}

#[test]
fn channel_range() {
    assert!(Channel::new(63).is_some());
    assert!(Channel::new(64).is_none());
    assert_eq!(Channel::DEFAULT_BROADCAST.number(), 31);
}

#[test]
fn speed_codes() {
    assert_eq!(Speed::try_from(2), Ok(Speed::S400));
    assert!(Speed::try_from(9).is_err());
    assert!(Speed::S100 < Speed::S400);
}
