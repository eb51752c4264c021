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

use super::{FragmentOutcome, ReassemblyCache, ReassemblyError};
use crate::buffer::PacketChain;
use fwip_ieee1394_interface::NodeId;

fn datagram(len: usize) -> Vec<u8> {
    (0..len).map(|n| (n * 7 + 3) as u8).collect()
}

/// Splits a datagram in chunks of `chunk` bytes, returning `(offset, bytes)` pairs.
fn fragments(data: &[u8], chunk: usize) -> Vec<(usize, &[u8])> {
    data.chunks(chunk)
        .enumerate()
        .map(|(n, bytes)| (n * chunk, bytes))
        .collect()
}

#[test]
fn reassembles_in_any_order() {
    let source = NodeId::local(1);
    let data = datagram(1500);
    let pieces = fragments(&data, 240);
    assert_eq!(pieces.len(), 7);

    // In order, reversed, and interleaved.
    let orders: Vec<Vec<usize>> = vec![
        (0..7).collect(),
        (0..7).rev().collect(),
        vec![3, 0, 6, 1, 5, 2, 4],
    ];

    for (label, order) in orders.iter().enumerate() {
        let label = label as u16;
        let mut cache = ReassemblyCache::new(4, 3);
        cache
            .begin(source, label, 0x0800, data.len(), PacketChain::zeroed(data.len()))
            .unwrap();

        for (n, index) in order.iter().enumerate() {
            let (offset, bytes) = pieces[*index];
            let outcome = cache.accept_fragment(source, label, offset, bytes).unwrap();
            if n == order.len() - 1 {
                assert_eq!(outcome, FragmentOutcome::Complete);
            } else {
                assert_eq!(outcome, FragmentOutcome::Incomplete);
            }
        }

        let (buffer, ether_type) = cache.complete(source, label).unwrap();
        assert_eq!(ether_type, 0x0800);
        assert_eq!(buffer.to_vec(), data);

        assert!(cache.release(source, label, true).is_ok());
        assert_eq!(
            cache.release(source, label, true),
            Err(ReassemblyError::UnknownDatagram)
        );
        assert!(cache.is_empty());
    }
}

#[test]
fn complete_requires_all_bytes() {
    let source = NodeId::local(2);
    let mut cache = ReassemblyCache::new(4, 3);
    cache
        .begin(source, 1, 0x86dd, 100, PacketChain::zeroed(100))
        .unwrap();
    cache.accept_fragment(source, 1, 0, &[1; 60]).unwrap();
    assert!(cache.complete(source, 1).is_none());
    assert_eq!(cache.find(source, 1).unwrap().residual(), 40);
}

#[test]
fn one_entry_per_key() {
    let source = NodeId::local(3);
    let mut cache = ReassemblyCache::new(4, 3);
    cache
        .begin(source, 9, 0x0800, 64, PacketChain::zeroed(64))
        .unwrap();
    assert_eq!(
        cache
            .begin(source, 9, 0x0800, 64, PacketChain::zeroed(64))
            .unwrap_err(),
        ReassemblyError::Duplicate {
            node: source,
            label: 9
        }
    );
    assert_eq!(cache.len(), 1);

    // Same label from another node is a different datagram.
    cache
        .begin(NodeId::local(4), 9, 0x0800, 64, PacketChain::zeroed(64))
        .unwrap();
    assert_eq!(cache.len(), 2);
}

#[test]
fn oversized_fragment_leaves_residual_untouched() {
    let source = NodeId::local(5);
    let mut cache = ReassemblyCache::new(4, 3);
    cache
        .begin(source, 2, 0x0800, 100, PacketChain::zeroed(100))
        .unwrap();
    cache.accept_fragment(source, 2, 0, &[0; 80]).unwrap();

    assert!(matches!(
        cache.accept_fragment(source, 2, 80, &[0; 30]),
        Err(ReassemblyError::Corrupt { .. })
    ));
    assert_eq!(cache.find(source, 2).unwrap().residual(), 20);

    // Fits in the residual but not in the datagram.
    assert!(matches!(
        cache.accept_fragment(source, 2, 90, &[0; 20]),
        Err(ReassemblyError::Corrupt { .. })
    ));
    assert_eq!(cache.find(source, 2).unwrap().residual(), 20);
}

#[test]
fn repeated_fragment_refused() {
    let source = NodeId::local(6);
    let data = datagram(300);
    let mut cache = ReassemblyCache::new(4, 3);
    cache
        .begin(source, 4, 0x0800, 300, PacketChain::zeroed(300))
        .unwrap();

    assert_eq!(
        cache.accept_fragment(source, 4, 0, &data[..100]),
        Ok(FragmentOutcome::Incomplete)
    );
    assert_eq!(
        cache.accept_fragment(source, 4, 100, &data[100..200]),
        Ok(FragmentOutcome::Incomplete)
    );
    assert!(matches!(
        cache.accept_fragment(source, 4, 100, &data[100..200]),
        Err(ReassemblyError::Corrupt { offset: 100, len: 100 })
    ));
    assert_eq!(cache.find(source, 4).unwrap().residual(), 100);
    assert!(cache.complete(source, 4).is_none());

    // Partially overlapping the start of the datagram.
    assert!(matches!(
        cache.accept_fragment(source, 4, 50, &data[50..250]),
        Err(ReassemblyError::Corrupt { .. })
    ));
    assert_eq!(cache.find(source, 4).unwrap().residual(), 100);

    assert_eq!(
        cache.accept_fragment(source, 4, 200, &data[200..]),
        Ok(FragmentOutcome::Complete)
    );
    let (buffer, _) = cache.complete(source, 4).unwrap();
    assert_eq!(buffer.to_vec(), data);
}

#[test]
fn unknown_datagram() {
    let mut cache = ReassemblyCache::new(4, 3);
    assert_eq!(
        cache.accept_fragment(NodeId::local(1), 0, 0, &[0; 4]),
        Err(ReassemblyError::UnknownDatagram)
    );
}

#[test]
fn slots_are_capped() {
    let mut cache = ReassemblyCache::new(2, 3);
    let source = NodeId::local(6);
    for label in 0..2 {
        cache
            .begin(source, label, 0x0800, 8, PacketChain::zeroed(8))
            .unwrap();
    }
    assert_eq!(
        cache
            .begin(source, 2, 0x0800, 8, PacketChain::zeroed(8))
            .unwrap_err(),
        ReassemblyError::Exhausted
    );

    cache.release(source, 0, true).unwrap();
    assert!(cache
        .begin(source, 2, 0x0800, 8, PacketChain::zeroed(8))
        .is_ok());
}

#[test]
fn aging_discards_after_timeout() {
    let source = NodeId::local(7);
    let mut cache = ReassemblyCache::new(4, 3);
    cache
        .begin(source, 1, 0x0800, 8, PacketChain::zeroed(8))
        .unwrap();

    assert_eq!(cache.age_tick(), 0);
    cache
        .begin(source, 2, 0x0800, 8, PacketChain::zeroed(8))
        .unwrap();
    assert_eq!(cache.age_tick(), 0);
    assert_eq!(cache.find(source, 1).unwrap().expiration(), 1);

    assert_eq!(cache.age_tick(), 1);
    assert!(cache.find(source, 1).is_none());
    assert!(cache.find(source, 2).is_some());

    assert_eq!(cache.age_tick(), 1);
    assert!(cache.is_empty());
}

#[test]
fn release_can_keep_buffer() {
    let source = NodeId::local(8);
    let mut cache = ReassemblyCache::new(4, 3);
    cache
        .begin(source, 1, 0x0800, 4, PacketChain::from(vec![1, 2, 3, 4]))
        .unwrap();
    let buffer = cache.release(source, 1, false).unwrap().unwrap();
    assert_eq!(buffer.to_vec(), vec![1, 2, 3, 4]);
}
