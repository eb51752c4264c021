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

//! Multicast channel allocation state machine.
//!
//! IPv4 multicast groups are initially sent on the broadcast channel. A node can take ownership
//! of another channel and advertise that it carries some groups. Nodes that are members of these
//! groups then listen on that channel instead.
//!
//! There is one [`Mcb`] per channel. The state machine is driven by [`McapState::tick`], called
//! once per second, and by [`McapState::on_message`], called when an MCAP message is received.
//! Neither function performs any I/O. They instead push [`McapAction`]s that the caller must
//! execute once it no longer holds any borrow on the state.
//!
//! An owner advertises its channel every [`READVERTISE_TICKS`] and renews its lease to
//! [`LEASE_TICKS`] as long as groups are mapped to the channel. When the lease runs out, the owner
//! sends [`FINAL_WARNINGS`] advertisements with an expiration of zero, then gives the channel up.
//! A member that receives such an advertisement takes the channel over.

use crate::{
    resolve::AddressCache,
    wire::mcap::{McapDescriptor, McapMessage, McapOpcode},
};
use core::convert::TryFrom as _;
use fwip_ieee1394_interface::{Channel, NodeId, Speed, StreamHandle};
use smallvec::{smallvec, SmallVec};
use std::net::Ipv4Addr;


/// Lifetime of a channel allocation, in ticks.
pub const LEASE_TICKS: u8 = 60;
/// Number of ticks between two advertisements of an owned channel.
pub const READVERTISE_TICKS: u8 = 10;
/// Number of advertisements sent by an owner before giving a channel up.
pub const FINAL_WARNINGS: u8 = 4;

/// State of a channel, as seen by this node.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// Nobody is known to own the channel.
    Unowned,
    /// We own the channel and advertise it periodically.
    OwnedActive,
    /// We own the channel, and are sending final warnings before giving it up.
    OwnedExpiring,
    /// Another node claims the channel.
    Contested,
}

/// Receive listener of a channel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Listener {
    Closed,
    /// An [`McapAction::OpenListener`] has been emitted and its outcome isn't known yet.
    Opening,
    Open(StreamHandle),
}

/// Multicast control block. State of one channel.
#[derive(Debug, Clone)]
pub struct Mcb {
    channel: Channel,
    owner: Option<NodeId>,
    /// Ticks before the channel allocation expires. Zero if expired.
    expiration: u8,
    /// Ticks before the next advertisement, if we own the channel. Zero if none is planned.
    next_transmit: u8,
    /// Number of joined groups mapped to this channel.
    group_count: u32,
    final_warning: u8,
    listener: Listener,
}

impl Mcb {
    fn new(channel: Channel) -> Self {
        Mcb {
            channel,
            owner: None,
            expiration: 0,
            next_transmit: 0,
            group_count: 0,
            final_warning: 0,
            listener: Listener::Closed,
        }
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    pub fn owner(&self) -> Option<NodeId> {
        self.owner
    }

    pub fn expiration(&self) -> u8 {
        self.expiration
    }

    pub fn next_transmit(&self) -> u8 {
        self.next_transmit
    }

    pub fn group_count(&self) -> u32 {
        self.group_count
    }

    pub fn final_warning(&self) -> u8 {
        self.final_warning
    }

    /// Returns the receive listener, if one is open.
    pub fn listener(&self) -> Option<StreamHandle> {
        match self.listener {
            Listener::Open(handle) => Some(handle),
            Listener::Closed | Listener::Opening => None,
        }
    }

    fn close_listener(&mut self, actions: &mut Vec<McapAction>) {
        if let Listener::Open(handle) = self.listener {
            actions.push(McapAction::CloseListener(handle));
        }
        self.listener = Listener::Closed;
    }

    fn open_listener(&mut self, actions: &mut Vec<McapAction>) {
        if self.listener == Listener::Closed {
            actions.push(McapAction::OpenListener(self.channel));
            self.listener = Listener::Opening;
        }
    }
}

/// Side effect requested by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum McapAction {
    /// Send this message on the broadcast channel.
    Transmit(McapMessage),
    /// Open a receive listener on this channel, then report the outcome with
    /// [`McapState::listener_opened`] or [`McapState::listener_failed`].
    OpenListener(Channel),
    /// Close this receive listener.
    CloseListener(StreamHandle),
}

/// State of all the channels.
#[derive(Debug)]
pub struct McapState {
    channels: Vec<Mcb>,
    local: NodeId,
    /// Channel of groups that no other channel carries. Never allocated.
    broadcast: Channel,
}

impl McapState {
    /// Builds the state of a node whose broadcast datagrams go on `broadcast`. All channels are
    /// unowned.
    pub fn new(local: NodeId, broadcast: Channel) -> Self {
        McapState {
            channels: (0..Channel::COUNT as u8)
                .filter_map(Channel::new)
                .map(Mcb::new)
                .collect(),
            local,
            broadcast,
        }
    }

    pub fn channel(&self, channel: Channel) -> &Mcb {
        &self.channels[channel.index()]
    }

    pub fn state(&self, channel: Channel) -> ChannelState {
        let mcb = self.channel(channel);
        match mcb.owner {
            None => ChannelState::Unowned,
            Some(owner) if owner == self.local && mcb.final_warning > 0 => {
                ChannelState::OwnedExpiring
            }
            Some(owner) if owner == self.local => ChannelState::OwnedActive,
            Some(_) => ChannelState::Contested,
        }
    }

    /// Builds the advertisement of a channel, with one descriptor per group mapped to it.
    pub fn advertisement(&self, cache: &AddressCache, channel: Channel) -> McapMessage {
        let mcb = self.channel(channel);
        McapMessage {
            opcode: McapOpcode::Advertise,
            descriptors: cache
                .multicast_on(channel)
                .map(|marb| McapDescriptor {
                    expiration: mcb.expiration,
                    channel: channel.number(),
                    speed: marb.speed.code(),
                    bandwidth: 0,
                    group: marb.group(),
                })
                .collect(),
        }
    }

    /// Builds a solicitation asking the owner of `group`, if any, to advertise.
    pub fn solicitation(&self, group: Ipv4Addr, speed: Speed) -> McapMessage {
        McapMessage {
            opcode: McapOpcode::Solicit,
            descriptors: smallvec![McapDescriptor {
                expiration: 0,
                channel: self.broadcast.number(),
                speed: speed.code(),
                bandwidth: 0,
                group,
            }],
        }
    }

    /// Advances the state of every channel by one tick.
    pub fn tick(&mut self, cache: &mut AddressCache, actions: &mut Vec<McapAction>) {
        for index in 0..self.channels.len() {
            let channel = self.channels[index].channel;
            let mcb = &mut self.channels[index];

            if mcb.expiration > 1 {
                mcb.expiration -= 1;
            } else if mcb.expiration == 1 {
                mcb.expiration = 0;
                mcb.close_listener(actions);

                if mcb.owner == Some(self.local) {
                    mcb.final_warning = FINAL_WARNINGS;
                    mcb.next_transmit = 1;
                } else {
                    log::debug!("allocation of channel {} expired", channel);
                    mcb.owner = None;
                    mcb.next_transmit = 0;
                    mcb.group_count = 0;
                    cache.move_multicast_channel(channel, self.broadcast);
                }
            }

            if mcb.owner != Some(self.local) {
                continue;
            }

            if mcb.next_transmit > 1 {
                mcb.next_transmit -= 1;
                continue;
            }
            if mcb.next_transmit == 0 {
                continue;
            }

            if mcb.group_count > 0 {
                mcb.expiration = LEASE_TICKS;
                mcb.final_warning = 0;
            }
            let advertisement = self.advertisement(cache, channel);
            actions.push(McapAction::Transmit(advertisement));

            let mcb = &mut self.channels[index];
            if mcb.expiration > 0 {
                mcb.next_transmit = READVERTISE_TICKS;
            } else {
                mcb.final_warning = mcb.final_warning.saturating_sub(1);
                if mcb.final_warning > 0 {
                    mcb.next_transmit = READVERTISE_TICKS;
                } else {
                    log::debug!("giving up channel {}", channel);
                    mcb.owner = None;
                    mcb.next_transmit = 0;
                    mcb.group_count = 0;
                    mcb.close_listener(actions);
                    cache.release_multicast_channel(channel);
                }
            }
        }
    }

    /// Processes an MCAP message sent by `source`.
    pub fn on_message(
        &mut self,
        cache: &mut AddressCache,
        source: NodeId,
        message: &McapMessage,
        actions: &mut Vec<McapAction>,
    ) {
        if source == self.local {
            return;
        }

        match message.opcode {
            McapOpcode::Solicit => {
                let mut advertised = SmallVec::<[Channel; 4]>::new();
                for descriptor in &message.descriptors {
                    let channel = match cache.find_multicast(descriptor.group) {
                        Some(marb) => marb.channel,
                        None => continue,
                    };
                    if self.channel(channel).owner == Some(self.local)
                        && !advertised.contains(&channel)
                    {
                        advertised.push(channel);
                        actions.push(McapAction::Transmit(self.advertisement(cache, channel)));
                    }
                }
            }
            McapOpcode::Advertise => {
                for descriptor in &message.descriptors {
                    self.on_advertised_group(cache, source, descriptor, actions);
                }
            }
        }
    }

    fn on_advertised_group(
        &mut self,
        cache: &mut AddressCache,
        source: NodeId,
        descriptor: &McapDescriptor,
        actions: &mut Vec<McapAction>,
    ) {
        let channel = match Channel::new(descriptor.channel) {
            Some(c) if c != self.broadcast => c,
            _ => return,
        };
        let current = match cache.find_multicast(descriptor.group) {
            Some(marb) => marb.channel,
            None => return,
        };

        let local = self.local;
        let mcb = &mut self.channels[channel.index()];
        if descriptor.expiration < LEASE_TICKS {
            // The owner is about to give the channel up.
            if mcb.owner == Some(source) {
                log::debug!("taking over channel {} from {}", channel, source);
                mcb.owner = Some(local);
                mcb.next_transmit = 1;
                mcb.final_warning = 0;
            }
        } else if mcb.owner == Some(source) {
            mcb.expiration = descriptor.expiration;
        } else if mcb.owner.map_or(true, |owner| source < owner) || mcb.expiration < LEASE_TICKS
        {
            if mcb.owner == Some(local) {
                log::debug!("channel {} claimed by {}", channel, source);
            }
            mcb.owner = Some(source);
            mcb.expiration = descriptor.expiration;
            mcb.next_transmit = 0;
            mcb.final_warning = 0;
        }

        if mcb.owner != Some(source) && mcb.owner != Some(local) {
            return;
        }

        if current != channel {
            if current != self.broadcast {
                let prior = &mut self.channels[current.index()];
                prior.group_count = prior.group_count.saturating_sub(1);
                if prior.group_count == 0 {
                    prior.close_listener(actions);
                }
            }

            let mcb = &mut self.channels[channel.index()];
            mcb.group_count += 1;
            mcb.open_listener(actions);
        }

        if let Some(marb) = cache.find_multicast_mut(descriptor.group) {
            marb.channel = channel;
            if let Ok(speed) = Speed::try_from(descriptor.speed) {
                marb.speed = speed;
            }
        }
    }

    /// Removes the membership of a group. Returns false if the group wasn't joined.
    pub fn leave(
        &mut self,
        cache: &mut AddressCache,
        group: Ipv4Addr,
        actions: &mut Vec<McapAction>,
    ) -> bool {
        let marb = match cache.remove_multicast(group) {
            Some(marb) => marb,
            None => return false,
        };

        if marb.channel != self.broadcast {
            let mcb = &mut self.channels[marb.channel.index()];
            mcb.group_count = mcb.group_count.saturating_sub(1);
            if mcb.group_count == 0 {
                mcb.close_listener(actions);
            }
        }

        true
    }

    /// Reports the outcome of an [`McapAction::OpenListener`].
    ///
    /// Returns the handle back if the listener is no longer needed, in which case the caller
    /// must close it.
    pub fn listener_opened(
        &mut self,
        channel: Channel,
        handle: StreamHandle,
    ) -> Option<StreamHandle> {
        let mcb = &mut self.channels[channel.index()];
        if mcb.listener == Listener::Opening {
            mcb.listener = Listener::Open(handle);
            None
        } else {
            Some(handle)
        }
    }

    /// Reports the failure of an [`McapAction::OpenListener`].
    pub fn listener_failed(&mut self, channel: Channel) {
        let mcb = &mut self.channels[channel.index()];
        if mcb.listener == Listener::Opening {
            mcb.listener = Listener::Closed;
        }
    }

    /// Updates the node ID of the local node after a bus reset.
    ///
    /// Channels we own are advertised again on the next tick. Node IDs of other owners are no
    /// longer meaningful, and these channels become unowned until advertised again.
    pub fn set_local_node(&mut self, local: NodeId) {
        let previous = self.local;
        self.local = local;

        for mcb in &mut self.channels {
            match mcb.owner {
                Some(owner) if owner == previous => {
                    mcb.owner = Some(local);
                    if mcb.next_transmit != 0 {
                        mcb.next_transmit = 1;
                    }
                }
                Some(_) => mcb.owner = None,
                None => {}
            }
        }
    }

    /// Resets every channel and returns the listeners that must be closed.
    pub fn reset(&mut self) -> Vec<StreamHandle> {
        let mut listeners = Vec::new();
        for mcb in &mut self.channels {
            if let Listener::Open(handle) = mcb.listener {
                listeners.push(handle);
            }
            *mcb = Mcb::new(mcb.channel);
        }
        listeners
    }
}
