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

//! IP over 1394 network interface.
//!
//! An [`FwIpInterface`] turns the datagrams of a [`NetworkStack`] into bus transactions, and the
//! packets received from the bus back into datagrams. See the documentation of the
//! [`bus`](crate::bus) module for how it interacts with its collaborators.
//!
//! # Concurrency
//!
//! All the state of the interface is protected by a single reentrant lock. Every entry point
//! (output, completions, received packets, watchdog) takes that lock for its whole duration, which
//! serializes them. The bus and the network stack are allowed to call back into the interface
//! from within a call made by the interface.
//!
//! Commands are taken from bounded pools. Only [`FwIpInterface::shutdown`] ever waits for
//! commands to come back. All the other entry points drop the datagram and update the
//! [`Statistics`] if a pool is exhausted.

use crate::{
    bus::{Bus, BusError, LocalNode, NetworkStack, TransactionStatus},
    command::{PacketWrapper, StreamWriteCommand, UnicastWriteCommand},
    config::Config,
    mcap::{ChannelState, McapAction, McapState},
    pool::CommandPool,
    reassembly::ReassemblyCache,
    resolve::{AddressCache, DeviceInfo, DeviceKey},
    stats::Statistics,
    wire::{
        encap::{FRAGMENT_HEADER_LEN, MAX_DATAGRAM_SIZE, UNFRAGMENTED_HEADER_LEN},
        gasp::GASP_HEADER_LEN,
        HardwareAddress,
    },
};
use core::{cell::RefCell, cmp, mem};
use fwip_ieee1394_interface::{Channel, DeviceRef, FifoAddress, LinkAddress, Speed, StreamHandle};
use parking_lot::ReentrantMutex;
use std::{net::Ipv4Addr, sync::Arc};

mod receive;
mod transmit;


/// Error while building or starting an interface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("failed to register the unicast FIFO")]
    Fifo(#[source] BusError),
    #[error("failed to listen on the broadcast channel")]
    BroadcastListener(#[source] BusError),
}

/// Prototype for an [`FwIpInterface`].
#[derive(Debug, Clone, Default)]
pub struct FwIpInterfaceBuilder {
    config: Config,
}

impl FwIpInterfaceBuilder {
    pub fn new() -> Self {
        FwIpInterfaceBuilder::default()
    }

    /// Replaces the whole configuration.
    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn with_mtu(mut self, mtu: usize) -> Self {
        self.config.mtu = mtu;
        self
    }

    /// Sets the number of ticks after which a partially received datagram is discarded.
    pub fn with_reassembly_timeout(mut self, ticks: u8) -> Self {
        self.config.reassembly_timeout = ticks;
        self
    }

    /// Builds the interface. It must then be started with [`FwIpInterface::start`].
    pub fn build<TBus, TStack>(
        self,
        bus: TBus,
        stack: TStack,
    ) -> Result<FwIpInterface<TBus, TStack>, InitError>
    where
        TBus: Bus,
        TStack: NetworkStack,
    {
        let config = self.config;
        if config.mtu == 0 || config.mtu > MAX_DATAGRAM_SIZE {
            return Err(InitError::InvalidConfig("mtu"));
        }
        if config.fifo_size < config.mtu + FRAGMENT_HEADER_LEN {
            return Err(InitError::InvalidConfig("fifo_size"));
        }
        if config.max_unicast_commands == 0
            || config.max_stream_commands == 0
            || config.max_packet_wrappers == 0
            || config.max_reassembly_slots == 0
        {
            return Err(InitError::InvalidConfig("pool capacity"));
        }
        if config.reassembly_timeout == 0 {
            return Err(InitError::InvalidConfig("reassembly_timeout"));
        }

        let unicast_len = config.mtu + FRAGMENT_HEADER_LEN;
        let stream_len = config.mtu + GASP_HEADER_LEN + UNFRAGMENTED_HEADER_LEN;
        let local = bus.local_node();

        let inner = Inner {
            running: false,
            local,
            fifo: None,
            broadcast_listener: None,
            broadcast_max_payload_log2: local.max_payload_log2,
            broadcast_speed: local.speed,
            next_label: 0,
            unit_count: 0,
            cache: AddressCache::new(),
            reassembly: ReassemblyCache::new(
                config.max_reassembly_slots,
                config.reassembly_timeout,
            ),
            mcap: McapState::new(local.node_id, config.broadcast_channel),
            active_commands: 0,
            inactive_commands: 0,
            max_queue_size: config.transmit_queue_size,
            sends_since_tick: 0,
            stream_pool_filled: false,
            stats: Statistics::default(),
        };

        Ok(FwIpInterface {
            unicast_pool: CommandPool::new("unicast", config.max_unicast_commands, move || {
                UnicastWriteCommand::new(unicast_len)
            }),
            stream_pool: CommandPool::new("stream", config.max_stream_commands, move || {
                StreamWriteCommand::new(stream_len)
            }),
            wrapper_pool: CommandPool::new("wrapper", config.max_packet_wrappers, || {
                Arc::new(PacketWrapper::new())
            }),
            inner: ReentrantMutex::new(RefCell::new(inner)),
            config,
            bus,
            stack,
        })
    }
}

/// IP over 1394 interface attached to a bus and a network stack.
pub struct FwIpInterface<TBus, TStack> {
    bus: TBus,
    stack: TStack,
    config: Config,
    inner: ReentrantMutex<RefCell<Inner>>,
    unicast_pool: CommandPool<UnicastWriteCommand>,
    stream_pool: CommandPool<StreamWriteCommand>,
    wrapper_pool: CommandPool<Arc<PacketWrapper>>,
}

/// State protected by the lock of the interface.
struct Inner {
    /// True between `start` and `shutdown`.
    running: bool,
    local: LocalNode,
    fifo: Option<FifoAddress>,
    broadcast_listener: Option<StreamHandle>,
    /// Largest stream packet that every node on the bus accepts.
    broadcast_max_payload_log2: u8,
    /// Speed that every node on the bus supports.
    broadcast_speed: Speed,
    /// Label of the next fragmented datagram.
    next_label: u16,
    /// Number of attached devices.
    unit_count: usize,
    cache: AddressCache,
    reassembly: ReassemblyCache,
    mcap: McapState,
    /// Number of commands handed over to the bus.
    active_commands: u64,
    /// Number of commands given back by the bus.
    inactive_commands: u64,
    /// Length of the transmit queue of the stack above which stalled datagrams are dropped.
    max_queue_size: usize,
    /// Unicast datagrams sent since the last watchdog tick.
    sends_since_tick: usize,
    /// True once the stream pool has been filled.
    stream_pool_filled: bool,
    stats: Statistics,
}

impl Inner {
    /// Number of commands currently in the hands of the bus.
    fn outstanding(&self) -> u64 {
        self.active_commands.saturating_sub(self.inactive_commands)
    }

    fn hardware_address(&self) -> HardwareAddress {
        HardwareAddress {
            eui64: self.local.eui64,
            max_rec: self.local.max_payload_log2.saturating_sub(1),
            speed: self.local.speed,
            fifo: self.fifo.unwrap_or_default(),
        }
    }

    /// Updates the broadcast payload and speed to what every attached device supports.
    fn recompute_broadcast(&mut self) {
        let mut max_payload_log2 = self.local.max_payload_log2;
        let mut speed = self.local.speed;
        for drb in self.cache.devices() {
            max_payload_log2 = cmp::min(max_payload_log2, drb.max_payload_log2());
            speed = cmp::min(speed, drb.max_speed());
        }
        self.broadcast_max_payload_log2 = max_payload_log2;
        self.broadcast_speed = speed;
    }
}

impl<TBus, TStack> FwIpInterface<TBus, TStack>
where
    TBus: Bus,
    TStack: NetworkStack,
{
    /// Registers the unicast FIFO and starts listening on the broadcast channel.
    ///
    /// Does nothing if the interface is already running.
    pub fn start(&self) -> Result<(), InitError> {
        let _serialized = self.inner.lock();
        if self.with_inner(|inner| inner.running) {
            return Ok(());
        }

        let local = self.bus.local_node();
        let fifo = self
            .bus
            .allocate_fifo(self.config.fifo_size)
            .map_err(InitError::Fifo)?;
        let listener = match self.bus.open_stream_listener(self.config.broadcast_channel) {
            Ok(l) => l,
            Err(err) => {
                self.bus.release_fifo(fifo);
                return Err(InitError::BroadcastListener(err));
            }
        };

        self.with_inner(|inner| {
            inner.local = local;
            inner.fifo = Some(fifo);
            inner.broadcast_listener = Some(listener);
            inner.mcap.set_local_node(local.node_id);
            inner.recompute_broadcast();
            inner.running = true;
        });

        log::info!(
            "interface {} started as node {} with FIFO at {}",
            local.eui64,
            local.node_id,
            fifo
        );
        Ok(())
    }

    /// Stops the interface.
    ///
    /// New datagrams are refused immediately. The returned future then waits for all the
    /// commands in the hands of the bus to come back before releasing the resources of the bus.
    pub async fn shutdown(&self) {
        let was_running = self.with_inner(|inner| mem::replace(&mut inner.running, false));
        if was_running {
            log::debug!("shutting down, waiting for in-flight commands");
        }

        self.unicast_pool.wait_idle().await;
        self.stream_pool.wait_idle().await;

        let (listeners, fifo) = {
            let _serialized = self.inner.lock();
            self.with_inner(|inner| {
                inner.cache.clear();
                inner.reassembly.clear();
                inner.reassembly.drain_slots();
                inner.unit_count = 0;
                inner.stream_pool_filled = false;
                let mut listeners = inner.mcap.reset();
                listeners.extend(inner.broadcast_listener.take());
                (listeners, inner.fifo.take())
            })
        };

        for handle in listeners {
            self.bus.close_stream_listener(handle);
        }
        if let Some(fifo) = fifo {
            self.bus.release_fifo(fifo);
        }

        self.unicast_pool.drain();
        self.stream_pool.drain();
        self.wrapper_pool.drain();

        if was_running {
            log::info!("interface shut down");
        }
    }

    /// Must be called once per second.
    ///
    /// Drives the multicast channel allocation, discards datagrams that take too long to be
    /// reassembled, and adapts the capacity of the transmit queue to the recent traffic.
    pub fn watchdog_tick(&self) {
        let _serialized = self.inner.lock();
        let actions = self.with_inner(|inner| {
            let mut actions = Vec::new();
            if !inner.running {
                return actions;
            }

            inner.mcap.tick(&mut inner.cache, &mut actions);

            let expired = inner.reassembly.age_tick();
            inner.stats.reassembly_timeouts += expired as u64;

            inner.max_queue_size = cmp::max(inner.sends_since_tick, self.config.transmit_queue_size);
            inner.sends_since_tick = 0;
            actions
        });

        self.apply_mcap_actions(actions);
    }

    /// Must be called after each bus reset, once the bus layer knows the new identity of the
    /// local node.
    ///
    /// Device bindings are invalidated until the devices are attached again with
    /// [`FwIpInterface::attach_device`].
    pub fn bus_reset(&self) {
        let _serialized = self.inner.lock();
        let local = self.bus.local_node();
        let discarded = self.with_inner(|inner| {
            inner.local = local;
            inner.cache.invalidate_all_bindings();
            inner.mcap.set_local_node(local.node_id);
            inner.recompute_broadcast();
            inner.reassembly.clear()
        });

        log::debug!(
            "bus reset: now node {} of generation {}, {} partial datagrams discarded",
            local.node_id,
            local.generation,
            discarded
        );
    }

    /// Reports a device attached to the bus, or updates one that already is.
    pub fn attach_device(&self, info: DeviceInfo) {
        let _serialized = self.inner.lock();
        let is_new = self.with_inner(|inner| {
            let is_new = inner.cache.find_device(info.eui64).is_none();
            if is_new {
                inner.unit_count += 1;
            }
            inner.cache.bind_device(info);
            inner.recompute_broadcast();
            is_new
        });

        if is_new {
            log::debug!("device {} attached", info.eui64);
        }
    }

    /// Reports a device gone from the bus. Returns false if the device wasn't attached.
    ///
    /// Subsequent datagrams to this device fail with
    /// [`OutputError::HostUnreachable`](crate::bus::OutputError::HostUnreachable).
    pub fn detach_device(&self, device: DeviceRef) -> bool {
        let _serialized = self.inner.lock();
        let removed = self.with_inner(|inner| {
            let removed = inner.cache.invalidate_device(DeviceKey::Device(device));
            if removed.is_some() {
                inner.unit_count = inner.unit_count.saturating_sub(1);
                inner.recompute_broadcast();
            }
            removed
        });

        match removed {
            Some(drb) => {
                log::debug!("device {} detached", drb.eui64());
                true
            }
            None => false,
        }
    }

    /// Stores what a peer advertised about itself, for example through a static ARP entry.
    pub fn update_arp_cache(&self, address: &HardwareAddress) {
        self.with_inner(|inner| {
            inner.cache.update_unicast(address);
        });
    }

    /// Starts receiving the datagrams sent to an IPv4 multicast group.
    ///
    /// The group is initially carried by the broadcast channel. Returns false if the group was
    /// already joined or if the interface isn't running.
    pub fn join_multicast_group(&self, group: Ipv4Addr) -> bool {
        let _serialized = self.inner.lock();
        let solicitation = self.with_inner(|inner| {
            if !inner.running || inner.cache.find_multicast(group).is_some() {
                return None;
            }

            let speed = inner.broadcast_speed;
            let max_rec = inner.broadcast_max_payload_log2.saturating_sub(1);
            inner
                .cache
                .join_multicast(group, self.config.broadcast_channel, speed, max_rec);
            Some(inner.mcap.solicitation(group, speed))
        });

        match solicitation {
            Some(message) => {
                log::debug!("joined multicast group {}", group);
                self.send_mcap(&message);
                true
            }
            None => false,
        }
    }

    /// Stops receiving the datagrams sent to an IPv4 multicast group. Returns false if the group
    /// wasn't joined.
    pub fn leave_multicast_group(&self, group: Ipv4Addr) -> bool {
        let _serialized = self.inner.lock();
        let mut actions = Vec::new();
        let left = self.with_inner(|inner| inner.mcap.leave(&mut inner.cache, group, &mut actions));
        self.apply_mcap_actions(actions);
        if left {
            log::debug!("left multicast group {}", group);
        }
        left
    }

    /// Returns a snapshot of the counters.
    pub fn statistics(&self) -> Statistics {
        self.with_inner(|inner| inner.stats.clone())
    }

    /// Returns what the network stack must advertise about this node in ARP packets.
    pub fn hardware_address(&self) -> HardwareAddress {
        self.with_inner(|inner| inner.hardware_address())
    }

    /// Returns the link-layer address of this node.
    pub fn mac_address(&self) -> LinkAddress {
        self.with_inner(|inner| inner.local.eui64.to_link_address())
    }

    pub fn max_transfer_unit(&self) -> usize {
        self.config.mtu
    }

    /// Returns true if the network stack should keep pushing datagrams.
    ///
    /// Becomes false when too many commands are in the hands of the bus. The network stack is
    /// told through [`NetworkStack::service_transmit_queue`] when the bus catches up.
    pub fn can_accept_output(&self) -> bool {
        self.with_inner(|inner| {
            inner.running && inner.outstanding() < self.config.low_water_mark as u64
        })
    }

    /// Number of devices currently attached.
    pub fn unit_count(&self) -> usize {
        self.with_inner(|inner| inner.unit_count)
    }

    /// Number of datagrams being reassembled.
    pub fn pending_reassemblies(&self) -> usize {
        self.with_inner(|inner| inner.reassembly.len())
    }

    /// Returns how this node sees a channel.
    pub fn channel_state(&self, channel: Channel) -> ChannelState {
        self.with_inner(|inner| inner.mcap.state(channel))
    }

    /// Gives access to the address resolution caches.
    pub fn with_address_cache<R>(&self, f: impl FnOnce(&AddressCache) -> R) -> R {
        self.with_inner(|inner| f(&inner.cache))
    }

    pub fn bus(&self) -> &TBus {
        &self.bus
    }

    pub fn stack(&self) -> &TStack {
        &self.stack
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reports the completion of a block write submitted with [`Bus::submit_unicast_write`].
    pub fn on_unicast_write_complete(
        &self,
        mut command: UnicastWriteCommand,
        status: TransactionStatus,
    ) {
        let _serialized = self.inner.lock();
        if let Some(wrapper) = command.take_wrapper() {
            if wrapper.release_if_last() {
                self.wrapper_pool.release(wrapper);
            }
        }
        self.unicast_pool.release(command);
        self.on_write_complete(status);
    }

    /// Reports the completion of a stream write submitted with [`Bus::submit_stream_write`].
    pub fn on_stream_write_complete(&self, command: StreamWriteCommand, status: TransactionStatus) {
        let _serialized = self.inner.lock();
        self.stream_pool.release(command);
        self.on_write_complete(status);
    }

    fn on_write_complete(&self, status: TransactionStatus) {
        let service = self.with_inner(|inner| {
            inner.inactive_commands += 1;
            match status {
                TransactionStatus::Success => {}
                // Transient. Not a loss by itself.
                TransactionStatus::Stall => inner.stats.stalls += 1,
                TransactionStatus::Failed => inner.stats.output_errors += 1,
            }

            inner.running && inner.outstanding() < self.config.low_water_mark as u64
        });

        if service && self.stack.transmit_queue_len() != 0 {
            self.with_inner(|inner| inner.stats.queue_service_requests += 1);
            self.stack.service_transmit_queue();
        }
    }

    /// Performs the side effects requested by the multicast state machine.
    fn apply_mcap_actions(&self, actions: Vec<McapAction>) {
        for action in actions {
            match action {
                McapAction::Transmit(message) => self.send_mcap(&message),
                McapAction::OpenListener(channel) => match self.bus.open_stream_listener(channel) {
                    Ok(handle) => {
                        let unneeded =
                            self.with_inner(|inner| inner.mcap.listener_opened(channel, handle));
                        if let Some(handle) = unneeded {
                            self.bus.close_stream_listener(handle);
                        }
                    }
                    Err(err) => {
                        log::warn!("failed to listen on channel {}: {}", channel, err);
                        self.with_inner(|inner| inner.mcap.listener_failed(channel));
                    }
                },
                McapAction::CloseListener(handle) => self.bus.close_stream_listener(handle),
            }
        }
    }

    /// Runs `f` on the state of the interface.
    ///
    /// `f` must not call the bus or the network stack, as they are allowed to call back into
    /// the interface.
    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let guard = self.inner.lock();
        let mut inner = guard.borrow_mut();
        f(&mut inner)
    }
}
