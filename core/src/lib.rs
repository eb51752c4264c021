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

//! IP over IEEE 1394 (FireWire).
//!
//! This crate implements the link layer described by RFC 2734 (IPv4) and RFC 3146 (IPv6): it
//! encapsulates the datagrams of a network stack into 1394 bus transactions, and turns the
//! packets received from the bus back into datagrams.
//!
//! The crate doesn't perform any I/O by itself. It is meant to be plugged between:
//!
//! - A [`Bus`] implementation, that submits block writes and stream packets and reports their
//! completion, and that reports received packets.
//! - A [`NetworkStack`] implementation, that consumes received datagrams and produces datagrams
//! to send.
//!
//! # Usage
//!
//! Build an [`FwIpInterface`] with a [`FwIpInterfaceBuilder`], then call
//! [`FwIpInterface::start`]. From that moment on:
//!
//! - Call [`FwIpInterface::output`] for each datagram to send.
//! - Call [`FwIpInterface::on_unicast`] and [`FwIpInterface::on_broadcast_stream`] for each
//! packet received from the bus.
//! - Call [`FwIpInterface::on_unicast_write_complete`] and
//! [`FwIpInterface::on_stream_write_complete`] whenever a transaction finishes.
//! - Call [`FwIpInterface::attach_device`], [`FwIpInterface::detach_device`] and
//! [`FwIpInterface::bus_reset`] whenever the topology of the bus changes.
//! - Call [`FwIpInterface::watchdog_tick`] once per second.
//!

#![deny(unsafe_code)]

pub mod buffer;
pub mod bus;
pub mod command;
pub mod config;
pub mod interface;
pub mod mcap;
pub mod pool;
pub mod reassembly;
pub mod resolve;
pub mod stats;
pub mod wire;

pub use bus::{
    Bus, InboundFrame, LocalNode, NetworkStack, OutboundFrame, OutputError, OutputStatus,
    TransactionStatus,
};
pub use config::Config;
pub use interface::{FwIpInterface, FwIpInterfaceBuilder, InitError};
pub use stats::Statistics;
pub use wire::HardwareAddress;
