//! NIC driver abstraction (spec §4.1).
//!
//! [`NetworkDriver`] generalizes the teacher's `NetworkInterface` trait: same
//! shape (MAC/MTU queries, TX buffer handoff, RX drain, interrupt handling),
//! reworked so buffers cross the trait boundary as plain owned `Vec<u8>`/
//! `&[u8]` instead of raw pointers (Rust's slice bounds checking already
//! gives the safety [`crate::msg::NetMsg`]'s headroom/tailroom bookkeeping
//! exists for), and so a driver can fail with a typed [`crate::error::NetError`]
//! instead of `Result<_, ()>`.
//!
//! [`IoPort`] is the seam the real RTL8139 bring-up needs (`inb`/`outb`/...
//! in the teacher's `x86::io`) and that a test double replaces; grounded on
//! `other_examples/.../src-drivers-net-rtl8139.rs.rs`'s `Port<u8>` wrapper.

pub mod mock;
pub mod rtl8139;

use crate::error::NetError;
use crate::msg::MacAddr;

/// Narrow port-I/O seam the RTL8139 bring-up sequence is written against.
///
/// A real implementation forwards to `in{b,w,l}`/`out{b,w,l}`; the register
/// level test double in `rtl8139`'s own test module implements the same
/// semantics entirely in memory so the driver logic can run under a regular
/// test harness (spec §0 "tests must be able to construct a fresh core
/// without touching a real driver").
pub trait IoPort {
	fn read8(&self, port: u16) -> u8;
	fn read16(&self, port: u16) -> u16;
	fn read32(&self, port: u16) -> u32;
	fn write8(&self, port: u16, value: u8);
	fn write16(&self, port: u16, value: u16);
	fn write32(&self, port: u16, value: u32);
}

/// A driver for a network interface card (spec §4.1).
///
/// Generalizes the teacher's `NetworkInterface` trait: ownership transfer of
/// TX/RX buffers is expressed with plain owned `Vec<u8>`/`&[u8]` instead of
/// raw pointers, and driver failures are typed.
pub trait NetworkDriver {
	/// The card's burned-in MAC address (spec §3 "Nic").
	fn mac_address(&self) -> MacAddr;

	/// Link MTU in bytes, excluding the Ethernet header (spec §3 "Nic").
	fn mtu(&self) -> u16;

	/// Submits a fully built Ethernet frame for transmission.
	///
	/// Returns [`NetError::TryAgain`] if every TX descriptor is currently
	/// owned by the card (spec §4.1 "Transmit"), never blocking.
	fn transmit(&mut self, frame: &[u8]) -> Result<(), NetError>;

	/// True once the RX ring holds at least one complete frame.
	fn has_packet(&self) -> bool;

	/// Drains and returns the oldest complete frame from the RX ring, CRC
	/// stripped (spec §4.1 "Receive interrupt").
	fn receive(&mut self) -> Result<Vec<u8>, NetError>;

	/// Services one interrupt, reaping finished TX descriptors and/or
	/// advancing the RX cursor. Returns whether at least one frame is now
	/// ready to drain (spec §4.1 "Receive interrupt").
	fn handle_interrupt(&mut self) -> bool;
}

/// Errors a driver can surface during bring-up, folded the way the
/// teacher's `drivers::error::DriverError` folds per-bus errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
	#[error("adapter not found")]
	AdapterNotFound,
	#[error("soft reset did not complete within the poll budget")]
	ResetTimedOut,
}
