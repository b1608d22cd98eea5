//! `Nic`: interface-layer state for one network card (spec §3, component C2).
//!
//! The driver (component C1) only knows how to move frames; everything an
//! interface needs beyond that — its assigned address, its name, its
//! counters — lives here, the way the teacher keeps per-adapter state
//! (`NetworkInterface`/`NetworkState`) separate from the driver trait.

use crate::drivers::net::NetworkDriver;
use crate::msg::MacAddr;

/// An IPv4 address and the netmask it was assigned with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IfAddr {
	pub address: u32,
	pub netmask: u32,
}

impl IfAddr {
	pub fn network(&self) -> u32 {
		self.address & self.netmask
	}

	pub fn broadcast(&self) -> u32 {
		self.address | !self.netmask
	}
}

/// Per-NIC traffic counters (spec §3 "Nic", used by `stats` feature).
#[derive(Debug, Clone, Copy, Default)]
pub struct NicStats {
	pub rx_frames: u64,
	pub tx_frames: u64,
	pub rx_dropped: u64,
	pub tx_dropped: u64,
}

/// One registered network interface: a driver plus the interface-layer
/// state laid over it (spec §3 "Nic", §4.2).
pub struct Nic {
	name: &'static str,
	index: usize,
	driver: Box<dyn NetworkDriver + Send>,
	addr: Option<IfAddr>,
	stats: NicStats,
}

impl Nic {
	pub fn new(name: &'static str, index: usize, driver: Box<dyn NetworkDriver + Send>) -> Nic {
		Nic {
			name,
			index,
			driver,
			addr: None,
			stats: NicStats::default(),
		}
	}

	pub fn name(&self) -> &'static str {
		self.name
	}

	pub fn index(&self) -> usize {
		self.index
	}

	pub fn mac_address(&self) -> MacAddr {
		self.driver.mac_address()
	}

	pub fn mtu(&self) -> u16 {
		self.driver.mtu()
	}

	pub fn addr(&self) -> Option<IfAddr> {
		self.addr
	}

	/// Assigns (or reassigns) the interface's address. Callers are
	/// responsible for purging stale routing-table entries that referenced
	/// the previous address (spec §4.2 "Address assignment").
	pub fn set_addr(&mut self, addr: Option<IfAddr>) {
		self.addr = addr;
	}

	pub fn stats(&self) -> NicStats {
		self.stats
	}

	pub fn driver_mut(&mut self) -> &mut (dyn NetworkDriver + Send) {
		&mut *self.driver
	}

	pub fn record_rx(&mut self) {
		self.stats.rx_frames += 1;
	}

	pub fn record_rx_dropped(&mut self) {
		self.stats.rx_dropped += 1;
	}

	pub fn record_tx(&mut self) {
		self.stats.tx_frames += 1;
	}

	pub fn record_tx_dropped(&mut self) {
		self.stats.tx_dropped += 1;
	}
}

/// Derives the classful default netmask for an address with no explicit
/// mask given (spec §4.2 "Address assignment", historical class A/B/C
/// split; kept for parity with the original system's default-route
/// behavior when a caller supplies only an address).
pub fn classful_default_netmask(address: u32) -> u32 {
	let first_octet = (address >> 24) & 0xff;
	if first_octet < 128 {
		0xff00_0000 // class A
	} else if first_octet < 192 {
		0xffff_0000 // class B
	} else {
		0xffff_ff00 // class C
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::drivers::net::mock::MockRtl8139;

	fn make_nic() -> Nic {
		Nic::new("eth0", 0, Box::new(MockRtl8139::new([1, 2, 3, 4, 5, 6])))
	}

	#[test]
	fn fresh_nic_has_no_address() {
		let nic = make_nic();
		assert!(nic.addr().is_none());
	}

	#[test]
	fn set_addr_round_trips() {
		let mut nic = make_nic();
		let addr = IfAddr {
			address: 0x0a000005,
			netmask: 0xffffff00,
		};
		nic.set_addr(Some(addr));
		assert_eq!(nic.addr(), Some(addr));
		assert_eq!(nic.addr().unwrap().network(), 0x0a000000);
		assert_eq!(nic.addr().unwrap().broadcast(), 0x0a0000ff);
	}

	#[test]
	fn classful_defaults() {
		assert_eq!(classful_default_netmask(0x0a000005), 0xff00_0000);
		assert_eq!(classful_default_netmask(0xac100001), 0xffff_0000);
		assert_eq!(classful_default_netmask(0xc0a80001), 0xffff_ff00);
	}
}
