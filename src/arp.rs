//! Minimal ARP cache collaborator (spec §1 "ARP ... consumed as a primitive
//! but not specified here beyond its contract").
//!
//! Full ARP request/reply wire handling is out of scope; this module only
//! gives the IP TX work handler (spec §4.3.5) the lookup surface it needs:
//! insert a resolved mapping (as a real stack would after an ARP exchange
//! completes) and query it.

use std::collections::HashMap;

use crate::msg::MacAddr;
use crate::synch::Spinlock;

pub struct ArpTable {
	entries: Spinlock<HashMap<u32, MacAddr>>,
}

impl ArpTable {
	pub fn new() -> ArpTable {
		ArpTable {
			entries: Spinlock::new(HashMap::new()),
		}
	}

	pub fn insert(&self, ip: u32, mac: MacAddr) {
		self.entries.lock().insert(ip, mac);
	}

	pub fn remove(&self, ip: u32) {
		self.entries.lock().remove(&ip);
	}

	pub fn resolve(&self, ip: u32) -> Option<MacAddr> {
		self.entries.lock().get(&ip).copied()
	}
}

impl Default for ArpTable {
	fn default() -> Self {
		Self::new()
	}
}
