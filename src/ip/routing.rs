//! Routing table: a fixed 256-entry array, longest-prefix-match lookup
//! (spec §3 "Routing entry", §4.3.3, §8 property 3, §8 S5).

use crate::config::ROUTING_ENTRIES;

bitflags::bitflags! {
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct RouteFlags: u8 {
		const UP = 0b01;
		const GW = 0b10;
	}
}

/// A routing-table entry. `nic = None` denotes an empty slot (spec §3).
#[derive(Debug, Clone, Copy)]
pub struct RouteEntry {
	pub dst: u32,
	pub gateway: u32,
	pub genmask: u32,
	pub nic: Option<usize>,
	pub flags: RouteFlags,
}

impl RouteEntry {
	fn matches(&self, dst: u32, gateway: u32, genmask: u32, nic: usize) -> bool {
		self.dst == dst && self.gateway == gateway && self.genmask == genmask
			&& self.nic == Some(nic)
	}
}

/// The result of a routing lookup: which NIC to send from, and the address
/// to resolve at the link layer (spec GLOSSARY "Next hop").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
	pub nic: usize,
	pub next_hop: u32,
}

pub struct RoutingTable {
	entries: Vec<Option<RouteEntry>>,
}

impl RoutingTable {
	pub fn new() -> RoutingTable {
		RoutingTable {
			entries: vec![None; ROUTING_ENTRIES],
		}
	}

	/// Adds a route, normalizing the destination by the genmask on insert
	/// (spec §4.3.3).
	pub fn add(
		&mut self,
		dst: u32,
		gateway: u32,
		genmask: u32,
		nic: usize,
		flags: RouteFlags,
	) -> Result<(), crate::error::NetError> {
		let slot = self
			.entries
			.iter_mut()
			.find(|e| e.is_none())
			.ok_or(crate::error::NetError::OutOfResources(
				crate::error::Resource::RoutingEntry,
			))?;
		*slot = Some(RouteEntry {
			dst: dst & genmask,
			gateway,
			genmask,
			nic: Some(nic),
			flags,
		});
		Ok(())
	}

	/// Removes the entry matching the given `(dst, genmask, gateway, nic)`
	/// tuple exactly (spec §4.3.3 "added and deleted by exact match").
	pub fn remove(&mut self, dst: u32, gateway: u32, genmask: u32, nic: usize) -> bool {
		let normalized_dst = dst & genmask;
		for slot in self.entries.iter_mut() {
			if let Some(entry) = slot {
				if entry.matches(normalized_dst, gateway, genmask, nic) {
					*slot = None;
					return true;
				}
			}
		}
		false
	}

	/// Removes every route pointing at `nic` (spec §4.2 "Address
	/// assignment" purges routes on reassignment).
	pub fn purge_nic(&mut self, nic: usize) {
		for slot in self.entries.iter_mut() {
			if matches!(slot, Some(entry) if entry.nic == Some(nic)) {
				*slot = None;
			}
		}
	}

	/// Longest-prefix-match lookup. When `source` is not `0.0.0.0`
	/// (ANY), candidates are additionally constrained to routes whose NIC
	/// has that source address assigned (spec §4.3.3); the caller supplies
	/// that predicate via `nic_has_source` to avoid this module depending on
	/// the interface layer.
	pub fn lookup(
		&self,
		dst: u32,
		source: u32,
		nic_has_source: impl Fn(usize) -> bool,
	) -> Option<Route> {
		let mut best: Option<&RouteEntry> = None;
		for slot in self.entries.iter() {
			let Some(entry) = slot else { continue };
			let Some(nic) = entry.nic else { continue };
			if entry.dst != dst & entry.genmask {
				continue;
			}
			if source != 0 && !nic_has_source(nic) {
				continue;
			}
			let better = match best {
				None => true,
				Some(current) => entry.genmask.count_ones() > current.genmask.count_ones(),
			};
			if better {
				best = Some(entry);
			}
		}
		best.map(|entry| Route {
			nic: entry.nic.unwrap(),
			next_hop: if entry.flags.contains(RouteFlags::GW) {
				entry.gateway
			} else {
				dst
			},
		})
	}

	pub fn iter(&self) -> impl Iterator<Item = &RouteEntry> {
		self.entries.iter().filter_map(|slot| slot.as_ref())
	}
}

impl Default for RoutingTable {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const NO_SOURCE_CONSTRAINT: fn(usize) -> bool = |_| true;

	#[test]
	fn longest_prefix_match_prefers_direct_route() {
		let mut table = RoutingTable::new();
		table
			.add(0, 0x0a00_0202, 0, 0, RouteFlags::UP | RouteFlags::GW)
			.unwrap();
		table
			.add(0x0a00_0200, 0, 0xffff_ff00, 1, RouteFlags::UP)
			.unwrap();

		let direct = table
			.lookup(0x0a00_0215, 0, NO_SOURCE_CONSTRAINT)
			.unwrap();
		assert_eq!(direct.nic, 1);
		assert_eq!(direct.next_hop, 0x0a00_0215);

		let default = table.lookup(0x0808_0808, 0, NO_SOURCE_CONSTRAINT).unwrap();
		assert_eq!(default.nic, 0);
		assert_eq!(default.next_hop, 0x0a00_0202);
	}

	#[test]
	fn purge_nic_removes_only_its_routes() {
		let mut table = RoutingTable::new();
		table.add(1, 0, 0xffff_ffff, 0, RouteFlags::UP).unwrap();
		table.add(2, 0, 0xffff_ffff, 1, RouteFlags::UP).unwrap();
		table.purge_nic(0);
		assert_eq!(table.iter().count(), 1);
		assert_eq!(table.iter().next().unwrap().nic, Some(1));
	}

	#[test]
	fn add_fails_when_table_full() {
		let mut table = RoutingTable::new();
		for i in 0..ROUTING_ENTRIES {
			table
				.add(i as u32, 0, 0xffff_ffff, 0, RouteFlags::UP)
				.unwrap();
		}
		assert!(table.add(9999, 0, 0xffff_ffff, 0, RouteFlags::UP).is_err());
	}
}
