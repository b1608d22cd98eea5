//! RFC 815 hole-list reassembly (spec §3 "Reassembly slot", §4.3.2, §8
//! properties 1–2, §8 scenarios S2/S4).

use crate::config::{IP_FRAGMENT_MAX_SIZE, REASSEMBLY_SLOTS, REASSEMBLY_TIMEOUT_SECS};
use crate::error::{NetError, Resource};

/// Key identifying the datagram a fragment belongs to (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentKey {
	pub src: u32,
	pub dst: u32,
	pub id: u16,
	pub proto: u8,
}

/// An unreceived byte range, linked by index within the slot's hole list
/// (spec §3 "Reassembly slot", §9 "index-based free list").
#[derive(Debug, Clone, Copy)]
struct Hole {
	first: u16,
	last: u16,
}

struct Slot {
	key: FragmentKey,
	buffer: Vec<u8>,
	holes: Vec<Hole>,
	payload_length: usize,
	timeout_secs: u32,
}

impl Slot {
	fn new(key: FragmentKey, timeout_secs: u32) -> Slot {
		Slot {
			key,
			buffer: vec![0u8; IP_FRAGMENT_MAX_SIZE],
			holes: vec![Hole {
				first: 0,
				last: (IP_FRAGMENT_MAX_SIZE - 1) as u16,
			}],
			payload_length: 0,
			timeout_secs,
		}
	}

	fn insert_fragment(&mut self, first: usize, last: usize, more_fragments: bool, payload: &[u8]) {
		let mut i = 0;
		while i < self.holes.len() {
			let hole = self.holes[i];
			if (last as u16) < hole.first || (first as u16) > hole.last {
				i += 1;
				continue;
			}
			self.holes.remove(i);
			let mut inserted = 0;
			if (first as u16) > hole.first {
				self.holes.insert(
					i,
					Hole {
						first: hole.first,
						last: first as u16 - 1,
					},
				);
				inserted += 1;
			}
			if (last as u16) < hole.last && more_fragments {
				self.holes.insert(
					i + inserted,
					Hole {
						first: last as u16 + 1,
						last: hole.last,
					},
				);
				inserted += 1;
			}
			i += inserted;
		}

		if last + 1 > self.payload_length {
			self.payload_length = last + 1;
		}
		self.buffer[first..=last].copy_from_slice(payload);
	}

	fn is_complete(&self) -> bool {
		self.holes.is_empty()
	}
}

/// The fixed table of 16 in-flight reassemblies (spec §3, §8 property 1).
pub struct ReassemblyTable {
	slots: Vec<Option<Slot>>,
	default_timeout_secs: u32,
}

impl ReassemblyTable {
	pub fn new(default_timeout_secs: u32) -> ReassemblyTable {
		ReassemblyTable {
			slots: (0..REASSEMBLY_SLOTS).map(|_| None).collect(),
			default_timeout_secs,
		}
	}

	/// Feeds one fragment in. Returns the reassembled payload once the hole
	/// list empties, `None` while assembly is still in progress (spec
	/// §4.3.2).
	pub fn insert(
		&mut self,
		key: FragmentKey,
		first: usize,
		last: usize,
		more_fragments: bool,
		payload: &[u8],
	) -> Result<Option<Vec<u8>>, NetError> {
		if last >= IP_FRAGMENT_MAX_SIZE || last < first {
			// A crafted fragment_offset can encode an offset past the largest
			// datagram this table can ever hold; drop it rather than index out
			// of the slot buffer (spec §7 bounds the reassembly offset).
			return Ok(None);
		}

		let slot_index = match self.slots.iter().position(|s| matches!(s, Some(slot) if slot.key == key)) {
			Some(index) => index,
			None => {
				let free = self
					.slots
					.iter()
					.position(|s| s.is_none())
					.ok_or(NetError::OutOfResources(Resource::ReassemblySlot))?;
				self.slots[free] = Some(Slot::new(key, self.default_timeout_secs));
				free
			}
		};

		let slot = self.slots[slot_index].as_mut().unwrap();
		slot.insert_fragment(first, last, more_fragments, payload);

		if slot.is_complete() {
			let payload_length = slot.payload_length;
			let mut assembled = self.slots[slot_index].take().unwrap().buffer;
			assembled.truncate(payload_length);
			Ok(Some(assembled))
		} else {
			Ok(None)
		}
	}

	/// One-second tick: decrements every used slot's timeout, freeing any
	/// that reach zero on this tick (spec §3, §8 property 2: a slot created
	/// with the default 15-second timeout is freed by the 15th tick). No
	/// ICMP is generated (explicit non-goal).
	pub fn tick(&mut self) {
		for slot in self.slots.iter_mut() {
			if let Some(s) = slot {
				s.timeout_secs -= 1;
				if s.timeout_secs == 0 {
					*slot = None;
				}
			}
		}
	}

	/// Occupied reassembly slots, for the `stats` feature's periodic logging.
	pub fn used_count(&self) -> usize {
		self.slots.iter().filter(|s| s.is_some()).count()
	}
}

impl Default for ReassemblyTable {
	fn default() -> Self {
		ReassemblyTable::new(REASSEMBLY_TIMEOUT_SECS)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn key() -> FragmentKey {
		FragmentKey {
			src: 0x0a000001,
			dst: 0x0a000002,
			id: 42,
			proto: 17,
		}
	}

	#[test]
	fn in_order_fragments_reassemble() {
		let mut table = ReassemblyTable::default();
		let first = vec![1u8; 1000];
		let second = vec![2u8; 500];

		assert!(table.insert(key(), 0, 999, true, &first).unwrap().is_none());
		let assembled = table.insert(key(), 1000, 1499, false, &second).unwrap().unwrap();

		assert_eq!(assembled.len(), 1500);
		assert!(assembled[..1000].iter().all(|&b| b == 1));
		assert!(assembled[1000..].iter().all(|&b| b == 2));
	}

	#[test]
	fn out_of_order_fragments_reassemble() {
		let mut table = ReassemblyTable::default();
		let first = vec![1u8; 1000];
		let second = vec![2u8; 500];

		assert!(table.insert(key(), 1000, 1499, false, &second).unwrap().is_none());
		let assembled = table.insert(key(), 0, 999, true, &first).unwrap().unwrap();

		assert_eq!(assembled.len(), 1500);
		assert!(assembled[..1000].iter().all(|&b| b == 1));
		assert!(assembled[1000..].iter().all(|&b| b == 2));
	}

	#[test]
	fn duplicate_fragment_is_harmless() {
		let mut table = ReassemblyTable::default();
		let payload = vec![9u8; 200];
		assert!(table.insert(key(), 0, 199, true, &payload).unwrap().is_none());
		assert!(table.insert(key(), 0, 199, true, &payload).unwrap().is_none());
		let assembled = table.insert(key(), 200, 399, false, &payload).unwrap().unwrap();
		assert_eq!(assembled.len(), 400);
	}

	#[test]
	fn independent_datagrams_assemble_separately() {
		let mut table = ReassemblyTable::default();
		let mut key_b = key();
		key_b.id = 99;

		table.insert(key(), 0, 99, true, &vec![1u8; 100]).unwrap();
		table.insert(key_b, 0, 49, true, &vec![2u8; 50]).unwrap();
		assert_eq!(table.used_count(), 2);

		let a = table.insert(key(), 100, 149, false, &vec![1u8; 50]).unwrap().unwrap();
		assert_eq!(a.len(), 150);
		let b = table.insert(key_b, 50, 79, false, &vec![2u8; 30]).unwrap().unwrap();
		assert_eq!(b.len(), 80);
	}

	#[test]
	fn timeout_frees_slot_after_fifteen_ticks() {
		let mut table = ReassemblyTable::new(15);
		table.insert(key(), 0, 9, true, &vec![0u8; 10]).unwrap();
		assert_eq!(table.used_count(), 1);
		for _ in 0..15 {
			table.tick();
		}
		assert_eq!(table.used_count(), 0);
	}

	#[test]
	fn fragment_past_max_datagram_size_is_dropped_not_faulted() {
		let mut table = ReassemblyTable::default();
		let result = table.insert(key(), IP_FRAGMENT_MAX_SIZE - 5, IP_FRAGMENT_MAX_SIZE + 10, false, &vec![0u8; 16]);
		assert!(result.unwrap().is_none());
		assert_eq!(table.used_count(), 0);
	}

	#[test]
	fn table_full_drops_new_datagrams() {
		let mut table = ReassemblyTable::default();
		for i in 0..REASSEMBLY_SLOTS {
			let mut k = key();
			k.id = i as u16;
			table.insert(k, 0, 9, true, &vec![0u8; 10]).unwrap();
		}
		let mut overflow_key = key();
		overflow_key.id = 9999;
		assert!(matches!(
			table.insert(overflow_key, 0, 9, true, &vec![0u8; 10]),
			Err(NetError::OutOfResources(Resource::ReassemblySlot))
		));
	}
}
