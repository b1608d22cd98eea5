//! Raw IPv4 socket slot table (spec §3 "Raw IPv4 socket slot table", §4.3.1,
//! §8 scenario S6).
//!
//! Per-object reference counting (spec §9) is realized with `Arc` rather
//! than a hand-rolled clone/release pair: cloning an `Arc<Mutex<RawSocket>>`
//! out of the table under the table lock already gives the "safe regardless
//! of table state" guarantee spec §9's Open Question asks for, and the
//! socket is freed the moment the last `Arc` drops.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::{RAW_RECV_BUFFER_SLOTS, RAW_RECV_DATAGRAM_CAP, RAW_SOCKET_SLOTS};
use crate::error::{NetError, Resource};
use crate::synch::Spinlock;

/// One datagram queued for a bound raw socket.
#[derive(Debug, Clone)]
pub struct RawDatagram {
	pub src: u32,
	pub payload: Vec<u8>,
}

pub struct RawSocket {
	pub local_addr: u32,
	pub protocol: u8,
	recv_queue: VecDeque<RawDatagram>,
	pending_bytes: usize,
}

impl RawSocket {
	fn new(local_addr: u32, protocol: u8) -> RawSocket {
		RawSocket {
			local_addr,
			protocol,
			recv_queue: VecDeque::new(),
			pending_bytes: 0,
		}
	}

	/// Appends a datagram, silently dropping on overflow of the 16 x 64 KiB
	/// buffer cap (spec §4.3.1).
	fn deliver(&mut self, datagram: RawDatagram) {
		if self.recv_queue.len() >= RAW_RECV_BUFFER_SLOTS
			|| self.pending_bytes + datagram.payload.len() > RAW_RECV_BUFFER_SLOTS * RAW_RECV_DATAGRAM_CAP
		{
			return;
		}
		self.pending_bytes += datagram.payload.len();
		self.recv_queue.push_back(datagram);
	}

	pub fn recv(&mut self) -> Result<RawDatagram, NetError> {
		let datagram = self.recv_queue.pop_front().ok_or(NetError::WouldBlock)?;
		self.pending_bytes -= datagram.payload.len();
		Ok(datagram)
	}
}

type Handle = Arc<Mutex<RawSocket>>;

/// The fixed table of 1024 bindable raw-socket slots.
pub struct RawSocketTable {
	slots: Spinlock<Vec<Option<Handle>>>,
}

impl RawSocketTable {
	pub fn new() -> RawSocketTable {
		RawSocketTable {
			slots: Spinlock::new((0..RAW_SOCKET_SLOTS).map(|_| None).collect()),
		}
	}

	pub fn bind(&self, local_addr: u32, protocol: u8) -> Result<Handle, NetError> {
		let mut slots = self.slots.lock();
		let free = slots
			.iter()
			.position(|s| s.is_none())
			.ok_or(NetError::OutOfResources(Resource::RawSocketSlot))?;
		let handle = Arc::new(Mutex::new(RawSocket::new(local_addr, protocol)));
		slots[free] = Some(Arc::clone(&handle));
		Ok(handle)
	}

	pub fn unbind(&self, handle: &Handle) {
		let mut slots = self.slots.lock();
		if let Some(slot) = slots.iter_mut().find(|s| matches!(s, Some(h) if Arc::ptr_eq(h, handle))) {
			*slot = None;
		}
	}

	/// Clones the table's references to every socket matching
	/// `(dst, proto)` and delivers the datagram to each (spec §4.3.1 "fan
	/// out a cloned copy to each matching bound raw-IP socket").
	pub fn fan_out(&self, dst: u32, proto: u8, src: u32, payload: &[u8]) {
		let matches: Vec<Handle> = {
			let slots = self.slots.lock();
			slots
				.iter()
				.filter_map(|s| s.as_ref())
				.filter(|h| {
					let socket = h.lock().unwrap();
					socket.local_addr == dst && socket.protocol == proto
				})
				.cloned()
				.collect()
		};

		for handle in matches {
			let mut socket = handle.lock().unwrap();
			socket.deliver(RawDatagram {
				src,
				payload: payload.to_vec(),
			});
		}
	}
}

impl Default for RawSocketTable {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fan_out_only_reaches_matching_protocol() {
		let table = RawSocketTable::new();
		let icmp = table.bind(0x0a00020f, 1).unwrap();
		let udp = table.bind(0x0a00020f, 17).unwrap();

		table.fan_out(0x0a00020f, 1, 0x08080808, b"echo-reply");

		assert_eq!(icmp.lock().unwrap().recv().unwrap().payload, b"echo-reply");
		assert!(matches!(udp.lock().unwrap().recv(), Err(NetError::WouldBlock)));
	}

	#[test]
	fn refcount_keeps_socket_alive_after_unbind_race() {
		let table = RawSocketTable::new();
		let handle = table.bind(0x0a000001, 17).unwrap();
		let held = Arc::clone(&handle);
		table.unbind(&handle);
		drop(handle);
		// The clone taken before unbind still works; it is simply no longer
		// reachable through the table.
		assert!(matches!(held.lock().unwrap().recv(), Err(NetError::WouldBlock)));
	}

	#[test]
	fn overflow_drops_silently() {
		let table = RawSocketTable::new();
		let handle = table.bind(0x0a000001, 1).unwrap();
		for _ in 0..RAW_RECV_BUFFER_SLOTS + 4 {
			table.fan_out(0x0a000001, 1, 0, b"x");
		}
		let mut count = 0;
		while handle.lock().unwrap().recv().is_ok() {
			count += 1;
		}
		assert_eq!(count, RAW_RECV_BUFFER_SLOTS);
	}
}
