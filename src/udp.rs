//! UDP transport: UCB table with wildcard-tolerant matching, ephemeral port
//! allocation, pseudo-header checksum (spec §4.4, component C4).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::config::{UDP_EPHEMERAL_PORT, UDP_MAX_PAYLOAD, UDP_RECV_BUFFER_BYTES};
use crate::error::NetError;
use crate::ip::checksum;
use crate::synch::Spinlock;

const UDP_HEADER_LEN: usize = 8;
const UDP_PROTO: u8 = 17;

/// `0.0.0.0`/port `0` both act as the UCB-matching wildcard (spec §4.4,
/// GLOSSARY "Wildcard").
const ANY_ADDR: u32 = 0;
const ANY_PORT: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockAddr {
	pub addr: u32,
	pub port: u16,
}

impl SockAddr {
	pub const ANY: SockAddr = SockAddr {
		addr: ANY_ADDR,
		port: ANY_PORT,
	};
}

/// A received datagram, queued for a UCB's consumer (spec §3 "UCB").
#[derive(Debug, Clone)]
pub struct UdpDatagram {
	pub src: SockAddr,
	pub payload: Vec<u8>,
}

/// A UDP control block (spec §3 "UCB").
pub struct Ucb {
	pub local: SockAddr,
	pub foreign: SockAddr,
	pub bound: bool,
	pub connected: bool,
	recv_queue: VecDeque<UdpDatagram>,
	pending_bytes: usize,
}

impl Ucb {
	fn new() -> Ucb {
		Ucb {
			local: SockAddr::ANY,
			foreign: SockAddr::ANY,
			bound: false,
			connected: false,
			recv_queue: VecDeque::new(),
			pending_bytes: 0,
		}
	}

	/// Appends a datagram under the socket lock, dropping it if the
	/// receive-buffer bound would be exceeded (spec §4.4 "Receive").
	fn deliver(&mut self, datagram: UdpDatagram, recv_buffer_bytes: usize) {
		if self.pending_bytes + datagram.payload.len() > recv_buffer_bytes {
			return;
		}
		self.pending_bytes += datagram.payload.len();
		self.recv_queue.push_back(datagram);
	}

	/// `recvfrom` (spec §4.4): head of queue, truncated to `max_len`.
	pub fn recv(&mut self, max_len: usize) -> Result<UdpDatagram, NetError> {
		let mut datagram = self.recv_queue.pop_front().ok_or(NetError::WouldBlock)?;
		self.pending_bytes -= datagram.payload.len();
		datagram.payload.truncate(max_len);
		Ok(datagram)
	}
}

pub type UcbHandle = Arc<Mutex<Ucb>>;

/// Scores how well a bound UCB matches a query 4-tuple (spec §4.4
/// "Matching"): 1 point per exact-matching non-wildcard dimension, `None`
/// if any non-wildcard dimension conflicts.
fn dimension_score(have: u32, want: u32) -> Option<u32> {
	if have == 0 || want == 0 {
		Some(0)
	} else if have == want {
		Some(1)
	} else {
		None
	}
}

fn score(ucb: &Ucb, local: SockAddr, foreign: SockAddr) -> Option<u32> {
	let a = dimension_score(ucb.local.addr, local.addr)?;
	let b = dimension_score(ucb.local.port as u32, local.port as u32)?;
	let c = dimension_score(ucb.foreign.addr, foreign.addr)?;
	let d = dimension_score(ucb.foreign.port as u32, foreign.port as u32)?;
	Some(a + b + c + d)
}

/// The process-wide list of UCBs (spec §3, §5 "UCB list").
pub struct UcbTable {
	ucbs: Spinlock<Vec<UcbHandle>>,
	recv_buffer_bytes: usize,
}

impl UcbTable {
	pub fn new(recv_buffer_bytes: usize) -> UcbTable {
		UcbTable {
			ucbs: Spinlock::new(Vec::new()),
			recv_buffer_bytes,
		}
	}

	pub fn create(&self) -> UcbHandle {
		let handle = Arc::new(Mutex::new(Ucb::new()));
		self.ucbs.lock().push(Arc::clone(&handle));
		handle
	}

	pub fn remove(&self, handle: &UcbHandle) {
		self.ucbs.lock().retain(|h| !Arc::ptr_eq(h, handle));
	}

	/// Ephemeral port allocation (spec §4.4): first unused port in
	/// `[UDP_EPHEMERAL_PORT, 65535]`.
	fn allocate_ephemeral_port(&self, ucbs: &[UcbHandle]) -> Result<u16, NetError> {
		for port in UDP_EPHEMERAL_PORT..=u16::MAX {
			let in_use = ucbs.iter().any(|h| {
				let ucb = h.lock().unwrap();
				ucb.bound && ucb.local.port == port
			});
			if !in_use {
				return Ok(port);
			}
			if port == u16::MAX {
				break;
			}
		}
		Err(NetError::AddressInUse)
	}

	/// `bind` (spec §4.4). `addr`/`port` of `0` requests "any"/"ephemeral".
	pub fn bind(&self, handle: &UcbHandle, addr: u32, port: u16) -> Result<(), NetError> {
		let mut ucbs = self.ucbs.lock();
		{
			let ucb = handle.lock().unwrap();
			if ucb.bound {
				return Err(NetError::InvalidArgument);
			}
		}

		let assigned_port = if port == 0 {
			self.allocate_ephemeral_port(&ucbs)?
		} else {
			let conflict = ucbs.iter().any(|h| {
				if Arc::ptr_eq(h, handle) {
					return false;
				}
				let other = h.lock().unwrap();
				other.bound
					&& score(
						&other,
						SockAddr { addr, port },
						SockAddr::ANY,
					)
					.is_some()
			});
			if conflict {
				return Err(NetError::AddressInUse);
			}
			port
		};

		let mut ucb = handle.lock().unwrap();
		ucb.local = SockAddr {
			addr,
			port: assigned_port,
		};
		ucb.bound = true;
		if !ucbs.iter().any(|h| Arc::ptr_eq(h, handle)) {
			ucbs.push(Arc::clone(handle));
		}
		Ok(())
	}

	/// `connect` (spec §4.4): binds with an ephemeral port first if needed,
	/// then sets the foreign address.
	pub fn connect(
		&self,
		handle: &UcbHandle,
		dest: SockAddr,
		source_for_route: impl FnOnce() -> u32,
	) -> Result<(), NetError> {
		let needs_bind = !handle.lock().unwrap().bound;
		if needs_bind {
			let src = source_for_route();
			self.bind(handle, src, 0)?;
		}
		let mut ucb = handle.lock().unwrap();
		ucb.foreign = dest;
		ucb.connected = true;
		Ok(())
	}

	/// Finds the best-matching bound UCB for an inbound datagram (spec
	/// §4.4 "Matching", §8 property 7).
	pub fn best_match(&self, local: SockAddr, foreign: SockAddr) -> Option<UcbHandle> {
		let ucbs = self.ucbs.lock();
		ucbs.iter()
			.filter(|h| h.lock().unwrap().bound)
			.filter_map(|h| {
				let s = score(&h.lock().unwrap(), local, foreign)?;
				Some((s, Arc::clone(h)))
			})
			.max_by_key(|(s, _)| *s)
			.map(|(_, h)| h)
	}

	/// Delivers an inbound datagram to the best-matching UCB, if any (spec
	/// §4.4 "Receive").
	pub fn deliver(&self, dst: SockAddr, src: SockAddr, payload: &[u8]) -> bool {
		match self.best_match(dst, src) {
			Some(handle) => {
				handle.lock().unwrap().deliver(
					UdpDatagram {
						src,
						payload: payload.to_vec(),
					},
					self.recv_buffer_bytes,
				);
				true
			}
			None => false,
		}
	}
}

impl Default for UcbTable {
	fn default() -> Self {
		UcbTable::new(UDP_RECV_BUFFER_BYTES)
	}
}

fn build_header(src_port: u16, dst_port: u16, payload: &[u8]) -> [u8; UDP_HEADER_LEN] {
	let mut header = [0u8; UDP_HEADER_LEN];
	header[0..2].copy_from_slice(&src_port.to_be_bytes());
	header[2..4].copy_from_slice(&dst_port.to_be_bytes());
	let length = (UDP_HEADER_LEN + payload.len()) as u16;
	header[4..6].copy_from_slice(&length.to_be_bytes());
	header
}

/// Computes the UDP checksum over the 12-byte pseudo-header and the
/// datagram (header + payload); remaps a zero result to `0xFFFF` per RFC
/// 768 (spec §4.4, §6, §8 property 6).
pub fn checksum_with_pseudo_header(src: u32, dst: u32, header: &[u8], payload: &[u8]) -> u16 {
	let mut pseudo = [0u8; 12];
	pseudo[0..4].copy_from_slice(&src.to_be_bytes());
	pseudo[4..8].copy_from_slice(&dst.to_be_bytes());
	pseudo[9] = UDP_PROTO;
	let udp_length = (header.len() + payload.len()) as u16;
	pseudo[10..12].copy_from_slice(&udp_length.to_be_bytes());

	let sum = checksum::checksum_regions(&[&pseudo, header, payload]);
	if sum == 0 {
		0xffff
	} else {
		sum
	}
}

/// A fully built outgoing UDP datagram, ready for the IP transmit path
/// (spec §4.4 "Send").
pub struct UdpTxDatagram {
	pub src: u32,
	pub dst: u32,
	pub payload: Vec<u8>,
}

/// Builds a datagram for `sendto`/`send` (spec §4.4): resolves source
/// address/port (bound value or route-provided/ephemeral), destination
/// (connected or explicit), and computes the pseudo-header checksum.
pub fn build_datagram(
	handle: &UcbHandle,
	ucbs: &UcbTable,
	dest: Option<SockAddr>,
	payload: &[u8],
	source_for_route: impl FnOnce() -> u32,
) -> Result<UdpTxDatagram, NetError> {
	if payload.len() > UDP_MAX_PAYLOAD {
		return Err(NetError::MessageTooBig);
	}

	let (connected, foreign) = {
		let ucb = handle.lock().unwrap();
		(ucb.connected, ucb.foreign)
	};

	let destination = match (dest, connected) {
		(Some(_), true) => return Err(NetError::AlreadyConnected),
		(Some(addr), false) => addr,
		(None, true) => foreign,
		(None, false) => return Err(NetError::NotConnected),
	};

	let bound = handle.lock().unwrap().bound;
	if !bound {
		let src = source_for_route();
		ucbs.bind(handle, src, 0)?;
	}

	let local = handle.lock().unwrap().local;
	let header = build_header(local.port, destination.port, payload);
	let sum = checksum_with_pseudo_header(local.addr, destination.addr, &header, payload);
	let mut datagram = Vec::with_capacity(UDP_HEADER_LEN + payload.len());
	datagram.extend_from_slice(&header);
	datagram[6..8].copy_from_slice(&sum.to_be_bytes());
	datagram.extend_from_slice(payload);

	Ok(UdpTxDatagram {
		src: local.addr,
		dst: destination.addr,
		payload: datagram,
	})
}

/// Validates and delivers an inbound UDP datagram (spec §4.4 "Receive").
/// Returns `false` if there is no matching UCB (the caller requests an
/// ICMP "port unreachable" and drops).
pub fn input(ucbs: &UcbTable, ip_src: u32, ip_dst: u32, ip_payload: &[u8]) -> Result<bool, NetError> {
	if ip_payload.len() < UDP_HEADER_LEN {
		return Err(NetError::InvalidArgument);
	}
	let src_port = u16::from_be_bytes([ip_payload[0], ip_payload[1]]);
	let dst_port = u16::from_be_bytes([ip_payload[2], ip_payload[3]]);
	let udp_length = u16::from_be_bytes([ip_payload[4], ip_payload[5]]) as usize;
	if udp_length != ip_payload.len() {
		return Err(NetError::InvalidArgument);
	}
	let checksum_field = u16::from_be_bytes([ip_payload[6], ip_payload[7]]);

	if checksum_field != 0 {
		let mut header = [0u8; UDP_HEADER_LEN];
		header.copy_from_slice(&ip_payload[..UDP_HEADER_LEN]);
		header[6..8].copy_from_slice(&[0, 0]);
		let payload = &ip_payload[UDP_HEADER_LEN..];
		let expected = checksum_with_pseudo_header(ip_src, ip_dst, &header, payload);
		if expected != checksum_field {
			return Err(NetError::InvalidArgument);
		}
	}

	let delivered = ucbs.deliver(
		SockAddr {
			addr: ip_dst,
			port: dst_port,
		},
		SockAddr {
			addr: ip_src,
			port: src_port,
		},
		&ip_payload[UDP_HEADER_LEN..],
	);
	Ok(delivered)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bind_ephemeral_then_fixed_port_conflict() {
		let table = UcbTable::default();
		let a = table.create();
		table.bind(&a, 0x0a000001, 7777).unwrap();
		assert_eq!(a.lock().unwrap().local.port, 7777);

		let b = table.create();
		assert!(matches!(table.bind(&b, 0x0a000001, 7777), Err(NetError::AddressInUse)));
	}

	#[test]
	fn exact_match_outranks_wildcard() {
		let table = UcbTable::default();
		let wildcard = table.create();
		table.bind(&wildcard, 0, 7777).unwrap();

		let specific = table.create();
		table.bind(&specific, 0x0a000001, 7778).unwrap();
		table
			.connect(&specific, SockAddr { addr: 0x0a000002, port: 9999 }, || 0x0a000001)
			.unwrap();

		let matched = table
			.best_match(
				SockAddr { addr: 0x0a000001, port: 7778 },
				SockAddr { addr: 0x0a000002, port: 9999 },
			)
			.unwrap();
		assert!(Arc::ptr_eq(&matched, &specific));
	}

	#[test]
	fn checksum_round_trip_passes_verification() {
		let table = UcbTable::default();
		let receiver = table.create();
		table.bind(&receiver, 0x0a000001, 7777).unwrap();

		let sender = table.create();
		table.bind(&sender, 0x0a000002, 5555).unwrap();
		let datagram = build_datagram(
			&sender,
			&table,
			Some(SockAddr { addr: 0x0a000001, port: 7777 }),
			b"ping",
			|| 0,
		)
		.unwrap();

		assert!(input(&table, datagram.src, datagram.dst, &datagram.payload).unwrap());
		let received = receiver.lock().unwrap().recv(1500).unwrap();
		assert_eq!(received.payload, b"ping");
		assert_eq!(received.src.port, 5555);
	}

	#[test]
	fn sendto_on_connected_socket_is_rejected() {
		let table = UcbTable::default();
		let handle = table.create();
		table
			.connect(&handle, SockAddr { addr: 1, port: 1 }, || 0x0a000001)
			.unwrap();
		let result = build_datagram(&handle, &table, Some(SockAddr { addr: 2, port: 2 }), b"x", || 0);
		assert!(matches!(result, Err(NetError::AlreadyConnected)));
	}

	#[test]
	fn sendto_without_addr_on_unconnected_socket_is_rejected() {
		let table = UcbTable::default();
		let handle = table.create();
		let result = build_datagram(&handle, &table, None, b"x", || 0x0a000001);
		assert!(matches!(result, Err(NetError::NotConnected)));
	}

	#[test]
	fn remove_drops_the_ucb_out_of_match_consideration() {
		let table = UcbTable::default();
		let handle = table.create();
		table.bind(&handle, 0x0a000001, 7777).unwrap();
		table.remove(&handle);

		let matched = table.best_match(
			SockAddr { addr: 0x0a000001, port: 7777 },
			SockAddr { addr: 0x0a000002, port: 1 },
		);
		assert!(matched.is_none());
	}
}
