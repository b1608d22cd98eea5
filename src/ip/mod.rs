//! IPv4 engine: input validation, reassembly, routing, fragmented transmit,
//! raw-socket fan-out (spec §4.3, component C3).

pub mod checksum;
pub mod raw;
pub mod reassembly;
pub mod routing;

use crate::error::{NetError, Resource};
use crate::synch::Spinlock;

pub use raw::{RawDatagram, RawSocketTable};
pub use reassembly::{FragmentKey, ReassemblyTable};
pub use routing::{Route, RouteFlags, RoutingTable};

const IP_HEADER_LEN: usize = 20;
const FLAG_DF: u16 = 1 << 14;
const FLAG_MF: u16 = 1 << 13;
const OFFSET_MASK: u16 = 0x1fff;

/// A parsed IPv4 header (spec §6 "IPv4 header").
#[derive(Debug, Clone, Copy)]
pub struct IpHeaderView {
	pub total_length: u16,
	pub identification: u16,
	pub df: bool,
	pub mf: bool,
	pub fragment_offset: u16,
	pub ttl: u8,
	pub proto: u8,
	pub src: u32,
	pub dst: u32,
}

/// Validates and parses a 20-byte IPv4 header (spec §4.3.1): version 4,
/// IHL 5 (options rejected), checksum, non-zero TTL, and a `total_length`
/// that actually fits within the header and the bytes on hand — a crafted
/// datagram can make the checksum agree while lying about its length, and
/// this core must drop rather than panic on it (spec §7).
pub fn parse_header(bytes: &[u8]) -> Result<IpHeaderView, NetError> {
	if bytes.len() < IP_HEADER_LEN {
		return Err(NetError::InvalidArgument);
	}
	let version = bytes[0] >> 4;
	let ihl = bytes[0] & 0x0f;
	if version != 4 || ihl != 5 {
		return Err(NetError::InvalidArgument);
	}
	if checksum::checksum(&bytes[..IP_HEADER_LEN]) != 0 {
		return Err(NetError::InvalidArgument);
	}
	let ttl = bytes[8];
	if ttl == 0 {
		return Err(NetError::InvalidArgument);
	}
	let total_length = u16::from_be_bytes([bytes[2], bytes[3]]);
	if (total_length as usize) < IP_HEADER_LEN || total_length as usize > bytes.len() {
		return Err(NetError::InvalidArgument);
	}
	let flags_offset = u16::from_be_bytes([bytes[6], bytes[7]]);
	Ok(IpHeaderView {
		total_length,
		identification: u16::from_be_bytes([bytes[4], bytes[5]]),
		df: flags_offset & FLAG_DF != 0,
		mf: flags_offset & FLAG_MF != 0,
		fragment_offset: (flags_offset & OFFSET_MASK) * 8,
		ttl,
		proto: bytes[9],
		src: u32::from_be_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
		dst: u32::from_be_bytes([bytes[16], bytes[17], bytes[18], bytes[19]]),
	})
}

fn build_header(
	payload_len: usize,
	id: u16,
	df: bool,
	mf: bool,
	fragment_offset_bytes: u16,
	proto: u8,
	src: u32,
	dst: u32,
) -> [u8; IP_HEADER_LEN] {
	let mut header = [0u8; IP_HEADER_LEN];
	header[0] = (4 << 4) | 5;
	let total_length = (payload_len + IP_HEADER_LEN) as u16;
	header[2..4].copy_from_slice(&total_length.to_be_bytes());
	header[4..6].copy_from_slice(&id.to_be_bytes());
	let mut flags_offset = fragment_offset_bytes / 8;
	if df {
		flags_offset |= FLAG_DF;
	}
	if mf {
		flags_offset |= FLAG_MF;
	}
	header[6..8].copy_from_slice(&flags_offset.to_be_bytes());
	header[8] = 64; // TTL
	header[9] = proto;
	header[12..16].copy_from_slice(&src.to_be_bytes());
	header[16..20].copy_from_slice(&dst.to_be_bytes());
	let sum = checksum::checksum(&header);
	header[10..12].copy_from_slice(&sum.to_be_bytes());
	header
}

/// A fully built IPv4 fragment, handed to the work queue for ARP resolution
/// and link-layer transmission (spec §4.3.4 step 4).
#[derive(Debug, Clone)]
pub struct IpFragmentTx {
	pub nic: usize,
	pub next_hop: u32,
	pub frame: Vec<u8>,
}

/// A datagram assembled (or passed through unfragmented) by IP input,
/// ready for transport dispatch by `proto` (spec §4.3.1).
#[derive(Debug, Clone)]
pub struct AssembledDatagram {
	pub src: u32,
	pub dst: u32,
	pub proto: u8,
	pub payload: Vec<u8>,
}

/// What to transmit (spec §4.3.4 inputs).
pub struct IpTxRequest {
	pub proto: u8,
	pub df: bool,
	/// `0` means ANY: the outgoing NIC's address is substituted.
	pub src: u32,
	pub dst: u32,
	pub payload: Vec<u8>,
}

/// Component C3: reassembly, routing, raw-socket fan-out and fragmented
/// transmit, tied together behind one lock-ordered facade (spec §5's
/// reassembly/routing/raw-socket table locks).
pub struct IpEngine {
	reassembly: Spinlock<ReassemblyTable>,
	routing: Spinlock<RoutingTable>,
	raw_sockets: RawSocketTable,
	next_id: Spinlock<u16>,
}

impl IpEngine {
	pub fn new(reassembly_timeout_secs: u32) -> IpEngine {
		IpEngine {
			reassembly: Spinlock::new(ReassemblyTable::new(reassembly_timeout_secs)),
			routing: Spinlock::new(RoutingTable::new()),
			raw_sockets: RawSocketTable::new(),
			next_id: Spinlock::new(1),
		}
	}

	pub fn routing(&self) -> &Spinlock<RoutingTable> {
		&self.routing
	}

	pub fn raw_sockets(&self) -> &RawSocketTable {
		&self.raw_sockets
	}

	fn next_identification(&self) -> u16 {
		let mut id = self.next_id.lock();
		let value = *id;
		*id = if value == u16::MAX { 1 } else { value + 1 };
		value
	}

	/// One-second tick for the reassembly table (spec §3, §8 property 2).
	pub fn tick(&self) {
		self.reassembly.lock().tick();
	}

	/// Occupied reassembly slots, for the `stats` feature's periodic logging.
	pub fn reassembly_used_slots(&self) -> usize {
		self.reassembly.lock().used_count()
	}

	/// IPv4 input path (spec §4.3.1): validates, reassembles, fans out to
	/// raw sockets, and returns the assembled datagram for transport
	/// dispatch by `proto` once reassembly completes.
	pub fn input(&self, frame: &[u8], local_addr: u32) -> Result<Option<AssembledDatagram>, NetError> {
		let header = parse_header(frame)?;
		if header.dst != local_addr {
			return Err(NetError::InvalidArgument);
		}
		let ip_payload = &frame[IP_HEADER_LEN..header.total_length as usize];

		let assembled_payload = if !header.mf && header.fragment_offset == 0 {
			ip_payload.to_vec()
		} else {
			let key = FragmentKey {
				src: header.src,
				dst: header.dst,
				id: header.identification,
				proto: header.proto,
			};
			let first = header.fragment_offset as usize;
			let last = first + ip_payload.len() - 1;
			match self
				.reassembly
				.lock()
				.insert(key, first, last, header.mf, ip_payload)?
			{
				Some(payload) => payload,
				None => return Ok(None),
			}
		};

		self.raw_sockets
			.fan_out(header.dst, header.proto, header.src, &assembled_payload);

		Ok(Some(AssembledDatagram {
			src: header.src,
			dst: header.dst,
			proto: header.proto,
			payload: assembled_payload,
		}))
	}

	/// IPv4 transmit path (spec §4.3.4): routes, checks DF/MTU, builds the
	/// header(s), fragmenting if needed.
	pub fn transmit(
		&self,
		req: IpTxRequest,
		mtu_of: impl Fn(usize) -> u16,
		source_of: impl Fn(usize) -> u32,
		nic_has_source: impl Fn(usize) -> bool,
	) -> Result<Vec<IpFragmentTx>, NetError> {
		let route = self
			.routing
			.lock()
			.lookup(req.dst, req.src, nic_has_source)
			.ok_or(NetError::NetworkUnreachable)?;
		let mtu = mtu_of(route.nic) as usize;
		let src = if req.src == 0 { source_of(route.nic) } else { req.src };

		if req.payload.len() + IP_HEADER_LEN > mtu {
			if req.df {
				return Err(NetError::MessageTooBig);
			}
			return Ok(self.fragment(&req, src, mtu, route));
		}

		let id = self.next_identification();
		let header = build_header(
			req.payload.len(),
			id,
			req.df,
			false,
			0,
			req.proto,
			src,
			req.dst,
		);
		let mut frame = Vec::with_capacity(IP_HEADER_LEN + req.payload.len());
		frame.extend_from_slice(&header);
		frame.extend_from_slice(&req.payload);
		Ok(vec![IpFragmentTx {
			nic: route.nic,
			next_hop: route.next_hop,
			frame,
		}])
	}

	fn fragment(&self, req: &IpTxRequest, src: u32, mtu: usize, route: Route) -> Vec<IpFragmentTx> {
		let id = self.next_identification();
		let max_payload = ((mtu - IP_HEADER_LEN) / 8) * 8;
		let mut fragments = Vec::new();
		let mut offset = 0usize;
		while offset < req.payload.len() {
			let remaining = req.payload.len() - offset;
			let chunk_len = remaining.min(max_payload);
			let more_fragments = offset + chunk_len < req.payload.len();
			let header = build_header(
				chunk_len,
				id,
				req.df,
				more_fragments,
				offset as u16,
				req.proto,
				src,
				req.dst,
			);
			let mut frame = Vec::with_capacity(IP_HEADER_LEN + chunk_len);
			frame.extend_from_slice(&header);
			frame.extend_from_slice(&req.payload[offset..offset + chunk_len]);
			fragments.push(IpFragmentTx {
				nic: route.nic,
				next_hop: route.next_hop,
				frame,
			});
			offset += chunk_len;
		}
		fragments
	}
}
