//! Tunables for the networking core, gathered the way the teacher keeps
//! build-wide constants in `config.rs` rather than scattered magic numbers.

#![allow(dead_code)]

/// Number of reassembly slots (spec §3 "Reassembly slot").
pub const REASSEMBLY_SLOTS: usize = 16;

/// Number of routing-table entries (spec §3 "Routing entry").
pub const ROUTING_ENTRIES: usize = 256;

/// Number of bound raw-IP socket slots (spec §3 "Raw IPv4 socket slot table").
pub const RAW_SOCKET_SLOTS: usize = 1024;

/// Largest reassembled IPv4 payload (spec §3, §6).
pub const IP_FRAGMENT_MAX_SIZE: usize = 65515;

/// Initial reassembly slot timeout, in one-second ticks (spec §3, §8 property 2).
pub const REASSEMBLY_TIMEOUT_SECS: u32 = 15;

/// Raw-socket receive-buffer cap: 16 datagrams of up to 64 KiB (spec §4.3.1).
pub const RAW_RECV_BUFFER_SLOTS: usize = 16;
pub const RAW_RECV_DATAGRAM_CAP: usize = 64 * 1024;

/// Largest UDP payload a single `sendto` may carry (spec §4.4).
pub const UDP_MAX_PAYLOAD: usize = IP_FRAGMENT_MAX_SIZE - 8;

/// First port handed out by ephemeral allocation (spec §4.4).
pub const UDP_EPHEMERAL_PORT: u16 = 49152;

/// Number of TX descriptor slots on the RTL8139-class NIC (spec §3, §4.1).
pub const NIC_TX_SLOTS: usize = 4;

/// RX ring size in bytes, plus the card's trailing pad (spec §3).
pub const NIC_RX_RING_SIZE: usize = 8192;
pub const NIC_RX_RING_PAD: usize = 16;

/// Send buffer size per TX descriptor (spec §4.1 "2 KiB send buffer").
pub const NIC_TX_BUFFER_SIZE: usize = 2048;

/// Minimum Ethernet frame payload; shorter frames are zero-padded (spec §6).
pub const ETH_MIN_PAYLOAD: usize = 46;

/// Soft-reset poll budget for NIC bring-up (spec §4.1).
pub const NIC_RESET_TIMEOUT_US: u64 = 100_000;
pub const NIC_RESET_POLL_INTERVAL_US: u64 = 5;

/// Default link MTU, payload bytes excluding the Ethernet header (spec §4.1, §8 S2).
pub const DEFAULT_MTU: u16 = 1500;

/// Per-UCB receive-buffer cap on pending bytes (spec §3 "UDP control block").
pub const UDP_RECV_BUFFER_BYTES: usize = 64 * 1024;

/// Attempts the IP_TX work handler makes to resolve a next hop's link
/// address before silently dropping the fragment (spec §4.3.5).
pub const ARP_RESOLVE_MAX_ATTEMPTS: u32 = 3;

/// The table sizes above are fixed at compile time, matching spec §3's
/// "fixed table of N" wording; this struct only gathers the tunables a test
/// genuinely wants to vary from run to run.
#[derive(Debug, Clone, Copy)]
pub struct NetConfig {
	pub reassembly_timeout_secs: u32,
	pub udp_recv_buffer_bytes: usize,
}

impl Default for NetConfig {
	fn default() -> Self {
		Self {
			reassembly_timeout_secs: REASSEMBLY_TIMEOUT_SECS,
			udp_recv_buffer_bytes: UDP_RECV_BUFFER_BYTES,
		}
	}
}
