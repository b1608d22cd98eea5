//! ctOS's IPv4 networking core: NIC driver, interface-layer multiplexer,
//! IPv4 engine (RFC 815 reassembly, routing, fragmentation, raw sockets) and
//! UDP transport with wildcard demultiplexing.
//!
//! Hosted on the standard library rather than `no_std` so a test, or any
//! other embedder, can build a fresh [`NetCore`] around a [`drivers::net::mock::MockRtl8139`]
//! without a real card or a kernel underneath it (spec §0).

#![warn(rust_2018_idioms)]

pub mod arp;
pub mod config;
pub mod drivers;
pub mod errno;
pub mod error;
pub mod iface;
pub mod ip;
pub mod msg;
pub mod nic;
pub mod synch;
pub mod udp;
pub mod workqueue;

use log::{debug, warn};

use crate::config::{ARP_RESOLVE_MAX_ATTEMPTS, NetConfig};
use crate::drivers::net::NetworkDriver;
use crate::error::NetError;
use crate::ip::{AssembledDatagram, IpEngine, IpFragmentTx, IpTxRequest, RouteFlags};
use crate::msg::{ETHERTYPE_IPV4, MacAddr};
use crate::udp::{SockAddr, UcbHandle, UcbTable, UdpTxDatagram};
use crate::workqueue::{WorkOutcome, WorkQueue};

const UDP_PROTO: u8 = 17;

/// A fragment waiting on the IP_TX work queue for its next hop's link
/// address (spec §4.3.5).
struct IpTxWork {
	fragment: IpFragmentTx,
	attempts: u32,
}

/// Ties the interface, IP and UDP layers together behind the IP_TX work
/// queue's ARP-resolve-and-requeue handoff (spec §4.3.5, §4.5).
///
/// This is the facade an embedder (a syscall layer, or a test) drives; the
/// component modules underneath it never reach for one another directly.
pub struct NetCore {
	pub iface: iface::NetIface,
	pub ip: IpEngine,
	pub udp: UcbTable,
	pub arp: arp::ArpTable,
	ip_tx_queue: WorkQueue<IpTxWork>,
}

impl NetCore {
	pub fn new(config: NetConfig) -> NetCore {
		NetCore {
			iface: iface::NetIface::new(),
			ip: IpEngine::new(config.reassembly_timeout_secs),
			udp: UcbTable::new(config.udp_recv_buffer_bytes),
			arp: arp::ArpTable::new(),
			ip_tx_queue: WorkQueue::new(),
		}
	}

	/// Convenience constructor for tests and small embedders: builds a core
	/// with one NIC already registered (spec §8 "a fresh core without
	/// touching a real driver").
	pub fn new_with_driver(driver: Box<dyn NetworkDriver + Send>, config: NetConfig) -> Result<(NetCore, usize), NetError> {
		let mut core = NetCore::new(config);
		let nic = core.iface.register(driver)?;
		Ok((core, nic))
	}

	/// Registers an additional NIC (spec §4.2 "Registration").
	pub fn register_nic(&mut self, driver: Box<dyn NetworkDriver + Send>) -> Result<usize, NetError> {
		self.iface.register(driver)
	}

	/// Assigns an address to a registered NIC, deriving the classful default
	/// netmask when `netmask` is `None` (spec §4.2 "Address assignment").
	pub fn set_addr(&mut self, nic: usize, address: u32, netmask: Option<u32>) -> Result<(), NetError> {
		let mut routing = self.ip.routing().lock();
		self.iface.set_addr(nic, address, netmask, &mut routing)
	}

	pub fn clear_addr(&mut self, nic: usize) {
		let mut routing = self.ip.routing().lock();
		self.iface.clear_addr(nic, &mut routing);
	}

	pub fn add_route(
		&self,
		dst: u32,
		gateway: u32,
		genmask: u32,
		nic: usize,
		flags: RouteFlags,
	) -> Result<(), NetError> {
		self.ip.routing().lock().add(dst, gateway, genmask, nic, flags)
	}

	/// One-second housekeeping tick: frees timed-out reassembly slots (spec
	/// §3, §8 property 2). Callers drive this from whatever timer source
	/// they have; the core keeps no thread of its own.
	pub fn tick(&self) {
		self.ip.tick();
		#[cfg(feature = "stats")]
		self.log_stats();
	}

	#[cfg(feature = "stats")]
	fn log_stats(&self) {
		debug!("reassembly table: {} slot(s) in use", self.ip.reassembly_used_slots());
		for nic in self.iface.iter() {
			let stats = nic.stats();
			debug!(
				"{}: rx={} rx_dropped={} tx={} tx_dropped={}",
				nic.name(),
				stats.rx_frames,
				stats.rx_dropped,
				stats.tx_frames,
				stats.tx_dropped
			);
		}
	}

	/// Drains every NIC's receive path once, then drains the IP_TX and
	/// interface TX work queues (spec §4.2, §4.3.5). Callers poll this from
	/// an interrupt handler or an event loop; there is no background worker.
	pub fn poll(&mut self) {
		let nic_count = self.iface.iter().count();
		for index in 0..nic_count {
			loop {
				let frame = {
					let Some(nic) = self.iface.nic_mut(index) else {
						break;
					};
					if !nic.driver_mut().has_packet() {
						break;
					}
					match nic.driver_mut().receive() {
						Ok(frame) => {
							nic.record_rx();
							frame
						}
						Err(err) => {
							nic.record_rx_dropped();
							warn!("nic {index} receive failed: {err}");
							break;
						}
					}
				};
				self.handle_rx_frame(index, &frame);
			}
		}
		self.run_ip_tx_queue();
		self.iface.run_tx_queue();
	}

	/// Ethertype-dispatches one received frame: IPv4 goes through
	/// reassembly/raw fan-out and, once assembled, UDP input; ARP frames are
	/// a collaborator's concern and are dropped here (spec §1, §4.2).
	fn handle_rx_frame(&mut self, nic_index: usize, frame: &[u8]) {
		let Some(dispatch) = iface::NetIface::dispatch_rx(frame) else {
			return;
		};
		let iface::RxDispatch::Ipv4(payload) = dispatch else {
			return;
		};
		let Some(local_addr) = self.iface.nic(nic_index).and_then(|nic| nic.addr()).map(|a| a.address) else {
			return;
		};

		let datagram = match self.ip.input(&payload, local_addr) {
			Ok(Some(datagram)) => datagram,
			Ok(None) => return,
			Err(err) => {
				debug!("ip input dropped a frame on nic {nic_index}: {err}");
				return;
			}
		};

		self.dispatch_assembled(datagram);
	}

	fn dispatch_assembled(&self, datagram: AssembledDatagram) {
		if datagram.proto == UDP_PROTO {
			if let Err(err) = udp::input(&self.udp, datagram.src, datagram.dst, &datagram.payload) {
				debug!("udp input rejected a datagram from {:#x}: {err}", datagram.src);
			}
		}
	}

	/// Builds and queues a UDP datagram for transmission (spec §4.4
	/// "Send" through §4.3.4 "Transmit"). Fragments land on the IP_TX work
	/// queue for ARP resolution rather than going straight to the interface
	/// layer (spec §4.3.5).
	pub fn send_udp(&self, handle: &UcbHandle, dest: Option<SockAddr>, payload: &[u8]) -> Result<(), NetError> {
		let iface = &self.iface;
		let datagram: UdpTxDatagram = udp::build_datagram(handle, &self.udp, dest, payload, || {
			// No destination is known yet for an unbound, unconnected send;
			// ANY lets the routing lookup pick any interface's address.
			0
		})?;

		let req = IpTxRequest {
			proto: UDP_PROTO,
			df: false,
			src: datagram.src,
			dst: datagram.dst,
			payload: datagram.payload,
		};
		let req_src = req.src;
		let fragments = self.ip.transmit(
			req,
			|nic| iface.nic(nic).map(|n| n.mtu()).unwrap_or(config::DEFAULT_MTU),
			|nic| iface.nic(nic).and_then(|n| n.addr()).map(|a| a.address).unwrap_or(0),
			|nic| iface.nic(nic).and_then(|n| n.addr()).map(|a| a.address == req_src).unwrap_or(req_src == 0),
		)?;

		for fragment in fragments {
			self.ip_tx_queue.schedule(IpTxWork { fragment, attempts: 0 });
		}
		self.ip_tx_queue.trigger();
		Ok(())
	}

	/// Drains the IP_TX work queue once: resolves each fragment's next hop
	/// through the ARP cache, requeues on a miss, and silently drops after
	/// [`ARP_RESOLVE_MAX_ATTEMPTS`] (spec §4.3.5).
	fn run_ip_tx_queue(&self) {
		let arp = &self.arp;
		let iface = &self.iface;
		self.ip_tx_queue.run_once(|work| {
			work.attempts += 1;
			match arp.resolve(work.fragment.next_hop) {
				Some(dst_mac) => {
					let src_mac: MacAddr = iface.nic(work.fragment.nic).map(|n| n.mac_address()).unwrap_or([0; 6]);
					let mut frame = Vec::with_capacity(14 + work.fragment.frame.len());
					frame.extend_from_slice(&dst_mac);
					frame.extend_from_slice(&src_mac);
					frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
					frame.extend_from_slice(&work.fragment.frame);
					iface.enqueue_tx(work.fragment.nic, frame);
					WorkOutcome::Done
				}
				None if work.attempts >= ARP_RESOLVE_MAX_ATTEMPTS => {
					debug!(
						"dropping fragment to {:#x} after {} unresolved ARP attempts",
						work.fragment.next_hop, work.attempts
					);
					WorkOutcome::Done
				}
				None => WorkOutcome::Again,
			}
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::drivers::net::mock::{Cable, MockRtl8139};

	fn fresh_core() -> (NetCore, usize) {
		NetCore::new_with_driver(Box::new(MockRtl8139::new([1, 2, 3, 4, 5, 6])), NetConfig::default()).unwrap()
	}

	#[test]
	fn udp_loopback_through_a_cable_delivers_to_the_bound_socket() {
		let mock_a = MockRtl8139::new([1, 0, 0, 0, 0, 1]);
		let mock_b = MockRtl8139::new([2, 0, 0, 0, 0, 2]);
		Cable::connect(&mock_a, &mock_b);

		let (mut a, nic_a) = NetCore::new_with_driver(Box::new(mock_a), NetConfig::default()).unwrap();
		let (mut b, nic_b) = NetCore::new_with_driver(Box::new(mock_b), NetConfig::default()).unwrap();

		a.set_addr(nic_a, 0x0a000001, Some(0xffffff00)).unwrap();
		b.set_addr(nic_b, 0x0a000002, Some(0xffffff00)).unwrap();
		a.arp.insert(0x0a000002, [2, 0, 0, 0, 0, 2]);

		let receiver = b.udp.create();
		b.udp.bind(&receiver, 0, 9000).unwrap();

		let sender = a.udp.create();
		a.udp.bind(&sender, 0x0a000001, 0).unwrap();
		a.send_udp(&sender, Some(SockAddr { addr: 0x0a000002, port: 9000 }), b"hello").unwrap();

		a.run_ip_tx_queue();
		a.iface.run_tx_queue();
		b.poll();

		let received = receiver.lock().unwrap().recv(1500).unwrap();
		assert_eq!(received.payload, b"hello");
	}

	#[test]
	fn arp_miss_requeues_then_drops_after_max_attempts() {
		let (core, _nic) = fresh_core();
		core.arp.remove(0x0a000002);
		core.ip_tx_queue.schedule(IpTxWork {
			fragment: IpFragmentTx {
				nic: 0,
				next_hop: 0x0a000002,
				frame: vec![0u8; 20],
			},
			attempts: 0,
		});

		for _ in 0..ARP_RESOLVE_MAX_ATTEMPTS {
			assert_eq!(core.ip_tx_queue.len(), 1);
			core.run_ip_tx_queue();
		}
		assert_eq!(core.ip_tx_queue.len(), 0);
	}

	#[test]
	fn arp_resolve_hands_frame_to_interface_tx_queue() {
		let (core, nic) = fresh_core();
		core.arp.insert(0x0a000002, [9; 6]);
		core.ip_tx_queue.schedule(IpTxWork {
			fragment: IpFragmentTx {
				nic,
				next_hop: 0x0a000002,
				frame: vec![0u8; 20],
			},
			attempts: 0,
		});

		core.run_ip_tx_queue();
		assert_eq!(core.ip_tx_queue.len(), 0);
		assert_eq!(core.iface.tx_queue_len(), 1);
	}
}
