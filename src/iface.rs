//! Interface layer: NIC registry, naming, ethertype dispatch, address
//! assignment, and the NET_IF transmit work queue (spec §4.2, component C2).

use crate::drivers::net::NetworkDriver;
use crate::error::NetError;
use crate::ip::{RouteFlags, RoutingTable};
use crate::msg::{ETHERTYPE_ARP, ETHERTYPE_IPV4};
use crate::nic::{classful_default_netmask, IfAddr, Nic};
use crate::workqueue::{WorkOutcome, WorkQueue};

const ETH_HEADER_LEN: usize = 14;
const MAX_NICS_PER_PREFIX: usize = 16;

/// A frame queued for transmission on a specific NIC (spec §4.2 "TX path").
pub struct TxFrame {
	pub nic: usize,
	pub frame: Vec<u8>,
}

/// What the interface layer found after stripping the Ethernet header
/// (spec §4.2 "RX path").
pub enum RxDispatch {
	Arp(Vec<u8>),
	Ipv4(Vec<u8>),
}

/// Owns the table of registered NICs and the frame-level TX work queue
/// (spec §4.2).
pub struct NetIface {
	nics: Vec<Nic>,
	tx_queue: WorkQueue<TxFrame>,
}

impl NetIface {
	pub fn new() -> NetIface {
		NetIface {
			nics: Vec::new(),
			tx_queue: WorkQueue::new(),
		}
	}

	/// Registers a driver under the next free `eth<N>` name (spec §4.2
	/// "Registration"; bails if 16 already exist).
	pub fn register(&mut self, driver: Box<dyn NetworkDriver + Send>) -> Result<usize, NetError> {
		if self.nics.len() >= MAX_NICS_PER_PREFIX {
			return Err(NetError::OutOfResources(crate::error::Resource::NicSlot));
		}
		let index = self.nics.len();
		let name: &'static str = Box::leak(format!("eth{index}").into_boxed_str());
		self.nics.push(Nic::new(name, index, driver));
		Ok(index)
	}

	pub fn nic(&self, index: usize) -> Option<&Nic> {
		self.nics.get(index)
	}

	pub fn nic_mut(&mut self, index: usize) -> Option<&mut Nic> {
		self.nics.get_mut(index)
	}

	pub fn iter(&self) -> impl Iterator<Item = &Nic> {
		self.nics.iter()
	}

	/// Address assignment (spec §4.2): derives the classful default netmask
	/// when `netmask` is `None`, purges every routing entry pointing at
	/// this NIC, stores the new address, and installs a direct route.
	pub fn set_addr(
		&mut self,
		index: usize,
		address: u32,
		netmask: Option<u32>,
		routing: &mut RoutingTable,
	) -> Result<(), NetError> {
		let nic = self.nics.get_mut(index).ok_or(NetError::InvalidArgument)?;
		let netmask = netmask.unwrap_or_else(|| classful_default_netmask(address));

		routing.purge_nic(index);
		nic.set_addr(Some(IfAddr { address, netmask }));
		routing.add(address & netmask, 0, netmask, index, RouteFlags::UP)
	}

	pub fn clear_addr(&mut self, index: usize, routing: &mut RoutingTable) {
		routing.purge_nic(index);
		if let Some(nic) = self.nics.get_mut(index) {
			nic.set_addr(None);
		}
	}

	/// Parses the Ethernet header and dispatches by ethertype (spec §4.2
	/// "RX path"); `None` for any other ethertype, whose message is
	/// destroyed by the caller.
	pub fn dispatch_rx(frame: &[u8]) -> Option<RxDispatch> {
		if frame.len() < ETH_HEADER_LEN {
			return None;
		}
		let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
		let payload = frame[ETH_HEADER_LEN..].to_vec();
		match ethertype {
			ETHERTYPE_ARP => Some(RxDispatch::Arp(payload)),
			ETHERTYPE_IPV4 => Some(RxDispatch::Ipv4(payload)),
			_ => None,
		}
	}

	/// Enqueues a frame-ready message onto the NET_IF work queue (spec
	/// §4.2 "TX path").
	pub fn enqueue_tx(&self, nic: usize, frame: Vec<u8>) {
		self.tx_queue.schedule(TxFrame { nic, frame });
	}

	pub fn tx_queue_len(&self) -> usize {
		self.tx_queue.len()
	}

	/// Drains the NET_IF work queue once, calling each frame's NIC driver;
	/// a "try again" result leaves the entry queued for a later call (spec
	/// §4.2 "if the driver returns try again, the handler returns the same
	/// code to the queue manager which keeps the entry for a later retry").
	pub fn run_tx_queue(&mut self) {
		let nics = &mut self.nics;
		self.tx_queue.run_once(|item| {
			let Some(nic) = nics.get_mut(item.nic) else {
				return WorkOutcome::Done;
			};
			match nic.driver_mut().transmit(&item.frame) {
				Ok(()) => {
					nic.record_tx();
					WorkOutcome::Done
				}
				Err(NetError::TryAgain) => WorkOutcome::Again,
				Err(_) => {
					nic.record_tx_dropped();
					WorkOutcome::Done
				}
			}
		});
	}
}

impl Default for NetIface {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::drivers::net::mock::MockRtl8139;

	fn eth_frame(ethertype: u16, payload: &[u8]) -> Vec<u8> {
		let mut frame = vec![0u8; ETH_HEADER_LEN];
		frame[12..14].copy_from_slice(&ethertype.to_be_bytes());
		frame.extend_from_slice(payload);
		frame
	}

	#[test]
	fn registration_assigns_sequential_names() {
		let mut iface = NetIface::new();
		let a = iface.register(Box::new(MockRtl8139::new([1; 6]))).unwrap();
		let b = iface.register(Box::new(MockRtl8139::new([2; 6]))).unwrap();
		assert_eq!(iface.nic(a).unwrap().name(), "eth0");
		assert_eq!(iface.nic(b).unwrap().name(), "eth1");
	}

	#[test]
	fn set_addr_installs_direct_route() {
		let mut iface = NetIface::new();
		let nic = iface.register(Box::new(MockRtl8139::new([1; 6]))).unwrap();
		let mut routing = RoutingTable::new();
		iface.set_addr(nic, 0x0a000215, Some(0xffffff00), &mut routing).unwrap();

		let route = routing.lookup(0x0a000220, 0, |_| true).unwrap();
		assert_eq!(route.nic, nic);
		assert_eq!(route.next_hop, 0x0a000220);
	}

	#[test]
	fn dispatch_rx_routes_by_ethertype() {
		let ipv4 = eth_frame(ETHERTYPE_IPV4, &[1, 2, 3]);
		assert!(matches!(NetIface::dispatch_rx(&ipv4), Some(RxDispatch::Ipv4(_))));

		let arp = eth_frame(ETHERTYPE_ARP, &[4, 5, 6]);
		assert!(matches!(NetIface::dispatch_rx(&arp), Some(RxDispatch::Arp(_))));

		let unknown = eth_frame(0x9999, &[]);
		assert!(NetIface::dispatch_rx(&unknown).is_none());
	}

	#[test]
	fn run_tx_queue_drains_and_hands_frames_to_the_driver() {
		let mut iface = NetIface::new();
		let nic = iface.register(Box::new(MockRtl8139::new([1; 6]))).unwrap();
		iface.enqueue_tx(nic, vec![0u8; 60]);
		assert_eq!(iface.tx_queue_len(), 1);
		iface.run_tx_queue();
		assert_eq!(iface.tx_queue_len(), 0);
		assert_eq!(iface.nic(nic).unwrap().stats().tx_frames, 1);
	}

	#[test]
	fn run_tx_queue_drops_frames_for_an_unregistered_nic() {
		let mut iface = NetIface::new();
		iface.enqueue_tx(5, vec![0u8; 60]);
		iface.run_tx_queue();
		assert_eq!(iface.tx_queue_len(), 0);
	}
}
