//! An in-memory [`NetworkDriver`] double, and a [`Cable`] that joins two of
//! them so integration tests can exercise a real two-host Ethernet exchange
//! without any hardware (spec §0 "tests must be able to construct a fresh
//! core without touching a real driver").

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::error::NetError;
use crate::msg::MacAddr;

use super::NetworkDriver;

#[derive(Default)]
struct Shared {
	rx_queue: VecDeque<Vec<u8>>,
	tx_log: Vec<Vec<u8>>,
	/// Set by a [`Cable`] so a transmitted frame is delivered to the peer.
	peer: Option<Arc<Mutex<Shared>>>,
}

/// A fake NIC: frames handed to [`NetworkDriver::transmit`] land on the tx
/// log (and, if wired up through a [`Cable`], in the peer's RX queue);
/// frames pushed with [`MockRtl8139::deliver`] become receivable.
pub struct MockRtl8139 {
	mac: MacAddr,
	mtu: u16,
	shared: Arc<Mutex<Shared>>,
}

impl MockRtl8139 {
	pub fn new(mac: MacAddr) -> Self {
		MockRtl8139 {
			mac,
			mtu: crate::config::DEFAULT_MTU,
			shared: Arc::new(Mutex::new(Shared::default())),
		}
	}

	/// Queues a frame as if it had just arrived over the wire.
	pub fn deliver(&self, frame: Vec<u8>) {
		self.shared.lock().unwrap().rx_queue.push_back(frame);
	}

	/// Every frame this driver has ever transmitted, in order.
	pub fn transmitted(&self) -> Vec<Vec<u8>> {
		self.shared.lock().unwrap().tx_log.clone()
	}
}

impl NetworkDriver for MockRtl8139 {
	fn mac_address(&self) -> MacAddr {
		self.mac
	}

	fn mtu(&self) -> u16 {
		self.mtu
	}

	fn transmit(&mut self, frame: &[u8]) -> Result<(), NetError> {
		let mut shared = self.shared.lock().unwrap();
		shared.tx_log.push(frame.to_vec());
		if let Some(peer) = shared.peer.clone() {
			peer.lock().unwrap().rx_queue.push_back(frame.to_vec());
		}
		Ok(())
	}

	fn has_packet(&self) -> bool {
		!self.shared.lock().unwrap().rx_queue.is_empty()
	}

	fn receive(&mut self) -> Result<Vec<u8>, NetError> {
		self.shared
			.lock()
			.unwrap()
			.rx_queue
			.pop_front()
			.ok_or(NetError::WouldBlock)
	}

	fn handle_interrupt(&mut self) -> bool {
		self.has_packet()
	}
}

/// Joins two [`MockRtl8139`]s so that a frame transmitted on one is
/// delivered to the other's RX queue, simulating a direct Ethernet link
/// between two hosts for integration tests (spec §8 scenarios S1-S6).
pub struct Cable;

impl Cable {
	pub fn connect(a: &MockRtl8139, b: &MockRtl8139) {
		a.shared.lock().unwrap().peer = Some(Arc::clone(&b.shared));
		b.shared.lock().unwrap().peer = Some(Arc::clone(&a.shared));
	}
}
