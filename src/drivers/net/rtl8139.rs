//! RTL8139-class NIC driver (spec §4.1, component C1).
//!
//! Register layout, bring-up sequence and ring-buffer arithmetic are carried
//! over from the teacher's `drivers/net/rtl8139.rs`, reworked against the
//! [`IoPort`] seam instead of raw `x86::io::{inb, outb, ...}` calls and
//! against an owned `Vec<u8>` RX ring instead of a `virt_to_phys` physical
//! page (there is no physical memory to DMA into in a hosted test binary).

use crate::config::{
	ETH_MIN_PAYLOAD, NIC_RESET_POLL_INTERVAL_US, NIC_RESET_TIMEOUT_US, NIC_RX_RING_PAD,
	NIC_RX_RING_SIZE, NIC_TX_BUFFER_SIZE, NIC_TX_SLOTS,
};
use crate::error::NetError;
use crate::msg::MacAddr;

use super::{DriverError, IoPort, NetworkDriver};

const IDR0: u16 = 0x00;
const TSD0: u16 = 0x10;
const RBSTART: u16 = 0x30;
const CAPR: u16 = 0x38;
const CR: u16 = 0x37;
const IMR: u16 = 0x3c;
const ISR: u16 = 0x3e;
const TCR: u16 = 0x40;
const RCR: u16 = 0x44;
const CR9346: u16 = 0x50;
const CONFIG1: u16 = 0x52;

const CR_RST: u8 = 0x10;
const CR_RE: u8 = 0x08;
const CR_TE: u8 = 0x04;
const CR_BUFE: u8 = 0x01;

const RCR_AB: u32 = 0x08; // accept broadcast
const RCR_AM: u32 = 0x04; // accept multicast
const RCR_APM: u32 = 0x02; // accept physical match
const RCR_WRAP: u32 = 0x80;

const TCR_IFG: u32 = 0x0300_0000;

const ISR_ROK: u16 = 0x01;
const ISR_RER: u16 = 0x02;
const ISR_TOK: u16 = 0x04;
const ISR_TER: u16 = 0x08;
const ISR_RXOVW: u16 = 0x10;

const TSD_OWN: u32 = 1 << 13;
const TSD_TUN: u32 = 1 << 14;
const TSD_TOK: u32 = 1 << 15;
const TSD_TABT: u32 = 1 << 30;
const TSD_OWC: u32 = 1 << 29;

/// Interrupts this driver cares about (spec §4.1 "the card is unmasked for
/// ROK, TOK, RXOVW, TER and RER, nothing else").
const INT_MASK: u16 = ISR_ROK | ISR_TOK | ISR_RXOVW | ISR_TER | ISR_RER;

/// A bring-up'd RTL8139-class NIC, generic over the port-I/O seam so it can
/// run against real hardware or a register-level test double.
pub struct Rtl8139Driver<P: IoPort> {
	port: P,
	mac: MacAddr,
	mtu: u16,
	rx_ring: Vec<u8>,
	rx_cursor: usize,
	tx_buffers: [Vec<u8>; NIC_TX_SLOTS],
	tx_in_use: [bool; NIC_TX_SLOTS],
	tx_next: usize,
}

impl<P: IoPort> Rtl8139Driver<P> {
	/// Runs the bring-up sequence (spec §4.1 "Initialization"): soft reset,
	/// MAC readback, receive/transmit configuration, interrupt mask, enable.
	pub fn bring_up(port: P) -> Result<Self, DriverError> {
		port.write8(CR, CR_RST);
		let poll_budget = (NIC_RESET_TIMEOUT_US / NIC_RESET_POLL_INTERVAL_US).max(1);
		let mut reset_done = false;
		for _ in 0..poll_budget {
			if port.read8(CR) & CR_RST == 0 {
				reset_done = true;
				break;
			}
			core::hint::spin_loop();
		}
		if !reset_done {
			return Err(DriverError::ResetTimedOut);
		}

		let mut mac = [0u8; 6];
		for (i, byte) in mac.iter_mut().enumerate() {
			*byte = port.read8(IDR0 + i as u16);
		}

		// unlock config space, clear power/lanwake bits, relock
		port.write8(CR9346, 0xc0);
		port.write8(CONFIG1, 0);
		port.write8(CR9346, 0);

		port.write32(RCR, RCR_AB | RCR_AM | RCR_APM | RCR_WRAP);
		port.write32(TCR, TCR_IFG);
		port.write16(IMR, INT_MASK);
		port.write8(CR, CR_TE | CR_RE);

		Ok(Rtl8139Driver {
			port,
			mac,
			mtu: crate::config::DEFAULT_MTU,
			rx_ring: vec![0u8; NIC_RX_RING_SIZE + NIC_RX_RING_PAD],
			rx_cursor: 0,
			tx_buffers: core::array::from_fn(|_| vec![0u8; NIC_TX_BUFFER_SIZE]),
			tx_in_use: [false; NIC_TX_SLOTS],
			tx_next: 0,
		})
	}

	fn reclaim_tx(&mut self) {
		for slot in 0..NIC_TX_SLOTS {
			if !self.tx_in_use[slot] {
				continue;
			}
			let status = self.port.read32(TSD0 + slot as u16 * 4);
			if status & (TSD_TABT | TSD_OWC) != 0 {
				log::error!("rtl8139: tx slot {slot} aborted, status=0x{status:x}");
				self.tx_in_use[slot] = false;
			} else if status & TSD_TUN != 0 {
				log::error!("rtl8139: tx slot {slot} underrun");
			} else if status & TSD_TOK != 0 {
				self.tx_in_use[slot] = false;
			}
		}
	}

	/// Test-only hook that lets a register-level test double deliver a raw
	/// frame (header already written by the caller into `rx_ring`) the way
	/// the card's DMA engine would.
	#[cfg(test)]
	fn test_inject_rx_frame(&mut self, frame: &[u8]) {
		let mut header = Vec::with_capacity(4 + frame.len());
		header.extend_from_slice(&(ISR_ROK as u16).to_le_bytes());
		header.extend_from_slice(&((frame.len() + 4) as u16).to_le_bytes());
		header.extend_from_slice(frame);
		let write_pos = self.rx_cursor;
		for (i, byte) in header.iter().enumerate() {
			self.rx_ring[(write_pos + i) % NIC_RX_RING_SIZE] = *byte;
		}
		self.port.write8(CR, 0); // clear BUFE: ring non-empty
		let isr = self.port.read16(ISR);
		self.port.write16(ISR, isr | ISR_ROK);
	}
}

impl<P: IoPort> NetworkDriver for Rtl8139Driver<P> {
	fn mac_address(&self) -> MacAddr {
		self.mac
	}

	fn mtu(&self) -> u16 {
		self.mtu
	}

	fn transmit(&mut self, frame: &[u8]) -> Result<(), NetError> {
		self.reclaim_tx();
		let slot = self.tx_next;
		if self.tx_in_use[slot] {
			return Err(NetError::TryAgain);
		}
		let len = frame.len().max(ETH_MIN_PAYLOAD);
		if len > NIC_TX_BUFFER_SIZE {
			return Err(NetError::MessageTooBig);
		}
		self.tx_buffers[slot][..frame.len()].copy_from_slice(frame);
		self.tx_buffers[slot][frame.len()..len].fill(0);

		self.tx_in_use[slot] = true;
		self.port
			.write32(TSD0 + slot as u16 * 4, (len as u32) & !TSD_OWN);
		self.tx_next = (slot + 1) % NIC_TX_SLOTS;
		Ok(())
	}

	fn has_packet(&self) -> bool {
		self.port.read8(CR) & CR_BUFE == 0
	}

	fn receive(&mut self) -> Result<Vec<u8>, NetError> {
		if !self.has_packet() {
			return Err(NetError::WouldBlock);
		}

		let read_u16 = |ring: &[u8], pos: usize| -> u16 {
			let lo = ring[pos % NIC_RX_RING_SIZE];
			let hi = ring[(pos + 1) % NIC_RX_RING_SIZE];
			u16::from_le_bytes([lo, hi])
		};

		let status = read_u16(&self.rx_ring, self.rx_cursor);
		let total_len = read_u16(&self.rx_ring, self.rx_cursor + 2) as usize;
		if status & ISR_ROK == 0 || total_len < 4 {
			return Err(NetError::IoFailure);
		}

		let payload_len = total_len - 4; // CRC stripped
		let mut frame = vec![0u8; payload_len];
		let data_start = self.rx_cursor + 4;
		for (i, byte) in frame.iter_mut().enumerate() {
			*byte = self.rx_ring[(data_start + i) % NIC_RX_RING_SIZE];
		}

		self.rx_cursor = (data_start + payload_len + 3) & !3;
		self.rx_cursor %= NIC_RX_RING_SIZE;
		self.port
			.write16(CAPR, (self.rx_cursor.wrapping_sub(NIC_RX_RING_PAD)) as u16);

		if !self.has_packet() {
			self.port.write8(CR, CR_TE | CR_RE);
		}

		Ok(frame)
	}

	fn handle_interrupt(&mut self) -> bool {
		let mut isr = self.port.read16(ISR);
		let mut ready = false;
		while isr != 0 {
			if isr & ISR_ROK != 0 {
				ready = true;
			}
			if isr & ISR_TOK != 0 {
				self.reclaim_tx();
			}
			if isr & ISR_RER != 0 {
				log::error!("rtl8139: rx error");
			}
			if isr & ISR_TER != 0 {
				log::error!("rtl8139: tx error");
			}
			if isr & ISR_RXOVW != 0 {
				log::error!("rtl8139: rx overflow");
			}
			self.port.write16(ISR, isr);
			isr = self.port.read16(ISR);
		}
		ready
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::cell::Cell;

	/// Minimal register file backing [`IoPort`], enough to exercise
	/// bring-up and the RX/TX paths without any real hardware.
	struct TestPort {
		regs: std::cell::RefCell<std::collections::HashMap<u16, u32>>,
		reset_polls: Cell<u32>,
	}

	impl TestPort {
		fn new(mac: MacAddr) -> Self {
			let mut regs = std::collections::HashMap::new();
			for (i, byte) in mac.iter().enumerate() {
				regs.insert(IDR0 + i as u16, *byte as u32);
			}
			regs.insert(CR, CR_BUFE as u32);
			TestPort {
				regs: std::cell::RefCell::new(regs),
				reset_polls: Cell::new(0),
			}
		}
	}

	impl IoPort for TestPort {
		fn read8(&self, port: u16) -> u8 {
			if port == CR && self.regs.borrow()[&CR] as u8 & CR_RST != 0 {
				// Reset clears itself after a couple of polls.
				let polls = self.reset_polls.get() + 1;
				self.reset_polls.set(polls);
				if polls > 2 {
					let mut regs = self.regs.borrow_mut();
					*regs.get_mut(&CR).unwrap() &= !(CR_RST as u32);
				}
			}
			*self.regs.borrow().get(&port).unwrap_or(&0) as u8
		}
		fn read16(&self, port: u16) -> u16 {
			*self.regs.borrow().get(&port).unwrap_or(&0) as u16
		}
		fn read32(&self, port: u16) -> u32 {
			*self.regs.borrow().get(&port).unwrap_or(&0)
		}
		fn write8(&self, port: u16, value: u8) {
			self.regs.borrow_mut().insert(port, value as u32);
		}
		fn write16(&self, port: u16, value: u16) {
			self.regs.borrow_mut().insert(port, value as u32);
		}
		fn write32(&self, port: u16, value: u32) {
			self.regs.borrow_mut().insert(port, value);
		}
	}

	fn bring_up() -> Rtl8139Driver<TestPort> {
		let mac = [0x52, 0x54, 0x00, 0x12, 0x34, 0x56];
		Rtl8139Driver::bring_up(TestPort::new(mac)).unwrap()
	}

	#[test]
	fn bring_up_reads_back_mac_and_enables_rx_tx() {
		let driver = bring_up();
		assert_eq!(driver.mac_address(), [0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
		assert_eq!(driver.port.read8(CR) & (CR_RE | CR_TE), CR_RE | CR_TE);
	}

	#[test]
	fn transmit_marks_slot_busy_until_reclaimed() {
		let mut driver = bring_up();
		driver.transmit(&[1, 2, 3]).unwrap();
		assert!(driver.tx_in_use[0]);

		driver.port.write32(TSD0, TSD_TOK);
		driver.reclaim_tx();
		assert!(!driver.tx_in_use[0]);
	}

	#[test]
	fn transmit_fails_when_all_slots_busy() {
		let mut driver = bring_up();
		for _ in 0..NIC_TX_SLOTS {
			driver.transmit(&[0xaa]).unwrap();
		}
		assert!(matches!(driver.transmit(&[0xaa]), Err(NetError::TryAgain)));
	}

	#[test]
	fn receive_strips_crc_and_advances_cursor() {
		let mut driver = bring_up();
		assert!(!driver.has_packet());

		let payload = [1u8, 2, 3, 4, 5];
		driver.test_inject_rx_frame(&payload);
		assert!(driver.has_packet());

		let frame = driver.receive().unwrap();
		assert_eq!(frame, payload);
	}

	#[test]
	fn receive_without_packet_would_block() {
		let mut driver = bring_up();
		assert!(matches!(driver.receive(), Err(NetError::WouldBlock)));
	}
}
