//! Error taxonomy shared by every layer of the networking core.
//!
//! Named by meaning (see spec §7), not by the POSIX errno constants in
//! [`crate::errno`] — those are only consulted at the very edge, by
//! [`NetError::to_errno`], for whatever syscall layer eventually wraps this
//! core.

use core::fmt;

use crate::errno;

/// Error taxonomy used across the IPv4 core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum NetError {
	/// No message buffer, no reassembly slot, no free routing entry, no free
	/// raw-socket slot.
	#[error("out of resources: {0}")]
	OutOfResources(Resource),
	/// Driver TX window full, or a work handler needs ARP resolution.
	#[error("try again")]
	TryAgain,
	/// Bad address length, wrong family, already-bound socket bound again,
	/// forbidden wildcard.
	#[error("invalid argument")]
	InvalidArgument,
	/// No route found.
	#[error("network unreachable")]
	NetworkUnreachable,
	/// DF set but fragmentation was required.
	#[error("message too big")]
	MessageTooBig,
	/// `sendto` with `addr = NULL` on an unconnected socket.
	#[error("not connected")]
	NotConnected,
	/// `sendto` with a non-null `addr` on an already-connected socket.
	#[error("already connected")]
	AlreadyConnected,
	/// `(address, port)` already bound by another socket.
	#[error("address in use")]
	AddressInUse,
	/// Driver rejected with no recoverable remedy, or an unrecognized ethertype.
	#[error("i/o failure")]
	IoFailure,
	/// The RX queue is temporarily empty (`recvfrom` would block).
	#[error("would block")]
	WouldBlock,
}

/// Which table was exhausted when [`NetError::OutOfResources`] is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
	MsgBuffer,
	ReassemblySlot,
	RoutingEntry,
	RawSocketSlot,
	NicSlot,
}

impl fmt::Display for Resource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			Resource::MsgBuffer => "message buffer",
			Resource::ReassemblySlot => "reassembly slot",
			Resource::RoutingEntry => "routing entry",
			Resource::RawSocketSlot => "raw socket slot",
			Resource::NicSlot => "NIC name slot",
		};
		f.write_str(s)
	}
}

impl NetError {
	/// Maps onto the POSIX-style errno a syscall-facing layer would report.
	pub fn to_errno(self) -> i32 {
		match self {
			NetError::OutOfResources(Resource::MsgBuffer) => -errno::ENOMEM,
			NetError::OutOfResources(_) => -errno::ENOBUFS,
			NetError::TryAgain => -errno::EAGAIN,
			NetError::InvalidArgument => -errno::EINVAL,
			NetError::NetworkUnreachable => -errno::ENETUNREACH,
			NetError::MessageTooBig => -errno::EMSGSIZE,
			NetError::NotConnected => -errno::ENOTCONN,
			NetError::AlreadyConnected => -errno::EISCONN,
			NetError::AddressInUse => -errno::EADDRINUSE,
			NetError::IoFailure => -errno::EIO,
			NetError::WouldBlock => -errno::EWOULDBLOCK,
		}
	}
}

pub type NetResult<T> = Result<T, NetError>;
