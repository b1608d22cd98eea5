#![allow(dead_code)]

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::Sync;
use core::ops::{Deref, DerefMut, Drop};
use core::sync::atomic::{AtomicUsize, Ordering};

use crossbeam_utils::{Backoff, CachePadded};

/// A mutual-exclusion lock based on busy waiting.
///
/// # Description
///
/// This structure behaves a lot like a normal mutex. There are some differences:
///
/// - By using busy waiting, it can be used without relying on a scheduler.
/// - It is a so called ticket lock (<https://en.wikipedia.org/wiki/Ticket_lock>)
///   and completely fair.
///
/// Every table in spec §5's lock table (reassembly, routing, raw-socket, UCB
/// list, per-socket, per-object refcount) is guarded by one of these.
///
/// # Examples
///
/// ```
/// use ctos_net::synch::Spinlock;
///
/// let spinlock = Spinlock::new(0);
///
/// {
///     let mut data = spinlock.lock();
///     *data = 2;
/// }
///
/// assert_eq!(*spinlock.lock(), 2);
/// ```
pub struct Spinlock<T: ?Sized> {
	queue: CachePadded<AtomicUsize>,
	dequeue: CachePadded<AtomicUsize>,
	data: UnsafeCell<T>,
}

/// A guard through which the protected data can be accessed.
///
/// When the guard falls out of scope it releases the lock.
pub struct SpinlockGuard<'a, T: ?Sized> {
	dequeue: &'a CachePadded<AtomicUsize>,
	ticket: usize,
	data: &'a mut T,
}

// Same unsafe impls as the teacher's `Spinlock`.
unsafe impl<T: ?Sized + Send> Sync for Spinlock<T> {}
unsafe impl<T: ?Sized + Send> Send for Spinlock<T> {}

impl<T> Spinlock<T> {
	pub const fn new(user_data: T) -> Spinlock<T> {
		Spinlock {
			queue: CachePadded::new(AtomicUsize::new(0)),
			dequeue: CachePadded::new(AtomicUsize::new(1)),
			data: UnsafeCell::new(user_data),
		}
	}

	/// Consumes this lock, returning the underlying data.
	pub fn into_inner(self) -> T {
		// We know statically that there are no outstanding references to
		// `self` so there's no need to lock.
		let Spinlock { data, .. } = self;
		data.into_inner()
	}
}

impl<T: ?Sized> Spinlock<T> {
	pub fn lock(&self) -> SpinlockGuard<'_, T> {
		let backoff = Backoff::new();
		let ticket = self.queue.fetch_add(1, Ordering::Relaxed) + 1;

		while self.dequeue.load(Ordering::Acquire) != ticket {
			backoff.spin();
		}

		SpinlockGuard {
			dequeue: &self.dequeue,
			ticket,
			data: unsafe { &mut *self.data.get() },
		}
	}

	pub fn try_lock(&self) -> Result<SpinlockGuard<'_, T>, ()> {
		self.queue
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |ticket| {
				if self.dequeue.load(Ordering::Acquire) == ticket + 1 {
					Some(ticket + 1)
				} else {
					None
				}
			})
			.map(|ticket| SpinlockGuard {
				dequeue: &self.dequeue,
				ticket: ticket + 1,
				data: unsafe { &mut *self.data.get() },
			})
			.map_err(|_| {})
	}
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Spinlock<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "queue: {} ", self.queue.load(Ordering::Relaxed))?;
		write!(f, "dequeue: {}", self.dequeue.load(Ordering::Relaxed))
	}
}

impl<T: ?Sized + Default> Default for Spinlock<T> {
	fn default() -> Spinlock<T> {
		Spinlock::new(Default::default())
	}
}

impl<'a, T: ?Sized> Deref for SpinlockGuard<'a, T> {
	type Target = T;
	fn deref(&self) -> &T {
		self.data
	}
}

impl<'a, T: ?Sized> DerefMut for SpinlockGuard<'a, T> {
	fn deref_mut(&mut self) -> &mut T {
		self.data
	}
}

impl<'a, T: ?Sized> Drop for SpinlockGuard<'a, T> {
	/// Dropping the guard releases the lock it was created from.
	fn drop(&mut self) {
		self.dequeue.store(self.ticket + 1, Ordering::Release);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::Arc;
	use std::thread;

	#[test]
	fn mutual_exclusion() {
		let lock = Arc::new(Spinlock::new(0usize));
		let mut handles = Vec::new();
		for _ in 0..8 {
			let lock = Arc::clone(&lock);
			handles.push(thread::spawn(move || {
				for _ in 0..1000 {
					*lock.lock() += 1;
				}
			}));
		}
		for h in handles {
			h.join().unwrap();
		}
		assert_eq!(*lock.lock(), 8000);
	}

	#[test]
	fn try_lock_fails_while_held() {
		let lock = Spinlock::new(5);
		let guard = lock.lock();
		assert!(lock.try_lock().is_err());
		drop(guard);
		assert!(lock.try_lock().is_ok());
	}
}
