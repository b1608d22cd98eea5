//! Synchronization primitives used by the networking core.
//!
//! The kernel's own spinlock, semaphore and condition variable are
//! collaborators per spec §1 ("consumed as primitives but not specified here
//! beyond their contracts"); this module only keeps the one primitive the
//! core's lock table (spec §5) actually needs implemented: a mutual-exclusion
//! spinlock matching the teacher's `synch::Spinlock`.

pub mod spinlock;

pub use spinlock::Spinlock;
