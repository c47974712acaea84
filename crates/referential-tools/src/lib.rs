//! Allocator data structures for the gcsreferential provider.
//!
//! Two pure, in-memory structures live here:
//!
//! - [`IdPool`]: a contiguous integer range with named reservations and a
//!   derived free set. The free set is never persisted; it is rebuilt from
//!   the reserved members after deserialization (see [`IdPool::reconcile`]).
//! - [`CidrCalculator`]: packs non-overlapping subnets of a requested prefix
//!   length into a base CIDR, lowest network address first.
//!
//! Neither structure performs any I/O; callers are responsible for locking
//! and persistence.

pub mod cidr_calculator;
pub mod id_pool;

pub use cidr_calculator::{CidrCalculator, CidrError};
pub use id_pool::{Id, IdPool, PoolError};
