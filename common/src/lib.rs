//! Domain-agnostic building blocks shared by the chunklog crates.
//!
//! - [`clock`]: wall-clock abstraction with a controllable mock for tests.
//! - [`cx`]: cancellation and deadline context threaded through every call
//!   that may block.
//! - [`lru`]: a bounded, reference-counted cache used both as a handle cache
//!   and as an admission limiter.
//! - [`intervals`]: interval algebra over pluggable ordered domains.

pub mod clock;
pub mod cx;
pub mod intervals;
pub mod lru;

pub use clock::{Clock, MockClock, SystemClock};
pub use cx::{Cx, CxError};
pub use intervals::{Basis, Interval, OrdBasis};
pub use lru::{CacheError, Lease, ReleasableCache};
