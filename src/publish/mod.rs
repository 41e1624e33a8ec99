//! Outbound publishing
//!
//! - `Transport`: broker connection (HTTP bridge, or in-memory for tests)
//! - `PublishCoordinator`: live delivery with fallback to the durable queue
//! - `ConnectionTracker`: connection state transitions and status events

mod coordinator;
mod status;
mod transport;

pub use coordinator::*;
pub use status::*;
pub use transport::*;
