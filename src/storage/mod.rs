//! Local persistence
//!
//! The node keeps no history of its own; the only on-disk state is the
//! outbound queue that buffers telemetry across broker outages.

mod outbound_queue;

pub use outbound_queue::{BufferedMessage, DurableOutboundQueue, QueueError, DEFAULT_MAX_MESSAGES};
