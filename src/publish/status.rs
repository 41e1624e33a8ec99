//! Connection state tracking and status event broadcast

use std::sync::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::types::{ConnectionState, StatusEvent};

/// Buffered status events per subscriber before lagging
pub const STATUS_CHANNEL_CAPACITY: usize = 256;

pub fn status_channel() -> broadcast::Sender<StatusEvent> {
    let (tx, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
    tx
}

/// Broadcast an event; having no subscribers is not an error
pub fn emit(events: &broadcast::Sender<StatusEvent>, event: StatusEvent) {
    let _ = events.send(event);
}

/// Current connection state, emitting `ConnectionChanged` on transitions only
#[derive(Debug)]
pub struct ConnectionTracker {
    state: Mutex<ConnectionState>,
    events: broadcast::Sender<StatusEvent>,
}

impl ConnectionTracker {
    pub fn new(events: broadcast::Sender<StatusEvent>) -> Self {
        Self {
            state: Mutex::new(ConnectionState::Disconnected),
            events,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Returns true when the state actually changed
    pub fn set(&self, next: ConnectionState) -> bool {
        let previous = {
            let mut state = self
                .state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *state, next)
        };

        if previous == next {
            return false;
        }

        match next {
            ConnectionState::Disconnected => {
                warn!(from = %previous, "Broker connection lost")
            }
            _ => info!(from = %previous, to = %next, "Connection state changed"),
        }
        emit(&self.events, StatusEvent::ConnectionChanged { state: next });
        true
    }

    pub fn report_error(&self, detail: impl Into<String>) {
        emit(
            &self.events,
            StatusEvent::ConnectionError {
                detail: detail.into(),
            },
        );
    }

    pub fn events(&self) -> &broadcast::Sender<StatusEvent> {
        &self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_events_only_on_change() {
        let events = status_channel();
        let mut rx = events.subscribe();
        let tracker = ConnectionTracker::new(events);

        assert!(!tracker.set(ConnectionState::Disconnected));
        assert!(tracker.set(ConnectionState::Connecting));
        assert!(tracker.set(ConnectionState::Connected));
        assert!(!tracker.set(ConnectionState::Connected));

        assert_eq!(
            rx.try_recv().unwrap(),
            StatusEvent::ConnectionChanged {
                state: ConnectionState::Connecting
            }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            StatusEvent::ConnectionChanged {
                state: ConnectionState::Connected
            }
        );
        assert!(rx.try_recv().is_err());
    }
}
