//! Change notification for drive media.
//!
//! Every committed swap or eject and every failed mutation is published on an
//! [`EventBus`]. Subscribers filter by event type, e.g. `"media.*"` or
//! `"media.failed"`.

use crate::error::Notice;
use crate::types::MediaLocation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Maximum number of events buffered in the broadcast channel.
const EVENT_BUFFER_SIZE: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaEventType {
    Changed,
    Ejected,
    Failed,
}

impl MediaEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaEventType::Changed => "media.changed",
            MediaEventType::Ejected => "media.ejected",
            MediaEventType::Failed => "media.failed",
        }
    }
}

impl std::fmt::Display for MediaEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: MediaEventType,
    pub vm_name: String,
    pub drive_id: String,
    /// Binding after the event; for failures, the location that was requested.
    pub location: Option<MediaLocation>,
    /// Drive table version after the event. Failures leave it unchanged.
    pub version: u64,
    pub notice: Option<Notice>,
}

impl MediaEvent {
    pub fn changed(vm_name: &str, drive_id: &str, location: MediaLocation, version: u64) -> Self {
        Self::new(MediaEventType::Changed, vm_name, drive_id, Some(location), version)
    }

    pub fn ejected(vm_name: &str, drive_id: &str, version: u64) -> Self {
        Self::new(MediaEventType::Ejected, vm_name, drive_id, None, version)
    }

    pub fn failed(
        vm_name: &str,
        drive_id: &str,
        requested: Option<MediaLocation>,
        version: u64,
        notice: Notice,
    ) -> Self {
        Self {
            notice: Some(notice),
            ..Self::new(MediaEventType::Failed, vm_name, drive_id, requested, version)
        }
    }

    fn new(
        event_type: MediaEventType,
        vm_name: &str,
        drive_id: &str,
        location: Option<MediaLocation>,
        version: u64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            vm_name: vm_name.to_string(),
            drive_id: drive_id.to_string(),
            location,
            version,
            notice: None,
        }
    }
}

/// Publish/subscribe hub for [`MediaEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MediaEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self { sender }
    }

    pub fn publish(&self, event: MediaEvent) {
        debug!(event_type = %event.event_type, drive_id = %event.drive_id, "Publishing media event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events matching any of `filters`. An empty list matches
    /// everything; `"media.*"` matches every media event.
    pub fn subscribe(&self, filters: Vec<String>) -> EventSubscriber {
        EventSubscriber {
            receiver: self.sender.subscribe(),
            filters,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EventSubscriber {
    receiver: broadcast::Receiver<MediaEvent>,
    filters: Vec<String>,
}

impl EventSubscriber {
    /// Next matching event, or `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<MediaEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    debug!("Media event subscriber lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn matches(&self, event: &MediaEvent) -> bool {
        if self.filters.is_empty() {
            return true;
        }

        let event_type = event.event_type.as_str();
        self.filters.iter().any(|filter| {
            filter == event_type
                || filter
                    .strip_suffix(".*")
                    .is_some_and(|prefix| event_type.starts_with(prefix))
        })
    }
}
