use serde::{Deserialize, Serialize};

/// A single traffic log record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficEntry {
    pub id: uuid::Uuid,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: TrafficEventType,
    pub source: TrafficSource,
    /// `mobile` for client-originated traffic, `server` for upstream traffic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    pub details: serde_json::Value,
}

impl TrafficEntry {
    /// Create a new `TrafficEntry` with an auto-generated UUID v4 and the
    /// current UTC timestamp.
    pub fn new(
        event_type: TrafficEventType,
        source: TrafficSource,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            timestamp: chrono::Utc::now(),
            event_type,
            source,
            direction: None,
            details,
        }
    }

    /// Tag the entry with the direction of the message it describes.
    pub fn with_direction(mut self, direction: impl Into<String>) -> Self {
        self.direction = Some(direction.into());
        self
    }
}

/// The category of traffic event being recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficEventType {
    SessionOpened,
    SessionClosed,
    UpstreamFailed,
    MessageRelayed,
    IdentitySubstituted,
    ProcessStarted,
    ProcessStopped,
}

/// Identifies the component and the session an entry belongs to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficSource {
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl TrafficSource {
    /// Convenience constructor that only requires the component name.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            remote_addr: None,
            session_id: None,
        }
    }
}
