//! Append-only structured JSON-lines traffic logging for the SUPL proxy.
//!
//! Every relayed message and session lifecycle event is serialised as a
//! single newline-terminated JSON object. The active file is rotated to
//! `path.1`, `path.2`, … once it reaches the configured size.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use traffic_log::{RotationPolicy, TrafficEntry, TrafficEventType, TrafficSink, TrafficSource};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (sink, _handle) =
//!     TrafficSink::start("/var/log/supl-proxy/traffic.jsonl", RotationPolicy::default()).await?;
//!
//! sink.log(TrafficEntry::new(
//!     TrafficEventType::ProcessStarted,
//!     TrafficSource::new("supl-proxy"),
//!     serde_json::json!({"version": "0.1.0"}),
//! ))
//! .await;
//! # Ok(())
//! # }
//! ```

pub mod entry;
pub mod sink;
pub mod writer;

pub use entry::{TrafficEntry, TrafficEventType, TrafficSource};
pub use sink::TrafficSink;
pub use writer::{RotationPolicy, TrafficWriteError, TrafficWriter};
