//! skywatch-core: Pure detection algorithms for the overhead-aircraft watcher.
//!
//! No async, no network I/O. State vectors in, ranged tracks and arrivals
//! out. The `skywatch-server` crate owns the feed client, scheduling, and
//! alert delivery.

pub mod config;
pub mod enrich;
pub mod geo;
pub mod membership;
pub mod position;
pub mod state_vector;
pub mod throttle;
pub mod types;

// Re-export commonly used types at crate root
pub use geo::{query_boxes, BoundingBox, Coordinate, GeoPartition};
pub use membership::ChangeTracker;
pub use position::{PositionFix, PositionSource, TickMode};
pub use state_vector::{decode_payload, parse, FeedPayload, RawValue};
pub use throttle::{Gate, ThrottleGuard};
pub use types::*;
