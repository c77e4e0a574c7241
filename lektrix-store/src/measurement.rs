//! The single row type stored by lektrix.

use serde::{Deserialize, Serialize};

/// Seconds since the Unix epoch. Primary key of the store.
pub type Timestamp = i64;

/// One sample of the monitored signal.
///
/// At most one measurement exists per distinct second; the timestamp is both
/// the key and the ordering.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub timestamp: Timestamp,
    pub value: f64,
}

impl Measurement {
    pub fn new(timestamp: Timestamp, value: f64) -> Self {
        Self { timestamp, value }
    }
}
