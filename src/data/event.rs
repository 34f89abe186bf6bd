use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single demand event, e.g. a ride request at a pickup location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub longitude: f64,
    pub latitude: f64,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(longitude: f64, latitude: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            longitude,
            latitude,
            timestamp,
        }
    }

    /// Returns the `(lon, lat)` location of the event.
    pub fn location(&self) -> (f64, f64) {
        (self.longitude, self.latitude)
    }
}
