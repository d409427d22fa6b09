/// Electrical phase of a current reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    R,
    T,
}

impl Phase {
    /// Label value used in exported metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::R => "r",
            Phase::T => "t",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single decoded measurement from the meter.
///
/// Readings are transient: each successful scrape produces a fresh set that
/// replaces the previous value for the same key.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// Instantaneous power in watts.
    PowerWatts(f64),
    /// Instantaneous current in amperes for one phase.
    CurrentAmperes { phase: Phase, value: f64 },
}

impl Reading {
    /// Numeric value carried by the reading.
    pub fn value(&self) -> f64 {
        match self {
            Reading::PowerWatts(v) => *v,
            Reading::CurrentAmperes { value, .. } => *value,
        }
    }
}

/// Current Unix timestamp in seconds, with sub-second precision.
pub fn current_timestamp_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}
