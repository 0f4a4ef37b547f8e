//! Temporal matching
//!
//! Raw measurements are rarely taken at the same instant, so a derived value
//! for a date pairs that date with the "companion" sample of each other raw
//! metric that is nearest in time.
//!
//! Rules:
//! 1. Prefer samples within ±window of the target (inclusive both ends) and
//!    return the nearest of them.
//! 2. If none fall inside the window, fall back to the nearest sample in the
//!    whole series, however far away. This fallback is lossy; the returned
//!    `Companion` carries the matched timestamp, distance and `in_window`
//!    flag so callers can judge how much to trust it.
//!
//! Ties at equal distance resolve to the earliest timestamp. Among samples
//! sharing the same timestamp, the one later in series order (most recently
//! appended) wins.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::Sample;

/// Default half-width of the preferred matching window in hours
pub const DEFAULT_MATCH_WINDOW_HOURS: i64 = 24;

/// A raw sample selected to pair with a target date
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Companion {
    pub value: f64,
    /// Timestamp of the matched sample
    pub timestamp: DateTime<Utc>,
    /// Absolute distance to the target, in seconds
    pub distance_secs: i64,
    /// Whether the match came from inside the preferred window
    pub in_window: bool,
}

impl Companion {
    pub fn distance(&self) -> Duration {
        Duration::seconds(self.distance_secs)
    }

    /// True when the sample sits exactly on the target
    pub fn is_exact(&self) -> bool {
        self.distance_secs == 0
    }
}

fn abs_distance(a: DateTime<Utc>, b: DateTime<Utc>) -> Duration {
    if a >= b {
        a - b
    } else {
        b - a
    }
}

/// Nearest sample to `target` among `candidates` using the tie-break rules above
fn nearest<'a, I>(candidates: I, target: DateTime<Utc>) -> Option<(&'a Sample, Duration)>
where
    I: IntoIterator<Item = &'a Sample>,
{
    let mut best: Option<(&Sample, Duration)> = None;

    for sample in candidates {
        let distance = abs_distance(sample.timestamp, target);
        let replace = match best {
            None => true,
            Some((current, current_distance)) => {
                distance < current_distance
                    || (distance == current_distance && sample.timestamp <= current.timestamp)
            }
        };
        if replace {
            best = Some((sample, distance));
        }
    }

    best
}

/// Find the companion value for `target` in a single metric's series.
///
/// Returns `None` only when the series is empty.
pub fn find_companion(series: &[Sample], target: DateTime<Utc>, window: Duration) -> Option<Companion> {
    if series.is_empty() {
        return None;
    }

    let in_window = nearest(
        series
            .iter()
            .filter(|s| abs_distance(s.timestamp, target) <= window),
        target,
    );

    let (sample, distance, within) = match in_window {
        Some((sample, distance)) => (sample, distance, true),
        None => {
            let (sample, distance) = nearest(series, target)?;
            (sample, distance, false)
        }
    };

    Some(Companion {
        value: sample.value,
        timestamp: sample.timestamp,
        distance_secs: distance.num_seconds(),
        in_window: within,
    })
}
