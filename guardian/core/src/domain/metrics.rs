// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entity::EntityId;

/// Reporting window for a metrics fetch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReportingWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ReportingWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Window ending at `end` and reaching `length` into the past.
    pub fn trailing(end: DateTime<Utc>, length: Duration) -> Self {
        Self {
            start: end - length,
            end,
        }
    }

    /// Fraction of the calendar day (UTC) elapsed at the window end, in
    /// `[0.0, 1.0)`. Used as the pacing denominator.
    pub fn elapsed_day_fraction(&self) -> f64 {
        let seconds = self.end.num_seconds_from_midnight() as f64;
        seconds / 86_400.0
    }
}

/// One fetch result for one entity at one tick timestamp. Spend and counter
/// fields are day-cumulative, exactly as the platform reports them; interval
/// deltas are derived downstream. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub entity_id: EntityId,
    pub captured_at: DateTime<Utc>,
    pub spend_micros: i64,
    pub conversions: f64,
    pub conversion_value_micros: i64,
    pub clicks: u64,
    pub impressions: u64,
    /// Fraction of the day elapsed when the snapshot was taken.
    pub elapsed_day_fraction: f64,
}

impl MetricsSnapshot {
    /// Whether the platform attributed any conversion value in this snapshot.
    pub fn has_value_data(&self) -> bool {
        self.conversion_value_micros > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn elapsed_day_fraction_at_noon_is_half() {
        let end = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let window = ReportingWindow::trailing(end, Duration::hours(24));
        assert!((window.elapsed_day_fraction() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn trailing_window_spans_requested_length() {
        let end = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();
        let window = ReportingWindow::trailing(end, Duration::hours(6));
        assert_eq!(window.end - window.start, Duration::hours(6));
    }
}
