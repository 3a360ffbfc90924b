// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::entity::CampaignId;

/// One recorded interval loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub at: DateTime<Utc>,
    pub loss_micros: i64,
}

/// Which limit a ledger breached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossBreach {
    AbsoluteLimit,
    RateLimit,
}

/// Rolling-window loss ledger for one campaign.
///
/// Entries older than the window fall off the front as time advances;
/// cumulative loss is monotone within a window. The ledger never records
/// negative entries — profitable intervals do not pay back recorded losses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LossLedger {
    pub campaign_id: CampaignId,
    pub window_secs: i64,
    pub entries: Vec<LedgerEntry>,
}

impl LossLedger {
    pub fn new(campaign_id: CampaignId, window: Duration) -> Self {
        Self {
            campaign_id,
            window_secs: window.num_seconds(),
            entries: Vec::new(),
        }
    }

    fn window(&self) -> Duration {
        Duration::seconds(self.window_secs)
    }

    /// Drop entries that have rolled out of the window ending at `now`.
    pub fn advance(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.window();
        self.entries.retain(|e| e.at > cutoff);
    }

    /// Record an interval loss. Non-positive losses are ignored.
    pub fn record(&mut self, at: DateTime<Utc>, loss_micros: i64) {
        self.advance(at);
        if loss_micros > 0 {
            self.entries.push(LedgerEntry { at, loss_micros });
        }
    }

    pub fn cumulative_loss_micros(&self) -> i64 {
        self.entries.iter().map(|e| e.loss_micros).sum()
    }

    /// Start of the populated part of the window, i.e. the oldest entry
    /// still inside it.
    pub fn window_start(&self) -> Option<DateTime<Utc>> {
        self.entries.first().map(|e| e.at)
    }

    /// Loss per elapsed hour between the oldest in-window entry and `now`.
    /// Spans shorter than an hour are treated as one hour so a single entry
    /// cannot produce an unbounded rate.
    pub fn loss_rate_per_hour(&self, now: DateTime<Utc>) -> f64 {
        let Some(start) = self.window_start() else {
            return 0.0;
        };
        let elapsed_secs = (now - start).num_seconds().max(3600) as f64;
        self.cumulative_loss_micros() as f64 * 3600.0 / elapsed_secs
    }

    /// Check the ledger against the configured limits. Callers advance the
    /// window first. Returns the first breached limit, absolute before rate.
    pub fn breach(
        &self,
        now: DateTime<Utc>,
        absolute_limit_micros: i64,
        rate_limit_micros_per_hour: i64,
    ) -> Option<LossBreach> {
        if self.cumulative_loss_micros() > absolute_limit_micros {
            return Some(LossBreach::AbsoluteLimit);
        }
        if self.loss_rate_per_hour(now) > rate_limit_micros_per_hour as f64 {
            return Some(LossBreach::RateLimit);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, min, 0).unwrap()
    }

    #[test]
    fn losses_accumulate_within_window() {
        let mut ledger = LossLedger::new(CampaignId::new("c1"), Duration::hours(24));
        ledger.record(at(9, 0), 40_000_000);
        ledger.record(at(10, 0), 80_000_000);
        assert_eq!(ledger.cumulative_loss_micros(), 120_000_000);
        assert_eq!(
            ledger.breach(at(10, 0), 100_000_000, i64::MAX),
            Some(LossBreach::AbsoluteLimit)
        );
    }

    #[test]
    fn entries_roll_out_of_window() {
        let mut ledger = LossLedger::new(CampaignId::new("c1"), Duration::hours(2));
        ledger.record(at(8, 0), 90_000_000);
        ledger.record(at(11, 0), 30_000_000);
        // The 08:00 entry is outside the 2h window ending 11:00.
        assert_eq!(ledger.cumulative_loss_micros(), 30_000_000);
        assert_eq!(ledger.breach(at(11, 0), 100_000_000, i64::MAX), None);
    }

    #[test]
    fn profitable_intervals_do_not_pay_back() {
        let mut ledger = LossLedger::new(CampaignId::new("c1"), Duration::hours(24));
        ledger.record(at(9, 0), 50_000_000);
        ledger.record(at(10, 0), -200_000_000);
        assert_eq!(ledger.cumulative_loss_micros(), 50_000_000);
    }

    #[test]
    fn rate_breach_on_fast_losses() {
        let mut ledger = LossLedger::new(CampaignId::new("c1"), Duration::hours(24));
        ledger.record(at(9, 0), 30_000_000);
        ledger.record(at(9, 30), 30_000_000);
        // 60 over half an hour, floored to a one-hour span: 60 per hour.
        assert_eq!(
            ledger.breach(at(9, 30), i64::MAX, 50_000_000),
            Some(LossBreach::RateLimit)
        );
        assert_eq!(ledger.breach(at(9, 30), i64::MAX, 70_000_000), None);
    }

    #[test]
    fn empty_ledger_never_breaches() {
        let ledger = LossLedger::new(CampaignId::new("c1"), Duration::hours(24));
        assert_eq!(ledger.breach(at(9, 0), 0, 0), None);
        assert_eq!(ledger.loss_rate_per_hour(at(9, 0)), 0.0);
    }
}
