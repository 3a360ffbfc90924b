// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Capital protection: rolling loss ledgers and the campaign circuit halt.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::warn;

use crate::application::engine::HaltDirective;
use crate::domain::config::GuardianConfig;
use crate::domain::entity::CampaignId;
use crate::domain::ledger::LossLedger;

/// Protector output for one tick.
pub struct ProtectionReport {
    pub directives: HashMap<CampaignId, HaltDirective>,
    /// Ledgers after this tick's interval losses, for the commit batch.
    pub ledgers: Vec<LossLedger>,
    /// Campaigns whose halt was asserted this tick (with windowed loss), for
    /// alerting.
    pub tripped: Vec<(CampaignId, i64)>,
}

pub struct CapitalProtector {
    window: chrono::Duration,
    absolute_limit_micros: i64,
    rate_limit_micros_per_hour: i64,
    acceptable_loss_per_interval_micros: i64,
}

impl CapitalProtector {
    pub fn new(config: &GuardianConfig) -> Self {
        Self {
            window: config.history_window_chrono(),
            absolute_limit_micros: config.absolute_loss_limit_micros,
            rate_limit_micros_per_hour: config.loss_rate_limit_micros_per_hour,
            acceptable_loss_per_interval_micros: config.acceptable_loss_per_interval_micros,
        }
    }

    /// Fold this tick's per-campaign interval losses into the ledgers and
    /// decide, per campaign, whether the circuit halt holds. The halt clears
    /// on its own once the rolling window advances past the triggering
    /// entries and recomputed loss is back under both limits.
    pub fn assess(
        &self,
        mut ledgers: HashMap<CampaignId, LossLedger>,
        interval_losses: &HashMap<CampaignId, i64>,
        previously_halted: impl Fn(&CampaignId) -> bool,
        now: DateTime<Utc>,
    ) -> ProtectionReport {
        let mut directives = HashMap::new();
        let mut tripped = Vec::new();

        let mut campaigns: Vec<&CampaignId> = interval_losses.keys().collect();
        for known in ledgers.keys() {
            if !interval_losses.contains_key(known) {
                campaigns.push(known);
            }
        }
        let campaigns: Vec<CampaignId> = campaigns.into_iter().cloned().collect();

        for campaign_id in campaigns {
            let ledger = ledgers
                .entry(campaign_id.clone())
                .or_insert_with(|| LossLedger::new(campaign_id.clone(), self.window));

            let net_loss = interval_losses.get(&campaign_id).copied().unwrap_or(0);
            let counted = net_loss - self.acceptable_loss_per_interval_micros;
            ledger.record(now, counted);
            ledger.advance(now);

            let breach = ledger.breach(
                now,
                self.absolute_limit_micros,
                self.rate_limit_micros_per_hour,
            );

            match breach {
                Some(kind) => {
                    let cumulative = ledger.cumulative_loss_micros();
                    if !previously_halted(&campaign_id) {
                        warn!(
                            campaign = %campaign_id,
                            cumulative_loss_micros = cumulative,
                            breach = ?kind,
                            "circuit halt asserted"
                        );
                        tripped.push((campaign_id.clone(), cumulative));
                    }
                    directives.insert(campaign_id, HaltDirective::Halt);
                }
                None => {
                    directives.insert(campaign_id, HaltDirective::Clear);
                }
            }
        }

        ProtectionReport {
            directives,
            ledgers: ledgers.into_values().collect(),
            tripped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::GuardianManifest;
    use chrono::TimeZone;

    fn config(absolute: i64, rate: i64) -> GuardianConfig {
        let mut spec = GuardianManifest::from_yaml_str(
            r#"
apiVersion: 100monkeys.ai/v1
kind: ProfitGuardian
metadata:
  name: test
spec:
  platform:
    endpoint: http://localhost:9000
    customer_id: "1"
"#,
        )
        .unwrap()
        .spec;
        spec.absolute_loss_limit_micros = absolute;
        spec.loss_rate_limit_micros_per_hour = rate;
        spec
    }

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, hour, min, 0).unwrap()
    }

    fn campaign() -> CampaignId {
        CampaignId::new("c-1")
    }

    #[test]
    fn halt_asserted_when_absolute_limit_exceeded() {
        let protector = CapitalProtector::new(&config(100_000_000, i64::MAX));
        let losses = HashMap::from([(campaign(), 120_000_000)]);

        let report = protector.assess(HashMap::new(), &losses, |_| false, at(10, 0));
        assert_eq!(report.directives[&campaign()], HaltDirective::Halt);
        assert_eq!(report.tripped.len(), 1);
        assert_eq!(report.tripped[0].1, 120_000_000);
    }

    #[test]
    fn halt_clears_once_window_rolls_past_losses() {
        let protector = CapitalProtector::new(&config(100_000_000, i64::MAX));

        let losses = HashMap::from([(campaign(), 120_000_000)]);
        let report = protector.assess(HashMap::new(), &losses, |_| false, at(10, 0));
        let ledgers: HashMap<CampaignId, LossLedger> = report
            .ledgers
            .into_iter()
            .map(|l| (l.campaign_id.clone(), l))
            .collect();

        // Twenty-five hours later the triggering entry is out of the 24h
        // window and no new loss arrived.
        let next_day = Utc.with_ymd_and_hms(2026, 3, 15, 11, 0, 0).unwrap();
        let report = protector.assess(ledgers, &HashMap::new(), |_| true, next_day);
        assert_eq!(report.directives[&campaign()], HaltDirective::Clear);
        assert!(report.tripped.is_empty());
    }

    #[test]
    fn acceptable_interval_loss_is_not_recorded() {
        let mut cfg = config(100_000_000, i64::MAX);
        cfg.acceptable_loss_per_interval_micros = 10_000_000;
        let protector = CapitalProtector::new(&cfg);

        let losses = HashMap::from([(campaign(), 8_000_000)]);
        let report = protector.assess(HashMap::new(), &losses, |_| false, at(10, 0));
        let ledger = &report.ledgers[0];
        assert_eq!(ledger.cumulative_loss_micros(), 0);
        assert_eq!(report.directives[&campaign()], HaltDirective::Clear);
    }

    #[test]
    fn rate_limit_breach_halts() {
        let protector = CapitalProtector::new(&config(i64::MAX, 60_000_000));
        let mut ledgers = HashMap::new();
        let losses = HashMap::from([(campaign(), 40_000_000)]);

        let report = protector.assess(std::mem::take(&mut ledgers), &losses, |_| false, at(9, 0));
        let ledgers: HashMap<CampaignId, LossLedger> = report
            .ledgers
            .into_iter()
            .map(|l| (l.campaign_id.clone(), l))
            .collect();

        // Another 40 half an hour later: 80 lost over 30 minutes.
        let report = protector.assess(ledgers, &losses, |_| false, at(9, 30));
        assert_eq!(report.directives[&campaign()], HaltDirective::Halt);
    }

    #[test]
    fn already_halted_campaign_does_not_retrip_alert() {
        let protector = CapitalProtector::new(&config(100_000_000, i64::MAX));
        let losses = HashMap::from([(campaign(), 120_000_000)]);

        let report = protector.assess(HashMap::new(), &losses, |_| true, at(10, 0));
        assert_eq!(report.directives[&campaign()], HaltDirective::Halt);
        assert!(report.tripped.is_empty());
    }

    #[test]
    fn profitable_interval_never_halts() {
        let protector = CapitalProtector::new(&config(100_000_000, 60_000_000));
        let losses = HashMap::from([(campaign(), -50_000_000)]);

        let report = protector.assess(HashMap::new(), &losses, |_| false, at(10, 0));
        assert_eq!(report.directives[&campaign()], HaltDirective::Clear);
    }
}
