// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Platform identifier of a managed entity (campaign, ad group or keyword
/// criterion). The platform hands these out as opaque numeric strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the campaign an entity rolls up to. For campaign-kind
/// entities this equals their own [`EntityId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CampaignId(pub String);

impl CampaignId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CampaignId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of entity under guardianship. All kinds share the same evaluation
/// contract; the kind only matters for rollup and operator reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Campaign,
    AdGroup,
    Keyword,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Campaign => "campaign",
            EntityKind::AdGroup => "ad_group",
            EntityKind::Keyword => "keyword",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "campaign" => Some(EntityKind::Campaign),
            "ad_group" => Some(EntityKind::AdGroup),
            "keyword" => Some(EntityKind::Keyword),
            _ => None,
        }
    }
}

/// An entity registered for guardianship.
///
/// Immutable except for `daily_budget_micros`, which an operator may adjust
/// between ticks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagedEntity {
    pub id: EntityId,
    pub kind: EntityKind,
    pub campaign_id: CampaignId,
    /// Daily budget target in platform micros (1_000_000 micros = 1 unit of
    /// account currency).
    pub daily_budget_micros: i64,
    pub created_at: DateTime<Utc>,
}

impl ManagedEntity {
    pub fn new(
        id: EntityId,
        kind: EntityKind,
        campaign_id: CampaignId,
        daily_budget_micros: i64,
    ) -> Self {
        Self {
            id,
            kind,
            campaign_id,
            daily_budget_micros,
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle state of a managed entity, owned exclusively by the decision
/// engine. `ManuallyPaused` is entered and exited only by an operator; the
/// engine observes it but never transitions it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityLifecycleState {
    Active,
    GuardianPaused,
    ManuallyPaused,
    CircuitHalted,
}

impl EntityLifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityLifecycleState::Active => "ACTIVE",
            EntityLifecycleState::GuardianPaused => "GUARDIAN_PAUSED",
            EntityLifecycleState::ManuallyPaused => "MANUALLY_PAUSED",
            EntityLifecycleState::CircuitHalted => "CIRCUIT_HALTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(EntityLifecycleState::Active),
            "GUARDIAN_PAUSED" => Some(EntityLifecycleState::GuardianPaused),
            "MANUALLY_PAUSED" => Some(EntityLifecycleState::ManuallyPaused),
            "CIRCUIT_HALTED" => Some(EntityLifecycleState::CircuitHalted),
            _ => None,
        }
    }

    /// Whether the entity is serving traffic on the platform in this state.
    pub fn is_serving(&self) -> bool {
        matches!(self, EntityLifecycleState::Active)
    }
}
