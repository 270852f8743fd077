//! Per-call cost accounting.
//!
//! `CostRecord`s are append-only and never mutated; the ledger's total is
//! the authoritative value for `Session.total_cost`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::agent::{MemberId, Role};
use crate::config::PricingConfig;

/// Provider usage for one call, in provider-reported units (tokens for the
/// usual backends).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_units: u64,
    pub output_units: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub id: String,
    pub member: MemberId,
    pub model: String,
    pub usage: Usage,
    pub cost: f64,
    pub at: DateTime<Utc>,
}

/// Dollar rates per 1 000 units for one model label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRates {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

/// Append-only cost sink with a pricing table.
///
/// Unknown model labels record zero cost rather than guessing a
/// cross-provider rate; the miss is logged once per call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostLedger {
    rates: BTreeMap<String, ModelRates>,
    records: Vec<CostRecord>,
}

impl CostLedger {
    pub fn new(pricing: &PricingConfig) -> Self {
        Self {
            rates: pricing.models.clone(),
            records: Vec::new(),
        }
    }

    pub fn record(&mut self, member: MemberId, model: &str, usage: Usage) -> CostRecord {
        let cost = match self.rates.get(model) {
            Some(rates) => {
                (usage.input_units as f64 / 1000.0) * rates.input_per_1k
                    + (usage.output_units as f64 / 1000.0) * rates.output_per_1k
            }
            None => {
                warn!(model, "No pricing configured for model, recording zero cost");
                0.0
            }
        };
        let record = CostRecord {
            id: format!("cr-{}", Uuid::new_v4()),
            member,
            model: model.to_string(),
            usage,
            cost,
            at: Utc::now(),
        };
        self.records.push(record.clone());
        record
    }

    pub fn records(&self) -> &[CostRecord] {
        &self.records
    }

    pub fn total(&self) -> f64 {
        self.records.iter().map(|r| r.cost).sum()
    }

    pub fn total_for_role(&self, role: Role) -> f64 {
        self.records
            .iter()
            .filter(|r| r.member.role == role)
            .map(|r| r.cost)
            .sum()
    }

    /// Per-role totals for the final report.
    pub fn breakdown(&self) -> BTreeMap<Role, f64> {
        let mut out = BTreeMap::new();
        for r in &self.records {
            *out.entry(r.member.role).or_insert(0.0) += r.cost;
        }
        out
    }
}
