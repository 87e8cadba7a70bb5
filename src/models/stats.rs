use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::usage_record::{round_cost, ModelClass};

/// Aggregate statistics over a filtered (unpaginated) record set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregateStats {
    pub total_tokens: u64,
    pub total_cost: f64,
    pub total_requests: u64,
    pub average_tokens: f64,
    pub success_count: u64,
    /// Percentage in [0, 100]; 100 on an empty set
    pub success_rate: f64,
    pub avg_response_time_ms: f64,
    pub paid_requests: u64,
    pub free_requests: u64,
    pub paid_tokens: u64,
    pub free_tokens: u64,
    pub model_distribution: BTreeMap<String, u64>,
    pub provider_distribution: BTreeMap<String, u64>,
    /// First and last day with matching records, `N/A` when none match
    pub date_range: String,
}

impl AggregateStats {
    pub fn empty() -> Self {
        Self {
            total_tokens: 0,
            total_cost: 0.0,
            total_requests: 0,
            average_tokens: 0.0,
            success_count: 0,
            success_rate: 100.0,
            avg_response_time_ms: 0.0,
            paid_requests: 0,
            free_requests: 0,
            paid_tokens: 0,
            free_tokens: 0,
            model_distribution: BTreeMap::new(),
            provider_distribution: BTreeMap::new(),
            date_range: "N/A".to_string(),
        }
    }
}

/// Raw totals as returned by a backend, before derived fields are computed
#[derive(Debug, Clone, Default)]
pub struct AggregateTotals {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub success_count: u64,
    pub avg_response_time_ms: Option<f64>,
    pub paid_requests: u64,
    pub free_requests: u64,
    pub paid_tokens: u64,
    pub free_tokens: u64,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl AggregateTotals {
    /// Combine backend totals with distributions into the public shape.
    ///
    /// Both backends go through here so derived fields match exactly.
    pub fn finish(
        self,
        model_distribution: BTreeMap<String, u64>,
        provider_distribution: BTreeMap<String, u64>,
    ) -> AggregateStats {
        if self.total_requests == 0 {
            return AggregateStats::empty();
        }

        let date_range = match (self.first_seen, self.last_seen) {
            (Some(first), Some(last)) => format!(
                "{} to {}",
                first.format("%Y-%m-%d"),
                last.format("%Y-%m-%d")
            ),
            _ => "N/A".to_string(),
        };

        let n = self.total_requests as f64;
        AggregateStats {
            total_tokens: self.total_tokens,
            total_cost: round_cost(self.total_cost),
            total_requests: self.total_requests,
            average_tokens: self.total_tokens as f64 / n,
            success_count: self.success_count,
            success_rate: self.success_count as f64 / n * 100.0,
            avg_response_time_ms: self.avg_response_time_ms.unwrap_or(0.0),
            paid_requests: self.paid_requests,
            free_requests: self.free_requests,
            paid_tokens: self.paid_tokens,
            free_tokens: self.free_tokens,
            model_distribution,
            provider_distribution,
            date_range,
        }
    }
}

/// Distinct model seen in the store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ModelInfo {
    pub name: String,
    pub model_class: ModelClass,
    pub provider: String,
}

/// Model catalog grouped by billing class
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModelCatalog {
    pub paid_models: Vec<String>,
    pub free_models: Vec<String>,
    pub providers: Vec<String>,
}

impl ModelCatalog {
    pub fn from_models(models: &[ModelInfo]) -> Self {
        let mut catalog = Self::default();
        for m in models {
            let bucket = match m.model_class {
                ModelClass::Paid => &mut catalog.paid_models,
                ModelClass::Free => &mut catalog.free_models,
            };
            if !bucket.contains(&m.name) {
                bucket.push(m.name.clone());
            }
            if !catalog.providers.contains(&m.provider) {
                catalog.providers.push(m.provider.clone());
            }
        }
        catalog.paid_models.sort();
        catalog.free_models.sort();
        catalog.providers.sort();
        catalog
    }
}
