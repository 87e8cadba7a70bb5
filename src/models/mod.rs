pub mod query;
pub mod stats;
pub mod usage_record;

pub use query::{UsagePage, UsageQuery};
pub use stats::{AggregateStats, AggregateTotals, ModelCatalog, ModelInfo};
pub use usage_record::{round_cost, ModelClass, UsageRecord, UsageStatus, COST_DECIMALS};
