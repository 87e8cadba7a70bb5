use serde::{Deserialize, Serialize};

use super::usage_record::UsageRecord;

/// Loose filter fields as supplied by a caller.
///
/// Resolved into a [`FilterSet`](crate::utils::FilterSet) by the filter
/// normalizer before any cache or backend access.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsageQuery {
    /// `day`, `week`, `month` or `year`; anything else is unbounded
    #[serde(default, alias = "timeRange")]
    pub time_range: Option<String>,

    /// `YYYY-MM-DD`; takes precedence over `time_range`
    #[serde(default, alias = "startDate")]
    pub start_date: Option<String>,

    #[serde(default, alias = "endDate")]
    pub end_date: Option<String>,

    /// `paid`, `free` or `all`
    #[serde(default, alias = "modelType")]
    pub model_type: Option<String>,

    /// Case-insensitive substring of the model name; overrides `model_type`
    #[serde(default, alias = "specificModel")]
    pub specific_model: Option<String>,

    #[serde(default)]
    pub provider: Option<String>,

    #[serde(default)]
    pub limit: Option<u32>,

    #[serde(default)]
    pub offset: Option<u32>,
}

impl UsageQuery {
    pub fn with_time_range(mut self, range: impl Into<String>) -> Self {
        self.time_range = Some(range.into());
        self
    }

    pub fn with_dates(mut self, start: Option<&str>, end: Option<&str>) -> Self {
        self.start_date = start.map(str::to_string);
        self.end_date = end.map(str::to_string);
        self
    }

    pub fn with_model_type(mut self, model_type: impl Into<String>) -> Self {
        self.model_type = Some(model_type.into());
        self
    }

    pub fn with_specific_model(mut self, model: impl Into<String>) -> Self {
        self.specific_model = Some(model.into());
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_page(mut self, limit: u32, offset: u32) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }
}

/// One page of records, newest first
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsagePage {
    pub records: Vec<UsageRecord>,
    /// Matched records before pagination
    pub total: u64,
    #[serde(rename = "hasMore")]
    pub has_more: bool,
}

impl UsagePage {
    pub fn new(records: Vec<UsageRecord>, total: u64, offset: u32) -> Self {
        let has_more = (offset as u64) + (records.len() as u64) < total;
        Self {
            records,
            total,
            has_more,
        }
    }
}
