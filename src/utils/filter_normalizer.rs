//! Filter normalization
//!
//! Turns a loose [`UsageQuery`] into a resolved [`FilterSet`]: concrete day
//! bounds, a single model predicate and a lowercased provider. The canonical
//! cache keys are derived from the resolved values in a fixed field order, so
//! queries that mean the same thing share a key no matter how they were
//! written. Pure computation, no I/O.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Utc};

use crate::models::{ModelClass, UsageQuery};
use crate::utils::{AppError, Result};

pub const USAGE_DATA_PREFIX: &str = "usage_data";
pub const STATS_PREFIX: &str = "stats";
pub const MODELS_PREFIX: &str = "models";

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Lower bound used when no start date applies
pub fn far_past() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Upper bound used for unbounded ranges
pub fn far_future() -> NaiveDate {
    NaiveDate::from_ymd_opt(2099, 12, 31).unwrap_or(NaiveDate::MAX)
}

/// Natural calendar windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeRange {
    Day,
    Week,
    Month,
    Year,
}

impl TimeRange {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Some(Self::Day),
            "week" => Some(Self::Week),
            "month" => Some(Self::Month),
            "year" => Some(Self::Year),
            _ => None,
        }
    }

    /// Inclusive [start, end] containing `today`
    pub fn bounds(self, today: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            Self::Day => (today, today),
            Self::Week => {
                let monday =
                    today - Duration::days(today.weekday().num_days_from_monday() as i64);
                (monday, monday + Duration::days(6))
            }
            Self::Month => {
                let first = today.with_day(1).unwrap_or(today);
                let next_first = if first.month() == 12 {
                    NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
                };
                let last = next_first.and_then(|d| d.pred_opt()).unwrap_or(today);
                (first, last)
            }
            Self::Year => (
                NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
                NaiveDate::from_ymd_opt(today.year(), 12, 31).unwrap_or(today),
            ),
        }
    }
}

/// Resolved model predicate; a name match always wins over a class match
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelFilter {
    Any,
    Class(ModelClass),
    /// Lowercased substring of the model name
    Contains(String),
}

/// Backend-neutral predicate. Each backend renders these into its own SQL.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// timestamp >= bound
    TimestampFrom(DateTime<Utc>),
    /// timestamp < bound
    TimestampBefore(DateTime<Utc>),
    ModelClassIs(ModelClass),
    /// lower(model_name) contains the (lowercased) needle
    ModelNameContains(String),
    /// lower(provider) equals the (lowercased) value
    ProviderIs(String),
}

/// Canonical, normalized query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FilterSet {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub model: ModelFilter,
    /// Lowercased provider; `None` matches every provider
    pub provider: Option<String>,
    pub limit: u32,
    pub offset: u32,
}

impl FilterSet {
    /// Filter that matches everything, first page
    pub fn unbounded() -> Self {
        Self {
            start: far_past(),
            end: far_future(),
            model: ModelFilter::Any,
            provider: None,
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }

    pub fn predicates(&self) -> Vec<Predicate> {
        let mut preds = vec![
            Predicate::TimestampFrom(start_of_day(self.start)),
            Predicate::TimestampBefore(start_of_day(self.end + Duration::days(1))),
        ];

        match &self.model {
            ModelFilter::Any => {}
            ModelFilter::Class(class) => preds.push(Predicate::ModelClassIs(*class)),
            ModelFilter::Contains(needle) => {
                preds.push(Predicate::ModelNameContains(needle.clone()))
            }
        }

        if let Some(provider) = &self.provider {
            preds.push(Predicate::ProviderIs(provider.clone()));
        }

        preds
    }

    /// Key for a page of usage records
    pub fn usage_key(&self) -> String {
        format!(
            "{}:{};limit={};offset={}",
            USAGE_DATA_PREFIX,
            self.filter_fields(),
            self.limit,
            self.offset
        )
    }

    /// Key for aggregate stats; pagination does not affect aggregates
    pub fn stats_key(&self) -> String {
        format!("{}:{}", STATS_PREFIX, self.filter_fields())
    }

    fn filter_fields(&self) -> String {
        let model = match &self.model {
            ModelFilter::Any => "any".to_string(),
            ModelFilter::Class(class) => format!("class.{}", class),
            ModelFilter::Contains(needle) => format!("name.{}", urlencoding::encode(needle)),
        };
        let provider = match &self.provider {
            Some(p) => urlencoding::encode(p).into_owned(),
            None => "*".to_string(),
        };

        format!(
            "from={};to={};model={};provider={}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT),
            model,
            provider
        )
    }
}

/// Key for the model catalog
pub fn models_key() -> String {
    format!("{}:list", MODELS_PREFIX)
}

fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Present, non-blank and not the `all` sentinel
fn meaningful(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("all"))
}

fn parse_date(field: &str, value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| {
        AppError::ValidationError(format!(
            "{} must be a YYYY-MM-DD date, got '{}'",
            field, value
        ))
    })
}

fn explicit_date(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve a caller query against the given calendar day
pub fn normalize(query: &UsageQuery, today: NaiveDate) -> Result<FilterSet> {
    let start_raw = explicit_date(&query.start_date);
    let end_raw = explicit_date(&query.end_date);

    let (start, end) = if start_raw.is_some() || end_raw.is_some() {
        let start = match start_raw {
            Some(s) => parse_date("start_date", s)?,
            None => far_past(),
        };
        let end = match end_raw {
            Some(e) => parse_date("end_date", e)?,
            None => today,
        };
        (start, end)
    } else {
        match query.time_range.as_deref().and_then(TimeRange::parse) {
            Some(range) => range.bounds(today),
            None => (far_past(), far_future()),
        }
    };

    if start > end {
        return Err(AppError::ValidationError(format!(
            "start_date {} is after end_date {}",
            start, end
        )));
    }

    let model = match meaningful(&query.specific_model) {
        Some(name) => ModelFilter::Contains(name.to_lowercase()),
        None => match meaningful(&query.model_type) {
            Some(class) => ModelFilter::Class(class.parse()?),
            None => ModelFilter::Any,
        },
    };

    let provider = meaningful(&query.provider).map(str::to_lowercase);

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 || limit > MAX_LIMIT {
        return Err(AppError::ValidationError(format!(
            "limit must be between 1 and {}, got {}",
            MAX_LIMIT, limit
        )));
    }

    Ok(FilterSet {
        start,
        end,
        model,
        provider,
        limit,
        offset: query.offset.unwrap_or(0),
    })
}
