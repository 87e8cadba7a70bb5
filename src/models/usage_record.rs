use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::utils::{AppError, Result};

/// Costs are stored with six decimal places on every backend
pub const COST_DECIMALS: i32 = 6;

/// Round a cost to the storage precision
pub fn round_cost(cost: f64) -> f64 {
    let scale = 10f64.powi(COST_DECIMALS);
    (cost * scale).round() / scale
}

/// Billing class of a model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelClass {
    Paid,
    Free,
}

impl ModelClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paid => "paid",
            Self::Free => "free",
        }
    }
}

impl fmt::Display for ModelClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelClass {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "paid" => Ok(Self::Paid),
            "free" => Ok(Self::Free),
            other => Err(AppError::ValidationError(format!(
                "model class must be 'paid' or 'free', got '{}'",
                other
            ))),
        }
    }
}

/// Outcome of an observed API call
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum UsageStatus {
    #[default]
    Success,
    Error,
    Timeout,
}

impl UsageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for UsageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UsageStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "timeout" => Ok(Self::Timeout),
            other => Err(AppError::ValidationError(format!(
                "status must be one of success, error, timeout, got '{}'",
                other
            ))),
        }
    }
}

fn default_user_id() -> String {
    "default".to_string()
}

/// One observed API call.
///
/// `id` is assigned by the backend on insert; records are never updated
/// afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Defaults to insertion time when absent
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(alias = "model")]
    pub model_name: String,

    #[serde(alias = "model_type", alias = "modelType")]
    pub model_class: ModelClass,

    #[serde(alias = "tokens")]
    pub tokens_used: u64,

    pub cost: f64,

    #[serde(default, alias = "response_time", alias = "responseTime")]
    pub response_time_ms: Option<u32>,

    #[serde(default)]
    pub status: UsageStatus,

    #[serde(alias = "api_provider", alias = "apiProvider")]
    pub provider: String,

    #[serde(default, alias = "requestType")]
    pub request_type: Option<String>,

    #[serde(default = "default_user_id")]
    pub user_id: String,

    #[serde(default)]
    pub session_id: Option<String>,

    #[serde(default)]
    pub agent_name: Option<String>,

    #[serde(default)]
    pub category: Option<String>,
}

impl UsageRecord {
    /// Create a record with required fields; optional fields start empty
    pub fn new(
        model_name: impl Into<String>,
        model_class: ModelClass,
        tokens_used: u64,
        cost: f64,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            id: None,
            timestamp: None,
            model_name: model_name.into(),
            model_class,
            tokens_used,
            cost,
            response_time_ms: None,
            status: UsageStatus::Success,
            provider: provider.into(),
            request_type: None,
            user_id: default_user_id(),
            session_id: None,
            agent_name: None,
            category: None,
        }
    }

    pub fn with_status(mut self, status: UsageStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_response_time(mut self, ms: u32) -> Self {
        self.response_time_ms = Some(ms);
        self
    }

    pub fn with_session(mut self, user_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self.session_id = Some(session_id.into());
        self
    }

    /// Check record invariants before it reaches a backend
    pub fn validate(&self) -> Result<()> {
        if self.id.is_some() {
            return Err(AppError::ValidationError(
                "id is assigned by the store and must be absent on insert".to_string(),
            ));
        }
        if self.model_name.trim().is_empty() {
            return Err(AppError::ValidationError(
                "model_name must not be empty".to_string(),
            ));
        }
        if self.provider.trim().is_empty() {
            return Err(AppError::ValidationError(
                "provider must not be empty".to_string(),
            ));
        }
        if !self.cost.is_finite() || self.cost < 0.0 {
            return Err(AppError::ValidationError(
                "cost must be a non-negative number".to_string(),
            ));
        }
        if self.tokens_used > i64::MAX as u64 {
            return Err(AppError::ValidationError(
                "tokens_used is out of range".to_string(),
            ));
        }
        if self.user_id.trim().is_empty() {
            return Err(AppError::ValidationError(
                "user_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}
