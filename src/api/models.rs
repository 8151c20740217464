use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::ledger::models::validate_hhmm;

/// Refresh request body
#[derive(Debug, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(range(min = 1))]
    pub user_idx: i64,
}

/// Bulk snapshot creation request body
#[derive(Debug, Deserialize, Validate)]
pub struct BulkCreateRequest {
    pub user_idx: i64,
    #[validate(length(min = 1))]
    pub section_ids: Vec<String>,
    #[validate(length(min = 1))]
    pub access_token: String,
}

#[derive(Debug, Serialize)]
pub struct BulkCreateResponse {
    pub created: u64,
}

/// Query for rules due at a day and minute
#[derive(Debug, Deserialize, Validate)]
pub struct DueQuery {
    #[validate(range(max = 6))]
    pub day_of_week: u8,
    #[validate(custom = "validate_hhmm")]
    pub time: String,
}

#[derive(Debug, Serialize)]
pub struct DeleteRuleResponse {
    pub transaction_idx: i64,
    pub deleted: bool,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
}
