use chrono::{DateTime, Datelike, FixedOffset, Utc};

use crate::error::AppResult;
use crate::ledger::models::{AccountUnit, AccountView, BucketPayloads};

/// `YYYYMMDD` integer of the calendar date of `now` in `offset`
pub fn as_of_date(now: DateTime<Utc>, offset: FixedOffset) -> u32 {
    let local = now.with_timezone(&offset).date_naive();
    local.year() as u32 * 10_000 + local.month() * 100 + local.day()
}

/// Titles of the leaf accounts active on `as_of`, in payload order.
///
/// A missing or blank payload is an empty bucket. A payload that does not decode
/// into account units is a validation error.
pub fn filter_active_leaf_titles(payload: Option<&str>, as_of: u32) -> AppResult<Vec<String>> {
    let payload = match payload.map(str::trim) {
        Some(p) if !p.is_empty() => p,
        _ => return Ok(Vec::new()),
    };

    let units: Vec<AccountUnit> = serde_json::from_str(payload)?;

    Ok(units
        .into_iter()
        .filter(|unit| unit.is_active_leaf(as_of))
        .map(|unit| unit.title)
        .collect())
}

/// Apply the filter to all five stored buckets
pub fn build_view(buckets: &BucketPayloads, as_of: u32) -> AppResult<AccountView> {
    buckets
        .by_ref()
        .try_map(|payload| filter_active_leaf_titles(Some(payload.as_str()), as_of))
}
