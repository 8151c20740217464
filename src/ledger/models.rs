use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use sqlx::{postgres::PgRow, prelude::FromRow, Row};
use std::fmt;
use std::ops::Deref;
use validator::{Validate, ValidationError};

use crate::error::{AppError, AppResult};

/// Ledger section - one bookkeeping unit known locally and by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Section {
    pub section_idx: i64,
    pub whooing_section_id: String,
}

/// Stored provider credentials for one user
#[derive(Clone, FromRow)]
pub struct ProviderCredentials {
    pub user_idx: i64,
    pub access_token: String,
}

impl ProviderCredentials {
    pub fn new(user_idx: i64, access_token: impl Into<String>) -> Self {
        Self {
            user_idx,
            access_token: access_token.into(),
        }
    }
}

impl fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("user_idx", &self.user_idx)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

// ========== ACCOUNT UNITS ==========

/// Kind of an account unit. `group` marks an aggregate node, anything else is a leaf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UnitKind {
    Group,
    Leaf(String),
}

impl UnitKind {
    pub fn is_group(&self) -> bool {
        matches!(self, UnitKind::Group)
    }
}

impl From<String> for UnitKind {
    fn from(value: String) -> Self {
        if value == "group" {
            UnitKind::Group
        } else {
            UnitKind::Leaf(value)
        }
    }
}

impl From<UnitKind> for String {
    fn from(kind: UnitKind) -> Self {
        match kind {
            UnitKind::Group => "group".to_string(),
            UnitKind::Leaf(kind) => kind,
        }
    }
}

/// One leaf or group entry inside a category bucket.
///
/// Dates are `YYYYMMDD` integers. Fields the provider sends beyond the ones
/// reconciliation needs are kept in `extra` so the stored payload stays complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountUnit {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: UnitKind,
    #[serde(deserialize_with = "date_number")]
    pub open_date: u32,
    #[serde(deserialize_with = "date_number")]
    pub close_date: u32,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AccountUnit {
    #[cfg(test)]
    pub fn new(title: &str, kind: &str, open_date: u32, close_date: u32) -> Self {
        Self {
            title: title.to_string(),
            kind: UnitKind::from(kind.to_string()),
            open_date,
            close_date,
            extra: serde_json::Map::new(),
        }
    }

    /// Active leaf on `as_of`: not a group, opened before and closing after that day
    pub fn is_active_leaf(&self, as_of: u32) -> bool {
        !self.kind.is_group() && self.open_date < as_of && self.close_date > as_of
    }
}

/// Accepts `20240101` as well as `"20240101"`.
fn date_number<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s
            .trim()
            .parse::<u32>()
            .map_err(|_| serde::de::Error::custom(format!("invalid YYYYMMDD date: {:?}", s))),
    }
}

/// The five ledger categories, generic over what each bucket holds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountBuckets<T> {
    pub assets: T,
    pub liabilities: T,
    pub capital: T,
    pub income: T,
    pub expenses: T,
}

impl<T> AccountBuckets<T> {
    pub fn try_map<U, F>(self, mut f: F) -> AppResult<AccountBuckets<U>>
    where
        F: FnMut(T) -> AppResult<U>,
    {
        Ok(AccountBuckets {
            assets: f(self.assets)?,
            liabilities: f(self.liabilities)?,
            capital: f(self.capital)?,
            income: f(self.income)?,
            expenses: f(self.expenses)?,
        })
    }

    pub fn by_ref(&self) -> AccountBuckets<&T> {
        AccountBuckets {
            assets: &self.assets,
            liabilities: &self.liabilities,
            capital: &self.capital,
            income: &self.income,
            expenses: &self.expenses,
        }
    }
}

/// Bucket contents as returned by the provider
pub type ProviderAccounts = AccountBuckets<Vec<AccountUnit>>;

/// Serialized bucket payloads as stored on the snapshot row
pub type BucketPayloads = AccountBuckets<String>;

/// Display view: active leaf titles per category
pub type AccountView = AccountBuckets<Vec<String>>;

impl ProviderAccounts {
    /// Serialize every bucket into its stored payload form
    pub fn encode(&self) -> AppResult<BucketPayloads> {
        self.by_ref()
            .try_map(|units| serde_json::to_string(units).map_err(AppError::from))
    }
}

// ========== ACCOUNT SNAPSHOT ==========

/// Cached copy of a section's five buckets. At most one per section.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub account_idx: i64,
    pub section_idx: i64,
    pub section_id: String,
    pub buckets: BucketPayloads,
    pub updated_last: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for AccountSnapshot {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            account_idx: row.try_get("account_idx")?,
            section_idx: row.try_get("section_idx")?,
            section_id: row.try_get("section_id")?,
            buckets: AccountBuckets {
                assets: row.try_get("assets")?,
                liabilities: row.try_get("liabilities")?,
                capital: row.try_get("capital")?,
                income: row.try_get("income")?,
                expenses: row.try_get("expenses")?,
            },
            updated_last: row.try_get("updated_last")?,
        })
    }
}

/// Insert payload for a snapshot row
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccountSnapshot {
    pub section_idx: i64,
    pub section_id: String,
    pub buckets: BucketPayloads,
}

// ========== RECURRENCE ==========

/// Day of week, 0-6. The calendar convention is the caller's (the ticker uses 0 = Sunday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DayOfWeek(u8);

impl DayOfWeek {
    pub fn new(day: u8) -> Option<Self> {
        (day <= 6).then_some(Self(day))
    }

    #[cfg(test)]
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// When a rule recurs. Stored as `'0'..'6'` or `'d'` for every day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Recurrence {
    On(DayOfWeek),
    EveryDay,
}

impl Recurrence {
    pub const EVERY_DAY_COLUMN: &'static str = "d";

    pub fn matches(&self, day: DayOfWeek) -> bool {
        match self {
            Recurrence::On(d) => *d == day,
            Recurrence::EveryDay => true,
        }
    }

    pub fn from_column(value: &str) -> AppResult<Self> {
        if value == Self::EVERY_DAY_COLUMN {
            return Ok(Recurrence::EveryDay);
        }
        value
            .parse::<u8>()
            .ok()
            .and_then(DayOfWeek::new)
            .map(Recurrence::On)
            .ok_or_else(|| AppError::Validation(format!("invalid day of week: {:?}", value)))
    }

    pub fn to_column(&self) -> String {
        match self {
            Recurrence::On(day) => day.to_string(),
            Recurrence::EveryDay => Self::EVERY_DAY_COLUMN.to_string(),
        }
    }
}

impl TryFrom<String> for Recurrence {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Recurrence::from_column(&value)
    }
}

impl From<Recurrence> for String {
    fn from(recurrence: Recurrence) -> Self {
        recurrence.to_column()
    }
}

/// Exact `HHmm` time of day
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TimeOfDay(String);

impl TimeOfDay {
    pub fn parse(value: &str) -> AppResult<Self> {
        if is_hhmm(value) {
            Ok(Self(value.to_string()))
        } else {
            Err(AppError::Validation(format!(
                "time of day must be HHmm, got {:?}",
                value
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_hhmm(value: &str) -> bool {
    if value.len() != 4 || !value.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let hours: u8 = value[..2].parse().unwrap_or(99);
    let minutes: u8 = value[2..].parse().unwrap_or(99);
    hours < 24 && minutes < 60
}

pub fn validate_hhmm(value: &str) -> Result<(), ValidationError> {
    if is_hhmm(value) {
        Ok(())
    } else {
        Err(ValidationError::new("time_of_day_hhmm"))
    }
}

// ========== RECURRING TRANSACTION RULES ==========

/// Raw `transactions` row as the store returns it
#[derive(Debug, Clone, FromRow)]
pub struct RuleRow {
    pub transaction_idx: i64,
    pub section_idx: i64,
    pub user_idx: i64,
    pub transaction_nickname: String,
    pub request_day_of_week: String,
    pub request_time: String,
    pub transaction_item: String,
    pub transaction_money_amount: Decimal,
    pub transaction_left: String,
    pub transaction_right: String,
    pub transaction_memo: String,
    pub work_status: String,
    pub is_deleted: bool,
    pub webhook_url: String,
}

/// Recurring transaction rule
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecurringRule {
    pub transaction_idx: i64,
    pub section_idx: i64,
    pub user_idx: i64,
    pub transaction_nickname: String,
    #[serde(rename = "request_day_of_week")]
    pub recurrence: Recurrence,
    pub request_time: String,
    pub transaction_item: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub transaction_money_amount: Decimal,
    pub transaction_left: String,
    pub transaction_right: String,
    pub transaction_memo: String,
    pub work_status: String,
    pub is_deleted: bool,
    pub webhook_url: String,
}

impl TryFrom<RuleRow> for RecurringRule {
    type Error = AppError;

    fn try_from(row: RuleRow) -> Result<Self, Self::Error> {
        Ok(Self {
            transaction_idx: row.transaction_idx,
            section_idx: row.section_idx,
            user_idx: row.user_idx,
            transaction_nickname: row.transaction_nickname,
            recurrence: Recurrence::from_column(&row.request_day_of_week)?,
            request_time: row.request_time,
            transaction_item: row.transaction_item,
            transaction_money_amount: row.transaction_money_amount,
            transaction_left: row.transaction_left,
            transaction_right: row.transaction_right,
            transaction_memo: row.transaction_memo,
            work_status: row.work_status,
            is_deleted: row.is_deleted,
            webhook_url: row.webhook_url,
        })
    }
}

/// A rule that is known not to be soft-deleted.
///
/// Every read path that serves live rules hands out this type, so skipping the
/// deleted filter has to be spelled out as `RecurringRule`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ActiveRule(RecurringRule);

impl ActiveRule {
    pub fn new(rule: RecurringRule) -> Option<Self> {
        (!rule.is_deleted).then_some(Self(rule))
    }
}

impl Deref for ActiveRule {
    type Target = RecurringRule;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// Fields handed to webhook dispatch for a rule that is due
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DueRule {
    pub transaction_idx: i64,
    pub webhook_url: String,
    pub transaction_item: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub transaction_money_amount: Decimal,
    pub transaction_left: String,
    pub transaction_right: String,
    pub transaction_memo: String,
}

impl From<&ActiveRule> for DueRule {
    fn from(rule: &ActiveRule) -> Self {
        Self {
            transaction_idx: rule.transaction_idx,
            webhook_url: rule.webhook_url.clone(),
            transaction_item: rule.transaction_item.clone(),
            transaction_money_amount: rule.transaction_money_amount,
            transaction_left: rule.transaction_left.clone(),
            transaction_right: rule.transaction_right.clone(),
            transaction_memo: rule.transaction_memo.clone(),
        }
    }
}

/// Insert payload for a rule
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewRecurringRule {
    pub section_idx: i64,
    pub user_idx: i64,
    #[validate(length(min = 1, max = 100))]
    pub transaction_nickname: String,
    #[serde(rename = "request_day_of_week")]
    pub recurrence: Recurrence,
    #[validate(custom = "validate_hhmm")]
    pub request_time: String,
    #[validate(length(min = 1))]
    pub transaction_item: String,
    #[serde(with = "rust_decimal::serde::float")]
    pub transaction_money_amount: Decimal,
    #[validate(length(min = 1))]
    pub transaction_left: String,
    #[validate(length(min = 1))]
    pub transaction_right: String,
    #[serde(default)]
    pub transaction_memo: String,
    #[serde(default = "default_work_status")]
    pub work_status: String,
    #[validate(url)]
    pub webhook_url: String,
}

fn default_work_status() -> String {
    "active".to_string()
}

/// Edit payload for a rule. Absent fields keep their stored value; owner,
/// section and the soft-delete flag cannot be edited.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateRecurringRule {
    #[validate(length(min = 1, max = 100))]
    pub transaction_nickname: Option<String>,
    #[serde(default, rename = "request_day_of_week")]
    pub recurrence: Option<Recurrence>,
    #[validate(custom = "validate_hhmm")]
    pub request_time: Option<String>,
    #[validate(length(min = 1))]
    pub transaction_item: Option<String>,
    #[serde(default, with = "rust_decimal::serde::float_option")]
    pub transaction_money_amount: Option<Decimal>,
    #[validate(length(min = 1))]
    pub transaction_left: Option<String>,
    #[validate(length(min = 1))]
    pub transaction_right: Option<String>,
    pub transaction_memo: Option<String>,
    pub work_status: Option<String>,
    #[validate(url)]
    pub webhook_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recurrence_column_encoding() {
        assert_eq!(Recurrence::from_column("d").unwrap(), Recurrence::EveryDay);
        assert_eq!(
            Recurrence::from_column("3").unwrap(),
            Recurrence::On(DayOfWeek::new(3).unwrap())
        );
        assert!(Recurrence::from_column("7").is_err());
        assert!(Recurrence::from_column("").is_err());
        assert_eq!(Recurrence::EveryDay.to_column(), "d");
    }

    #[test]
    fn test_every_day_matches_all_days() {
        for day in 0..=6 {
            assert!(Recurrence::EveryDay.matches(DayOfWeek::new(day).unwrap()));
        }
        let wed = Recurrence::On(DayOfWeek::new(3).unwrap());
        assert!(wed.matches(DayOfWeek::new(3).unwrap()));
        assert!(!wed.matches(DayOfWeek::new(4).unwrap()));
    }

    #[test]
    fn test_time_of_day_parse() {
        assert!(TimeOfDay::parse("0930").is_ok());
        assert!(TimeOfDay::parse("2359").is_ok());
        assert!(TimeOfDay::parse("930").is_err());
        assert!(TimeOfDay::parse("2400").is_err());
        assert!(TimeOfDay::parse("09:3").is_err());
    }

    #[test]
    fn test_account_unit_accepts_string_dates_and_keeps_extra_fields() {
        let unit: AccountUnit = serde_json::from_str(
            r#"{"account_id":"x1","title":"Cash","type":"account","open_date":"20240101","close_date":20991231}"#,
        )
        .unwrap();

        assert_eq!(unit.open_date, 20240101);
        assert_eq!(unit.close_date, 20991231);
        assert_eq!(unit.kind, UnitKind::Leaf("account".to_string()));
        assert_eq!(unit.extra.get("account_id").unwrap(), "x1");

        let back = serde_json::to_value(&unit).unwrap();
        assert_eq!(back["type"], "account");
        assert_eq!(back["account_id"], "x1");
    }

    #[test]
    fn test_rule_edit_validates_only_present_fields() {
        assert!(UpdateRecurringRule::default().validate().is_ok());

        let edit = UpdateRecurringRule {
            request_time: Some("2460".into()),
            ..Default::default()
        };
        assert!(edit.validate().is_err());

        let edit: UpdateRecurringRule = serde_json::from_str(
            r#"{"request_day_of_week":"d","request_time":"0715","transaction_money_amount":1200.5}"#,
        )
        .unwrap();
        assert!(edit.validate().is_ok());
        assert_eq!(edit.recurrence, Some(Recurrence::EveryDay));
        assert_eq!(edit.transaction_money_amount, Some(Decimal::new(12005, 1)));
        assert!(edit.webhook_url.is_none());
    }

    #[test]
    fn test_active_rule_rejects_deleted() {
        let rule = RecurringRule {
            transaction_idx: 1,
            section_idx: 1,
            user_idx: 1,
            transaction_nickname: "rent".into(),
            recurrence: Recurrence::EveryDay,
            request_time: "0930".into(),
            transaction_item: "rent".into(),
            transaction_money_amount: Decimal::from(500),
            transaction_left: "expenses".into(),
            transaction_right: "assets".into(),
            transaction_memo: String::new(),
            work_status: "active".into(),
            is_deleted: true,
            webhook_url: "https://hooks.example.com/a".into(),
        };
        assert!(ActiveRule::new(rule.clone()).is_none());
        assert!(ActiveRule::new(RecurringRule { is_deleted: false, ..rule }).is_some());
    }

    #[test]
    fn test_credentials_debug_redacts_token() {
        let creds = ProviderCredentials::new(1, "secret-token");
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("secret-token"));
    }
}
