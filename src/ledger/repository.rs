use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

use super::models::*;
use crate::error::{AppError, AppResult};

/// Keyed persistence used by reconciliation and schedule matching
#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn get_section(&self, section_idx: i64) -> AppResult<Option<Section>>;

    async fn get_section_by_external_id(&self, section_id: &str) -> AppResult<Option<Section>>;

    async fn get_credentials(&self, user_idx: i64) -> AppResult<Option<ProviderCredentials>>;

    async fn get_snapshot_by_section(&self, section_idx: i64) -> AppResult<Option<AccountSnapshot>>;

    async fn insert_snapshot(
        &self,
        snapshot: NewAccountSnapshot,
        updated_last: DateTime<Utc>,
    ) -> AppResult<AccountSnapshot>;

    /// Replace all five buckets and the timestamp of the snapshot `account_idx`
    async fn update_snapshot(
        &self,
        account_idx: i64,
        buckets: BucketPayloads,
        updated_last: DateTime<Utc>,
    ) -> AppResult<AccountSnapshot>;

    /// Insert every row or none
    async fn insert_snapshots(
        &self,
        snapshots: Vec<NewAccountSnapshot>,
        updated_last: DateTime<Utc>,
    ) -> AppResult<u64>;

    /// Non-deleted rules at exactly `time` whose day is `day` or every day
    async fn find_rules_at(&self, day: DayOfWeek, time: &TimeOfDay) -> AppResult<Vec<RecurringRule>>;

    async fn insert_rule(&self, rule: NewRecurringRule) -> AppResult<RecurringRule>;

    async fn get_user_rules(&self, user_idx: i64) -> AppResult<Vec<ActiveRule>>;

    /// Edit a live rule owned by `user_idx`. `None` when no live rule matched.
    async fn update_rule(
        &self,
        transaction_idx: i64,
        user_idx: i64,
        update: UpdateRecurringRule,
    ) -> AppResult<Option<RecurringRule>>;

    /// Flip the soft-delete flag. Returns false when no live rule matched.
    async fn soft_delete_rule(&self, transaction_idx: i64, user_idx: i64) -> AppResult<bool>;
}

const SNAPSHOT_COLUMNS: &str = "account_idx, section_idx, section_id, assets, liabilities, capital, income, expenses, updated_last";

const RULE_COLUMNS: &str = "transaction_idx, section_idx, user_idx, transaction_nickname, request_day_of_week, request_time, transaction_item, transaction_money_amount, transaction_left, transaction_right, transaction_memo, work_status, is_deleted, webhook_url";

/// PostgreSQL-backed store
pub struct PgLedgerStore {
    pub pool: PgPool,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    // ========== SECTION OPERATIONS ==========

    async fn get_section(&self, section_idx: i64) -> AppResult<Option<Section>> {
        let section = sqlx::query_as::<_, Section>(
            r#"
            SELECT section_idx, whooing_section_id
            FROM sections
            WHERE section_idx = $1
            "#,
        )
        .bind(section_idx)
        .fetch_optional(&self.pool)
        .await?;

        Ok(section)
    }

    async fn get_section_by_external_id(&self, section_id: &str) -> AppResult<Option<Section>> {
        let section = sqlx::query_as::<_, Section>(
            r#"
            SELECT section_idx, whooing_section_id
            FROM sections
            WHERE whooing_section_id = $1
            "#,
        )
        .bind(section_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(section)
    }

    async fn get_credentials(&self, user_idx: i64) -> AppResult<Option<ProviderCredentials>> {
        let credentials = sqlx::query_as::<_, ProviderCredentials>(
            r#"
            SELECT user_idx, access_token
            FROM oauth_users
            WHERE user_idx = $1
            "#,
        )
        .bind(user_idx)
        .fetch_optional(&self.pool)
        .await?;

        Ok(credentials)
    }

    // ========== SNAPSHOT OPERATIONS ==========

    async fn get_snapshot_by_section(&self, section_idx: i64) -> AppResult<Option<AccountSnapshot>> {
        let snapshot = sqlx::query_as::<_, AccountSnapshot>(&format!(
            "SELECT {} FROM accounts WHERE section_idx = $1",
            SNAPSHOT_COLUMNS
        ))
        .bind(section_idx)
        .fetch_optional(&self.pool)
        .await?;

        Ok(snapshot)
    }

    async fn insert_snapshot(
        &self,
        snapshot: NewAccountSnapshot,
        updated_last: DateTime<Utc>,
    ) -> AppResult<AccountSnapshot> {
        let b = snapshot.buckets;
        let row = sqlx::query_as::<_, AccountSnapshot>(&format!(
            r#"
            INSERT INTO accounts (section_idx, section_id, assets, liabilities, capital, income, expenses, updated_last)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            SNAPSHOT_COLUMNS
        ))
        .bind(snapshot.section_idx)
        .bind(snapshot.section_id)
        .bind(b.assets)
        .bind(b.liabilities)
        .bind(b.capital)
        .bind(b.income)
        .bind(b.expenses)
        .bind(updated_last)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn update_snapshot(
        &self,
        account_idx: i64,
        buckets: BucketPayloads,
        updated_last: DateTime<Utc>,
    ) -> AppResult<AccountSnapshot> {
        let row = sqlx::query_as::<_, AccountSnapshot>(&format!(
            r#"
            UPDATE accounts
            SET assets = $2, liabilities = $3, capital = $4, income = $5, expenses = $6, updated_last = $7
            WHERE account_idx = $1
            RETURNING {}
            "#,
            SNAPSHOT_COLUMNS
        ))
        .bind(account_idx)
        .bind(buckets.assets)
        .bind(buckets.liabilities)
        .bind(buckets.capital)
        .bind(buckets.income)
        .bind(buckets.expenses)
        .bind(updated_last)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| AppError::NotFound(format!("account snapshot {}", account_idx)))
    }

    async fn insert_snapshots(
        &self,
        snapshots: Vec<NewAccountSnapshot>,
        updated_last: DateTime<Utc>,
    ) -> AppResult<u64> {
        if snapshots.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            "INSERT INTO accounts (section_idx, section_id, assets, liabilities, capital, income, expenses, updated_last) ",
        );
        builder.push_values(snapshots, |mut row, snapshot| {
            let b = snapshot.buckets;
            row.push_bind(snapshot.section_idx)
                .push_bind(snapshot.section_id)
                .push_bind(b.assets)
                .push_bind(b.liabilities)
                .push_bind(b.capital)
                .push_bind(b.income)
                .push_bind(b.expenses)
                .push_bind(updated_last);
        });

        let result = builder.build().execute(&self.pool).await?;
        info!("Inserted {} account snapshots", result.rows_affected());

        Ok(result.rows_affected())
    }

    // ========== RULE OPERATIONS ==========

    async fn find_rules_at(&self, day: DayOfWeek, time: &TimeOfDay) -> AppResult<Vec<RecurringRule>> {
        let days = vec![day.to_string(), Recurrence::EVERY_DAY_COLUMN.to_string()];

        let rows = sqlx::query_as::<_, RuleRow>(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE request_day_of_week = ANY($1) AND request_time = $2 AND is_deleted = FALSE
            ORDER BY transaction_idx
            "#,
            RULE_COLUMNS
        ))
        .bind(days)
        .bind(time.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(RecurringRule::try_from).collect()
    }

    async fn insert_rule(&self, rule: NewRecurringRule) -> AppResult<RecurringRule> {
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            r#"
            INSERT INTO transactions (
                section_idx, user_idx, transaction_nickname, request_day_of_week, request_time,
                transaction_item, transaction_money_amount, transaction_left, transaction_right,
                transaction_memo, work_status, webhook_url
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            RULE_COLUMNS
        ))
        .bind(rule.section_idx)
        .bind(rule.user_idx)
        .bind(rule.transaction_nickname)
        .bind(rule.recurrence.to_column())
        .bind(rule.request_time)
        .bind(rule.transaction_item)
        .bind(rule.transaction_money_amount)
        .bind(rule.transaction_left)
        .bind(rule.transaction_right)
        .bind(rule.transaction_memo)
        .bind(rule.work_status)
        .bind(rule.webhook_url)
        .fetch_one(&self.pool)
        .await?;

        RecurringRule::try_from(row)
    }

    async fn get_user_rules(&self, user_idx: i64) -> AppResult<Vec<ActiveRule>> {
        let rows = sqlx::query_as::<_, RuleRow>(&format!(
            r#"
            SELECT {}
            FROM transactions
            WHERE user_idx = $1 AND is_deleted = FALSE
            ORDER BY transaction_idx
            "#,
            RULE_COLUMNS
        ))
        .bind(user_idx)
        .fetch_all(&self.pool)
        .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for row in rows {
            if let Some(rule) = ActiveRule::new(RecurringRule::try_from(row)?) {
                rules.push(rule);
            }
        }
        Ok(rules)
    }

    async fn update_rule(
        &self,
        transaction_idx: i64,
        user_idx: i64,
        update: UpdateRecurringRule,
    ) -> AppResult<Option<RecurringRule>> {
        let row = sqlx::query_as::<_, RuleRow>(&format!(
            r#"
            UPDATE transactions
            SET transaction_nickname = COALESCE($3, transaction_nickname),
                request_day_of_week = COALESCE($4, request_day_of_week),
                request_time = COALESCE($5, request_time),
                transaction_item = COALESCE($6, transaction_item),
                transaction_money_amount = COALESCE($7, transaction_money_amount),
                transaction_left = COALESCE($8, transaction_left),
                transaction_right = COALESCE($9, transaction_right),
                transaction_memo = COALESCE($10, transaction_memo),
                work_status = COALESCE($11, work_status),
                webhook_url = COALESCE($12, webhook_url)
            WHERE transaction_idx = $1 AND user_idx = $2 AND is_deleted = FALSE
            RETURNING {}
            "#,
            RULE_COLUMNS
        ))
        .bind(transaction_idx)
        .bind(user_idx)
        .bind(update.transaction_nickname)
        .bind(update.recurrence.map(|r| r.to_column()))
        .bind(update.request_time)
        .bind(update.transaction_item)
        .bind(update.transaction_money_amount)
        .bind(update.transaction_left)
        .bind(update.transaction_right)
        .bind(update.transaction_memo)
        .bind(update.work_status)
        .bind(update.webhook_url)
        .fetch_optional(&self.pool)
        .await?;

        row.map(RecurringRule::try_from).transpose()
    }

    async fn soft_delete_rule(&self, transaction_idx: i64, user_idx: i64) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE transactions
            SET is_deleted = TRUE
            WHERE transaction_idx = $1 AND user_idx = $2 AND is_deleted = FALSE
            "#,
        )
        .bind(transaction_idx)
        .bind(user_idx)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}
