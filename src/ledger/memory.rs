use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::models::*;
use super::repository::LedgerStore;
use crate::error::{AppError, AppResult};

#[derive(Default)]
struct Tables {
    sections: BTreeMap<i64, Section>,
    credentials: HashMap<i64, ProviderCredentials>,
    snapshots: BTreeMap<i64, AccountSnapshot>,
    rules: BTreeMap<i64, RecurringRule>,
    next_account_idx: i64,
    next_transaction_idx: i64,
}

/// In-memory store with the same contract as `PgLedgerStore`
#[derive(Default)]
pub struct InMemoryLedgerStore {
    tables: RwLock<Tables>,
    fail_writes: AtomicBool,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_section(&self, section_idx: i64, whooing_section_id: &str) {
        let mut tables = self.tables.write().await;
        tables.sections.insert(
            section_idx,
            Section {
                section_idx,
                whooing_section_id: whooing_section_id.to_string(),
            },
        );
    }

    pub async fn add_credentials(&self, user_idx: i64, access_token: &str) {
        let mut tables = self.tables.write().await;
        tables
            .credentials
            .insert(user_idx, ProviderCredentials::new(user_idx, access_token));
    }

    /// Make every subsequent write fail as a database error would
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn snapshot_count(&self) -> usize {
        self.tables.read().await.snapshots.len()
    }

    fn check_writable(&self) -> AppResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AppError::Database(sqlx::Error::PoolClosed));
        }
        Ok(())
    }

    fn build_snapshot(
        tables: &mut Tables,
        snapshot: NewAccountSnapshot,
        updated_last: DateTime<Utc>,
    ) -> AppResult<AccountSnapshot> {
        if tables
            .snapshots
            .values()
            .any(|s| s.section_idx == snapshot.section_idx)
        {
            return Err(AppError::Database(sqlx::Error::Protocol(format!(
                "duplicate snapshot for section {}",
                snapshot.section_idx
            ))));
        }
        tables.next_account_idx += 1;
        Ok(AccountSnapshot {
            account_idx: tables.next_account_idx,
            section_idx: snapshot.section_idx,
            section_id: snapshot.section_id,
            buckets: snapshot.buckets,
            updated_last,
        })
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_section(&self, section_idx: i64) -> AppResult<Option<Section>> {
        Ok(self.tables.read().await.sections.get(&section_idx).cloned())
    }

    async fn get_section_by_external_id(&self, section_id: &str) -> AppResult<Option<Section>> {
        let tables = self.tables.read().await;
        Ok(tables
            .sections
            .values()
            .find(|s| s.whooing_section_id == section_id)
            .cloned())
    }

    async fn get_credentials(&self, user_idx: i64) -> AppResult<Option<ProviderCredentials>> {
        Ok(self.tables.read().await.credentials.get(&user_idx).cloned())
    }

    async fn get_snapshot_by_section(&self, section_idx: i64) -> AppResult<Option<AccountSnapshot>> {
        let tables = self.tables.read().await;
        Ok(tables
            .snapshots
            .values()
            .find(|s| s.section_idx == section_idx)
            .cloned())
    }

    async fn insert_snapshot(
        &self,
        snapshot: NewAccountSnapshot,
        updated_last: DateTime<Utc>,
    ) -> AppResult<AccountSnapshot> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        let row = Self::build_snapshot(&mut tables, snapshot, updated_last)?;
        tables.snapshots.insert(row.account_idx, row.clone());
        Ok(row)
    }

    async fn update_snapshot(
        &self,
        account_idx: i64,
        buckets: BucketPayloads,
        updated_last: DateTime<Utc>,
    ) -> AppResult<AccountSnapshot> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        let snapshot = tables
            .snapshots
            .get_mut(&account_idx)
            .ok_or_else(|| AppError::NotFound(format!("account snapshot {}", account_idx)))?;

        snapshot.buckets = buckets;
        snapshot.updated_last = updated_last;
        Ok(snapshot.clone())
    }

    async fn insert_snapshots(
        &self,
        snapshots: Vec<NewAccountSnapshot>,
        updated_last: DateTime<Utc>,
    ) -> AppResult<u64> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;

        // Stage on a copy so a failing row leaves the table untouched
        let mut staged = Tables {
            sections: BTreeMap::new(),
            credentials: HashMap::new(),
            snapshots: tables.snapshots.clone(),
            rules: BTreeMap::new(),
            next_account_idx: tables.next_account_idx,
            next_transaction_idx: 0,
        };
        let mut inserted = 0;
        for snapshot in snapshots {
            let row = Self::build_snapshot(&mut staged, snapshot, updated_last)?;
            staged.snapshots.insert(row.account_idx, row);
            inserted += 1;
        }

        tables.snapshots = staged.snapshots;
        tables.next_account_idx = staged.next_account_idx;
        Ok(inserted)
    }

    async fn find_rules_at(&self, day: DayOfWeek, time: &TimeOfDay) -> AppResult<Vec<RecurringRule>> {
        let tables = self.tables.read().await;
        Ok(tables
            .rules
            .values()
            .filter(|r| !r.is_deleted && r.request_time == time.as_str() && r.recurrence.matches(day))
            .cloned()
            .collect())
    }

    async fn insert_rule(&self, rule: NewRecurringRule) -> AppResult<RecurringRule> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        tables.next_transaction_idx += 1;
        let stored = RecurringRule {
            transaction_idx: tables.next_transaction_idx,
            section_idx: rule.section_idx,
            user_idx: rule.user_idx,
            transaction_nickname: rule.transaction_nickname,
            recurrence: rule.recurrence,
            request_time: rule.request_time,
            transaction_item: rule.transaction_item,
            transaction_money_amount: rule.transaction_money_amount,
            transaction_left: rule.transaction_left,
            transaction_right: rule.transaction_right,
            transaction_memo: rule.transaction_memo,
            work_status: rule.work_status,
            is_deleted: false,
            webhook_url: rule.webhook_url,
        };
        tables.rules.insert(stored.transaction_idx, stored.clone());
        Ok(stored)
    }

    async fn get_user_rules(&self, user_idx: i64) -> AppResult<Vec<ActiveRule>> {
        let tables = self.tables.read().await;
        Ok(tables
            .rules
            .values()
            .filter(|r| r.user_idx == user_idx)
            .cloned()
            .filter_map(ActiveRule::new)
            .collect())
    }

    async fn update_rule(
        &self,
        transaction_idx: i64,
        user_idx: i64,
        update: UpdateRecurringRule,
    ) -> AppResult<Option<RecurringRule>> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        let rule = match tables.rules.get_mut(&transaction_idx) {
            Some(rule) if rule.user_idx == user_idx && !rule.is_deleted => rule,
            _ => return Ok(None),
        };

        if let Some(v) = update.transaction_nickname {
            rule.transaction_nickname = v;
        }
        if let Some(v) = update.recurrence {
            rule.recurrence = v;
        }
        if let Some(v) = update.request_time {
            rule.request_time = v;
        }
        if let Some(v) = update.transaction_item {
            rule.transaction_item = v;
        }
        if let Some(v) = update.transaction_money_amount {
            rule.transaction_money_amount = v;
        }
        if let Some(v) = update.transaction_left {
            rule.transaction_left = v;
        }
        if let Some(v) = update.transaction_right {
            rule.transaction_right = v;
        }
        if let Some(v) = update.transaction_memo {
            rule.transaction_memo = v;
        }
        if let Some(v) = update.work_status {
            rule.work_status = v;
        }
        if let Some(v) = update.webhook_url {
            rule.webhook_url = v;
        }
        Ok(Some(rule.clone()))
    }

    async fn soft_delete_rule(&self, transaction_idx: i64, user_idx: i64) -> AppResult<bool> {
        self.check_writable()?;
        let mut tables = self.tables.write().await;
        match tables.rules.get_mut(&transaction_idx) {
            Some(rule) if rule.user_idx == user_idx && !rule.is_deleted => {
                rule.is_deleted = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_snapshot(section_idx: i64) -> NewAccountSnapshot {
        NewAccountSnapshot {
            section_idx,
            section_id: format!("s{}", section_idx),
            buckets: BucketPayloads::default(),
        }
    }

    #[tokio::test]
    async fn test_batch_insert_is_all_or_nothing() {
        let store = InMemoryLedgerStore::new();
        store.insert_snapshot(new_snapshot(2), Utc::now()).await.unwrap();

        let result = store
            .insert_snapshots(vec![new_snapshot(1), new_snapshot(2)], Utc::now())
            .await;

        assert!(result.is_err());
        assert_eq!(store.snapshot_count().await, 1);
    }

    fn coffee_rule() -> NewRecurringRule {
        NewRecurringRule {
            section_idx: 1,
            user_idx: 10,
            transaction_nickname: "coffee".into(),
            recurrence: Recurrence::EveryDay,
            request_time: "0800".into(),
            transaction_item: "coffee".into(),
            transaction_money_amount: rust_decimal::Decimal::from(4),
            transaction_left: "expenses".into(),
            transaction_right: "assets".into(),
            transaction_memo: String::new(),
            work_status: "active".into(),
            webhook_url: "https://hooks.example.com/c".into(),
        }
    }

    #[tokio::test]
    async fn test_soft_delete_only_matches_owner() {
        let store = InMemoryLedgerStore::new();
        let rule = store.insert_rule(coffee_rule()).await.unwrap();

        assert!(!store.soft_delete_rule(rule.transaction_idx, 99).await.unwrap());
        assert!(store.soft_delete_rule(rule.transaction_idx, 10).await.unwrap());
        assert!(!store.soft_delete_rule(rule.transaction_idx, 10).await.unwrap());
        assert!(store.get_user_rules(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_rule_edits_only_live_rules_of_owner() {
        let store = InMemoryLedgerStore::new();
        let rule = store.insert_rule(coffee_rule()).await.unwrap();

        let edit = UpdateRecurringRule {
            request_time: Some("0830".into()),
            transaction_memo: Some("oat latte".into()),
            ..Default::default()
        };
        assert!(store
            .update_rule(rule.transaction_idx, 99, edit.clone())
            .await
            .unwrap()
            .is_none());

        let updated = store
            .update_rule(rule.transaction_idx, 10, edit.clone())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.request_time, "0830");
        assert_eq!(updated.transaction_memo, "oat latte");
        assert_eq!(updated.transaction_item, "coffee");
        assert_eq!(updated.user_idx, 10);
        assert!(!updated.is_deleted);

        store.soft_delete_rule(rule.transaction_idx, 10).await.unwrap();
        assert!(store
            .update_rule(rule.transaction_idx, 10, edit)
            .await
            .unwrap()
            .is_none());
        assert!(store.get_user_rules(10).await.unwrap().is_empty());
    }
}
