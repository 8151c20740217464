use chrono::{DateTime, FixedOffset, Offset, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::lease::SectionLeases;
use super::taxonomy::{as_of_date, build_view};
use crate::error::{AppError, AppResult};
use crate::ledger::models::{AccountView, NewAccountSnapshot, ProviderCredentials};
use crate::ledger::LedgerStore;
use crate::provider::AccountProvider;

/// Reconciler configuration
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Minimum time between two successful refreshes of a section
    pub cooldown: Duration,
    /// Upper bound on how long one refresh holds its section
    pub lease_ttl: Duration,
    /// Offset that decides the calendar date used for the view
    pub local_offset: FixedOffset,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5 * 60),
            lease_ttl: Duration::from_secs(60),
            local_offset: FixedOffset::east_opt(9 * 3600).unwrap_or_else(|| Utc.fix()),
        }
    }
}

/// Snapshot reconciler - keeps the local account cache in line with the provider
pub struct SnapshotReconciler {
    store: Arc<dyn LedgerStore>,
    provider: Arc<dyn AccountProvider>,
    leases: SectionLeases,
    config: ReconcilerConfig,
}

impl SnapshotReconciler {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        provider: Arc<dyn AccountProvider>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            provider,
            leases: SectionLeases::new(config.lease_ttl),
            config,
        }
    }

    /// Pull a fresh snapshot for `section_idx` with the credentials of `user_idx`
    /// and return the filtered view of what was written.
    pub async fn refresh(&self, user_idx: i64, section_idx: i64) -> AppResult<AccountView> {
        self.refresh_at(user_idx, section_idx, Utc::now()).await
    }

    pub(crate) async fn refresh_at(
        &self,
        user_idx: i64,
        section_idx: i64,
        now: DateTime<Utc>,
    ) -> AppResult<AccountView> {
        // Step 1: resolve the section
        let section = self
            .store
            .get_section(section_idx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("section {}", section_idx)))?;

        // Held until this refresh returns
        let _lease = self.leases.try_acquire(section_idx).map_err(|remaining| {
            warn!("Refresh of section {} already in flight", section_idx);
            AppError::RateLimited {
                section_idx,
                retry_after_secs: remaining.as_secs().max(1),
            }
        })?;

        // Step 2 and 3: existing snapshot and cooldown, before any provider call
        let existing = self.store.get_snapshot_by_section(section_idx).await?;
        if let Some(snapshot) = &existing {
            let cooldown = chrono::Duration::from_std(self.config.cooldown)
                .map_err(|e| AppError::Config(format!("invalid cooldown: {}", e)))?;
            let next_allowed = snapshot.updated_last + cooldown;
            if next_allowed > now {
                let retry_after_secs = (next_allowed - now).num_seconds().max(1) as u64;
                warn!(
                    "Refresh of section {} rejected, last update at {}",
                    section_idx, snapshot.updated_last
                );
                return Err(AppError::RateLimited {
                    section_idx,
                    retry_after_secs,
                });
            }
        }

        // Step 4: credentials
        let credentials = self
            .store
            .get_credentials(user_idx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("provider credentials of user {}", user_idx)))?;

        // Step 5 and 6: fetch and serialize
        info!(
            "🔄 Refreshing accounts of section {} ({})",
            section_idx, section.whooing_section_id
        );
        let accounts = self
            .provider
            .fetch_accounts(&section.whooing_section_id, &credentials)
            .await?;
        let buckets = accounts.encode()?;

        // Step 7: insert or update by snapshot identity
        let written = match existing {
            None => {
                self.store
                    .insert_snapshot(
                        NewAccountSnapshot {
                            section_idx,
                            section_id: section.whooing_section_id.clone(),
                            buckets,
                        },
                        now,
                    )
                    .await?
            }
            Some(snapshot) => {
                self.store
                    .update_snapshot(snapshot.account_idx, buckets, now)
                    .await?
            }
        };

        info!(
            "✓ Section {} accounts reconciled (snapshot {})",
            section_idx, written.account_idx
        );

        // Step 8: view of what was written
        build_view(&written.buckets, as_of_date(now, self.config.local_offset))
    }

    /// View of the stored snapshot as of today
    pub async fn view(&self, section_idx: i64) -> AppResult<AccountView> {
        let snapshot = self
            .store
            .get_snapshot_by_section(section_idx)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("account snapshot of section {}", section_idx)))?;

        build_view(
            &snapshot.buckets,
            as_of_date(Utc::now(), self.config.local_offset),
        )
    }

    /// Create snapshots for every provider section in `section_ids`.
    ///
    /// Sections are fetched one at a time in input order and the first failure
    /// stops further fetches. Rows are written in one batch only after every
    /// fetch succeeded.
    pub async fn bulk_create(
        &self,
        section_ids: &[String],
        credentials: &ProviderCredentials,
    ) -> AppResult<u64> {
        if section_ids.is_empty() {
            return Ok(0);
        }

        let rows: Vec<NewAccountSnapshot> = stream::iter(section_ids)
            .then(|section_id| async move {
                let accounts = self.provider.fetch_accounts(section_id, credentials).await?;
                let section = self
                    .store
                    .get_section_by_external_id(section_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("section {}", section_id)))?;

                Ok::<_, AppError>(NewAccountSnapshot {
                    section_idx: section.section_idx,
                    section_id: section_id.clone(),
                    buckets: accounts.encode()?,
                })
            })
            .try_collect()
            .await?;

        let created = self.store.insert_snapshots(rows, Utc::now()).await?;
        info!("✅ Created {} account snapshots", created);

        Ok(created)
    }
}
