// Schedule ticker - wakes every minute and fires the webhooks of due rules.
//
// Day 0 is Sunday. Times are HHmm in the configured local offset, which must
// match the convention rules were stored with.

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use futures::future::join_all;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{error, info, warn};

use super::matcher::ScheduleMatcher;
use super::webhook::WebhookSender;
use crate::error::{AppError, AppResult};
use crate::ledger::models::{DayOfWeek, TimeOfDay};

/// Outcome of one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped: bool,
}

pub struct ScheduleTicker {
    matcher: Arc<ScheduleMatcher>,
    sender: Arc<dyn WebhookSender>,
    local_offset: FixedOffset,
    /// Unix minute of the last tick that ran
    last_minute: Mutex<Option<i64>>,
}

impl ScheduleTicker {
    pub fn new(
        matcher: Arc<ScheduleMatcher>,
        sender: Arc<dyn WebhookSender>,
        local_offset: FixedOffset,
    ) -> Self {
        Self {
            matcher,
            sender,
            local_offset,
            last_minute: Mutex::new(None),
        }
    }

    /// Start the ticker (runs in background)
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Self::until_next_minute(Utc::now())).await;

                if let Err(e) = self.tick(Utc::now()).await {
                    error!("❌ Schedule tick failed: {:?}", e);
                }
            }
        })
    }

    /// Match and dispatch the rules due at `now`. A minute that already ran is skipped.
    pub async fn tick(&self, now: DateTime<Utc>) -> AppResult<TickReport> {
        let minute = now.timestamp().div_euclid(60);
        {
            let mut last = self.last_minute.lock();
            if *last == Some(minute) {
                warn!("Tick for minute {} already ran, skipping", minute);
                return Ok(TickReport {
                    skipped: true,
                    ..TickReport::default()
                });
            }
            *last = Some(minute);
        }

        let (day, time) = Self::tick_key(now, self.local_offset)?;
        let due = self.matcher.find_due(day, &time).await?;
        if due.is_empty() {
            return Ok(TickReport::default());
        }

        info!("⏰ {} rules due at day {} {}", due.len(), day, time);

        let results = join_all(due.iter().map(|rule| self.sender.send(rule))).await;

        let mut report = TickReport {
            due: due.len(),
            ..TickReport::default()
        };
        for (rule, result) in due.iter().zip(results) {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(
                        "❌ Webhook for rule {} to {} failed: {}",
                        rule.transaction_idx, rule.webhook_url, e
                    );
                }
            }
        }

        info!(
            "✓ Tick {} {} done: {} delivered, {} failed",
            day, time, report.delivered, report.failed
        );
        Ok(report)
    }

    /// Day of week (0 = Sunday) and HHmm of `now` in `offset`
    fn tick_key(now: DateTime<Utc>, offset: FixedOffset) -> AppResult<(DayOfWeek, TimeOfDay)> {
        let local = now.with_timezone(&offset);
        let day = DayOfWeek::new(local.weekday().num_days_from_sunday() as u8).ok_or_else(|| {
            AppError::Internal(format!("weekday out of range at {}", local))
        })?;
        let time = TimeOfDay::parse(&format!("{:02}{:02}", local.hour(), local.minute()))?;
        Ok((day, time))
    }

    /// Time left until the start of the next minute
    fn until_next_minute(now: DateTime<Utc>) -> Duration {
        let into_minute_ms =
            u64::from(now.second()) * 1000 + u64::from(now.timestamp_subsec_millis().min(999));
        Duration::from_millis(60_000 - into_minute_ms)
    }
}
