use std::sync::Arc;
use tracing::debug;

use crate::error::AppResult;
use crate::ledger::models::{ActiveRule, DayOfWeek, DueRule, TimeOfDay};
use crate::ledger::LedgerStore;

/// Finds the recurring rules that fire at a given day and minute
pub struct ScheduleMatcher {
    store: Arc<dyn LedgerStore>,
}

impl ScheduleMatcher {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Live rules stored for exactly `time` on `day` or every day, in store order.
    /// Read-only; repeated calls with the same arguments return the same rules.
    pub async fn find_due(&self, day: DayOfWeek, time: &TimeOfDay) -> AppResult<Vec<DueRule>> {
        let rules = self.store.find_rules_at(day, time).await?;

        let due: Vec<DueRule> = rules
            .into_iter()
            .filter_map(ActiveRule::new)
            .filter(|rule| rule.request_time == time.as_str() && rule.recurrence.matches(day))
            .map(|rule| DueRule::from(&rule))
            .collect();

        debug!("{} rules due at day {} {}", due.len(), day, time);
        Ok(due)
    }
}
