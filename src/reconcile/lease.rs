use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Lease {
    token: Uuid,
    acquired_at: Instant,
}

/// One in-flight refresh per section.
///
/// A lease that outlives `ttl` is treated as abandoned and may be taken over.
#[derive(Clone)]
pub struct SectionLeases {
    held: Arc<Mutex<HashMap<i64, Lease>>>,
    ttl: Duration,
}

impl SectionLeases {
    pub fn new(ttl: Duration) -> Self {
        Self {
            held: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Take the lease for `section_idx`, or report how long the current holder may still keep it
    pub fn try_acquire(&self, section_idx: i64) -> Result<LeaseGuard, Duration> {
        let now = Instant::now();
        let mut held = self.held.lock();

        if let Some(existing) = held.get(&section_idx) {
            let age = now.duration_since(existing.acquired_at);
            if age < self.ttl {
                return Err(self.ttl - age);
            }
            warn!(
                "Taking over stale refresh lease for section {} (held {:?})",
                section_idx, age
            );
        }

        let token = Uuid::new_v4();
        held.insert(
            section_idx,
            Lease {
                token,
                acquired_at: now,
            },
        );
        debug!("Acquired refresh lease for section {}", section_idx);

        Ok(LeaseGuard {
            section_idx,
            token,
            held: self.held.clone(),
        })
    }

    #[cfg(test)]
    pub fn is_held(&self, section_idx: i64) -> bool {
        self.held.lock().contains_key(&section_idx)
    }
}

/// Releases its lease on drop, unless another holder has taken it over since
pub struct LeaseGuard {
    section_idx: i64,
    token: Uuid,
    held: Arc<Mutex<HashMap<i64, Lease>>>,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let mut held = self.held.lock();
        if held
            .get(&self.section_idx)
            .is_some_and(|lease| lease.token == self.token)
        {
            held.remove(&self.section_idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_refused_until_release() {
        let leases = SectionLeases::new(Duration::from_secs(60));

        let guard = leases.try_acquire(1).unwrap();
        assert!(leases.try_acquire(1).is_err());
        assert!(leases.try_acquire(2).is_ok());

        drop(guard);
        assert!(!leases.is_held(1));
        assert!(leases.try_acquire(1).is_ok());
    }

    #[test]
    fn test_stale_lease_is_taken_over_and_old_guard_does_not_release_it() {
        let leases = SectionLeases::new(Duration::ZERO);

        let stale = leases.try_acquire(1).unwrap();
        let fresh = leases.try_acquire(1).unwrap();

        drop(stale);
        assert!(leases.is_held(1));

        drop(fresh);
        assert!(!leases.is_held(1));
    }
}
