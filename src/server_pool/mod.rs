//! Per-server connection accounting, level/group fallback, and
//! exponential-backoff quarantine (§4.3).
//!
//! `ServerPool` only answers "is server S usable right now at level L" and
//! hands out capacity reservations; it does not speak NNTP itself — the
//! actual `ARTICLE`/`BODY` exchange stays behind `nntp_rs::NntpPool`
//! (kept as the out-of-scope wire-framing collaborator), consumed by the
//! article downloader worker (C5) once it holds a [`Reservation`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::model::{NewsServer, ServerId};
use crate::retry::add_jitter;

/// Outcome of a single article fetch attempt against a reserved server,
/// fed back through [`ServerPool::release`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Success,
    /// Transient failure (timeout, connection reset): retry with backoff.
    Retry,
    /// Non-transient failure (auth failure, server refused): quarantine
    /// for the level-escalation interval so the scheduler moves on.
    HardFail,
}

/// A held unit of connection capacity on one server. Dropping it without
/// calling [`ServerPool::release`] leaks the reservation — callers must
/// always release, success or failure, via an explicit status-send call
/// rather than relying on `Drop` to infer an outcome it cannot know.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Reservation {
    pub server_id: ServerId,
    pub level: i32,
}

#[derive(Default)]
struct Quarantine {
    until: Option<Instant>,
    consecutive_failures: u32,
}

struct ServerSlot {
    info: NewsServer,
    in_flight: AtomicUsize,
    quarantine: Mutex<Quarantine>,
}

impl ServerSlot {
    fn is_quarantined(&self) -> bool {
        let q = self.quarantine.lock().expect("quarantine lock poisoned");
        q.until.is_some_and(|until| Instant::now() < until)
    }

    fn try_take(&self) -> bool {
        if !self.info.active || self.is_quarantined() {
            return false;
        }
        self.in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n < self.info.max_connections as usize {
                    Some(n + 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    fn has_spare_capacity(&self) -> bool {
        self.info.active
            && !self.is_quarantined()
            && self.in_flight.load(Ordering::SeqCst) < self.info.max_connections as usize
    }
}

/// The server pool: one [`ServerSlot`] per configured server, grouped by
/// level and declared group order.
pub struct ServerPool {
    servers: Vec<ServerSlot>,
    pools: HashMap<ServerId, nntp_rs::NntpPool>,
    base_backoff: Duration,
    max_backoff: Duration,
    hard_fail_quarantine: Duration,
}

impl ServerPool {
    /// Build a pool from configured servers paired with their already
    /// constructed NNTP connection pools (`nntp_rs::NntpPool::new` per
    /// server, built once at engine startup).
    pub fn new(entries: Vec<(NewsServer, nntp_rs::NntpPool)>) -> Self {
        Self::with_timing(
            entries,
            Duration::from_secs(1),
            Duration::from_secs(600),
            Duration::from_secs(10),
        )
    }

    pub fn with_timing(
        mut entries: Vec<(NewsServer, nntp_rs::NntpPool)>,
        base_backoff: Duration,
        max_backoff: Duration,
        hard_fail_quarantine: Duration,
    ) -> Self {
        entries.sort_by_key(|(info, _)| (info.level, info.group));
        let mut pools = HashMap::with_capacity(entries.len());
        let servers = entries
            .into_iter()
            .map(|(info, pool)| {
                pools.insert(info.id, pool);
                ServerSlot {
                    info,
                    in_flight: AtomicUsize::new(0),
                    quarantine: Mutex::new(Quarantine::default()),
                }
            })
            .collect();
        Self {
            servers,
            pools,
            base_backoff,
            max_backoff,
            hard_fail_quarantine,
        }
    }

    /// The NNTP connection pool for a reserved server, handed to C5 for
    /// the actual article fetch.
    pub fn pool_for(&self, server_id: ServerId) -> Option<&nntp_rs::NntpPool> {
        self.pools.get(&server_id)
    }

    /// Distinct fallback levels in ascending order.
    pub fn levels(&self) -> Vec<i32> {
        let mut levels: Vec<i32> = self.servers.iter().map(|s| s.info.level).collect();
        levels.sort_unstable();
        levels.dedup();
        levels
    }

    /// Attempt to reserve capacity on any usable server at `level`,
    /// trying groups in declared order. Returns `None` if every server at
    /// that level is inactive, quarantined, or saturated.
    pub fn try_reserve_at_level(&self, level: i32) -> Option<Reservation> {
        self.servers
            .iter()
            .filter(|s| s.info.level == level)
            .find(|s| s.try_take())
            .map(|s| Reservation {
                server_id: s.info.id,
                level,
            })
    }

    /// Like [`Self::try_reserve_at_level`], but skips any server id present
    /// in `excluded` — the scheduler's per-article failure set (§4.4 step 4).
    pub fn try_reserve_at_level_excluding(
        &self,
        level: i32,
        excluded: &std::collections::HashSet<crate::model::ServerId>,
    ) -> Option<Reservation> {
        self.servers
            .iter()
            .filter(|s| s.info.level == level && !excluded.contains(&s.info.id))
            .find(|s| s.try_take())
            .map(|s| Reservation {
                server_id: s.info.id,
                level,
            })
    }

    /// Whether any server at `level` currently has spare, non-quarantined
    /// capacity — used by the scheduler's level-escalation rule ("move to
    /// level L+1 only once every server below L has refused or is
    /// quarantined for this round").
    pub fn has_spare_capacity_at_level(&self, level: i32) -> bool {
        self.servers
            .iter()
            .filter(|s| s.info.level == level)
            .any(|s| s.has_spare_capacity())
    }

    /// Release a reservation, recording the fetch outcome.
    pub fn release(&self, reservation: Reservation, outcome: Outcome) {
        let Some(slot) = self.servers.iter().find(|s| s.info.id == reservation.server_id) else {
            return;
        };
        slot.in_flight.fetch_sub(1, Ordering::SeqCst);
        let mut q = slot.quarantine.lock().expect("quarantine lock poisoned");
        match outcome {
            Outcome::Success => {
                q.consecutive_failures = 0;
                q.until = None;
            }
            Outcome::Retry => {
                q.consecutive_failures += 1;
                let exp = q.consecutive_failures.saturating_sub(1).min(20);
                let raw = self.base_backoff.saturating_mul(1u32 << exp).min(self.max_backoff);
                q.until = Some(Instant::now() + add_jitter(raw).min(self.max_backoff * 2));
            }
            Outcome::HardFail => {
                q.until = Some(Instant::now() + self.hard_fail_quarantine);
            }
        }
    }

    /// Current server configuration, for diagnostics/`NZBNA_*` env var population.
    pub fn server_info(&self, server_id: ServerId) -> Option<&NewsServer> {
        self.servers.iter().find(|s| s.info.id == server_id).map(|s| &s.info)
    }

    /// Whether every configured server is present in `failed` — i.e. an
    /// article carrying this failure set has exhausted every level
    /// (§4.4 "Retry policy": "if all levels exhausted, article becomes
    /// failed").
    pub fn all_servers_exhausted(&self, failed: &std::collections::HashSet<ServerId>) -> bool {
        self.servers.iter().all(|s| failed.contains(&s.info.id))
    }

    /// Test-only constructor bypassing the real, network-backed
    /// `nntp_rs::NntpPool`, shared by this module's and the scheduler's tests.
    #[cfg(test)]
    pub(crate) fn new_for_test(mut infos: Vec<NewsServer>) -> Self {
        infos.sort_by_key(|i| (i.level, i.group));
        let servers = infos
            .into_iter()
            .map(|info| ServerSlot {
                info,
                in_flight: AtomicUsize::new(0),
                quarantine: Mutex::new(Quarantine::default()),
            })
            .collect();
        Self {
            servers,
            pools: HashMap::new(),
            base_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(50),
            hard_fail_quarantine: Duration::from_millis(20),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(id: i64, level: i32, group: i32, max_connections: u32) -> NewsServer {
        NewsServer {
            id: ServerId::new(id),
            level,
            group,
            host: "news.example.com".into(),
            port: 119,
            tls: false,
            username: None,
            password: None,
            max_connections,
            active: true,
            optional: false,
        }
    }

    fn pool_for_test(infos: Vec<NewsServer>) -> ServerPool {
        ServerPool::new_for_test(infos)
    }

    #[test]
    fn reserve_respects_max_connections() {
        let pool = pool_for_test(vec![server(1, 0, 0, 1)]);
        let first = pool.try_reserve_at_level(0);
        assert!(first.is_some());
        assert!(pool.try_reserve_at_level(0).is_none());
    }

    #[test]
    fn release_success_frees_capacity_immediately() {
        let pool = pool_for_test(vec![server(1, 0, 0, 1)]);
        let r = pool.try_reserve_at_level(0).unwrap();
        pool.release(r, Outcome::Success);
        assert!(pool.try_reserve_at_level(0).is_some());
    }

    #[test]
    fn retry_outcome_quarantines_until_backoff_elapses() {
        let pool = pool_for_test(vec![server(1, 0, 0, 1)]);
        let r = pool.try_reserve_at_level(0).unwrap();
        pool.release(r, Outcome::Retry);
        assert!(pool.try_reserve_at_level(0).is_none(), "should be quarantined immediately");
        std::thread::sleep(Duration::from_millis(60));
        assert!(pool.try_reserve_at_level(0).is_some(), "quarantine should have expired");
    }

    #[test]
    fn groups_within_a_level_are_tried_in_declared_order() {
        let pool = pool_for_test(vec![server(2, 0, 1, 1), server(1, 0, 0, 1)]);
        let r = pool.try_reserve_at_level(0).unwrap();
        assert_eq!(r.server_id, ServerId::new(1), "group 0 should be tried before group 1");
    }

    #[test]
    fn level_escalation_visibility_reflects_spare_capacity() {
        let pool = pool_for_test(vec![server(1, 0, 0, 1), server(2, 1, 0, 1)]);
        assert!(pool.has_spare_capacity_at_level(0));
        let r = pool.try_reserve_at_level(0).unwrap();
        pool.release(r, Outcome::HardFail);
        assert!(!pool.has_spare_capacity_at_level(0), "level 0 should look exhausted once quarantined");
        assert!(pool.has_spare_capacity_at_level(1), "level 1 is unaffected");
    }

    #[test]
    fn excluded_server_is_skipped_in_favor_of_next_candidate() {
        let pool = pool_for_test(vec![server(1, 0, 0, 1), server(2, 0, 1, 1)]);
        let mut excluded = std::collections::HashSet::new();
        excluded.insert(ServerId::new(1));
        let r = pool.try_reserve_at_level_excluding(0, &excluded).unwrap();
        assert_eq!(r.server_id, ServerId::new(2));
    }

    #[test]
    fn inactive_server_is_never_reserved() {
        let mut info = server(1, 0, 0, 5);
        info.active = false;
        let pool = pool_for_test(vec![info]);
        assert!(pool.try_reserve_at_level(0).is_none());
    }
}
