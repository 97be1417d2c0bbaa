use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

use lobbyscope_types::{CacheEntry, CacheState, FetchError, StatsPayload, StatsRecord};

/// Capacity of the completion broadcast
const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// How long each kind of outcome stays fresh
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TtlPolicy {
    pub stats: Duration,
    pub not_found: Duration,
    pub rate_limited: Duration,
    pub network_error: Duration,
}

impl Default for TtlPolicy {
    fn default() -> Self {
        Self {
            stats: Duration::from_secs(600),
            not_found: Duration::from_secs(120),
            rate_limited: Duration::from_secs(60),
            network_error: Duration::from_secs(15),
        }
    }
}

impl TtlPolicy {
    pub fn ttl_for(&self, outcome: &Result<StatsPayload, FetchError>) -> Duration {
        match outcome {
            Ok(_) => self.stats,
            Err(FetchError::NotFound) => self.not_found,
            Err(FetchError::RateLimited) => self.rate_limited,
            Err(
                FetchError::NetworkError(_)
                | FetchError::Timeout
                | FetchError::InvalidApiKey
                | FetchError::Malformed(_),
            ) => self.network_error,
        }
    }
}

/// A pending claim older than this is considered abandoned
const PENDING_TIMEOUT: Duration = Duration::from_secs(60);

/// Expired entries are kept this many TTLs before eviction
const EVICT_AFTER_TTLS: i32 = 3;

/// Lower bound on how long an expired entry is kept
const MIN_EVICTION_GRACE: Duration = Duration::from_secs(300);

/// How often `complete` sweeps out evictable entries
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default)]
struct Slot {
    record: Option<Arc<StatsRecord>>,
    expires_at: Option<DateTime<Utc>>,
    /// Past this point the slot is dropped by the next prune
    evict_at: Option<DateTime<Utc>>,
    pending_since: Option<DateTime<Utc>>,
    /// Ticket of the fetch allowed to complete this slot
    generation: u64,
}

impl Slot {
    fn state(&self, now: DateTime<Utc>) -> CacheState {
        if self.pending_since.is_some() {
            CacheState::Pending
        } else if self.expires_at.is_some_and(|at| now < at) {
            CacheState::Fresh
        } else {
            CacheState::Stale
        }
    }

    /// Nothing to show and nothing in flight
    fn is_vacant(&self) -> bool {
        self.record.is_none() && self.pending_since.is_none()
    }

    fn evictable(&self, now: DateTime<Utc>) -> bool {
        self.pending_since.is_none() && self.evict_at.is_none_or(|at| now >= at)
    }
}

#[derive(Debug)]
struct Inner {
    slots: HashMap<String, Slot>,
    /// Source of fetch tickets, unique for the life of the cache
    next_generation: u64,
    next_prune: DateTime<Utc>,
}

impl Inner {
    fn issue(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.slots.len();
        self.slots.retain(|_, slot| !slot.evictable(now));
        before - self.slots.len()
    }
}

/// Username -> latest stats record, with at-most-one fetch per name in flight.
///
/// Every claim from [`begin_fetch`](Self::begin_fetch) carries a generation.
/// Only the holder of the slot's current generation may complete it, so
/// [`invalidate`](Self::invalidate) or a reclaimed claim turns every earlier
/// fetch for that name into a no-op.
pub struct StatsCache {
    inner: RwLock<Inner>,
    policy: TtlPolicy,
    updates: broadcast::Sender<String>,
}

impl StatsCache {
    pub fn new(policy: TtlPolicy) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: RwLock::new(Inner {
                slots: HashMap::new(),
                next_generation: 0,
                next_prune: Utc::now() + to_delta(PRUNE_INTERVAL),
            }),
            policy,
            updates,
        }
    }

    pub fn policy(&self) -> &TtlPolicy {
        &self.policy
    }

    /// Current entry for a name, if it has a record or a fetch in flight
    pub fn get(&self, username: &str) -> Option<CacheEntry> {
        let now = Utc::now();
        let inner = self.inner.read();
        inner
            .slots
            .get(username)
            .filter(|slot| !slot.is_vacant())
            .map(|slot| CacheEntry {
                record: slot.record.clone(),
                state: slot.state(now),
            })
    }

    /// Whether a name has no entry or a stale one
    pub fn needs_fetch(&self, username: &str) -> bool {
        self.get(username)
            .is_none_or(|entry| entry.state == CacheState::Stale)
    }

    /// Claim the right to fetch a name.
    ///
    /// Returns a generation for exactly one caller while the entry is absent
    /// or stale. Everyone else gets `None` until that caller completes.
    pub fn begin_fetch(&self, username: &str) -> Option<u64> {
        let now = Utc::now();
        let mut inner = self.inner.write();
        let generation = inner.issue();
        let slot = inner.slots.entry(username.to_string()).or_default();

        let claim = match slot.state(now) {
            CacheState::Fresh => false,
            CacheState::Pending => {
                let abandoned = slot
                    .pending_since
                    .is_some_and(|since| now - since >= to_delta(PENDING_TIMEOUT));
                if abandoned {
                    debug!(username, "previous fetch never completed, reclaiming");
                }
                abandoned
            }
            CacheState::Stale => true,
        };

        if !claim {
            return None;
        }
        slot.pending_since = Some(now);
        slot.generation = generation;
        Some(generation)
    }

    /// Install a finished record and notify subscribers.
    ///
    /// Returns false and drops the record if `generation` is no longer the
    /// slot's current claim, i.e. the name was invalidated or reclaimed
    /// after this fetch began.
    pub fn complete(&self, username: &str, generation: u64, record: StatsRecord) -> bool {
        {
            let mut inner = self.inner.write();
            let now = Utc::now();

            let Some(slot) = inner.slots.get_mut(username) else {
                debug!(username, "dropping result for an evicted entry");
                return false;
            };
            if slot.generation != generation {
                debug!(
                    username,
                    generation,
                    current = slot.generation,
                    "dropping result from a superseded fetch"
                );
                return false;
            }

            let ttl = to_delta(self.policy.ttl_for(&record.outcome));
            let grace = ttl
                .checked_mul(EVICT_AFTER_TTLS)
                .unwrap_or(TimeDelta::MAX)
                .max(to_delta(MIN_EVICTION_GRACE));
            let expires_at = record
                .fetched_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            slot.expires_at = Some(expires_at);
            slot.evict_at = Some(
                expires_at
                    .checked_add_signed(grace)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            );
            slot.record = Some(Arc::new(record));
            slot.pending_since = None;

            if now >= inner.next_prune {
                inner.next_prune = now + to_delta(PRUNE_INTERVAL);
                let evicted = inner.prune(now);
                if evicted > 0 {
                    debug!(evicted, "pruned expired stats");
                }
            }
        }

        // No subscribers is fine
        let _ = self.updates.send(username.to_string());
        true
    }

    /// Forget a name so the next resolve fetches it again. Fetches already
    /// in flight for it will be discarded.
    pub fn invalidate(&self, username: &str) {
        let mut inner = self.inner.write();
        let generation = inner.issue();
        if let Some(slot) = inner.slots.get_mut(username) {
            *slot = Slot {
                generation,
                ..Slot::default()
            };
        }
        debug!(username, "invalidated");
    }

    /// Drop entries that have been expired for a while. Returns how many.
    pub fn prune(&self) -> usize {
        self.inner.write().prune(Utc::now())
    }

    /// Completed usernames, one message per accepted `complete`
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.updates.subscribe()
    }

    /// Number of names holding a record or a pending fetch
    pub fn len(&self) -> usize {
        self.inner
            .read()
            .slots
            .values()
            .filter(|slot| !slot.is_vacant())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for StatsCache {
    fn default() -> Self {
        Self::new(TtlPolicy::default())
    }
}

fn to_delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobbyscope_types::{Confidence, PlayerIdentity, StatsSource};
    use std::sync::Barrier;

    fn record(
        username: &str,
        requested_at: DateTime<Utc>,
        outcome: Result<StatsPayload, FetchError>,
    ) -> StatsRecord {
        StatsRecord {
            username: username.to_string(),
            requested_at,
            fetched_at: Utc::now(),
            identity: PlayerIdentity::new(username),
            outcome,
            source: StatsSource::Hypixel,
        }
    }

    fn payload(name: &str) -> StatsPayload {
        StatsPayload {
            uuid: format!("{name}-uuid"),
            username: name.to_string(),
            stars: 100.0,
            fkdr: 2.0,
            wlr: 1.0,
            winstreak: Some(3),
            winstreak_accurate: true,
        }
    }

    #[test]
    fn test_begin_fetch_single_winner() {
        let cache = StatsCache::default();
        let generation = cache.begin_fetch("Alice").unwrap();
        assert_eq!(cache.begin_fetch("Alice"), None);
        assert_eq!(cache.get("Alice").map(|e| e.state), Some(CacheState::Pending));

        assert!(cache.complete("Alice", generation, record("Alice", Utc::now(), Ok(payload("Alice")))));
        let entry = cache.get("Alice").unwrap();
        assert_eq!(entry.state, CacheState::Fresh);
        assert!(entry.record.unwrap().is_success());
        assert_eq!(cache.begin_fetch("Alice"), None);
    }

    #[test]
    fn test_begin_fetch_race_across_threads() {
        let cache = Arc::new(StatsCache::default());
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let barrier = Arc::clone(&barrier);
                std::thread::spawn(move || {
                    barrier.wait();
                    cache.begin_fetch("Carl")
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .filter_map(|h| h.join().unwrap())
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_stale_entry_served_while_refetching() {
        let policy = TtlPolicy {
            stats: Duration::ZERO,
            ..TtlPolicy::default()
        };
        let cache = StatsCache::new(policy);
        let generation = cache.begin_fetch("Alice").unwrap();
        cache.complete("Alice", generation, record("Alice", Utc::now(), Ok(payload("Alice"))));

        let entry = cache.get("Alice").unwrap();
        assert_eq!(entry.state, CacheState::Stale);
        assert!(cache.needs_fetch("Alice"));

        assert!(cache.begin_fetch("Alice").is_some());
        let entry = cache.get("Alice").unwrap();
        assert_eq!(entry.state, CacheState::Pending);
        assert!(entry.record.is_some());
    }

    #[test]
    fn test_negative_ttls() {
        let policy = TtlPolicy::default();
        assert!(
            policy.ttl_for(&Err(FetchError::RateLimited))
                > policy.ttl_for(&Err(FetchError::NetworkError("reset".into())))
        );
        assert_eq!(policy.ttl_for(&Err(FetchError::Timeout)), policy.network_error);
        assert_eq!(policy.ttl_for(&Err(FetchError::NotFound)), policy.not_found);

        let cache = StatsCache::default();
        let generation = cache.begin_fetch("Carl").unwrap();
        cache.complete("Carl", generation, record("Carl", Utc::now(), Err(FetchError::RateLimited)));
        assert_eq!(cache.get("Carl").map(|e| e.state), Some(CacheState::Fresh));
        assert_eq!(cache.begin_fetch("Carl"), None);
    }

    #[test]
    fn test_invalidate_drops_in_flight_results() {
        let cache = StatsCache::default();
        let old = cache.begin_fetch("Nick").unwrap();
        cache.invalidate("Nick");
        assert!(cache.get("Nick").is_none());
        assert!(cache.is_empty());

        assert!(!cache.complete("Nick", old, record("Nick", Utc::now(), Err(FetchError::NotFound))));
        assert!(cache.get("Nick").is_none());

        let new = cache.begin_fetch("Nick").unwrap();
        assert!(cache.complete("Nick", new, record("Nick", Utc::now(), Ok(payload("Real")))));
        assert_eq!(cache.get("Nick").map(|e| e.state), Some(CacheState::Fresh));
    }

    #[test]
    fn test_older_fetch_finishing_last_cannot_overwrite() {
        let cache = StatsCache::default();
        let old = cache.begin_fetch("Nick").unwrap();
        cache.invalidate("Nick");
        let new = cache.begin_fetch("Nick").unwrap();

        let mut denicked = record("Nick", Utc::now(), Ok(payload("Real")));
        denicked.identity = PlayerIdentity::denicked("Nick", "Real", Confidence::Certain);
        assert!(cache.complete("Nick", new, denicked));

        let mut nicked = record("Nick", Utc::now(), Err(FetchError::NotFound));
        nicked.identity = PlayerIdentity::nicked("Nick");
        assert!(!cache.complete("Nick", old, nicked));

        let record = cache.get("Nick").and_then(|e| e.record).unwrap();
        assert_eq!(record.identity.confidence, Confidence::Certain);
        assert!(record.is_success());
    }

    #[test]
    fn test_reclaimed_claim_supersedes_abandoned_fetch() {
        let cache = StatsCache::default();
        let abandoned = cache.begin_fetch("Slow").unwrap();
        cache.inner.write().slots.get_mut("Slow").unwrap().pending_since =
            Some(Utc::now() - to_delta(PENDING_TIMEOUT) - TimeDelta::seconds(1));

        let current = cache.begin_fetch("Slow").unwrap();
        assert_ne!(abandoned, current);
        assert!(!cache.complete("Slow", abandoned, record("Slow", Utc::now(), Ok(payload("Slow")))));
        assert!(cache.complete("Slow", current, record("Slow", Utc::now(), Ok(payload("Slow")))));
    }

    #[test]
    fn test_prune_evicts_long_expired_entries() {
        let cache = StatsCache::default();

        let generation = cache.begin_fetch("Old").unwrap();
        let mut old = record("Old", Utc::now(), Ok(payload("Old")));
        old.fetched_at = Utc::now() - TimeDelta::hours(2);
        cache.complete("Old", generation, old);

        let generation = cache.begin_fetch("Recent").unwrap();
        cache.complete("Recent", generation, record("Recent", Utc::now(), Ok(payload("Recent"))));
        cache.begin_fetch("InFlight");

        assert_eq!(cache.prune(), 1);
        assert!(cache.get("Old").is_none());
        assert!(cache.get("Recent").is_some());
        assert_eq!(cache.get("InFlight").map(|e| e.state), Some(CacheState::Pending));
    }

    #[test]
    fn test_subscribers_notified() {
        let cache = StatsCache::default();
        let mut rx = cache.subscribe();
        let generation = cache.begin_fetch("Alice").unwrap();
        cache.complete("Alice", generation, record("Alice", Utc::now(), Ok(payload("Alice"))));
        assert_eq!(rx.try_recv().unwrap(), "Alice");
    }
}
