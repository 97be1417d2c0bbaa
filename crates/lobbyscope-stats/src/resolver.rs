use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lobbyscope_api::{DenickApi, NickResolution, StatsApi};
use lobbyscope_types::{
    Confidence, FetchError, PlayerIdentity, StatsPayload, StatsRecord, StatsSource,
};

use crate::cache::StatsCache;
use crate::nicks::NickDatabase;

/// Resolver tuning
#[derive(Clone, Debug)]
pub struct ResolverConfig {
    /// Fetches allowed in flight at once
    pub max_concurrent: usize,
    /// Ask the denick service for a winstreak when the stats hide it
    pub estimate_winstreaks: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 4,
            estimate_winstreaks: false,
        }
    }
}

/// A claimed name waiting for a fetch slot
#[derive(Debug)]
struct Job {
    username: String,
    /// Cache claim this fetch completes
    generation: u64,
    requested_at: DateTime<Utc>,
}

/// Fetches stats for names and installs the results in the cache.
///
/// Names are claimed through [`StatsCache::begin_fetch`] at submit time, then
/// admitted to the fetch pool strictly in arrival order.
pub struct StatsResolver {
    cache: Arc<StatsCache>,
    queue: mpsc::UnboundedSender<Job>,
    cancel: CancellationToken,
}

impl StatsResolver {
    /// Create a resolver and spawn its dispatcher on the current runtime
    pub fn new(
        cache: Arc<StatsCache>,
        stats_api: Arc<dyn StatsApi>,
        denick_api: Option<Arc<dyn DenickApi>>,
        nicks: Arc<NickDatabase>,
        config: ResolverConfig,
    ) -> Self {
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));

        let worker = Arc::new(Worker {
            cache: Arc::clone(&cache),
            stats_api,
            denick_api,
            nicks,
            estimate_winstreaks: config.estimate_winstreaks,
        });

        tokio::spawn(dispatch(queue_rx, semaphore, worker, cancel.clone()));

        Self {
            cache,
            queue,
            cancel,
        }
    }

    /// Queue fetches for every name that is not fresh or already pending.
    ///
    /// Returns how many fetches were queued.
    pub fn resolve<I, S>(&self, usernames: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut queued = 0;
        for username in usernames {
            let username = username.as_ref();
            let Some(generation) = self.cache.begin_fetch(username) else {
                continue;
            };

            let job = Job {
                username: username.to_string(),
                generation,
                requested_at: Utc::now(),
            };
            if self.queue.send(job).is_err() {
                warn!(username, "resolver stopped, dropping fetch");
                break;
            }
            queued += 1;
        }

        if queued > 0 {
            debug!(queued, "queued stats fetches");
        }
        queued
    }

    /// Stop admitting queued fetches. Fetches already running finish.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for StatsResolver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Admit jobs one at a time, each waiting for a free fetch slot
async fn dispatch(
    mut queue: mpsc::UnboundedReceiver<Job>,
    semaphore: Arc<Semaphore>,
    worker: Arc<Worker>,
    cancel: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            _ = cancel.cancelled() => break,
            job = queue.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let worker = Arc::clone(&worker);
        tokio::spawn(async move {
            let _permit = permit;
            worker.run(job).await;
        });
    }

    debug!("stats dispatcher stopped");
}

struct Worker {
    cache: Arc<StatsCache>,
    stats_api: Arc<dyn StatsApi>,
    denick_api: Option<Arc<dyn DenickApi>>,
    nicks: Arc<NickDatabase>,
    estimate_winstreaks: bool,
}

struct Lookup {
    identity: PlayerIdentity,
    outcome: Result<StatsPayload, FetchError>,
    source: StatsSource,
}

impl Worker {
    async fn run(&self, job: Job) {
        let lookup = self.lookup(&job.username).await;

        match &lookup.outcome {
            Ok(stats) => debug!(
                username = %job.username,
                stars = stats.stars,
                fkdr = stats.fkdr,
                "stats resolved"
            ),
            Err(FetchError::NotFound) => debug!(username = %job.username, "no stats found"),
            Err(e @ (FetchError::RateLimited | FetchError::InvalidApiKey)) => {
                warn!(username = %job.username, "stats fetch failed: {}", e)
            }
            Err(e) => info!(username = %job.username, "stats fetch failed: {}", e),
        }

        let record = StatsRecord {
            username: job.username.clone(),
            requested_at: job.requested_at,
            fetched_at: Utc::now(),
            identity: lookup.identity,
            outcome: lookup.outcome,
            source: lookup.source,
        };
        if !self.cache.complete(&job.username, job.generation, record) {
            debug!(username = %job.username, "result superseded, discarded");
        }
    }

    async fn lookup(&self, name: &str) -> Lookup {
        if let Some(real_name) = self.nicks.get(name) {
            debug!(nick = name, username = %real_name, "using manual denick");
            let outcome = match self.stats_api.fetch_stats(&real_name).await {
                Ok(stats) => Ok(self.with_estimate(stats, None).await),
                Err(e) => Err(e),
            };
            return Lookup {
                identity: PlayerIdentity::denicked(name, real_name, Confidence::Certain),
                outcome,
                source: StatsSource::Hypixel,
            };
        }

        match self.stats_api.fetch_stats(name).await {
            Ok(stats) => Lookup {
                identity: PlayerIdentity::new(name),
                outcome: Ok(self.with_estimate(stats, None).await),
                source: StatsSource::Hypixel,
            },
            // No account under this name, assume a nickname
            Err(FetchError::NotFound) => self.denick(name).await,
            Err(e) => Lookup {
                identity: PlayerIdentity::new(name),
                outcome: Err(e),
                source: StatsSource::Hypixel,
            },
        }
    }

    async fn denick(&self, nick: &str) -> Lookup {
        let unresolved = |source| Lookup {
            identity: PlayerIdentity::nicked(nick),
            outcome: Err(FetchError::NotFound),
            source,
        };

        let Some(api) = &self.denick_api else {
            return unresolved(StatsSource::Hypixel);
        };

        match api.resolve_nick(nick).await {
            Ok(NickResolution {
                real_name: Some(real_name),
                winstreak,
            }) => {
                info!(nick, username = %real_name, "denicked");
                let outcome = match self.stats_api.fetch_stats(&real_name).await {
                    Ok(stats) => Ok(self.with_estimate(stats, winstreak).await),
                    Err(e) => Err(e),
                };
                Lookup {
                    identity: PlayerIdentity::denicked(nick, real_name, Confidence::High),
                    outcome,
                    source: StatsSource::Antisniper,
                }
            }
            Ok(_) => unresolved(StatsSource::Antisniper),
            Err(e) => {
                warn!(nick, "denick failed: {}", e);
                unresolved(StatsSource::Hypixel)
            }
        }
    }

    /// Fill a hidden winstreak with an estimate when enabled
    async fn with_estimate(&self, mut stats: StatsPayload, known: Option<u32>) -> StatsPayload {
        if stats.winstreak.is_some() || !self.estimate_winstreaks {
            return stats;
        }

        let estimate = match (known, &self.denick_api) {
            (Some(winstreak), _) => Some(winstreak),
            (None, Some(api)) => match api.estimate_winstreak(&stats.uuid).await {
                Ok(estimate) => estimate,
                Err(e) => {
                    debug!(username = %stats.username, "winstreak estimate failed: {}", e);
                    None
                }
            },
            (None, None) => None,
        };

        if let Some(winstreak) = estimate {
            stats.winstreak = Some(winstreak);
            stats.winstreak_accurate = false;
        }
        stats
    }
}
