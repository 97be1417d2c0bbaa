//! Remote stats services for lobbyscope
//!
//! This crate provides the primary stats lookup (Mojang + Hypixel), the
//! optional denick/winstreak service (Antisniper), and the client-side rate
//! limiter both respect.

mod antisniper;
mod hypixel;
mod ratelimit;

use async_trait::async_trait;
use std::time::Duration;

pub use antisniper::AntisniperApi;
pub use hypixel::{HypixelStatsApi, bedwars_level};
pub use ratelimit::{RateLimitGuard, RateLimiter};

// Re-export types used in our public API
pub use lobbyscope_types::{FetchError, StatsPayload};

/// Every outbound request gives up after this long
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// What the denick service knows about a nickname
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NickResolution {
    pub real_name: Option<String>,
    /// Estimated current winstreak of the real account
    pub winstreak: Option<u32>,
}

/// Primary stats lookup: username in, Bed Wars stats out
#[async_trait]
pub trait StatsApi: Send + Sync {
    async fn fetch_stats(&self, username: &str) -> Result<StatsPayload, FetchError>;
}

/// Optional denick and winstreak estimate service
#[async_trait]
pub trait DenickApi: Send + Sync {
    /// Find the account behind a nickname
    async fn resolve_nick(&self, nick: &str) -> Result<NickResolution, FetchError>;

    /// Estimate the winstreak of a known account, by uuid or name
    async fn estimate_winstreak(&self, player: &str) -> Result<Option<u32>, FetchError>;
}

/// Shared HTTP client with the request timeout applied
pub fn http_client() -> Result<reqwest::Client, FetchError> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .user_agent(concat!("lobbyscope/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| FetchError::NetworkError(e.to_string()))
}

pub(crate) fn transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else if e.is_decode() {
        FetchError::Malformed(e.to_string())
    } else {
        FetchError::NetworkError(e.to_string())
    }
}
