use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::ratelimit::RateLimiter;
use crate::{FetchError, StatsApi, StatsPayload, transport_error};

const MOJANG_PROFILE_URL: &str = "https://api.mojang.com/users/profiles/minecraft";
const HYPIXEL_PLAYER_URL: &str = "https://api.hypixel.net/player";

// Client-side limits, found by trial and error for Mojang
const MOJANG_LIMIT: (usize, Duration) = (600, Duration::from_secs(600));
const MOJANG_BURST_LIMIT: (usize, Duration) = (50, Duration::from_secs(8));
const HYPIXEL_LIMIT: (usize, Duration) = (60, Duration::from_secs(60));

// Bed Wars level curve
const PRESTIGE_XP: f64 = 487_000.0;
const EASY_LEVEL_COSTS: [f64; 4] = [500.0, 1000.0, 2000.0, 3500.0];
const LEVEL_COST: f64 = 5000.0;
const LEVELS_PER_PRESTIGE: f64 = 100.0;

/// Experience Hypixel assumes for accounts that never played
const DEFAULT_EXPERIENCE: f64 = 500.0;

// ============================================================================
// Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
struct MojangProfile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct PlayerResponse {
    success: bool,
    cause: Option<String>,
    player: Option<PlayerData>,
}

#[derive(Debug, Deserialize)]
struct PlayerData {
    displayname: Option<String>,
    #[serde(default)]
    stats: PlayerStats,
}

#[derive(Debug, Default, Deserialize)]
struct PlayerStats {
    #[serde(rename = "Bedwars")]
    bedwars: Option<BedwarsStats>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct BedwarsStats {
    #[serde(rename = "Experience")]
    experience: Option<f64>,
    final_kills_bedwars: f64,
    final_deaths_bedwars: f64,
    wins_bedwars: f64,
    games_played_bedwars: f64,
    winstreak: Option<u32>,
}

// ============================================================================
// Client
// ============================================================================

/// Username to uuid through Mojang, then Bed Wars stats through Hypixel
pub struct HypixelStatsApi {
    client: reqwest::Client,
    api_key: String,
    mojang_limit: RateLimiter,
    mojang_burst: RateLimiter,
    hypixel_limit: RateLimiter,
    /// Lowercase username -> uuid. A name only changes owner after weeks,
    /// so entries live for the whole process.
    uuids: RwLock<HashMap<String, String>>,
}

impl HypixelStatsApi {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            mojang_limit: RateLimiter::new(MOJANG_LIMIT.0, MOJANG_LIMIT.1),
            mojang_burst: RateLimiter::new(MOJANG_BURST_LIMIT.0, MOJANG_BURST_LIMIT.1),
            hypixel_limit: RateLimiter::new(HYPIXEL_LIMIT.0, HYPIXEL_LIMIT.1),
            uuids: RwLock::new(HashMap::new()),
        }
    }

    async fn uuid_for(&self, username: &str) -> Result<String, FetchError> {
        let key = username.to_lowercase();
        if let Some(uuid) = self.uuids.read().get(&key) {
            return Ok(uuid.clone());
        }

        let response = {
            let _limit = self.mojang_limit.acquire().await;
            let _burst = self.mojang_burst.acquire().await;
            self.client
                .get(format!("{}/{}", MOJANG_PROFILE_URL, username))
                .send()
                .await
                .map_err(transport_error)?
        };

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => return Err(FetchError::NotFound),
            StatusCode::TOO_MANY_REQUESTS => {
                warn!(username, "rate limited by Mojang");
                return Err(FetchError::RateLimited);
            }
            status if !status.is_success() => {
                return Err(FetchError::NetworkError(format!("Mojang returned {}", status)));
            }
            _ => {}
        }

        let profile: MojangProfile = response.json().await.map_err(transport_error)?;
        self.uuids.write().insert(key, profile.id.clone());
        Ok(profile.id)
    }

    async fn player_data(&self, uuid: &str) -> Result<PlayerResponse, FetchError> {
        let response = {
            let _limit = self.hypixel_limit.acquire().await;
            self.client
                .get(HYPIXEL_PLAYER_URL)
                .query(&[("uuid", uuid)])
                .header("API-Key", &self.api_key)
                .send()
                .await
                .map_err(transport_error)?
        };

        match response.status() {
            StatusCode::FORBIDDEN => {
                warn!("Hypixel rejected the api key");
                return Err(FetchError::InvalidApiKey);
            }
            StatusCode::TOO_MANY_REQUESTS => {
                warn!(uuid, "rate limited by Hypixel");
                return Err(FetchError::RateLimited);
            }
            status if !status.is_success() => {
                return Err(FetchError::NetworkError(format!("Hypixel returned {}", status)));
            }
            _ => {}
        }

        let body = response.text().await.map_err(transport_error)?;
        serde_json::from_str(&body).map_err(|e| FetchError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl StatsApi for HypixelStatsApi {
    async fn fetch_stats(&self, username: &str) -> Result<StatsPayload, FetchError> {
        let uuid = self.uuid_for(username).await?;
        let response = self.player_data(&uuid).await?;
        stats_from_response(username, uuid, response)
    }
}

fn stats_from_response(
    requested: &str,
    uuid: String,
    response: PlayerResponse,
) -> Result<StatsPayload, FetchError> {
    if !response.success {
        let cause = response.cause.unwrap_or_else(|| "request unsuccessful".to_string());
        return Err(FetchError::Malformed(cause));
    }

    let Some(player) = response.player else {
        return Err(FetchError::NotFound);
    };

    let username = player.displayname.unwrap_or_else(|| requested.to_string());
    if !username.eq_ignore_ascii_case(requested) {
        // The name belongs to a real account, but the player using it is nicked
        debug!(requested, actual = %username, "name resolved to another account");
        return Err(FetchError::NotFound);
    }

    let Some(bw) = player.stats.bedwars else {
        return Ok(StatsPayload {
            uuid,
            username,
            stars: 0.0,
            fkdr: 0.0,
            wlr: 0.0,
            winstreak: Some(0),
            winstreak_accurate: true,
        });
    };

    let losses = (bw.games_played_bedwars - bw.wins_bedwars).max(0.0);
    Ok(StatsPayload {
        uuid,
        username,
        stars: bedwars_level(bw.experience.unwrap_or(DEFAULT_EXPERIENCE)),
        fkdr: ratio(bw.final_kills_bedwars, bw.final_deaths_bedwars),
        wlr: ratio(bw.wins_bedwars, losses),
        winstreak: bw.winstreak,
        winstreak_accurate: bw.winstreak.is_some(),
    })
}

/// Ratio where a zero denominator yields the numerator
fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        numerator
    } else {
        numerator / denominator
    }
}

/// Bed Wars level (stars, fractional) for an amount of experience
pub fn bedwars_level(experience: f64) -> f64 {
    let experience = experience.max(0.0);
    let prestiges = (experience / PRESTIGE_XP).floor();
    let mut level = prestiges * LEVELS_PER_PRESTIGE;
    let mut remaining = experience - prestiges * PRESTIGE_XP;

    for cost in EASY_LEVEL_COSTS {
        if remaining < cost {
            return level + remaining / cost;
        }
        level += 1.0;
        remaining -= cost;
    }

    level + remaining / LEVEL_COST
}
