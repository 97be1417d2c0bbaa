use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::ratelimit::RateLimiter;
use crate::{DenickApi, FetchError, NickResolution, transport_error};

const DENICK_URL: &str = "https://api.antisniper.net/denick";
const WINSTREAK_URL: &str = "https://api.antisniper.net/v2/player/winstreak";

const REQUEST_LIMIT: (usize, Duration) = (100, Duration::from_secs(60));

/// Denick answers, found or not, are reused for this long
const DENICK_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Deserialize)]
struct DenickResponse {
    success: bool,
    player: Option<DenickedPlayer>,
}

#[derive(Debug, Deserialize)]
struct DenickedPlayer {
    ign: Option<String>,
    uuid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WinstreakResponse {
    success: bool,
    overall_winstreak: Option<u32>,
}

#[derive(Clone, Debug)]
struct Denicked {
    real_name: Option<String>,
    uuid: Option<String>,
}

/// Client for the Antisniper denick and winstreak endpoints
pub struct AntisniperApi {
    client: reqwest::Client,
    api_key: String,
    limiter: RateLimiter,
    /// Lowercase nick -> (looked up at, answer)
    denicks: Mutex<HashMap<String, (Instant, Denicked)>>,
}

impl AntisniperApi {
    pub fn new(client: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            client,
            api_key: api_key.into(),
            limiter: RateLimiter::new(REQUEST_LIMIT.0, REQUEST_LIMIT.1),
            denicks: Mutex::new(HashMap::new()),
        }
    }

    async fn get(&self, url: &str, params: &[(&str, &str)]) -> Result<reqwest::Response, FetchError> {
        let response = {
            let _limit = self.limiter.acquire().await;
            self.client
                .get(url)
                .query(&[("key", self.api_key.as_str())])
                .query(params)
                .send()
                .await
                .map_err(transport_error)?
        };

        match response.status() {
            StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                warn!("Antisniper rejected the api key");
                Err(FetchError::InvalidApiKey)
            }
            StatusCode::TOO_MANY_REQUESTS => Err(FetchError::RateLimited),
            _ => Ok(response),
        }
    }

    async fn denick(&self, nick: &str) -> Result<Denicked, FetchError> {
        let key = nick.to_lowercase();
        if let Some((at, cached)) = self.denicks.lock().get(&key) {
            if at.elapsed() < DENICK_CACHE_TTL {
                return Ok(cached.clone());
            }
        }

        let response = self.get(DENICK_URL, &[("nick", nick)]).await?;
        let denicked = if response.status() == StatusCode::NOT_FOUND {
            Denicked::none()
        } else if !response.status().is_success() {
            return Err(FetchError::NetworkError(format!(
                "Antisniper returned {}",
                response.status()
            )));
        } else {
            let body = response.text().await.map_err(transport_error)?;
            parse_denick(&body)?
        };

        debug!(nick, real_name = ?denicked.real_name, "denick result");
        self.denicks
            .lock()
            .insert(key, (Instant::now(), denicked.clone()));
        Ok(denicked)
    }
}

impl Denicked {
    fn none() -> Self {
        Self {
            real_name: None,
            uuid: None,
        }
    }
}

#[async_trait]
impl DenickApi for AntisniperApi {
    async fn resolve_nick(&self, nick: &str) -> Result<NickResolution, FetchError> {
        let denicked = self.denick(nick).await?;

        let winstreak = match denicked.uuid.as_deref().or(denicked.real_name.as_deref()) {
            Some(player) => self.estimate_winstreak(player).await.unwrap_or_else(|e| {
                debug!(nick, "winstreak estimate failed: {}", e);
                None
            }),
            None => None,
        };

        Ok(NickResolution {
            real_name: denicked.real_name,
            winstreak,
        })
    }

    async fn estimate_winstreak(&self, player: &str) -> Result<Option<u32>, FetchError> {
        let response = self.get(WINSTREAK_URL, &[("player", player)]).await?;
        if !response.status().is_success() {
            return Err(FetchError::NetworkError(format!(
                "Antisniper returned {}",
                response.status()
            )));
        }

        let body = response.text().await.map_err(transport_error)?;
        parse_winstreak(&body)
    }
}

fn parse_denick(body: &str) -> Result<Denicked, FetchError> {
    let response: DenickResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
    if !response.success {
        return Err(FetchError::Malformed("denick request unsuccessful".to_string()));
    }

    Ok(match response.player {
        Some(player) => Denicked {
            real_name: player.ign,
            uuid: player.uuid,
        },
        None => Denicked::none(),
    })
}

fn parse_winstreak(body: &str) -> Result<Option<u32>, FetchError> {
    let response: WinstreakResponse =
        serde_json::from_str(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
    if !response.success {
        return Err(FetchError::Malformed("winstreak request unsuccessful".to_string()));
    }
    Ok(response.overall_winstreak)
}
