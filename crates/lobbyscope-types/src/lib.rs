//! Shared types for lobbyscope
//!
//! This crate contains data structures used across multiple lobbyscope crates.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

// ============================================================================
// Log Events
// ============================================================================

/// A typed event extracted from a single client log line
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEvent {
    /// `<name> has joined (<count>/<cap>)!`
    PlayerJoinedLobby {
        name: String,
        player_count: u32,
        player_cap: u32,
    },
    /// Output of `/who`
    WhoListing { names: Vec<String> },
    /// Players joining the party, or a `/pl` role line
    PartyUpdate {
        names: Vec<String>,
        party_leader: Option<String>,
    },
    /// Players leaving or being removed from the party
    PartyLeft { names: Vec<String> },
    /// The local player's party no longer exists
    PartyDisbanded,
    /// Header of a `/pl` response; role lines follow
    PartyListIncoming,
    /// The client was moved to another server instance
    LobbySwap,
    /// `<name> has quit!`
    PlayerDisconnected { name: String },
    /// The client logged in as `name`
    LocalPlayer { name: String },
    /// The local player picked a new nickname
    NewNickname { nick: String },
    /// Manual `!nick=username` denick typed through a whisper
    NickOverride {
        nick: String,
        username: Option<String>,
    },
    GameStarted,
    /// `<name> ... FINAL KILL!`
    FinalKill { name: String },
    /// `<name> disconnected.` during a game
    GameDisconnect { name: String },
    /// `<name> reconnected.` during a game
    GameReconnect { name: String },
    GameEnded,
    Unrecognized,
}

impl LogEvent {
    /// Short name for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlayerJoinedLobby { .. } => "player_joined_lobby",
            Self::WhoListing { .. } => "who_listing",
            Self::PartyUpdate { .. } => "party_update",
            Self::PartyLeft { .. } => "party_left",
            Self::PartyDisbanded => "party_disbanded",
            Self::PartyListIncoming => "party_list_incoming",
            Self::LobbySwap => "lobby_swap",
            Self::PlayerDisconnected { .. } => "player_disconnected",
            Self::LocalPlayer { .. } => "local_player",
            Self::NewNickname { .. } => "new_nickname",
            Self::NickOverride { .. } => "nick_override",
            Self::GameStarted => "game_started",
            Self::FinalKill { .. } => "final_kill",
            Self::GameDisconnect { .. } => "game_disconnect",
            Self::GameReconnect { .. } => "game_reconnect",
            Self::GameEnded => "game_ended",
            Self::Unrecognized => "unrecognized",
        }
    }
}

// ============================================================================
// Player Identity & Roster
// ============================================================================

/// How sure we are that a nickname maps to a real account
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum Confidence {
    /// Name-pattern guess, or no mapping at all
    #[default]
    Low,
    /// Mapping returned by the denick service
    High,
    /// Mapping entered by the user
    Certain,
}

/// Who a roster name is believed to be
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PlayerIdentity {
    pub display_name: String,
    pub is_nicked: bool,
    pub resolved_real_name: Option<String>,
    pub confidence: Confidence,
}

impl PlayerIdentity {
    /// Identity of a player shown under their own name
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            is_nicked: false,
            resolved_real_name: None,
            confidence: Confidence::Certain,
        }
    }

    /// Identity of a player assumed nicked, with no known real name
    pub fn nicked(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            is_nicked: true,
            resolved_real_name: None,
            confidence: Confidence::Low,
        }
    }

    /// Identity of a nicked player with a real-name mapping
    pub fn denicked(
        display_name: impl Into<String>,
        real_name: impl Into<String>,
        confidence: Confidence,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            is_nicked: true,
            resolved_real_name: Some(real_name.into()),
            confidence,
        }
    }

    /// Name to show, substituting the real name when the mapping is trusted
    pub fn shown_name(&self, min_confidence: Confidence) -> &str {
        match &self.resolved_real_name {
            Some(real) if self.confidence >= min_confidence => real,
            _ => &self.display_name,
        }
    }

    /// Whether a nickname is shown without a trusted mapping
    pub fn is_uncertain(&self, min_confidence: Confidence) -> bool {
        self.is_nicked
            && (self.resolved_real_name.is_none() || self.confidence < min_confidence)
    }
}

/// A single player currently visible in the lobby
#[derive(Clone, Debug)]
pub struct RosterEntry {
    pub identity: PlayerIdentity,
    /// Arrival order within the current lobby instance
    pub joined_seq: u64,
    pub last_seen: DateTime<Utc>,
    pub in_party: bool,
    /// Final killed in the current game
    pub dead: bool,
}

impl RosterEntry {
    pub fn name(&self) -> &str {
        &self.identity.display_name
    }
}

/// Arrival-ordered set of players, keyed by display name
#[derive(Clone, Debug, Default)]
pub struct LobbyRoster {
    entries: Vec<RosterEntry>,
    next_seq: u64,
}

impl LobbyRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a player or refresh their last-seen time. Returns true if newly added.
    pub fn upsert(&mut self, name: &str, now: DateTime<Utc>) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name() == name) {
            entry.last_seen = now;
            return false;
        }

        self.entries.push(RosterEntry {
            identity: PlayerIdentity::new(name),
            joined_seq: self.next_seq,
            last_seen: now,
            in_party: false,
            dead: false,
        });
        self.next_seq += 1;
        true
    }

    /// Remove a player. Returns true if they were present.
    pub fn remove(&mut self, name: &str) -> bool {
        // Keep arrival order, so no swap_remove here
        match self.entries.iter().position(|e| e.name() == name) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Mark party membership for a player if present
    pub fn set_in_party(&mut self, name: &str, in_party: bool) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.name() == name) {
            entry.in_party = in_party;
        }
    }

    /// Set the final-kill flag. Returns true if the player is present and the
    /// flag changed.
    pub fn set_dead(&mut self, name: &str, dead: bool) -> bool {
        match self.entries.iter_mut().find(|e| e.name() == name) {
            Some(entry) if entry.dead != dead => {
                entry.dead = dead;
                true
            }
            _ => false,
        }
    }

    /// Remove every entry. Returns the removed names.
    pub fn clear(&mut self) -> Vec<String> {
        self.next_seq = 0;
        self.entries
            .drain(..)
            .map(|e| e.identity.display_name)
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&RosterEntry> {
        self.entries.iter().find(|e| e.name() == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RosterEntry> {
        self.entries.iter()
    }

    /// Names in arrival order
    pub fn names(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|e| e.identity.display_name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Names added/removed by folding one event into the lobby state
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RosterDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// The roster was cleared before `added` was applied
    pub reset: bool,
    /// Party membership or lobby flags changed without roster churn
    pub flags_changed: bool,
}

impl RosterDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && !self.reset && !self.flags_changed
    }
}

/// Where the client currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize)]
pub enum LobbyPhase {
    #[default]
    Idle,
    InLobby,
    InGame,
}

// ============================================================================
// Stats Types
// ============================================================================

/// Bed Wars stats of one account
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StatsPayload {
    pub uuid: String,
    /// Account name as reported by the stats service
    pub username: String,
    pub stars: f64,
    pub fkdr: f64,
    pub wlr: f64,
    pub winstreak: Option<u32>,
    /// False when `winstreak` is an estimate
    pub winstreak_accurate: bool,
}

impl StatsPayload {
    /// Skill index: stars * fkdr^2
    pub fn skill_score(&self) -> f64 {
        self.stars * self.fkdr * self.fkdr
    }
}

/// Why a stats lookup failed
#[derive(Clone, Debug, PartialEq, Eq, Serialize, thiserror::Error)]
pub enum FetchError {
    #[error("player not found")]
    NotFound,
    #[error("rate limited")]
    RateLimited,
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("request timed out")]
    Timeout,
    #[error("api key rejected")]
    InvalidApiKey,
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchError {
    /// Short badge shown in place of stats
    pub fn badge(&self) -> &'static str {
        match self {
            Self::NotFound => "NICK?",
            Self::RateLimited => "RATELIMIT",
            Self::NetworkError(_) => "NETERR",
            Self::Timeout => "TIMEOUT",
            Self::InvalidApiKey => "BADKEY",
            Self::Malformed(_) => "ERROR",
        }
    }
}

/// Which service produced a stats record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StatsSource {
    /// Mojang name lookup + Hypixel player endpoint
    Hypixel,
    /// Denicked or estimated through Antisniper
    Antisniper,
}

/// Result of one stats resolution. Never mutated after creation.
#[derive(Clone, Debug, Serialize)]
pub struct StatsRecord {
    /// Roster name the lookup was made for
    pub username: String,
    pub requested_at: DateTime<Utc>,
    pub fetched_at: DateTime<Utc>,
    pub identity: PlayerIdentity,
    pub outcome: Result<StatsPayload, FetchError>,
    pub source: StatsSource,
}

impl StatsRecord {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn stats(&self) -> Option<&StatsPayload> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&FetchError> {
        self.outcome.as_ref().err()
    }
}

/// Freshness of a cache slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum CacheState {
    Fresh,
    Stale,
    Pending,
}

/// Snapshot of one cache slot
#[derive(Clone, Debug)]
pub struct CacheEntry {
    /// Last completed record; None while the first fetch is pending
    pub record: Option<Arc<StatsRecord>>,
    pub state: CacheState,
}

// ============================================================================
// View Model
// ============================================================================

/// Coarse skill bucket used for coloring
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RankTier {
    Unknown,
    Low,
    Medium,
    High,
    VeryHigh,
    Extreme,
}

impl RankTier {
    /// Tier for a score given ascending thresholds
    pub fn from_score(score: f64, thresholds: &[f64]) -> Self {
        const TIERS: [RankTier; 5] = [
            RankTier::Low,
            RankTier::Medium,
            RankTier::High,
            RankTier::VeryHigh,
            RankTier::Extreme,
        ];
        let passed = thresholds.iter().take_while(|t| score >= **t).count();
        TIERS[passed.min(TIERS.len() - 1)]
    }
}

/// What a row shows in the stats columns
#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum RowStats {
    Known(StatsPayload),
    /// Assumed nicked with no real name found
    Nicked,
    /// No record yet
    Pending,
    Failed(FetchError),
}

/// One rendered row
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ViewRow {
    pub identity: PlayerIdentity,
    /// Real name when trusted, nickname otherwise
    pub display_name: String,
    /// Shown name is an unresolved nickname
    pub uncertain: bool,
    pub stats: RowStats,
    pub score: Option<f64>,
    pub rank_tier: RankTier,
    pub highlighted: bool,
    pub in_party: bool,
    pub is_local: bool,
    /// Final killed this game
    pub dead: bool,
}

/// Sorted, annotated snapshot handed to the renderer
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ViewModel {
    pub rows: Vec<ViewRow>,
    pub phase: LobbyPhase,
    /// Lobby join counts disagree with the tracked roster
    pub out_of_sync: bool,
}
