use std::cmp::Ordering;

use lobbyscope_types::{
    Confidence, FetchError, LobbyRoster, RankTier, RosterEntry, RowStats, ViewRow,
};

use crate::cache::StatsCache;

/// Thresholds used when annotating rows
#[derive(Clone, Debug, PartialEq)]
pub struct RankingConfig {
    /// Score at or above which a row is highlighted
    pub highlight_threshold: f64,
    /// Ascending score boundaries between rank tiers
    pub tier_thresholds: Vec<f64>,
    /// Lowest confidence at which a denicked name replaces the nickname
    pub min_confidence: Confidence,
    /// Drop final-killed players from the rows
    pub hide_dead: bool,
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            highlight_threshold: 1000.0,
            tier_thresholds: vec![50.0, 300.0, 1000.0, 3000.0],
            min_confidence: Confidence::High,
            hide_dead: false,
        }
    }
}

pub struct RankingEngine;

impl RankingEngine {
    /// Build sorted rows for the roster from whatever the cache holds.
    ///
    /// Every roster entry yields exactly one row unless `hide_dead` drops the
    /// final-killed ones. Opponents come before the party and the living before
    /// the dead. Within those groups unresolved nicks lead, then players with
    /// stats by descending score, then rows without stats. Ties keep arrival
    /// order.
    pub fn render(
        roster: &LobbyRoster,
        cache: &StatsCache,
        config: &RankingConfig,
        local_player: Option<&str>,
    ) -> Vec<ViewRow> {
        let mut rows: Vec<ViewRow> = roster
            .iter()
            .filter(|entry| !(config.hide_dead && entry.dead))
            .map(|entry| Self::row(entry, cache, config, local_player))
            .collect();

        // sort_by is stable and the roster iterates in arrival order
        rows.sort_by(compare_rows);
        rows
    }

    fn row(
        entry: &RosterEntry,
        cache: &StatsCache,
        config: &RankingConfig,
        local_player: Option<&str>,
    ) -> ViewRow {
        let record = cache.get(entry.name()).and_then(|e| e.record);

        let (identity, stats) = match record {
            None => (entry.identity.clone(), RowStats::Pending),
            Some(record) => {
                let stats = match &record.outcome {
                    Ok(stats) => RowStats::Known(stats.clone()),
                    // A mapped nick whose real account is missing is a failure, not a nick
                    Err(FetchError::NotFound)
                        if record.identity.is_nicked
                            && record.identity.resolved_real_name.is_none() =>
                    {
                        RowStats::Nicked
                    }
                    Err(e) => RowStats::Failed(e.clone()),
                };
                (record.identity.clone(), stats)
            }
        };

        let score = match &stats {
            RowStats::Known(stats) => Some(stats.skill_score()),
            _ => None,
        };
        let rank_tier = score
            .map(|s| RankTier::from_score(s, &config.tier_thresholds))
            .unwrap_or(RankTier::Unknown);

        ViewRow {
            display_name: identity.shown_name(config.min_confidence).to_string(),
            uncertain: identity.is_uncertain(config.min_confidence),
            identity,
            stats,
            score,
            rank_tier,
            highlighted: score.is_some_and(|s| s >= config.highlight_threshold),
            in_party: entry.in_party,
            is_local: local_player == Some(entry.name()),
            dead: entry.dead,
        }
    }
}

fn bucket(row: &ViewRow) -> u8 {
    match row.stats {
        RowStats::Nicked => 0,
        RowStats::Known(_) => 1,
        RowStats::Pending | RowStats::Failed(_) => 2,
    }
}

fn compare_rows(a: &ViewRow, b: &ViewRow) -> Ordering {
    a.in_party
        .cmp(&b.in_party)
        .then_with(|| a.dead.cmp(&b.dead))
        .then_with(|| bucket(a).cmp(&bucket(b)))
        .then_with(|| match (a.score, b.score) {
            (Some(a), Some(b)) => b.total_cmp(&a),
            _ => Ordering::Equal,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lobbyscope_types::{PlayerIdentity, StatsPayload, StatsRecord, StatsSource};

    fn roster(names: &[&str]) -> LobbyRoster {
        let mut roster = LobbyRoster::new();
        for name in names {
            roster.upsert(name, Utc::now());
        }
        roster
    }

    /// Install a record whose score equals `score` (stars = score, fkdr = 1)
    fn install(cache: &StatsCache, name: &str, score: f64) {
        let stats = StatsPayload {
            uuid: format!("{name}-uuid"),
            username: name.to_string(),
            stars: score,
            fkdr: 1.0,
            wlr: 1.0,
            winstreak: Some(0),
            winstreak_accurate: true,
        };
        install_outcome(cache, name, PlayerIdentity::new(name), Ok(stats));
    }

    fn install_outcome(
        cache: &StatsCache,
        name: &str,
        identity: PlayerIdentity,
        outcome: Result<StatsPayload, FetchError>,
    ) {
        cache.invalidate(name);
        let generation = cache.begin_fetch(name).unwrap();
        cache.complete(
            name,
            generation,
            StatsRecord {
                username: name.to_string(),
                requested_at: Utc::now(),
                fetched_at: Utc::now(),
                identity,
                outcome,
                source: StatsSource::Hypixel,
            },
        );
    }

    fn names(rows: &[ViewRow]) -> Vec<&str> {
        rows.iter().map(|r| r.display_name.as_str()).collect()
    }

    #[test]
    fn test_reorders_when_scores_change() {
        let roster = roster(&["Alice", "Bob"]);
        let cache = StatsCache::default();
        let config = RankingConfig::default();

        install(&cache, "Alice", 500.0);
        install(&cache, "Bob", 300.0);
        let rows = RankingEngine::render(&roster, &cache, &config, None);
        assert_eq!(names(&rows), vec!["Alice", "Bob"]);

        install(&cache, "Bob", 900.0);
        let rows = RankingEngine::render(&roster, &cache, &config, None);
        assert_eq!(names(&rows), vec!["Bob", "Alice"]);
    }

    #[test]
    fn test_render_is_deterministic() {
        let roster = roster(&["A", "B", "C", "D"]);
        let cache = StatsCache::default();
        let config = RankingConfig::default();
        install(&cache, "A", 10.0);
        install(&cache, "B", 10.0);
        install(&cache, "D", 2000.0);

        let first = RankingEngine::render(&roster, &cache, &config, None);
        let second = RankingEngine::render(&roster, &cache, &config, None);
        assert_eq!(first, second);
        assert_eq!(names(&first), vec!["D", "A", "B", "C"]);
    }

    #[test]
    fn test_pending_and_failed_rows_are_kept() {
        let roster = roster(&["Carl", "Dana", "Eve"]);
        let cache = StatsCache::default();
        install_outcome(
            &cache,
            "Carl",
            PlayerIdentity::new("Carl"),
            Err(FetchError::RateLimited),
        );
        install(&cache, "Eve", 100.0);
        cache.begin_fetch("Dana");

        let rows = RankingEngine::render(&roster, &cache, &RankingConfig::default(), None);
        assert_eq!(names(&rows), vec!["Eve", "Carl", "Dana"]);
        assert_eq!(rows[1].stats, RowStats::Failed(FetchError::RateLimited));
        assert_eq!(rows[1].rank_tier, RankTier::Unknown);
        assert_eq!(rows[2].stats, RowStats::Pending);
    }

    #[test]
    fn test_nicks_first_and_marked_uncertain() {
        let roster = roster(&["Alice", "Nicky", "Known"]);
        let cache = StatsCache::default();
        install(&cache, "Alice", 5000.0);
        install_outcome(
            &cache,
            "Nicky",
            PlayerIdentity::nicked("Nicky"),
            Err(FetchError::NotFound),
        );

        let rows = RankingEngine::render(&roster, &cache, &RankingConfig::default(), None);
        assert_eq!(names(&rows), vec!["Nicky", "Alice", "Known"]);
        assert_eq!(rows[0].stats, RowStats::Nicked);
        assert!(rows[0].uncertain);
        assert!(rows[1].highlighted);
        assert_eq!(rows[1].rank_tier, RankTier::Extreme);
    }

    #[test]
    fn test_denicked_name_needs_confidence() {
        let roster = roster(&["Nicky"]);
        let cache = StatsCache::default();
        let stats = StatsPayload {
            uuid: "real-uuid".to_string(),
            username: "RealName".to_string(),
            stars: 10.0,
            fkdr: 1.0,
            wlr: 1.0,
            winstreak: None,
            winstreak_accurate: false,
        };
        install_outcome(
            &cache,
            "Nicky",
            PlayerIdentity::denicked("Nicky", "RealName", Confidence::High),
            Ok(stats),
        );

        let trusting = RankingEngine::render(&roster, &cache, &RankingConfig::default(), None);
        assert_eq!(trusting[0].display_name, "RealName");
        assert!(!trusting[0].uncertain);

        let strict = RankingConfig {
            min_confidence: Confidence::Certain,
            ..RankingConfig::default()
        };
        let rows = RankingEngine::render(&roster, &cache, &strict, None);
        assert_eq!(rows[0].display_name, "Nicky");
        assert!(rows[0].uncertain);
    }

    #[test]
    fn test_mapped_nick_without_account_is_failed() {
        let roster = roster(&["Nicky"]);
        let cache = StatsCache::default();
        install_outcome(
            &cache,
            "Nicky",
            PlayerIdentity::denicked("Nicky", "GoneName", Confidence::Certain),
            Err(FetchError::NotFound),
        );

        let rows = RankingEngine::render(&roster, &cache, &RankingConfig::default(), None);
        assert_eq!(rows[0].display_name, "GoneName");
        assert_eq!(rows[0].stats, RowStats::Failed(FetchError::NotFound));
        assert!(!rows[0].uncertain);
    }

    #[test]
    fn test_party_sorted_last_and_local_flagged() {
        let mut roster = roster(&["Me", "Enemy"]);
        roster.set_in_party("Me", true);
        let cache = StatsCache::default();
        install(&cache, "Me", 9000.0);
        install(&cache, "Enemy", 1.0);

        let rows = RankingEngine::render(&roster, &cache, &RankingConfig::default(), Some("Me"));
        assert_eq!(names(&rows), vec!["Enemy", "Me"]);
        assert!(rows[1].is_local);
        assert!(rows[1].in_party);
    }

    #[test]
    fn test_dead_players_sink_or_hide() {
        let mut roster = roster(&["Alice", "Bob", "Carl"]);
        let cache = StatsCache::default();
        install(&cache, "Alice", 100.0);
        install(&cache, "Bob", 5000.0);
        install(&cache, "Carl", 10.0);
        roster.set_dead("Bob", true);

        let rows = RankingEngine::render(&roster, &cache, &RankingConfig::default(), None);
        assert_eq!(names(&rows), vec!["Alice", "Carl", "Bob"]);
        assert!(rows[2].dead);
        assert!(!rows[0].dead);

        let hiding = RankingConfig {
            hide_dead: true,
            ..RankingConfig::default()
        };
        let rows = RankingEngine::render(&roster, &cache, &hiding, None);
        assert_eq!(names(&rows), vec!["Alice", "Carl"]);
    }
}
