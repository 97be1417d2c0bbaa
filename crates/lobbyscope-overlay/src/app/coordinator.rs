use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lobbyscope_logs::{LobbyState, LogParser};
use lobbyscope_stats::{NickDatabase, RankingConfig, RankingEngine, StatsCache, StatsResolver};
use lobbyscope_types::{LogEvent, ViewModel};

use super::Action;

/// Called whenever a manual denick changes, with `None` for a removal
pub type NickChangeHook = Box<dyn Fn(&str, Option<&str>) + Send>;

#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub ranking: RankingConfig,
    /// Quiet time before a burst of changes is rendered
    pub debounce: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ranking: RankingConfig::default(),
            debounce: Duration::from_millis(100),
        }
    }
}

/// Drives log lines through the lobby state and stats pipeline and publishes
/// view models.
pub struct Coordinator {
    state: LobbyState,
    cache: Arc<StatsCache>,
    resolver: StatsResolver,
    nicks: Arc<NickDatabase>,
    config: CoordinatorConfig,
    view_tx: watch::Sender<ViewModel>,
    on_nick_change: Option<NickChangeHook>,
    /// A render is owed
    dirty: bool,
}

impl Coordinator {
    pub fn new(
        cache: Arc<StatsCache>,
        resolver: StatsResolver,
        nicks: Arc<NickDatabase>,
        config: CoordinatorConfig,
    ) -> (Self, watch::Receiver<ViewModel>) {
        let (view_tx, view_rx) = watch::channel(ViewModel::default());
        let coordinator = Self {
            state: LobbyState::new(),
            cache,
            resolver,
            nicks,
            config,
            view_tx,
            on_nick_change: None,
            dirty: false,
        };
        (coordinator, view_rx)
    }

    pub fn with_nick_hook(mut self, hook: NickChangeHook) -> Self {
        self.on_nick_change = Some(hook);
        self
    }

    pub fn state(&self) -> &LobbyState {
        &self.state
    }

    /// Fold lines that were already in the log before we started.
    ///
    /// Nothing is fetched here. The first emit picks up whoever is still in
    /// the lobby.
    pub fn fast_forward<I, S>(&mut self, lines: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut count = 0;
        for line in lines {
            let event = LogParser::parse(line.as_ref());
            self.track_nicks(&event, false);
            self.state.apply(&event);
            count += 1;
        }

        info!(
            lines = count,
            players = self.state.roster().len(),
            own_username = ?self.state.own_username(),
            "fast-forwarded log"
        );
        self.dirty = true;
        count
    }

    /// Handle one new log line
    pub fn handle_line(&mut self, line: &str) {
        let event = LogParser::parse(line);
        if event == LogEvent::Unrecognized {
            return;
        }
        self.handle_event(&event);
    }

    fn handle_event(&mut self, event: &LogEvent) {
        self.track_nicks(event, true);

        let phase_before = self.state.phase();
        let delta = self.state.apply(event);
        let phase = self.state.phase();
        if phase != phase_before {
            info!(from = ?phase_before, to = ?phase, "lobby phase changed");
        }

        if delta.is_empty() {
            return;
        }
        if !delta.added.is_empty() {
            self.resolver.resolve(&delta.added);
        }
        self.dirty = true;
    }

    /// Keep manual denicks in sync with nick events from the log
    fn track_nicks(&mut self, event: &LogEvent, live: bool) {
        match event {
            LogEvent::NewNickname { nick } => {
                let Some(own) = self.state.own_username().map(str::to_string) else {
                    debug!(nick = %nick, "nicked before the local player was known");
                    return;
                };
                if self.nicks.get(nick).as_deref() != Some(own.as_str()) {
                    self.set_nick(nick, Some(&own), live);
                }
            }
            LogEvent::NickOverride { nick, username } => {
                self.set_nick(nick, username.as_deref(), live);
            }
            _ => {}
        }
    }

    /// Apply a user action
    pub fn apply_action(&mut self, action: Action) {
        match action {
            Action::SetNick { nick, username } => self.set_nick(&nick, username.as_deref(), true),
            Action::Refetch(username) => {
                self.cache.invalidate(&username);
                self.resolver.resolve([&username]);
                self.dirty = true;
            }
        }
    }

    fn set_nick(&mut self, nick: &str, username: Option<&str>, live: bool) {
        match username {
            Some(username) => {
                info!(nick, username, "set manual denick");
                self.nicks.set(nick, username);
            }
            None => {
                info!(nick, "removed manual denick");
                self.nicks.remove(nick);
            }
        }

        if let Some(hook) = &self.on_nick_change {
            hook(nick, username);
        }

        // Nicks match without case, so refresh every roster spelling of it
        let affected: Vec<String> = self
            .state
            .roster()
            .iter()
            .map(|entry| entry.name())
            .filter(|name| name.eq_ignore_ascii_case(nick))
            .map(str::to_string)
            .collect();

        self.cache.invalidate(nick);
        for name in affected.iter().filter(|name| name.as_str() != nick) {
            self.cache.invalidate(name);
        }
        if live && !affected.is_empty() {
            self.resolver.resolve(&affected);
        }
        self.dirty = true;
    }

    /// A fetch finished somewhere
    pub fn handle_completion(&mut self, username: &str) {
        if self.state.roster().contains(username) {
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Current view model, computed from the roster and cache
    pub fn view(&self) -> ViewModel {
        ViewModel {
            rows: RankingEngine::render(
                self.state.roster(),
                &self.cache,
                &self.config.ranking,
                self.state.own_username(),
            ),
            phase: self.state.phase(),
            out_of_sync: self.state.out_of_sync(),
        }
    }

    /// Publish the view model, then refetch anything stale or missing
    pub fn emit(&mut self) {
        let view = self.view();
        let changed = self.view_tx.send_if_modified(|current| {
            if *current == view {
                return false;
            }
            *current = view;
            true
        });
        if changed {
            debug!("published view model");
        }
        self.dirty = false;

        let stale: Vec<String> = self
            .state
            .roster()
            .iter()
            .map(|entry| entry.name())
            .filter(|name| self.cache.needs_fetch(name))
            .map(str::to_string)
            .collect();
        if !stale.is_empty() {
            self.resolver.resolve(&stale);
        }
    }

    /// Run until the line source closes or `cancel` fires
    pub async fn run(
        mut self,
        mut lines: mpsc::UnboundedReceiver<String>,
        mut actions: mpsc::UnboundedReceiver<Action>,
        cancel: CancellationToken,
    ) {
        let mut updates = self.cache.subscribe();
        let mut deadline: Option<Instant> = None;
        let mut actions_open = true;

        self.emit();

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                line = lines.recv() => match line {
                    Some(line) => self.handle_line(&line),
                    None => {
                        info!("log source closed");
                        break;
                    }
                },

                action = actions.recv(), if actions_open => match action {
                    Some(action) => self.apply_action(action),
                    None => actions_open = false,
                },

                update = updates.recv() => match update {
                    Ok(username) => self.handle_completion(&username),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "fell behind on stats updates");
                        self.dirty = true;
                    }
                    Err(RecvError::Closed) => break,
                },

                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    self.emit();
                }
            }

            if self.dirty && deadline.is_none() {
                deadline = Some(Instant::now() + self.config.debounce);
            }
        }

        if self.dirty {
            self.emit();
        }
        self.resolver.shutdown();
        debug!(phase = ?self.state.phase(), "coordinator stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lobbyscope_api::StatsApi;
    use lobbyscope_stats::{CacheState, ResolverConfig, TtlPolicy};
    use lobbyscope_types::{FetchError, LobbyPhase, RowStats, StatsPayload};
    use parking_lot::Mutex;

    const PREFIX: &str = "[12:00:00] [Client thread/INFO]: [CHAT] ";

    struct ScoreApi {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StatsApi for ScoreApi {
        async fn fetch_stats(&self, username: &str) -> Result<StatsPayload, FetchError> {
            self.calls.lock().push(username.to_string());
            Ok(StatsPayload {
                uuid: format!("{username}-uuid"),
                username: username.to_string(),
                stars: username.len() as f64 * 100.0,
                fkdr: 1.0,
                wlr: 1.0,
                winstreak: Some(0),
                winstreak_accurate: true,
            })
        }
    }

    fn coordinator() -> (Coordinator, watch::Receiver<ViewModel>, Arc<ScoreApi>) {
        coordinator_with(TtlPolicy::default())
    }

    fn coordinator_with(
        policy: TtlPolicy,
    ) -> (Coordinator, watch::Receiver<ViewModel>, Arc<ScoreApi>) {
        let api = Arc::new(ScoreApi {
            calls: Mutex::new(Vec::new()),
        });
        let cache = Arc::new(StatsCache::new(policy));
        let nicks = Arc::new(NickDatabase::new());
        let resolver = StatsResolver::new(
            Arc::clone(&cache),
            api.clone(),
            None,
            Arc::clone(&nicks),
            ResolverConfig::default(),
        );
        let (coordinator, rx) =
            Coordinator::new(cache, resolver, nicks, CoordinatorConfig::default());
        (coordinator, rx, api)
    }

    fn chat(message: &str) -> String {
        format!("{PREFIX}{message}")
    }

    #[tokio::test]
    async fn test_fast_forward_does_not_fetch() {
        let (mut coordinator, _rx, api) = coordinator();
        let lines = [
            "[11:59:00] [Client thread/INFO]: Setting user: Me".to_string(),
            chat("Alice has joined (2/16)!"),
            chat("Sending you to mini1A!"),
            chat("Bob has joined (2/16)!"),
            chat("Carl has joined (3/16)!"),
        ];

        assert_eq!(coordinator.fast_forward(&lines), 5);
        assert_eq!(coordinator.state().roster().names(), vec!["Bob", "Carl"]);
        assert_eq!(coordinator.state().own_username(), Some("Me"));
        assert!(api.calls.lock().is_empty());
        assert!(coordinator.is_dirty());
    }

    #[tokio::test]
    async fn test_view_keeps_pending_rows() {
        let (mut coordinator, _rx, _api) = coordinator();
        coordinator.handle_line(&chat("ONLINE: Alice, Bob"));

        let view = coordinator.view();
        assert_eq!(view.rows.len(), 2);
        assert_eq!(view.phase, LobbyPhase::InLobby);
        assert!(
            view.rows
                .iter()
                .all(|r| matches!(r.stats, RowStats::Pending | RowStats::Known(_)))
        );
    }

    #[tokio::test]
    async fn test_unrecognized_lines_are_ignored() {
        let (mut coordinator, _rx, _api) = coordinator();
        coordinator.handle_line("garbage");
        coordinator.handle_line(&chat("<Alice> hello"));
        assert!(!coordinator.is_dirty());
        assert!(coordinator.state().roster().is_empty());
    }

    #[tokio::test]
    async fn test_nick_override_from_chat_updates_database() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook_seen = Arc::clone(&seen);
        let hook: NickChangeHook = Box::new(move |nick: &str, username: Option<&str>| {
            hook_seen
                .lock()
                .push((nick.to_string(), username.map(str::to_string)));
        });
        let (coordinator, _rx, _api) = coordinator();
        let mut coordinator = coordinator.with_nick_hook(hook);

        coordinator.handle_line(&chat(
            "Can't find a player by the name of '!Nicky=RealName'",
        ));
        assert_eq!(coordinator.nicks.get("nicky").as_deref(), Some("RealName"));
        assert_eq!(
            seen.lock().as_slice(),
            &[("Nicky".to_string(), Some("RealName".to_string()))]
        );

        coordinator.apply_action(Action::SetNick {
            nick: "Nicky".to_string(),
            username: None,
        });
        assert_eq!(coordinator.nicks.get("Nicky"), None);
    }

    #[tokio::test]
    async fn test_own_nick_maps_to_local_player() {
        let (mut coordinator, _rx, _api) = coordinator();
        coordinator.handle_line("[11:59:00] [Client thread/INFO]: Setting user: Me");
        coordinator.handle_line(&chat("You are now nicked as Disguise!"));
        assert_eq!(coordinator.nicks.get("Disguise").as_deref(), Some("Me"));
    }

    #[tokio::test]
    async fn test_stale_rows_stay_visible_while_refetching() {
        let (mut coordinator, rx, api) = coordinator_with(TtlPolicy {
            stats: Duration::ZERO,
            ..TtlPolicy::default()
        });
        let mut updates = coordinator.cache.subscribe();

        coordinator.handle_line(&chat("ONLINE: Alice"));
        assert_eq!(updates.recv().await.unwrap(), "Alice");
        assert_eq!(
            coordinator.cache.get("Alice").unwrap().state,
            CacheState::Stale
        );

        // Publishing the stale record also queues its refresh
        coordinator.emit();
        assert!(matches!(rx.borrow().rows[0].stats, RowStats::Known(_)));
        assert_eq!(
            coordinator.cache.get("Alice").unwrap().state,
            CacheState::Pending
        );
        assert!(matches!(
            coordinator.view().rows[0].stats,
            RowStats::Known(_)
        ));

        assert_eq!(updates.recv().await.unwrap(), "Alice");
        assert_eq!(api.calls.lock().as_slice(), &["Alice", "Alice"]);
    }
}
