use chrono::{DateTime, Utc};
use std::collections::HashSet;
use tracing::{debug, info};

use lobbyscope_types::{LobbyPhase, LobbyRoster, LogEvent, RosterDelta};

/// Who is currently visible, built by folding log events in order
#[derive(Debug, Default)]
pub struct LobbyState {
    roster: LobbyRoster,
    party: HashSet<String>,
    own_username: Option<String>,
    phase: LobbyPhase,
    out_of_sync: bool,
}

impl LobbyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the state
    pub fn apply(&mut self, event: &LogEvent) -> RosterDelta {
        self.apply_at(event, Utc::now())
    }

    /// Fold one event with an explicit clock
    pub fn apply_at(&mut self, event: &LogEvent, now: DateTime<Utc>) -> RosterDelta {
        let mut delta = RosterDelta::default();

        match event {
            LogEvent::PlayerJoinedLobby {
                name,
                player_count,
                player_cap,
            } => {
                self.add_player(name, now, &mut delta);
                let out_of_sync = *player_count as usize != self.roster.len();
                if out_of_sync != self.out_of_sync {
                    debug!(
                        player_count,
                        tracked = self.roster.len(),
                        "lobby sync changed"
                    );
                    self.out_of_sync = out_of_sync;
                    delta.flags_changed = true;
                }
                info!(username = %name, "joined your lobby ({player_count}/{player_cap})");
            }

            LogEvent::WhoListing { names } => {
                // A /who snapshot only ever adds. Membership can exceed what a
                // single listing shows, so absent names are kept on purpose.
                for name in names {
                    self.add_player(name, now, &mut delta);
                }
                if self.out_of_sync {
                    self.out_of_sync = false;
                    delta.flags_changed = true;
                }
                info!(count = names.len(), "updated lobby from /who");
            }

            LogEvent::PartyUpdate {
                names,
                party_leader,
            } => {
                if let Some(leader) = party_leader {
                    self.reset_party();
                    self.party.insert(leader.clone());
                }
                for name in names {
                    self.party.insert(name.clone());
                    self.add_player(name, now, &mut delta);
                }
                self.sync_party_flags();
                delta.flags_changed = true;
                info!(members = ?names, "party updated");
            }

            LogEvent::PartyLeft { names } => {
                if self
                    .own_username
                    .as_ref()
                    .is_some_and(|own| names.contains(own))
                {
                    self.reset_party();
                } else {
                    for name in names {
                        if !self.party.remove(name) {
                            debug!(username = %name, "left the party but was not in it");
                        }
                    }
                }
                self.sync_party_flags();
                delta.flags_changed = true;
            }

            LogEvent::PartyDisbanded | LogEvent::PartyListIncoming => {
                self.reset_party();
                self.sync_party_flags();
                delta.flags_changed = true;
            }

            LogEvent::LobbySwap | LogEvent::GameEnded => {
                info!(event = event.kind(), "clearing the lobby");
                self.clear_lobby(&mut delta);
            }

            LogEvent::PlayerDisconnected { name } => {
                if self.roster.remove(name) {
                    delta.removed.push(name.clone());
                    if self.roster.is_empty() {
                        self.phase = LobbyPhase::Idle;
                    }
                } else {
                    debug!(username = %name, "disconnect for a player not in the lobby");
                }
            }

            LogEvent::LocalPlayer { name } => {
                info!(username = %name, "playing as");
                self.own_username = Some(name.clone());
                self.clear_lobby(&mut delta);
                self.reset_party();
            }

            LogEvent::GameStarted => {
                if self.phase != LobbyPhase::InGame {
                    self.phase = LobbyPhase::InGame;
                    delta.flags_changed = true;
                }
            }

            LogEvent::FinalKill { name } => {
                if self.roster.set_dead(name, true) {
                    info!(username = %name, "final killed");
                    delta.flags_changed = true;
                }
            }

            LogEvent::GameReconnect { name } => {
                // A reconnecting player is back in the game even if we missed them
                self.add_player(name, now, &mut delta);
                if self.roster.set_dead(name, false) {
                    delta.flags_changed = true;
                }
                info!(username = %name, "reconnected");
            }

            LogEvent::GameDisconnect { name } => {
                debug!(username = %name, "disconnected mid-game");
            }

            LogEvent::NewNickname { .. }
            | LogEvent::NickOverride { .. }
            | LogEvent::Unrecognized => {}
        }

        delta
    }

    fn add_player(&mut self, name: &str, now: DateTime<Utc>, delta: &mut RosterDelta) {
        if self.roster.upsert(name, now) {
            self.roster.set_in_party(name, self.party.contains(name));
            delta.added.push(name.to_string());
        }
        if self.phase == LobbyPhase::Idle {
            self.phase = LobbyPhase::InLobby;
        }
    }

    fn clear_lobby(&mut self, delta: &mut RosterDelta) {
        delta.removed.extend(self.roster.clear());
        delta.reset = true;
        self.phase = LobbyPhase::Idle;
        self.out_of_sync = false;
    }

    /// The party always contains the local player when known
    fn reset_party(&mut self) {
        self.party.clear();
        if let Some(own) = &self.own_username {
            self.party.insert(own.clone());
        }
    }

    fn sync_party_flags(&mut self) {
        for name in self.roster.names() {
            let in_party = self.party.contains(&name);
            self.roster.set_in_party(&name, in_party);
        }
    }

    pub fn roster(&self) -> &LobbyRoster {
        &self.roster
    }

    pub fn party_members(&self) -> &HashSet<String> {
        &self.party
    }

    pub fn own_username(&self) -> Option<&str> {
        self.own_username.as_deref()
    }

    pub fn phase(&self) -> LobbyPhase {
        self.phase
    }

    pub fn out_of_sync(&self) -> bool {
        self.out_of_sync
    }
}
