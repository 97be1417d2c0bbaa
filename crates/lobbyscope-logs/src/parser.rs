use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use lobbyscope_types::LogEvent;

/// Chat line prefixes (launcher_log.txt, latest.log / Lunar)
const CHAT_PREFIXES: [&str; 2] = [
    "(Client thread) Info [CHAT] ",
    "[Client thread/INFO]: [CHAT] ",
];

/// Non-chat client info prefixes (vanilla, forge, old and new Lunar)
const CLIENT_INFO_PREFIXES: [&str; 4] = [
    "(Client thread) Info ",
    "[Client thread/INFO]: ",
    "INFO]: [LC] ",
    "[Client thread/INFO]: [LC]",
];

static RANK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[a-zA-Z+]+\] ").expect("static rank regex"));

static LOBBY_FILL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\((\d+)/(\d+)\)!$").expect("static fill regex"));

/// Smallest lobby cap that can be a Bed Wars queue
const MIN_BEDWARS_PLAYER_CAP: u32 = 8;

/// Parser turning raw client log lines into lobby events
pub struct LogParser;

impl LogParser {
    /// Parse a raw log line. Never fails; unknown input is `Unrecognized`.
    pub fn parse(raw: &str) -> LogEvent {
        let line = raw.trim_end_matches(['\r', '\n']);

        // Use the chat prefix ending earliest so a player can't inject a fake
        // prefix by typing it into chat
        if let Some(end) = Self::prefix_end(line, &CHAT_PREFIXES, true) {
            return Self::parse_chat(line[end..].trim());
        }

        // Info lines are not user controlled. Some prefixes share a stem, so
        // take the one ending last.
        if let Some(end) = Self::prefix_end(line, &CLIENT_INFO_PREFIXES, false) {
            return Self::parse_client_info(line[end..].trim());
        }

        LogEvent::Unrecognized
    }

    /// Byte index right after the chosen prefix
    fn prefix_end(line: &str, prefixes: &[&str], lowest: bool) -> Option<usize> {
        let ends = prefixes
            .iter()
            .filter_map(|prefix| line.find(prefix).map(|idx| idx + prefix.len()));
        if lowest { ends.min() } else { ends.max() }
    }

    fn parse_client_info(info: &str) -> LogEvent {
        match info.strip_prefix("Setting user: ") {
            Some(name) if is_valid_username(name.trim()) => LogEvent::LocalPlayer {
                name: name.trim().to_string(),
            },
            _ => LogEvent::Unrecognized,
        }
    }

    fn parse_chat(message: &str) -> LogEvent {
        let message = remove_dedup_suffix(message);

        if let Some(listing) = message.strip_prefix("ONLINE: ") {
            // ONLINE: Player1, Player2, Player3
            let names = split_names(listing);
            if names.is_empty() {
                return LogEvent::Unrecognized;
            }
            return LogEvent::WhoListing { names };
        }

        if let Some(rest) = message.strip_prefix("You are now nicked as ") {
            return match rest.strip_suffix('!') {
                Some(nick) if is_valid_username(nick) => LogEvent::NewNickname {
                    nick: nick.to_string(),
                },
                _ => LogEvent::Unrecognized,
            };
        }

        if message.starts_with("Sending you to ")
            || message == "You were sent to a lobby because someone in your party left!"
        {
            return LogEvent::LobbySwap;
        }

        if message.starts_with("The game starts in ") {
            return LogEvent::Unrecognized;
        }

        // Also printed at the end of a game, right before "1st Killer"
        if message.starts_with("Bed Wars") {
            return LogEvent::GameStarted;
        }

        if message.ends_with("FINAL KILL!") && message.matches(' ').count() > 1 {
            // Player1 was killed by Player2. FINAL KILL!
            return match message.split(' ').next() {
                Some(name) if is_valid_username(name) => LogEvent::FinalKill {
                    name: name.to_string(),
                },
                _ => LogEvent::Unrecognized,
            };
        }

        // Player1 disconnected. / Player1 reconnected.
        match message.split_once(' ') {
            Some((name, "disconnected.")) if is_valid_username(name) => {
                return LogEvent::GameDisconnect {
                    name: name.to_string(),
                };
            }
            Some((name, "reconnected.")) if is_valid_username(name) => {
                return LogEvent::GameReconnect {
                    name: name.to_string(),
                };
            }
            _ => {}
        }

        if message.starts_with("1st Killer ") {
            return LogEvent::GameEnded;
        }

        if message.contains(" has joined (") {
            return Self::parse_lobby_join(message);
        }

        if message.contains(" has quit!") {
            // Player1 has quit!
            let words: Vec<&str> = message.split(' ').collect();
            if words.len() == 3 && words[1..] == ["has", "quit!"] && is_valid_username(words[0])
            {
                return LogEvent::PlayerDisconnected {
                    name: words[0].to_string(),
                };
            }
            return LogEvent::Unrecognized;
        }

        Self::parse_party(message)
    }

    fn parse_lobby_join(message: &str) -> LogEvent {
        // Player1 has joined (3/16)!
        let words: Vec<&str> = message.split(' ').collect();
        if words.len() != 4 || words[1..3] != ["has", "joined"] {
            return LogEvent::Unrecognized;
        }

        let Some(caps) = LOBBY_FILL_RE.captures(words[3]) else {
            debug!(fill = words[3], "lobby fill string does not match (x/N)!");
            return LogEvent::Unrecognized;
        };
        let (Ok(player_count), Ok(player_cap)) = (caps[1].parse::<u32>(), caps[2].parse::<u32>())
        else {
            return LogEvent::Unrecognized;
        };

        if player_cap < MIN_BEDWARS_PLAYER_CAP || !is_valid_username(words[0]) {
            return LogEvent::Unrecognized;
        }

        LogEvent::PlayerJoinedLobby {
            name: words[0].to_string(),
            player_count,
            player_cap,
        }
    }

    fn parse_party(message: &str) -> LogEvent {
        if message.starts_with("You left the party.")
            || message.starts_with("You are not currently in a party.")
            || message.starts_with("You have been kicked from the party by ")
            || message
                == "The party was disbanded because all invites expired and the party was empty"
        {
            return LogEvent::PartyDisbanded;
        }

        if message.contains(" has disbanded the party!") {
            // [MVP++] Player1 has disbanded the party!
            let clean = remove_ranks(message);
            let words: Vec<&str> = clean.split(' ').collect();
            if words.len() == 5 && words[1..] == ["has", "disbanded", "the", "party!"] {
                return LogEvent::PartyDisbanded;
            }
            return LogEvent::Unrecognized;
        }

        if let Some(rest) = message.strip_prefix("You have joined ") {
            // You have joined [MVP++] Player1's party!
            let Some(apostrophe) = rest.find('\'') else {
                return LogEvent::Unrecognized;
            };
            let leader = remove_ranks(&rest[..apostrophe]);
            if !is_valid_username(&leader) {
                return LogEvent::Unrecognized;
            }
            return LogEvent::PartyUpdate {
                names: vec![leader.clone()],
                party_leader: Some(leader),
            };
        }

        if let Some(rest) = message.strip_prefix("You'll be partying with: ") {
            // You'll be partying with: Player2, [MVP++] Player3
            let names = split_names(&remove_ranks(rest));
            if names.is_empty() {
                return LogEvent::Unrecognized;
            }
            return LogEvent::PartyUpdate {
                names,
                party_leader: None,
            };
        }

        if message.contains(" joined the party") {
            // [VIP+] Player1 joined the party.
            return match single_subject(message, &["joined", "the", "party."]) {
                Some(name) => LogEvent::PartyUpdate {
                    names: vec![name],
                    party_leader: None,
                },
                None => LogEvent::Unrecognized,
            };
        }

        let leave_phrases: [&[&str]; 3] = [
            &["has", "left", "the", "party."],
            &["has", "been", "removed", "from", "the", "party."],
            &[
                "was",
                "removed",
                "from",
                "the",
                "party",
                "because",
                "they",
                "disconnected",
            ],
        ];
        for phrase in leave_phrases {
            if let Some(name) = single_subject(message, phrase) {
                return LogEvent::PartyLeft { names: vec![name] };
            }
        }

        if let Some(rest) = message.strip_prefix("Kicked ") {
            // Kicked [VIP] Player1, Player2 because they were offline.
            if let Some(listing) = rest.strip_suffix(" because they were offline.") {
                let names = split_names(&remove_ranks(listing));
                if !names.is_empty() {
                    return LogEvent::PartyLeft { names };
                }
            }
            return LogEvent::Unrecognized;
        }

        if let Some(rest) = message.strip_prefix("The party was transferred to ") {
            // The party was transferred to [VIP] Player1 because [MVP++] Player2 left
            let clean = remove_ranks(rest);
            let words: Vec<&str> = clean.split(' ').collect();
            if words.len() == 4
                && words[1] == "because"
                && words[3] == "left"
                && is_valid_username(words[2])
            {
                return LogEvent::PartyLeft {
                    names: vec![words[2].to_string()],
                };
            }
            return LogEvent::Unrecognized;
        }

        if message.starts_with("Party Members (") {
            return LogEvent::PartyListIncoming;
        }

        for (prefix, is_leader) in [
            ("Party Leader: ", true),
            ("Party Moderators: ", false),
            ("Party Members: ", false),
        ] {
            if let Some(rest) = message.strip_prefix(prefix) {
                // Party Members: Player1 ● [VIP+] Player2 ●
                let clean = remove_ranks(rest).replace(" ●", "").replace(" ?", "");
                let names: Vec<String> = clean
                    .split_whitespace()
                    .filter(|name| is_valid_username(name))
                    .map(str::to_string)
                    .collect();
                if names.is_empty() {
                    return LogEvent::Unrecognized;
                }
                let party_leader = if is_leader { names.first().cloned() } else { None };
                return LogEvent::PartyUpdate {
                    names,
                    party_leader,
                };
            }
        }

        if let Some(rest) = message.strip_prefix("Can't find a player by the name of '!") {
            return Self::parse_whisper_command(rest);
        }

        LogEvent::Unrecognized
    }

    /// `/w !nick=username` shows up as a failed whisper
    fn parse_whisper_command(rest: &str) -> LogEvent {
        let Some(command) = rest.strip_suffix('\'') else {
            return LogEvent::Unrecognized;
        };
        let Some((nick, username)) = command.split_once('=') else {
            return LogEvent::Unrecognized;
        };
        if username.contains('=') || !is_valid_username(nick) {
            return LogEvent::Unrecognized;
        }

        let username = match username {
            "" => None,
            name if is_valid_username(name) => Some(name.to_string()),
            _ => return LogEvent::Unrecognized,
        };

        LogEvent::NickOverride {
            nick: nick.to_string(),
            username,
        }
    }
}

/// Minecraft names are [A-Za-z0-9_]; a few legacy accounts stretch to 20 chars
pub fn is_valid_username(name: &str) -> bool {
    (1..=20).contains(&name.len())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Strip a trailing chat dedup marker like ` [x3]`
fn remove_dedup_suffix(message: &str) -> &str {
    if let Some((head, last)) = message.rsplit_once(' ') {
        if let Some(count) = last.strip_prefix("[x").and_then(|s| s.strip_suffix(']')) {
            if !count.is_empty() && count.chars().all(|c| c.is_ascii_digit()) {
                return head;
            }
        }
    }
    message
}

fn remove_ranks(text: &str) -> String {
    RANK_RE.replace_all(text, "").into_owned()
}

/// Split a `, ` separated listing into valid usernames
fn split_names(listing: &str) -> Vec<String> {
    listing
        .split(", ")
        .map(str::trim)
        .filter(|name| is_valid_username(name))
        .map(str::to_string)
        .collect()
}

/// Match `<name> <phrase...>` after removing ranks
fn single_subject(message: &str, phrase: &[&str]) -> Option<String> {
    let clean = remove_ranks(message);
    let words: Vec<&str> = clean.split(' ').collect();
    if words.len() != phrase.len() + 1 || words[1..] != *phrase {
        return None;
    }
    is_valid_username(words[0]).then(|| words[0].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAT: &str = "[16:12:39] [Client thread/INFO]: [CHAT] ";
    const LAUNCHER_CHAT: &str = "[Info: 2021-11-29 22:17:40.417869567: GameCallbacks.cpp(162)] Game/net.minecraft.client.gui.GuiNewChat (Client thread) Info [CHAT] ";

    fn chat(message: &str) -> LogEvent {
        LogParser::parse(&format!("{CHAT}{message}"))
    }

    #[test]
    fn test_parse_lobby_join() {
        assert_eq!(
            chat("Player1 has joined (3/16)!"),
            LogEvent::PlayerJoinedLobby {
                name: "Player1".to_string(),
                player_count: 3,
                player_cap: 16,
            }
        );
    }

    #[test]
    fn test_parse_lobby_join_small_cap_is_not_bedwars() {
        assert_eq!(chat("Player1 has joined (1/4)!"), LogEvent::Unrecognized);
    }

    #[test]
    fn test_parse_who_listing_with_launcher_prefix() {
        let line = format!("{LAUNCHER_CHAT}ONLINE: Alice, Bob, Carl");
        assert_eq!(
            LogParser::parse(&line),
            LogEvent::WhoListing {
                names: vec!["Alice".into(), "Bob".into(), "Carl".into()]
            }
        );
    }

    #[test]
    fn test_parse_quit_is_disconnect() {
        assert_eq!(
            chat("Bob has quit!"),
            LogEvent::PlayerDisconnected {
                name: "Bob".to_string()
            }
        );
    }

    #[test]
    fn test_parse_lobby_swap() {
        assert_eq!(chat("Sending you to mini123AB!"), LogEvent::LobbySwap);
        assert_eq!(
            chat("You were sent to a lobby because someone in your party left!"),
            LogEvent::LobbySwap
        );
    }

    #[test]
    fn test_parse_local_player() {
        let line = "[16:54:15] [Client thread/INFO]: [LC] Setting user: YourIGN";
        assert_eq!(
            LogParser::parse(line),
            LogEvent::LocalPlayer {
                name: "YourIGN".to_string()
            }
        );
    }

    #[test]
    fn test_parse_party_messages() {
        assert_eq!(
            chat("You have joined [MVP++] Leader's party!"),
            LogEvent::PartyUpdate {
                names: vec!["Leader".into()],
                party_leader: Some("Leader".into()),
            }
        );
        assert_eq!(
            chat("You'll be partying with: Player2, [MVP++] Player3"),
            LogEvent::PartyUpdate {
                names: vec!["Player2".into(), "Player3".into()],
                party_leader: None,
            }
        );
        assert_eq!(
            chat("[VIP+] Player1 has left the party."),
            LogEvent::PartyLeft {
                names: vec!["Player1".into()]
            }
        );
        assert_eq!(
            chat("Kicked [VIP] Player1, Player2 because they were offline."),
            LogEvent::PartyLeft {
                names: vec!["Player1".into(), "Player2".into()]
            }
        );
        assert_eq!(
            chat("The party was transferred to [VIP] Player1 because [MVP++] Player2 left"),
            LogEvent::PartyLeft {
                names: vec!["Player2".into()]
            }
        );
        assert_eq!(chat("You left the party."), LogEvent::PartyDisbanded);
    }

    #[test]
    fn test_parse_party_list() {
        assert_eq!(chat("Party Members (3)"), LogEvent::PartyListIncoming);
        assert_eq!(
            chat("Party Members: Player1 ● [VIP+] Player2 ● "),
            LogEvent::PartyUpdate {
                names: vec!["Player1".into(), "Player2".into()],
                party_leader: None,
            }
        );
        assert_eq!(
            chat("Party Leader: [MVP++] Boss ●"),
            LogEvent::PartyUpdate {
                names: vec!["Boss".into()],
                party_leader: Some("Boss".into()),
            }
        );
    }

    #[test]
    fn test_parse_whisper_nick_override() {
        assert_eq!(
            chat("Can't find a player by the name of '!SomeNick=RealName'"),
            LogEvent::NickOverride {
                nick: "SomeNick".into(),
                username: Some("RealName".into()),
            }
        );
        assert_eq!(
            chat("Can't find a player by the name of '!SomeNick='"),
            LogEvent::NickOverride {
                nick: "SomeNick".into(),
                username: None,
            }
        );
        assert_eq!(
            chat("Can't find a player by the name of '!a=b=c'"),
            LogEvent::Unrecognized
        );
    }

    #[test]
    fn test_parse_dedup_suffix_removed() {
        assert_eq!(chat("Sending you to mini1A! [x2]"), LogEvent::LobbySwap);
        assert_eq!(
            chat("ONLINE: Alice, Bob [x3]"),
            LogEvent::WhoListing {
                names: vec!["Alice".into(), "Bob".into()]
            }
        );
    }

    #[test]
    fn test_injected_prefix_in_chat_is_ignored() {
        // A player typing a fake chat prefix must not produce a join event
        let line = format!("{CHAT}<Evil> [Client thread/INFO]: [CHAT] Fake has joined (2/16)!");
        assert_eq!(LogParser::parse(&line), LogEvent::Unrecognized);
    }

    #[test]
    fn test_partial_and_garbage_lines_are_unrecognized() {
        assert_eq!(LogParser::parse(""), LogEvent::Unrecognized);
        assert_eq!(LogParser::parse("[16:12:39] [Client thr"), LogEvent::Unrecognized);
        assert_eq!(chat("Player1 has joined (3/1"), LogEvent::Unrecognized);
        assert_eq!(chat("ONLINE: "), LogEvent::Unrecognized);
        assert_eq!(LogParser::parse("─────────────"), LogEvent::Unrecognized);
    }

    #[test]
    fn test_game_start_and_end() {
        assert_eq!(chat("                       Bed Wars"), LogEvent::GameStarted);
        assert_eq!(
            chat("                    1st Killer - [MVP+] Player1 - 7"),
            LogEvent::GameEnded
        );
        assert_eq!(chat("The game starts in 5 seconds!"), LogEvent::Unrecognized);
    }

    #[test]
    fn test_parse_in_game_events() {
        assert_eq!(
            chat("Player1 was spooked by Player2. FINAL KILL!"),
            LogEvent::FinalKill {
                name: "Player1".to_string()
            }
        );
        assert_eq!(chat("FINAL KILL!"), LogEvent::Unrecognized);
        assert_eq!(
            chat("Player1 disconnected."),
            LogEvent::GameDisconnect {
                name: "Player1".to_string()
            }
        );
        assert_eq!(
            chat("Player1 reconnected."),
            LogEvent::GameReconnect {
                name: "Player1".to_string()
            }
        );
        assert_eq!(chat("<Player1> disconnected."), LogEvent::Unrecognized);
    }

    #[test]
    fn test_valid_username() {
        assert!(is_valid_username("Player_1"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username("abcdefghijklmnopqrstu"));
    }
}
