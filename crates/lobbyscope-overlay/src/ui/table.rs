use std::fmt::Write as _;
use std::io::{self, Write};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use unicode_width::UnicodeWidthStr;

use lobbyscope_types::{LobbyPhase, RankTier, RowStats, ViewModel, ViewRow};

use super::Theme;

const HEADERS: [&str; 5] = ["IGN", "Stars", "FKDR", "WLR", "WS"];

/// Plain-text lobby table, optionally colored with ANSI escapes
#[derive(Clone, Copy, Debug)]
pub struct TableRenderer {
    color: bool,
}

impl TableRenderer {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    pub fn render(&self, view: &ViewModel) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", self.title(view));

        if view.rows.is_empty() {
            return out;
        }

        let cells: Vec<[String; 5]> = view.rows.iter().map(row_cells).collect();
        let mut widths = HEADERS.map(UnicodeWidthStr::width);
        for row in &cells {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.width());
            }
        }

        let header: Vec<String> = HEADERS
            .iter()
            .zip(widths)
            .map(|(h, w)| pad(h, w))
            .collect();
        let _ = writeln!(out, "{}", self.paint(header.join("  ").trim_end(), Theme::HEADER));

        for (row, cells) in view.rows.iter().zip(&cells) {
            let line: Vec<String> = cells
                .iter()
                .zip(widths)
                .map(|(cell, w)| pad(cell, w))
                .collect();
            let line = line.join("  ");
            let _ = writeln!(out, "{}", self.paint(line.trim_end(), Theme::row_style(row)));
        }

        out
    }

    fn title(&self, view: &ViewModel) -> String {
        let mut title = match view.phase {
            LobbyPhase::Idle => "Waiting for a lobby".to_string(),
            LobbyPhase::InLobby => format!("Lobby: {} players", view.rows.len()),
            LobbyPhase::InGame => format!("In game: {} players", view.rows.len()),
        };
        if view.out_of_sync {
            title.push_str(" (out of sync, type /who)");
        }
        self.paint(&title, Theme::TITLE)
    }

    fn paint(&self, text: &str, style: &str) -> String {
        if self.color && !style.is_empty() {
            format!("{}{}{}", style, text, Theme::RESET)
        } else {
            text.to_string()
        }
    }
}

fn row_cells(row: &ViewRow) -> [String; 5] {
    let mut name = row.display_name.clone();
    if row.uncertain {
        name.push('*');
    }
    if row.in_party && !row.is_local {
        name.push_str(" (party)");
    }
    if row.dead {
        name.push_str(" (dead)");
    }

    match &row.stats {
        RowStats::Known(stats) => {
            let winstreak = match stats.winstreak {
                Some(ws) if stats.winstreak_accurate => ws.to_string(),
                Some(ws) => format!("~{}", ws),
                None => "-".to_string(),
            };
            [
                name,
                format!("{:.0}", stats.stars.floor()),
                format!("{:.2}", stats.fkdr),
                format!("{:.2}", stats.wlr),
                winstreak,
            ]
        }
        RowStats::Nicked => [name, "NICKED".to_string(), String::new(), String::new(), String::new()],
        RowStats::Pending => [name, "-".to_string(), String::new(), String::new(), String::new()],
        RowStats::Failed(e) => [name, e.badge().to_string(), String::new(), String::new(), String::new()],
    }
}

/// Left-align to a display width
fn pad(text: &str, width: usize) -> String {
    let fill = width.saturating_sub(text.width());
    format!("{}{}", text, " ".repeat(fill))
}

/// Print the table to stdout on every view change
pub async fn run_console(
    mut views: watch::Receiver<ViewModel>,
    renderer: TableRenderer,
    cancel: CancellationToken,
) -> io::Result<()> {
    loop {
        let table = renderer.render(&views.borrow_and_update());
        {
            let mut stdout = io::stdout().lock();
            if renderer.color {
                stdout.write_all(Theme::CLEAR_SCREEN.as_bytes())?;
            }
            stdout.write_all(table.as_bytes())?;
            stdout.flush()?;
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = views.changed() => {
                if changed.is_err() {
                    // Coordinator is gone
                    break;
                }
            }
        }
    }

    Ok(())
}

impl Theme {
    fn row_style(row: &ViewRow) -> &'static str {
        if row.dead {
            return Self::DIM;
        }
        if row.highlighted {
            return Self::HIGHLIGHT;
        }
        match row.stats {
            RowStats::Nicked => Self::NICKED,
            RowStats::Failed(_) => Self::ERROR,
            RowStats::Pending => Self::DIM,
            RowStats::Known(_) => Self::tier(row.rank_tier),
        }
    }

    fn tier(tier: RankTier) -> &'static str {
        match tier {
            RankTier::Unknown => "",
            RankTier::Low => Self::TIER_LOW,
            RankTier::Medium => Self::TIER_MEDIUM,
            RankTier::High => Self::TIER_HIGH,
            RankTier::VeryHigh => Self::TIER_VERY_HIGH,
            RankTier::Extreme => Self::TIER_EXTREME,
        }
    }
}
