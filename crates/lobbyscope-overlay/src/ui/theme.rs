/// ANSI color theme for the console table
pub struct Theme;

impl Theme {
    pub const RESET: &'static str = "\x1b[0m";
    pub const CLEAR_SCREEN: &'static str = "\x1b[2J\x1b[H";

    // Text styles
    pub const TITLE: &'static str = "\x1b[1;36m";
    pub const HEADER: &'static str = "\x1b[1m";
    pub const DIM: &'static str = "\x1b[90m";

    // Row states
    pub const HIGHLIGHT: &'static str = "\x1b[1;95m";
    pub const NICKED: &'static str = "\x1b[93m";
    pub const ERROR: &'static str = "\x1b[31m";

    // Rank tiers
    pub const TIER_LOW: &'static str = "\x1b[37m";
    pub const TIER_MEDIUM: &'static str = "\x1b[32m";
    pub const TIER_HIGH: &'static str = "\x1b[33m";
    pub const TIER_VERY_HIGH: &'static str = "\x1b[91m";
    pub const TIER_EXTREME: &'static str = "\x1b[35m";
}
