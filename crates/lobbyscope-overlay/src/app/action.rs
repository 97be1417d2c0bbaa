/// Corrections pushed into a running pipeline from outside the log
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    /// Map a nickname to a real account, or clear the mapping with `None`
    SetNick {
        nick: String,
        username: Option<String>,
    },
    /// Drop cached stats for a player and fetch again
    Refetch(String),
}
