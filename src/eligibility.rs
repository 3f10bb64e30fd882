use serde::Serialize;

use crate::commitment::Commitment;
use crate::schema::{Match, Status, User, MAX_PLAYERS};

/// Which controls a lobby row offers the current user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MatchControls {
    pub join: bool,
    pub enter: bool,
}

/// Pure predicate over `(match, user, committed)`.
pub fn controls(m: &Match, user: &User, committed: bool) -> MatchControls {
    let is_host = m.is_hosted_by(user);
    let is_player = m.has_player(user);

    MatchControls {
        join: m.status == Status::Matchmaking
            && !is_host
            && !is_player
            && m.players.len() < MAX_PLAYERS
            && !committed,
        enter: is_host || is_player,
    }
}

/// Controls while the commitment may still be unknown: nothing is offered
/// until it is.
pub fn controls_for(m: &Match, user: Option<&User>, commitment: Commitment) -> MatchControls {
    match (user, commitment) {
        (Some(user), Commitment::Committed) => controls(m, user, true),
        (Some(user), Commitment::Free) => controls(m, user, false),
        _ => MatchControls::default(),
    }
}

/// One rendered lobby row.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct LobbyEntry {
    pub id: String,
    pub status: Status,
    pub host: String,
    pub player_count: usize,
    pub capacity: usize,
    pub controls: MatchControls,
}

impl LobbyEntry {
    pub fn new(m: &Match, controls: MatchControls) -> Self {
        Self {
            id: m.id.clone(),
            status: m.status,
            host: m.host.username.clone(),
            player_count: m.players.len(),
            capacity: MAX_PLAYERS,
            controls,
        }
    }
}

pub fn entries(matches: &[Match], user: Option<&User>, commitment: Commitment) -> Vec<LobbyEntry> {
    matches
        .iter()
        .map(|m| LobbyEntry::new(m, controls_for(m, user, commitment)))
        .collect()
}
