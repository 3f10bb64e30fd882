//! Whether the current user is already attached to an active match.
//!
//! The answer is derived from two independently arriving inputs (the match
//! feed and the session profile), so it has a third state for "not yet
//! known" that must never be read as "free".

use serde::Serialize;

use crate::schema::{Match, User};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Unknown,
    Committed,
    Free,
}

/// True iff `user` hosts or plays in any match of `matches`.
pub fn compute(matches: &[Match], user: &User) -> bool {
    matches
        .iter()
        .any(|m| m.is_hosted_by(user) || m.has_player(user))
}

/// Reducer over the latest snapshot and profile.
#[derive(Clone, Debug, Default)]
pub struct CommitmentTracker {
    matches: Option<Vec<Match>>,
    user: Option<User>,
}

impl CommitmentTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_snapshot(&mut self, matches: Vec<Match>) -> Commitment {
        self.matches = Some(matches);
        self.state()
    }

    pub fn on_user(&mut self, user: User) -> Commitment {
        self.user = Some(user);
        self.state()
    }

    /// Identity changed; the old profile no longer applies.
    pub fn clear_user(&mut self) -> Commitment {
        self.user = None;
        self.state()
    }

    /// A failed refresh leaves the last good answer in place.
    pub fn on_transport_failure(&self) -> Commitment {
        self.state()
    }

    pub fn state(&self) -> Commitment {
        match (&self.matches, &self.user) {
            (Some(matches), Some(user)) => {
                if compute(matches, user) {
                    Commitment::Committed
                } else {
                    Commitment::Free
                }
            }
            _ => Commitment::Unknown,
        }
    }

    pub fn matches(&self) -> Option<&[Match]> {
        self.matches.as_deref()
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }
}
