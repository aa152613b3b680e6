use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ConnectionId, SessionId, UserId};
use crate::token;
use crate::view::{FacilitatorView, ParticipantView, SessionView};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    pub name: String,
    #[serde(rename = "connectionID")]
    pub connection_id: ConnectionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_vote: Option<String>,
}

impl Participant {
    pub fn new(user_id: UserId, name: impl Into<String>, connection_id: ConnectionId) -> Self {
        Self {
            user_id,
            name: name.into(),
            connection_id,
            current_vote: None,
        }
    }
}

/// Shared state of one estimation round.
///
/// Every mutation must happen between acquiring the session's lock and
/// saving it back; the type itself knows nothing about locking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(rename = "sessionID")]
    pub session_id: SessionId,
    pub facilitator_session_key: String,
    #[serde(rename = "facilitatorUserID")]
    pub facilitator_user_id: UserId,
    pub votes_shown: bool,
    pub participants: Vec<Participant>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// A participant with the same user id was already present; its name and
    /// connection were replaced.
    Rejoined,
}

impl Session {
    /// Start a new session with the facilitator as its first participant.
    pub fn start(facilitator: Participant, expires_at: DateTime<Utc>) -> Self {
        Self {
            session_id: SessionId::new(),
            facilitator_session_key: token::generate(),
            facilitator_user_id: facilitator.user_id.clone(),
            votes_shown: false,
            participants: vec![facilitator],
            expires_at,
        }
    }

    pub fn join(&mut self, participant: Participant) -> JoinOutcome {
        match self
            .participants
            .iter_mut()
            .find(|p| p.user_id == participant.user_id)
        {
            Some(existing) => {
                existing.name = participant.name;
                existing.connection_id = participant.connection_id;
                JoinOutcome::Rejoined
            }
            None => {
                self.participants.push(participant);
                JoinOutcome::Joined
            }
        }
    }

    /// Record a vote for the participant on `connection_id`. Returns false if
    /// the connection is not a participant.
    pub fn record_vote(&mut self, connection_id: &ConnectionId, vote: impl Into<String>) -> bool {
        match self
            .participants
            .iter_mut()
            .find(|p| &p.connection_id == connection_id)
        {
            Some(p) => {
                p.current_vote = Some(vote.into());
                true
            }
            None => false,
        }
    }

    pub fn show_votes(&mut self) {
        self.votes_shown = true;
    }

    pub fn clear_votes(&mut self) {
        self.votes_shown = false;
        for p in &mut self.participants {
            p.current_vote = None;
        }
    }

    pub fn facilitator_key_matches(&self, provided: &str) -> bool {
        token::matches(&self.facilitator_session_key, provided)
    }

    /// Render the session as `viewer` may see it.
    pub fn view_for(&self, viewer: &ConnectionId) -> SessionView {
        let participants = self
            .participants
            .iter()
            .map(|p| {
                let is_current_user = &p.connection_id == viewer;
                let visible = self.votes_shown || is_current_user;
                ParticipantView {
                    user_id: p.user_id.clone(),
                    name: p.name.clone(),
                    current_vote: if visible { p.current_vote.clone() } else { None },
                    has_voted: p.current_vote.is_some(),
                    is_current_user,
                    is_facilitator: p.user_id == self.facilitator_user_id,
                }
            })
            .collect();

        SessionView {
            session_id: self.session_id.clone(),
            votes_shown: self.votes_shown,
            participants,
        }
    }

    /// The view plus the facilitator key; only ever sent to the facilitator.
    pub fn facilitator_view(&self, viewer: &ConnectionId) -> FacilitatorView {
        FacilitatorView {
            session: self.view_for(viewer),
            facilitator_session_key: self.facilitator_session_key.clone(),
        }
    }
}
