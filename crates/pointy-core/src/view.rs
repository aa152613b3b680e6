//! Per-recipient renderings of a session.

use serde::{Deserialize, Serialize};

use crate::ids::{SessionId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    #[serde(rename = "userID")]
    pub user_id: UserId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_vote: Option<String>,
    pub has_voted: bool,
    pub is_current_user: bool,
    pub is_facilitator: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    #[serde(rename = "sessionID")]
    pub session_id: SessionId,
    pub votes_shown: bool,
    pub participants: Vec<ParticipantView>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacilitatorView {
    #[serde(flatten)]
    pub session: SessionView,
    pub facilitator_session_key: String,
}
