//! Inbound request payloads and their field validation.
//!
//! Missing fields deserialize to empty values so that validation can report
//! every problem at once instead of failing on the first serde error.

use serde::Deserialize;

use crate::ids::{SessionId, UserId};

const MAX_NAME_LEN: usize = 64;
const MAX_VOTE_LEN: usize = 16;

pub trait Validate {
    /// Returns the list of human-readable problems, if any.
    fn validate(&self) -> Result<(), Vec<String>>;
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct UserInput {
    pub name: String,
    #[serde(rename = "userID")]
    pub user_id: String,
}

impl UserInput {
    fn check(&self, role: &str, errors: &mut Vec<String>) {
        let name = self.name.trim();
        if name.is_empty() {
            errors.push(format!("{role} name is required"));
        } else if name.chars().count() > MAX_NAME_LEN {
            errors.push(format!("{role} name must be at most {MAX_NAME_LEN} characters"));
        }
        if self.user_id.trim().is_empty() {
            errors.push(format!("{role} id is required"));
        }
    }

    pub fn user_id(&self) -> UserId {
        UserId::from_raw(self.user_id.trim())
    }

    pub fn display_name(&self) -> String {
        self.name.trim().to_string()
    }
}

fn check_session_id(session_id: &str, errors: &mut Vec<String>) {
    if session_id.trim().is_empty() {
        errors.push("session id is required".to_string());
    }
}

fn finish(errors: Vec<String>) -> Result<(), Vec<String>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    pub facilitator: UserInput,
}

impl Validate for StartRequest {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        self.facilitator.check("facilitator", &mut errors);
        finish(errors)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct JoinRequest {
    #[serde(rename = "sessionID")]
    pub session_id: String,
    pub user: UserInput,
}

impl JoinRequest {
    pub fn session_id(&self) -> SessionId {
        SessionId::from_raw(self.session_id.trim())
    }
}

impl Validate for JoinRequest {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        check_session_id(&self.session_id, &mut errors);
        self.user.check("user", &mut errors);
        finish(errors)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoadRequest {
    #[serde(rename = "sessionID")]
    pub session_id: String,
}

impl LoadRequest {
    pub fn session_id(&self) -> SessionId {
        SessionId::from_raw(self.session_id.trim())
    }
}

impl Validate for LoadRequest {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        check_session_id(&self.session_id, &mut errors);
        finish(errors)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct VoteRequest {
    #[serde(rename = "sessionID")]
    pub session_id: String,
    pub vote: String,
}

impl VoteRequest {
    pub fn session_id(&self) -> SessionId {
        SessionId::from_raw(self.session_id.trim())
    }
}

impl Validate for VoteRequest {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        check_session_id(&self.session_id, &mut errors);
        let vote = self.vote.trim();
        if vote.is_empty() {
            errors.push("vote is required".to_string());
        } else if vote.chars().count() > MAX_VOTE_LEN {
            errors.push(format!("vote must be at most {MAX_VOTE_LEN} characters"));
        }
        finish(errors)
    }
}

/// Payload for facilitator-only actions (show votes, clear votes).
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FacilitatorRequest {
    #[serde(rename = "sessionID")]
    pub session_id: String,
    pub facilitator_session_key: String,
}

impl FacilitatorRequest {
    pub fn session_id(&self) -> SessionId {
        SessionId::from_raw(self.session_id.trim())
    }
}

impl Validate for FacilitatorRequest {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();
        check_session_id(&self.session_id, &mut errors);
        if self.facilitator_session_key.is_empty() {
            errors.push("facilitator session key is required".to_string());
        }
        finish(errors)
    }
}
