use serde::{Deserialize, Serialize};

use super::request_context::ActorContext;

/// An authenticated principal. Read-only once a session token has been issued for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Identity {
    pub identity_id: i64,
    pub login: String,
    pub role: String,
}

impl Identity {
    pub fn new(identity_id: i64, login: impl Into<String>, role: impl Into<String>) -> Self {
        Self { identity_id, login: login.into(), role: role.into() }
    }

    /// The slice of the identity handed to the store for provenance stamping.
    pub fn actor(&self) -> ActorContext {
        ActorContext { role: self.role.clone(), login: self.login.clone() }
    }
}
