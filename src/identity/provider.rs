use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use super::principal::Identity;
use super::session::SessionCodec;
use crate::error::AppResult;
use crate::storage::{with_timeout, CredentialStore, StoreResult};

#[derive(Clone)]
pub struct LoginRequest {
    pub login: String,
    pub password: String,
}

impl std::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginRequest").field("login", &self.login).field("password", &"<redacted>").finish()
    }
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub identity: Identity,
    pub token: String,
}

/// Verifies credentials against the credential store.
///
/// The password only ever reaches the store's one-way comparison. A missing login pays
/// for one comparison against the store's decoy hash, so both failure modes cost the same
/// and return the same `None`.
pub struct Authenticator {
    store: Arc<dyn CredentialStore>,
    timeout: Duration,
}

impl Authenticator {
    pub fn new(store: Arc<dyn CredentialStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn authenticate(&self, login: &str, password: &str) -> StoreResult<Option<Identity>> {
        let record = with_timeout(self.timeout, self.store.find_identity_by_login(login)).await?;
        match record {
            Some(rec) => {
                let ok = with_timeout(self.timeout, self.store.verify_password(&rec.password_hash, password)).await?;
                if ok {
                    Ok(Some(rec.identity))
                } else {
                    debug!(target: "tablegate::auth", login, "credentials rejected");
                    Ok(None)
                }
            }
            None => {
                let _ = with_timeout(self.timeout, self.store.verify_password(self.store.decoy_hash(), password)).await?;
                debug!(target: "tablegate::auth", login, "credentials rejected");
                Ok(None)
            }
        }
    }

    /// Authenticate and mint a session token. `Ok(None)` means bad credentials.
    pub async fn login(&self, codec: &SessionCodec, req: &LoginRequest) -> AppResult<Option<LoginResponse>> {
        let Some(identity) = self.authenticate(&req.login, &req.password).await? else {
            return Ok(None);
        };
        let token = codec.issue(&identity)?;
        info!(target: "tablegate::auth", login = %identity.login, role = %identity.role, "login");
        Ok(Some(LoginResponse { identity, token }))
    }
}
