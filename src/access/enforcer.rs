use std::sync::Arc;

use tracing::{debug, info};

use super::matrix::{Action, EntityId, PermissionMatrix};
use crate::identity::{Identity, SessionCodec};

/// Where the entity of a request comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Fixed by the route.
    Static(EntityId),
    /// Taken from a path segment; resolved against the matrix key set during enforcement.
    Path(String),
}

/// The typed descriptor of what a request wants to do, built once per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub target: Target,
    pub action: Action,
}

impl AccessRequest {
    pub fn fixed(entity: EntityId, action: Action) -> Self {
        Self { target: Target::Static(entity), action }
    }

    pub fn from_path(raw: impl Into<String>, action: Action) -> Self {
        Self { target: Target::Path(raw.into()), action }
    }
}

/// Rejections produced by the enforcer. They stay distinct all the way to the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AccessError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("access denied")]
    Forbidden,
}

/// Proof that the enforcer allowed `action` on `entity` for `identity`.
/// Only [`Enforcer::enforce`] constructs it.
#[derive(Debug, Clone)]
pub struct Authorized {
    identity: Identity,
    entity: EntityId,
    action: Action,
}

impl Authorized {
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn entity(&self) -> &EntityId {
        &self.entity
    }

    pub fn action(&self) -> Action {
        self.action
    }
}

/// The single gate every protected operation passes through.
pub struct Enforcer {
    matrix: Arc<PermissionMatrix>,
    codec: Arc<SessionCodec>,
}

impl Enforcer {
    pub fn new(matrix: Arc<PermissionMatrix>, codec: Arc<SessionCodec>) -> Self {
        Self { matrix, codec }
    }

    pub fn matrix(&self) -> &PermissionMatrix {
        &self.matrix
    }

    /// Resolve the caller. Absent, forged and expired tokens are all `Unauthenticated`.
    pub fn authenticate(&self, token: Option<&str>) -> Result<Identity, AccessError> {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return Err(AccessError::Unauthenticated);
        };
        self.codec.verify(token).map_err(|e| {
            debug!(target: "tablegate::access", "session rejected: {e}");
            AccessError::Unauthenticated
        })
    }

    pub fn enforce(&self, token: Option<&str>, request: &AccessRequest) -> Result<Authorized, AccessError> {
        let identity = self.authenticate(token)?;
        let entity = match &request.target {
            Target::Static(e) => Some(e.clone()),
            Target::Path(raw) => self.matrix.resolve_entity(raw),
        };
        let Some(entity) = entity else {
            info!(target: "tablegate::access", login = %identity.login, role = %identity.role, action = %request.action, "denied: unknown entity");
            return Err(AccessError::Forbidden);
        };
        if !self.matrix.allowed(&identity.role, entity.as_str(), request.action) {
            info!(target: "tablegate::access", login = %identity.login, role = %identity.role, entity = %entity, action = %request.action, "denied");
            return Err(AccessError::Forbidden);
        }
        debug!(target: "tablegate::access", login = %identity.login, entity = %entity, action = %request.action, "allowed");
        Ok(Authorized { identity, entity, action: request.action })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{SigningKey, DEFAULT_ISSUER};

    fn enforcer() -> (Enforcer, Arc<SessionCodec>) {
        let codec = Arc::new(SessionCodec::new(&SigningKey::from_bytes(vec![9u8; 32]).unwrap(), DEFAULT_ISSUER));
        (Enforcer::new(Arc::new(PermissionMatrix::reference()), codec.clone()), codec)
    }

    #[test]
    fn missing_or_bad_token_is_unauthenticated() {
        let (e, _) = enforcer();
        let req = AccessRequest::from_path("repair", Action::Read);
        assert_eq!(e.enforce(None, &req).unwrap_err(), AccessError::Unauthenticated);
        assert_eq!(e.enforce(Some(""), &req).unwrap_err(), AccessError::Unauthenticated);
        assert_eq!(e.enforce(Some("x.y.z"), &req).unwrap_err(), AccessError::Unauthenticated);
    }

    #[test]
    fn expired_token_is_unauthenticated_even_for_unknown_entities() {
        let (e, codec) = enforcer();
        let stale = codec.issue_at(&Identity::new(1, "m", "manager"), 1_000).unwrap();
        let req = AccessRequest::from_path("no_such_table", Action::Create);
        assert_eq!(e.enforce(Some(&stale), &req).unwrap_err(), AccessError::Unauthenticated);
    }

    #[test]
    fn technician_updates_but_cannot_delete_repair() {
        let (e, codec) = enforcer();
        let token = codec.issue(&Identity::new(3, "tom", "technician")).unwrap();
        let ok = e.enforce(Some(&token), &AccessRequest::from_path("repair", Action::Update)).unwrap();
        assert_eq!(ok.identity().login, "tom");
        assert_eq!(ok.entity().as_str(), "repair");
        assert_eq!(ok.action(), Action::Update);
        let denied = e.enforce(Some(&token), &AccessRequest::from_path("repair", Action::Delete));
        assert_eq!(denied.unwrap_err(), AccessError::Forbidden);
    }

    #[test]
    fn unknown_path_entity_is_forbidden_once_authenticated() {
        let (e, codec) = enforcer();
        let token = codec.issue(&Identity::new(1, "m", "manager")).unwrap();
        let denied = e.enforce(Some(&token), &AccessRequest::from_path("pg_shadow", Action::Read));
        assert_eq!(denied.unwrap_err(), AccessError::Forbidden);
    }

    #[test]
    fn static_targets_skip_resolution() {
        let (e, codec) = enforcer();
        let entity = e.matrix().resolve_entity("audit_log").unwrap();
        let token = codec.issue(&Identity::new(2, "dba", "db_admin")).unwrap();
        assert!(e.enforce(Some(&token), &AccessRequest::fixed(entity.clone(), Action::Delete)).is_ok());
        let tech = codec.issue(&Identity::new(3, "tom", "technician")).unwrap();
        assert!(e.enforce(Some(&tech), &AccessRequest::fixed(entity, Action::Read)).is_err());
    }
}
