//! Role-based access control: the permission matrix and the per-request enforcer.

mod matrix;
mod enforcer;

pub use matrix::{is_identifier, Action, ActionSet, EntityId, MatrixError, PermissionMatrix};
pub use enforcer::{AccessError, AccessRequest, Authorized, Enforcer, Target};
