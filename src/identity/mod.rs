//! Identity and session handling: who the caller is, and how that is carried between requests.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod request_context;

pub use principal::Identity;
pub use session::{SessionCodec, SigningKey, TokenError, DEFAULT_ISSUER, MIN_KEY_LEN, SESSION_TTL_HOURS};
pub use provider::{Authenticator, LoginRequest, LoginResponse};
pub use request_context::ActorContext;
