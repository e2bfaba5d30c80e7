mod helpers;
mod jwt;
mod permissions;

pub use helpers::bearer_token;
pub use jwt::{Claims, JwtValidator, SUPERADMIN_ROLE, SigningKeys, TokenValidator};
pub use permissions::{UserPermissions, resolve_permissions};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    MissingToken,

    #[error("authorization must be a bearer token")]
    InvalidScheme,

    #[error("invalid token: {0}")]
    InvalidToken(String),

    #[error("token expired")]
    Expired,

    #[error("no signing key matches the token")]
    UnknownKey,
}
